//! Control surface shared by a trigger worker and the dispatcher.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use super::super::types::{SubmissionRecord, TriggerKey, TriggerState};

/// Identity, cancellation flag, published state and outbound channels of one
/// trigger.
///
/// Cloning is cheap; the worker owns one clone and the dispatcher's registry
/// another. Neither side ever touches the other's state directly: the worker
/// reports exits and submissions through the two unbounded channels, which
/// makes every method here callable from any thread without awaiting.
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    ensemble: String,
    trigger_name: String,
    key: TriggerKey,
    stop: Arc<watch::Sender<bool>>,
    state: Arc<watch::Sender<TriggerState>>,
    checkout: mpsc::UnboundedSender<TriggerKey>,
    submitted: mpsc::UnboundedSender<SubmissionRecord>,
}

impl TriggerHandle {
    /// Create a handle with its cancellation flag cleared and its state
    /// [`Idle`](TriggerState::Idle).
    ///
    /// - `checkout`: worker-exit channel read by the dispatcher
    /// - `submitted`: submission-record channel read by the dispatcher
    pub fn new(
        ensemble: impl Into<String>,
        trigger_name: impl Into<String>,
        checkout: mpsc::UnboundedSender<TriggerKey>,
        submitted: mpsc::UnboundedSender<SubmissionRecord>,
    ) -> Self {
        let ensemble = ensemble.into();
        let trigger_name = trigger_name.into();
        let key = TriggerKey::new(&ensemble, &trigger_name);
        let (stop, _) = watch::channel(false);
        let (state, _) = watch::channel(TriggerState::Idle);
        Self {
            ensemble,
            trigger_name,
            key,
            stop: Arc::new(stop),
            state: Arc::new(state),
            checkout,
            submitted,
        }
    }

    pub fn ensemble(&self) -> &str {
        &self.ensemble
    }

    pub fn key(&self) -> &TriggerKey {
        &self.key
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    /// Last state published by the worker.
    pub fn state(&self) -> TriggerState {
        *self.state.borrow()
    }

    /// Publish a state transition. Called by the worker.
    pub fn set_state(&self, state: TriggerState) {
        self.state.send_replace(state);
    }

    /// Set the cancellation flag and announce this trigger on the checkout
    /// channel.
    ///
    /// The announcement is a declaration of intent: the worker may still be
    /// finishing a submission. Join the worker task to observe termination.
    pub fn shutdown(&self) {
        self.stop.send_replace(true);
        if self.checkout.send(self.key.clone()).is_err() {
            tracing::debug!(key = %self.key, "dispatcher gone, checkout not delivered");
        }
    }

    /// Report a successful submission to the dispatcher.
    pub fn update_submitted_workflows(&self, workflow_name: &str) {
        let record = SubmissionRecord {
            ensemble: self.ensemble.clone(),
            trigger_name: self.trigger_name.clone(),
            workflow_name: workflow_name.to_string(),
        };
        if self.submitted.send(record).is_err() {
            tracing::warn!(
                key = %self.key,
                workflow = %workflow_name,
                "dispatcher gone, submission record dropped"
            );
        }
    }

    /// Resolve once the cancellation flag is set.
    pub async fn stopped(&self) {
        let mut rx = self.stop.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn make_handle() -> (
        TriggerHandle,
        mpsc::UnboundedReceiver<TriggerKey>,
        mpsc::UnboundedReceiver<SubmissionRecord>,
    ) {
        let (checkout_tx, checkout_rx) = mpsc::unbounded_channel();
        let (submitted_tx, submitted_rx) = mpsc::unbounded_channel();
        let handle = TriggerHandle::new("ens", "t", checkout_tx, submitted_tx);
        (handle, checkout_rx, submitted_rx)
    }

    #[test]
    fn test_shutdown_sets_flag_and_checks_out() {
        let (handle, mut checkout_rx, _) = make_handle();
        assert!(!handle.is_stop_requested());

        handle.shutdown();

        assert!(handle.is_stop_requested());
        assert_eq!(checkout_rx.try_recv().unwrap(), TriggerKey::new("ens", "t"));
        assert!(checkout_rx.try_recv().is_err(), "exactly one checkout");
    }

    #[test]
    fn test_each_shutdown_call_checks_out_once() {
        let (handle, mut checkout_rx, _) = make_handle();
        handle.shutdown();
        handle.clone().shutdown();

        assert!(checkout_rx.try_recv().is_ok());
        assert!(checkout_rx.try_recv().is_ok());
        assert!(checkout_rx.try_recv().is_err());
    }

    #[test]
    fn test_update_submitted_workflows() {
        let (handle, _, mut submitted_rx) = make_handle();
        handle.update_submitted_workflows("test_workflow");

        assert_eq!(
            submitted_rx.try_recv().unwrap(),
            SubmissionRecord {
                ensemble: "ens".into(),
                trigger_name: "t".into(),
                workflow_name: "test_workflow".into(),
            }
        );
    }

    #[test]
    fn test_shutdown_without_dispatcher_does_not_panic() {
        let (handle, checkout_rx, submitted_rx) = make_handle();
        drop(checkout_rx);
        drop(submitted_rx);

        handle.shutdown();
        handle.update_submitted_workflows("orphan");
        assert!(handle.is_stop_requested());
    }

    #[test]
    fn test_state_visible_through_clones() {
        let (handle, _, _) = make_handle();
        let observer = handle.clone();
        assert_eq!(observer.state(), TriggerState::Idle);

        handle.set_state(TriggerState::Polling);
        assert_eq!(observer.state(), TriggerState::Polling);
    }

    #[tokio::test]
    async fn test_stopped_resolves_after_shutdown() {
        let (handle, _checkout_rx, _) = make_handle();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.stopped().await });

        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("should not timeout")
            .expect("task completes");
    }

    #[tokio::test]
    async fn test_stopped_resolves_immediately_when_already_set() {
        let (handle, _checkout_rx, _) = make_handle();
        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle.stopped())
            .await
            .expect("already stopped");
    }
}
