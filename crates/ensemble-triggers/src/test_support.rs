//! Test utilities for exercising triggers without a real submission tool.
//!
//! ```ignore
//! let submitter = Arc::new(RecordingSubmitter::succeeding());
//! let mut trigger = PatternIntervalTrigger::new(handle, args, submitter.clone(), "pegasus-em")?;
//!
//! trigger.poll_once().await;
//!
//! assert_eq!(submitter.calls().len(), 1);
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::SubmitError;
use crate::traits::{SubmissionOutput, Submitter};

/// A [`Submitter`] that records every command line and answers with a fixed
/// exit code.
pub struct RecordingSubmitter {
    calls: Mutex<Vec<Vec<String>>>,
    exit_code: Mutex<i32>,
}

impl RecordingSubmitter {
    pub fn with_exit_code(exit_code: i32) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            exit_code: Mutex::new(exit_code),
        }
    }

    pub fn succeeding() -> Self {
        Self::with_exit_code(0)
    }

    pub fn failing() -> Self {
        Self::with_exit_code(1)
    }

    /// Change the exit code returned by later calls.
    pub fn set_exit_code(&self, exit_code: i32) {
        *self.exit_code.lock() = exit_code;
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    pub fn last_call(&self) -> Option<Vec<String>> {
        self.calls.lock().last().cloned()
    }
}

#[async_trait]
impl Submitter for RecordingSubmitter {
    async fn submit(&self, argv: &[String]) -> Result<SubmissionOutput, SubmitError> {
        self.calls.lock().push(argv.to_vec());
        Ok(SubmissionOutput {
            exit_code: Some(*self.exit_code.lock()),
            ..Default::default()
        })
    }
}
