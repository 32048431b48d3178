//! Time-bounded calls to external collaborators.

use conveyor_core::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Wraps every store and authorizer call in a deadline.
#[derive(Debug, Clone, Copy)]
pub struct Bounded {
    timeout: Duration,
}

impl Bounded {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Await `fut`, failing with `Error::Timeout` once the deadline passes.
    pub async fn call<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "{operation} did not complete within {:?}",
                self.timeout
            ))),
        }
    }
}
