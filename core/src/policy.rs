use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// How an integration point reacts when its backend is unavailable.
///
/// `FailOpen` swallows the error and lets the caller continue with a
/// neutral value (cache miss, skipped notification). `FailClosed` hands the
/// error back so the request aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    FailOpen,
    FailClosed,
}

impl FailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            FailurePolicy::FailOpen => "fail_open",
            FailurePolicy::FailClosed => "fail_closed",
        }
    }

    /// Apply the policy to a fallible result.
    ///
    /// Under `FailOpen` an error becomes `Ok(fallback)`; under `FailClosed`
    /// it is returned untouched. Swallowed errors are logged at warn level
    /// under the given integration name.
    pub fn apply<T, E: Display>(
        self,
        integration: &str,
        result: Result<T, E>,
        fallback: T,
    ) -> Result<T, E> {
        match (self, result) {
            (_, Ok(value)) => Ok(value),
            (FailurePolicy::FailOpen, Err(err)) => {
                tracing::warn!(
                    integration = integration,
                    policy = self.as_str(),
                    error = %err,
                    "integration unavailable, continuing with fallback"
                );
                Ok(fallback)
            }
            (FailurePolicy::FailClosed, Err(err)) => Err(err),
        }
    }
}

/// Per-integration policies used by the feedback and chat pipelines.
pub mod defaults {
    use super::FailurePolicy;

    pub const RESPONSE_CACHE: FailurePolicy = FailurePolicy::FailOpen;
    pub const KNOWLEDGE_RETRIEVAL: FailurePolicy = FailurePolicy::FailOpen;
    pub const IN_APP_NOTIFICATION: FailurePolicy = FailurePolicy::FailOpen;
    pub const PUSH_DELIVERY: FailurePolicy = FailurePolicy::FailOpen;
    pub const FEEDBACK_PERSISTENCE: FailurePolicy = FailurePolicy::FailClosed;
}
