/// Errors returned by [`CallDispatcher`](super::CallDispatcher) operations.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Rejected configuration, e.g. an unknown calling mode string.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The calling mode can only change while the block is not active.
    #[error("calling mode cannot change while the block is active")]
    ModeLocked,
    /// A synchronously executed call failed.
    #[error("call {call} failed: {source:#}")]
    Call {
        call: String,
        #[source]
        source: anyhow::Error,
    },
    /// A deferred call failed earlier on the evaluation worker. Delivered to
    /// whichever dispatch or readiness check came next, so `call` may be
    /// unrelated to the operation that received this error.
    #[error("deferred call {call} failed: {source:#}")]
    Deferred {
        call: String,
        #[source]
        source: anyhow::Error,
    },
    /// The evaluation worker exited after a device setup failure and the
    /// queue will never drain.
    #[error("evaluation worker stopped after device setup failure")]
    WorkerStopped,
}

impl DispatchError {
    /// Name of the call that caused this error, if any.
    #[must_use]
    pub fn call_name(&self) -> Option<&str> {
        match self {
            Self::Call { call, .. } | Self::Deferred { call, .. } => Some(call),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred { .. })
    }
}

/// A failure captured on the evaluation worker, waiting in the error slot.
#[derive(Debug)]
pub(crate) struct DeferredFailure {
    pub(crate) call: String,
    pub(crate) source: anyhow::Error,
}

impl From<DeferredFailure> for DispatchError {
    fn from(failure: DeferredFailure) -> Self {
        Self::Deferred {
            call: failure.call,
            source: failure.source,
        }
    }
}
