use std::fmt;
use std::time::Duration;

/// Delay before retrying after the CA bundle was wiped.
pub const CA_REQUEUE_AFTER: Duration = Duration::from_secs(1);

/// Delay before retrying after an app certificate bundle was deleted.
pub const APP_CERT_REQUEUE_AFTER: Duration = Duration::from_secs(3);

/// A request to run the reconcile again after a delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requeue {
    pub reason: String,
    pub after: Duration,
}

impl fmt::Display for Requeue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (retry in {:?})", self.reason, self.after)
    }
}

/// Outcome of a reconcile pass that did not hit a hard error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled<T> {
    Ready(T),
    Requeue(Requeue),
}

impl<T> Reconciled<T> {
    pub fn requeue(reason: impl Into<String>, after: Duration) -> Self {
        Reconciled::Requeue(Requeue {
            reason: reason.into(),
            after,
        })
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Reconciled::Ready(_))
    }

    /// The requested delay, `None` when ready.
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Reconciled::Ready(_) => None,
            Reconciled::Requeue(requeue) => Some(requeue.after),
        }
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Reconciled::Ready(value) => Some(value),
            Reconciled::Requeue(_) => None,
        }
    }
}
