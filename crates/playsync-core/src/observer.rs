//! User-facing collaborators: passive notifications and the launch prompt.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::model::BackendKind;

/// Passive user notifications.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    /// Informational message.
    fn info(&self, message: &str);

    /// Something the user should know went wrong.
    fn warn(&self, message: &str);
}

/// Notifier that writes to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn info(&self, message: &str) {
        info!(target: "playsync_core::notify", "{}", message);
    }

    fn warn(&self, message: &str) {
        warn!(target: "playsync_core::notify", "{}", message);
    }
}

/// Asks the user which backend to launch when none is active.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LaunchConfirmer: Send + Sync {
    /// Pick one of `options`, or `None` to decline.
    async fn choose_backend(&self, options: Vec<BackendKind>) -> Option<BackendKind>;
}

/// Confirmer that answers without asking.
///
/// Picks the preferred kind when offered, otherwise the first option.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirmer {
    preferred: Option<BackendKind>,
}

impl AutoConfirmer {
    /// Confirmer preferring `kind`.
    #[must_use]
    pub const fn preferring(kind: BackendKind) -> Self {
        Self {
            preferred: Some(kind),
        }
    }
}

#[async_trait]
impl LaunchConfirmer for AutoConfirmer {
    async fn choose_backend(&self, options: Vec<BackendKind>) -> Option<BackendKind> {
        match self.preferred {
            Some(kind) if options.contains(&kind) => Some(kind),
            _ => options.first().copied(),
        }
    }
}
