//! The explicit context handed to every component.
//!
//! One [`SyncContext`] exists per activation: it owns a fresh snapshot, cache
//! and scheduler, and shares the long-lived collaborators.

use std::sync::Arc;

use crate::backend::{BackendRegistry, MusicLibrary};
use crate::cache::SessionCache;
use crate::config::SyncConfig;
use crate::observer::{AutoConfirmer, LaunchConfirmer, LogNotifier, Notifier};
use crate::remote::{RemoteSyncClient, StaticToken, TokenProvider};
use crate::scheduler::Scheduler;
use crate::snapshot::SharedSnapshot;

/// External collaborators, shared across activations.
#[derive(Clone)]
pub struct Collaborators {
    /// Remote backend client.
    pub remote: Arc<dyn RemoteSyncClient>,
    /// Playlist source.
    pub library: Arc<dyn MusicLibrary>,
    /// Player backends.
    pub backends: BackendRegistry,
    /// App token source.
    pub tokens: Arc<dyn TokenProvider>,
    /// Passive user notifications.
    pub notifier: Arc<dyn Notifier>,
    /// Launch prompt.
    pub confirmer: Arc<dyn LaunchConfirmer>,
}

impl Collaborators {
    /// Collaborators with no backends, no token, log-only notifications and
    /// an auto-answering launch prompt.
    pub fn new(remote: Arc<dyn RemoteSyncClient>, library: Arc<dyn MusicLibrary>) -> Self {
        Self {
            remote,
            library,
            backends: BackendRegistry::new(),
            tokens: Arc::new(StaticToken::none()),
            notifier: Arc::new(LogNotifier),
            confirmer: Arc::new(AutoConfirmer::default()),
        }
    }

    /// Use these player backends.
    #[must_use]
    pub fn with_backends(mut self, backends: BackendRegistry) -> Self {
        self.backends = backends;
        self
    }

    /// Use this token provider.
    #[must_use]
    pub fn with_tokens(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Use this notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Use this launch prompt.
    #[must_use]
    pub fn with_confirmer(mut self, confirmer: Arc<dyn LaunchConfirmer>) -> Self {
        self.confirmer = confirmer;
        self
    }
}

/// Per-activation context. Clones share everything.
#[derive(Clone)]
pub struct SyncContext {
    /// Loaded configuration.
    pub config: Arc<SyncConfig>,
    /// The data snapshot.
    pub snapshot: SharedSnapshot,
    /// Session cache.
    pub cache: SessionCache,
    /// Remote backend client.
    pub remote: Arc<dyn RemoteSyncClient>,
    /// Playlist source.
    pub library: Arc<dyn MusicLibrary>,
    /// Player backends.
    pub backends: BackendRegistry,
    /// App token source.
    pub tokens: Arc<dyn TokenProvider>,
    /// Passive user notifications.
    pub notifier: Arc<dyn Notifier>,
    /// Launch prompt.
    pub confirmer: Arc<dyn LaunchConfirmer>,
    /// Task scheduler for this activation.
    pub scheduler: Scheduler,
}

impl SyncContext {
    /// Build a fresh context: empty snapshot, empty cache, new scheduler.
    #[must_use]
    pub fn new(config: Arc<SyncConfig>, collaborators: Collaborators) -> Self {
        let cache = SessionCache::new(config.cache.clone());
        Self {
            config,
            snapshot: SharedSnapshot::new(),
            cache,
            remote: collaborators.remote,
            library: collaborators.library,
            backends: collaborators.backends,
            tokens: collaborators.tokens,
            notifier: collaborators.notifier,
            confirmer: collaborators.confirmer,
            scheduler: Scheduler::new(),
        }
    }

    /// Current app token, if any.
    #[must_use]
    pub fn app_token(&self) -> Option<String> {
        self.tokens.app_token()
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("config", &self.config)
            .field("backends", &self.backends)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
