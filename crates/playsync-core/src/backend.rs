//! Player backends and the music library.
//!
//! Vendor SDK calls live behind these traits; the core only needs to launch a
//! player, list its devices, issue a play command and read what is playing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{BackendKind, Device, PlayState, PlayerContext, Playlist, Track};

/// A play request as sent to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayCommand {
    /// Track to play.
    pub track_id: String,
    /// Playlist the track is played within, if any.
    pub container_id: Option<String>,
}

impl PlayCommand {
    /// Play `track_id` within `container_id`.
    pub fn new(track_id: impl Into<String>, container_id: Option<String>) -> Self {
        Self {
            track_id: track_id.into(),
            container_id,
        }
    }
}

/// One external music player.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlayerBackend: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Start the player (open the app or the web player).
    async fn launch(&self) -> Result<()>;

    /// Devices currently visible to this player.
    async fn list_devices(&self) -> Result<Vec<Device>>;

    /// Play a track.
    async fn play_track(&self, command: &PlayCommand) -> Result<()>;

    /// What the player reports as currently loaded, if anything.
    async fn get_player_context(&self) -> Result<Option<PlayerContext>>;
}

/// Source of playlists and their tracks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MusicLibrary: Send + Sync {
    /// The user's playlists in remote order.
    async fn fetch_playlists(&self) -> Result<Vec<Playlist>>;

    /// Tracks of one playlist.
    async fn fetch_playlist_tracks(&self, playlist_id: &str) -> Result<Vec<Track>>;

    /// The user's liked tracks.
    async fn fetch_liked_tracks(&self) -> Result<Vec<Track>>;
}

/// Registered player backends, one per kind.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<BackendKind, Arc<dyn PlayerBackend>>,
}

impl BackendRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its own kind, replacing any previous one.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn PlayerBackend>) -> Self {
        self.register(backend);
        self
    }

    /// Register a backend under its own kind, replacing any previous one.
    pub fn register(&mut self, backend: Arc<dyn PlayerBackend>) {
        let kind = backend.kind();
        debug!("Registering {} backend", kind);
        self.backends.insert(kind, backend);
    }

    /// Backend for `kind`.
    pub fn get(&self, kind: BackendKind) -> Result<Arc<dyn PlayerBackend>> {
        self.backends
            .get(&kind)
            .cloned()
            .ok_or(Error::BackendUnavailable(kind))
    }

    /// Whether a backend of `kind` is registered.
    #[must_use]
    pub fn contains(&self, kind: BackendKind) -> bool {
        self.backends.contains_key(&kind)
    }

    /// Registered kinds in a stable order (web, desktop, legacy-local).
    #[must_use]
    pub fn kinds(&self) -> Vec<BackendKind> {
        [BackendKind::Web, BackendKind::Desktop, BackendKind::LegacyLocal]
            .into_iter()
            .filter(|k| self.backends.contains_key(k))
            .collect()
    }

    /// Kinds a user can be asked to launch.
    #[must_use]
    pub fn launchable_kinds(&self) -> Vec<BackendKind> {
        self.kinds()
            .into_iter()
            .filter(|k| *k != BackendKind::LegacyLocal)
            .collect()
    }

    /// Devices across every backend. A failing backend contributes nothing.
    pub async fn list_all_devices(&self) -> Vec<Device> {
        let mut devices = Vec::new();
        for kind in self.kinds() {
            let Ok(backend) = self.get(kind) else {
                continue;
            };
            match backend.list_devices().await {
                Ok(found) => devices.extend(found),
                Err(e) => warn!("Failed to list {} devices: {}", kind, e),
            }
        }
        devices
    }

    /// The player context of the backend that is actually playing.
    ///
    /// Prefers a context that is not stopped; falls back to the first one
    /// reported.
    pub async fn current_context(&self) -> Option<PlayerContext> {
        let mut fallback = None;
        for kind in self.kinds() {
            let Ok(backend) = self.get(kind) else {
                continue;
            };
            match backend.get_player_context().await {
                Ok(Some(context)) if context.state != PlayState::Stopped => return Some(context),
                Ok(Some(context)) => {
                    fallback.get_or_insert(context);
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to read {} player context: {}", kind, e),
            }
        }
        fallback
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
