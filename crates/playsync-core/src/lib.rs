//! `Playsync` Core Library
//!
//! This crate keeps a local snapshot of a user's music playback state in sync
//! with a remote backend and a set of player backends:
//! - Data snapshot with single-writer fields and change notifications
//! - Short-TTL session cache for memoized remote answers
//! - Remote sync client over HTTP, plus play-session telemetry
//! - Playlist reconciliation that keeps UI state across remote refreshes
//! - Playback state machine routing play requests to the right backend
//! - Bounded polling loops for integrations and devices
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use playsync_core::{Collaborators, HttpRemoteClient, SyncConfig, SyncEngine, TreeCommand};
//!
//! let config = SyncConfig::load()?;
//! let remote = Arc::new(HttpRemoteClient::new(&config)?);
//! let engine = SyncEngine::new(config, Collaborators::new(remote, library));
//!
//! engine.activate().await;
//! engine.dispatch(TreeCommand::RefreshPlaylists).await?;
//! engine.deactivate().await;
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod observer;
pub mod playback;
pub mod polling;
pub mod reconciler;
pub mod remote;
pub mod scheduler;
pub mod snapshot;
pub mod status;
pub mod telemetry;
pub mod tree;

pub use backend::{BackendRegistry, MusicLibrary, PlayCommand, PlayerBackend};
pub use cache::{CacheCleanupStats, CacheStats, SERVER_ONLINE_KEY, SessionCache};
pub use config::{
    PlaybackConfig, PlaylistConfig, PlaylistSortOrder, PollingConfig, SessionCacheConfig,
    SyncConfig, TelemetryConfig,
};
pub use context::{Collaborators, SyncContext};
pub use engine::SyncEngine;
pub use error::{Error, Result};
pub use logging::{LogLevel, LogRotation, LoggingConfig, LoggingError, LoggingGuard};
pub use model::{
    BackendKind, Decoration, Device, DeviceKind, IntegrationFlags, LIKED_SONGS_PLAYLIST_ID,
    PlayState, PlayerContext, PlayerType, Playlist, PlaylistItem, PlaylistNode, Track, TrackNode,
};
pub use observer::{AutoConfirmer, LaunchConfirmer, LogNotifier, Notifier};
pub use playback::{PlayOutcome, PlayRequest, PlaybackController, PlaybackState, route};
pub use polling::{
    BackoffCounter, ContextWatcher, ContextWatcherHandle, DeviceEvent, PollCondition, PollKind,
    PollingSupervisor,
};
pub use reconciler::{PlaylistReconciler, reconcile};
pub use remote::{
    ApiResponse, HttpRemoteClient, RemoteSyncClient, ResponseStatus, StaticToken, TokenProvider,
};
pub use scheduler::{ScheduledTask, Scheduler, TaskCategory, TaskId};
pub use snapshot::{DataSnapshot, SharedSnapshot, SnapshotEvent};
pub use status::{AuthRecord, AuthStatus, UserState, classify, fetch_user_status};
pub use telemetry::Telemetry;
pub use tree::{TreeCommand, build_tree, drop_orphans};
