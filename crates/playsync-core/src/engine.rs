//! Engine lifecycle: activation, deactivation and command dispatch.

use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::context::{Collaborators, SyncContext};
use crate::error::{Error, Result};
use crate::playback::{PlayOutcome, PlayRequest, PlaybackController, PlaybackState};
use crate::polling::{ContextWatcherHandle, DeviceEvent, PollingSupervisor};
use crate::reconciler::PlaylistReconciler;
use crate::scheduler::TaskCategory;
use crate::snapshot::{SharedSnapshot, SnapshotEvent};
use crate::status::{AuthStatus, UserState, fetch_user_status};
use crate::telemetry::Telemetry;
use crate::tree::TreeCommand;

/// Components of one activation.
#[derive(Debug, Clone)]
struct Session {
    ctx: SyncContext,
    reconciler: PlaylistReconciler,
    supervisor: PollingSupervisor,
    playback: PlaybackController,
    telemetry: Telemetry,
    watcher: ContextWatcherHandle,
}

/// Owns the sync core across activations.
pub struct SyncEngine {
    config: Arc<SyncConfig>,
    collaborators: Collaborators,
    session: RwLock<Option<Session>>,
}

impl SyncEngine {
    /// Create an inactive engine.
    #[must_use]
    pub fn new(config: SyncConfig, collaborators: Collaborators) -> Self {
        Self {
            config: Arc::new(config),
            collaborators,
            session: RwLock::new(None),
        }
    }

    /// Whether [`Self::activate`] has run without a matching deactivate.
    pub async fn is_active(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Start a fresh activation.
    ///
    /// Any previous activation is torn down first. Classifies the user,
    /// refreshes the playlists when spotify is connected and starts the
    /// context watcher.
    pub async fn activate(&self) -> AuthStatus {
        self.deactivate().await;

        let ctx = SyncContext::new(Arc::clone(&self.config), self.collaborators.clone());
        let reconciler = PlaylistReconciler::new(ctx.clone());
        let supervisor = PollingSupervisor::new(ctx.clone());
        let playback = PlaybackController::new(ctx.clone(), reconciler.clone(), supervisor.clone());
        let telemetry = Telemetry::new(ctx.clone());

        let status = fetch_user_status(&ctx).await;
        info!("Activating with user state {:?}", status.state);

        if status.state == UserState::Ok && ctx.snapshot.read().await.integrations().spotify {
            reconciler.refresh_playlists().await;
        }

        let (events, watcher) = supervisor.watch_context();
        forward_device_events(&ctx, &reconciler, events);

        *self.session.write().await = Some(Session {
            ctx,
            reconciler,
            supervisor,
            playback,
            telemetry,
            watcher,
        });
        status
    }

    /// Cancel every scheduled task, stop the watcher and tear the snapshot
    /// down. Does nothing when inactive.
    pub async fn deactivate(&self) {
        let Some(session) = self.session.write().await.take() else {
            return;
        };

        session.watcher.stop().await;
        session.ctx.scheduler.shutdown();
        session.ctx.snapshot.reset().await;
        session.ctx.cache.clear().await;
        info!("Deactivated");
    }

    async fn session(&self) -> Result<Session> {
        self.session.read().await.clone().ok_or(Error::Inactive)
    }

    /// Snapshot of the current activation.
    pub async fn snapshot(&self) -> Result<SharedSnapshot> {
        Ok(self.session().await?.ctx.snapshot)
    }

    /// Subscribe to snapshot changes of the current activation.
    pub async fn subscribe(&self) -> Result<broadcast::Receiver<SnapshotEvent>> {
        Ok(self.session().await?.ctx.snapshot.subscribe())
    }

    /// Playback state of the current activation.
    pub async fn playback_state(&self) -> Result<PlaybackState> {
        Ok(self.session().await?.playback.state().await)
    }

    /// Telemetry sender of the current activation.
    pub async fn telemetry(&self) -> Result<Telemetry> {
        Ok(self.session().await?.telemetry)
    }

    /// Execute a tree command.
    ///
    /// Play commands report their outcome; the others return `None`.
    pub async fn dispatch(&self, command: TreeCommand) -> Result<Option<PlayOutcome>> {
        let session = self.session().await?;
        debug!("Dispatching {:?}", command);

        let outcome = match command {
            TreeCommand::PlayPlaylist { playlist_id } => Some(
                session
                    .playback
                    .play(PlayRequest::Playlist { playlist_id })
                    .await?,
            ),
            TreeCommand::PlayTrack {
                playlist_id,
                track_id,
            } => Some(
                session
                    .playback
                    .play(PlayRequest::Track {
                        playlist_id,
                        track_id,
                    })
                    .await?,
            ),
            TreeCommand::Expand { playlist_id } => {
                let fetched = session
                    .ctx
                    .snapshot
                    .read()
                    .await
                    .playlist_tracks(&playlist_id)
                    .is_some();
                if !fetched && let Err(e) = session.reconciler.fetch_tracks(&playlist_id).await {
                    warn!("Failed to fetch tracks of {}: {}", playlist_id, e);
                }
                session.reconciler.set_expanded(&playlist_id, true).await?;
                None
            }
            TreeCommand::Collapse { playlist_id } => {
                session.reconciler.set_expanded(&playlist_id, false).await?;
                None
            }
            TreeCommand::RefreshPlaylists => {
                session.reconciler.refresh_playlists().await;
                None
            }
            TreeCommand::ConnectSpotify => {
                session
                    .supervisor
                    .start_spotify_connection_poll(session.reconciler.clone());
                None
            }
            TreeCommand::ConnectSlack => {
                session.supervisor.start_slack_connection_poll();
                None
            }
        };

        if let Some(outcome) = outcome {
            debug!("Play outcome: {:?}", outcome);
        }
        Ok(outcome)
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Re-decorate the playing playlist whenever the device set changes.
///
/// The watcher refreshes the player context before emitting, so the snapshot
/// already holds the context of the new device set.
fn forward_device_events(
    ctx: &SyncContext,
    reconciler: &PlaylistReconciler,
    mut events: tokio::sync::mpsc::Receiver<DeviceEvent>,
) {
    let snapshot = ctx.snapshot.clone();
    let reconciler = reconciler.clone();
    ctx.scheduler.spawn(TaskCategory::ContextWatch, move |_| async move {
        while let Some(event) = events.recv().await {
            match event {
                DeviceEvent::Connected(device) => debug!("Device available: {}", device.name),
                DeviceEvent::Disconnected(device) => debug!("Device gone: {}", device.name),
                DeviceEvent::Refreshed(devices) => {
                    debug!("{} devices visible", devices.len());
                    continue;
                }
            }

            let playing = snapshot
                .read()
                .await
                .player_context()
                .and_then(|context| context.track.as_ref())
                .and_then(|track| track.playlist_id.clone());
            if let Some(playlist_id) = playing {
                reconciler.mark_playing(Some(&playlist_id)).await;
            }
        }
    });
}
