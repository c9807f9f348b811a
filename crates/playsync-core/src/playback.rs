//! Playback state machine.
//!
//! Decides which backend receives a user-initiated play request and keeps the
//! selection pointers, loading flag and desktop-session flag of the snapshot.
//!
//! ```text
//! idle -> awaiting-launch-confirmation -> launching-backend(kind) -> command-issued -> idle
//!                                      \-> command-issued (active device) -> idle
//!                                      \-> idle (declined)
//! ```
//!
//! A new selection while a launch is settling overwrites the selection and
//! starts over. The superseded timer re-checks its generation when it fires
//! and does nothing; with `cancel_superseded_launch` it is cancelled instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::backend::PlayCommand;
use crate::context::SyncContext;
use crate::error::{Error, Result};
use crate::model::{BackendKind, PlayerType, PlaylistNode, Track};
use crate::polling::PollingSupervisor;
use crate::reconciler::PlaylistReconciler;
use crate::scheduler::{ScheduledTask, TaskCategory};
use crate::snapshot::SnapshotEvent;

/// Where the state machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "backend", rename_all = "kebab-case")]
pub enum PlaybackState {
    /// Nothing in flight.
    #[default]
    Idle,
    /// Looking for an active device or asking which backend to launch.
    AwaitingLaunchConfirmation,
    /// A backend was launched; the play command waits for it to settle.
    LaunchingBackend(BackendKind),
    /// The play command was sent.
    CommandIssued,
}

/// A user-initiated play request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlayRequest {
    /// Play a playlist from its first track.
    #[serde(rename_all = "camelCase")]
    Playlist {
        /// Playlist to play.
        playlist_id: String,
    },
    /// Play one track of a playlist.
    #[serde(rename_all = "camelCase")]
    Track {
        /// Playlist the track was picked from.
        playlist_id: String,
        /// Track to play.
        track_id: String,
    },
}

impl PlayRequest {
    /// Playlist the request targets.
    #[must_use]
    pub fn playlist_id(&self) -> &str {
        match self {
            Self::Playlist { playlist_id } | Self::Track { playlist_id, .. } => playlist_id,
        }
    }
}

/// What a play request led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// The command was sent to this backend.
    Issued(BackendKind),
    /// The backend was launched; the command follows after the settle delay.
    Launching(BackendKind),
    /// The backend rejected the launch or the command.
    Failed(BackendKind),
    /// The user declined to launch a backend.
    Declined,
    /// Nothing to play; the snapshot was not touched.
    Aborted,
}

/// Pick the backend for an item.
///
/// Legacy items go to the legacy local player; otherwise the desktop player
/// when a desktop session is confirmed, else the web player.
#[must_use]
pub const fn route(player_type: PlayerType, desktop_session: bool) -> BackendKind {
    if player_type.is_legacy() {
        BackendKind::LegacyLocal
    } else if desktop_session {
        BackendKind::Desktop
    } else {
        BackendKind::Web
    }
}

#[derive(Debug, Default)]
struct ControllerState {
    state: RwLock<PlaybackState>,
    generation: AtomicU64,
    latest_launch: AtomicU64,
    pending_launch: Mutex<Option<ScheduledTask>>,
}

/// Drives play requests through the state machine.
#[derive(Debug, Clone)]
pub struct PlaybackController {
    ctx: SyncContext,
    reconciler: PlaylistReconciler,
    supervisor: PollingSupervisor,
    inner: Arc<ControllerState>,
}

impl PlaybackController {
    /// Create a controller.
    #[must_use]
    pub fn new(
        ctx: SyncContext,
        reconciler: PlaylistReconciler,
        supervisor: PollingSupervisor,
    ) -> Self {
        Self {
            ctx,
            reconciler,
            supervisor,
            inner: Arc::new(ControllerState::default()),
        }
    }

    /// Current state.
    pub async fn state(&self) -> PlaybackState {
        *self.inner.state.read().await
    }

    async fn set_state(&self, state: PlaybackState) {
        let mut current = self.inner.state.write().await;
        if *current != state {
            debug!("Playback state {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    /// Handle a play request.
    ///
    /// Fails only when the playlist is not in the snapshot or the chosen
    /// backend is not registered.
    pub async fn play(&self, request: PlayRequest) -> Result<PlayOutcome> {
        let playlist_id = request.playlist_id();
        let playlist = self
            .ctx
            .snapshot
            .read()
            .await
            .playlist(playlist_id)
            .cloned()
            .ok_or_else(|| Error::PlaylistNotFound(playlist_id.to_string()))?;

        let Some(track) = self.resolve_track(&request).await else {
            info!("Nothing to play in playlist {}", playlist.name);
            return Ok(PlayOutcome::Aborted);
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.ctx
            .snapshot
            .write()
            .await
            .set_selection(Some(playlist.clone()), Some(track.clone()));
        self.ctx.snapshot.notify(SnapshotEvent::SelectionChanged);

        if self.ctx.config.playback.cancel_superseded_launch
            && let Some(task) = self.inner.pending_launch.lock().await.take()
        {
            debug!("Cancelling superseded launch task {}", task.id());
            task.cancel();
        }

        self.set_state(PlaybackState::AwaitingLaunchConfirmation).await;

        if track.player_type.is_legacy() || playlist.player_type.is_legacy() {
            return Ok(self.issue(BackendKind::LegacyLocal, &track, &playlist).await);
        }

        let devices = self.ctx.backends.list_all_devices().await;
        if let Some(active) = devices.iter().find(|d| d.is_active) {
            let desktop_session = {
                let mut snapshot = self.ctx.snapshot.write().await;
                let desktop = snapshot.desktop_session() || active.is_desktop();
                snapshot.set_desktop_session(desktop);
                desktop
            };
            let kind = route(track.player_type, desktop_session);
            debug!("Active device {} found, routing to {}", active.name, kind);
            return Ok(self.issue(kind, &track, &playlist).await);
        }

        let options = self.ctx.backends.launchable_kinds();
        let Some(kind) = self.ctx.confirmer.choose_backend(options).await else {
            debug!("Backend launch declined");
            self.clear_loading().await;
            self.set_state(PlaybackState::Idle).await;
            return Ok(PlayOutcome::Declined);
        };

        self.launch(kind, generation, track, playlist).await
    }

    async fn resolve_track(&self, request: &PlayRequest) -> Option<Track> {
        let playlist_id = request.playlist_id();
        let cached = self
            .ctx
            .snapshot
            .read()
            .await
            .playlist_tracks(playlist_id)
            .map(<[Track]>::to_vec);

        let tracks = match cached {
            Some(tracks) => tracks,
            None => match self.reconciler.fetch_tracks(playlist_id).await {
                Ok(tracks) => tracks,
                Err(e) => {
                    warn!("Failed to fetch tracks of {}: {}", playlist_id, e);
                    return None;
                }
            },
        };

        match request {
            PlayRequest::Playlist { .. } => tracks.into_iter().next(),
            PlayRequest::Track { track_id, .. } => tracks.into_iter().find(|t| t.id == *track_id),
        }
    }

    async fn launch(
        &self,
        kind: BackendKind,
        generation: u64,
        track: Track,
        playlist: PlaylistNode,
    ) -> Result<PlayOutcome> {
        let backend = match self.ctx.backends.get(kind) {
            Ok(backend) => backend,
            Err(e) => {
                self.set_state(PlaybackState::Idle).await;
                return Err(e);
            }
        };

        self.set_state(PlaybackState::LaunchingBackend(kind)).await;
        self.inner.latest_launch.store(generation, Ordering::SeqCst);
        {
            let mut snapshot = self.ctx.snapshot.write().await;
            snapshot.set_desktop_session(kind == BackendKind::Desktop);
            snapshot.set_loading(true);
        }
        self.ctx.snapshot.notify(SnapshotEvent::LoadingChanged(true));

        if let Err(e) = backend.launch().await {
            warn!("Failed to launch {} player: {}", kind, e);
            self.ctx
                .notifier
                .warn(&format!("Unable to launch the {kind} player"));
            self.clear_loading().await;
            self.set_state(PlaybackState::Idle).await;
            return Ok(PlayOutcome::Failed(kind));
        }

        info!("Launched {} player, waiting for it to settle", kind);
        self.supervisor.start_device_poll();
        let this = self.clone();
        let task = self.ctx.scheduler.schedule(
            TaskCategory::PlaybackLaunch,
            self.ctx.config.playback.launch_settle_delay(),
            async move {
                if this.inner.generation.load(Ordering::SeqCst) != generation {
                    debug!("Launch for {} superseded, skipping play", track.id);
                    // Loading belongs to the newest launch; with none after
                    // this one, nothing else will clear it.
                    if this.inner.latest_launch.load(Ordering::SeqCst) == generation {
                        this.clear_loading().await;
                    }
                    return;
                }
                this.issue(kind, &track, &playlist).await;
            },
        );
        *self.inner.pending_launch.lock().await = Some(task);

        Ok(PlayOutcome::Launching(kind))
    }

    async fn issue(&self, kind: BackendKind, track: &Track, playlist: &PlaylistNode) -> PlayOutcome {
        let container = (!playlist.synthetic).then(|| playlist.id.clone());
        let command = PlayCommand::new(track.id.clone(), container);

        self.set_state(PlaybackState::CommandIssued).await;
        let result = match self.ctx.backends.get(kind) {
            Ok(backend) => backend.play_track(&command).await,
            Err(e) => Err(e),
        };
        self.clear_loading().await;

        let outcome = match result {
            Ok(()) => {
                info!("Playing {} on {}", track.name, kind);
                self.reconciler.mark_playing(Some(&playlist.id)).await;
                PlayOutcome::Issued(kind)
            }
            Err(e) => {
                warn!("{} player rejected play of {}: {}", kind, track.id, e);
                self.ctx
                    .notifier
                    .warn(&format!("Unable to play {} on the {kind} player", track.name));
                PlayOutcome::Failed(kind)
            }
        };

        self.schedule_post_play_refresh();
        self.set_state(PlaybackState::Idle).await;
        outcome
    }

    async fn clear_loading(&self) {
        let was_loading = {
            let mut snapshot = self.ctx.snapshot.write().await;
            let loading = snapshot.is_loading();
            snapshot.set_loading(false);
            loading
        };
        if was_loading {
            self.ctx.snapshot.notify(SnapshotEvent::LoadingChanged(false));
        }
    }

    fn schedule_post_play_refresh(&self) {
        let supervisor = self.supervisor.clone();
        let reconciler = self.reconciler.clone();
        self.ctx.scheduler.schedule(
            TaskCategory::PostPlayRefresh,
            self.ctx.config.playback.post_play_refresh_delay(),
            async move {
                supervisor.refresh_devices().await;
                let context = supervisor.refresh_player_context().await;
                if let Some(playlist_id) = context
                    .and_then(|c| c.track)
                    .and_then(|t| t.playlist_id)
                {
                    reconciler.mark_playing(Some(&playlist_id)).await;
                }
            },
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::OnceLock;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::backend::{BackendRegistry, MockMusicLibrary, MockPlayerBackend};
    use crate::config::SyncConfig;
    use crate::context::Collaborators;
    use crate::model::{Device, DeviceKind, Playlist};
    use crate::observer::MockLaunchConfirmer;
    use crate::remote::MockRemoteSyncClient;

    fn backend(kind: BackendKind) -> MockPlayerBackend {
        let mut backend = MockPlayerBackend::new();
        backend.expect_kind().return_const(kind);
        backend
    }

    fn active_device(backend: BackendKind) -> Device {
        Device {
            id: "dev".to_string(),
            name: "Device".to_string(),
            kind: DeviceKind::WebPlayer,
            is_active: true,
            volume_percent: None,
            backend,
        }
    }

    fn confirmer(choice: Option<BackendKind>) -> MockLaunchConfirmer {
        let mut confirmer = MockLaunchConfirmer::new();
        confirmer.expect_choose_backend().returning(move |_| choice);
        confirmer
    }

    async fn controller(
        config: SyncConfig,
        backends: BackendRegistry,
        confirmer: MockLaunchConfirmer,
        playlists: Vec<Playlist>,
        tracks: &[(&str, Vec<Track>)],
    ) -> (PlaybackController, SyncContext) {
        let ctx = SyncContext::new(
            Arc::new(config),
            Collaborators::new(
                Arc::new(MockRemoteSyncClient::new()),
                Arc::new(MockMusicLibrary::new()),
            )
            .with_backends(backends)
            .with_confirmer(Arc::new(confirmer)),
        );
        {
            let mut snapshot = ctx.snapshot.write().await;
            let display = playlists
                .iter()
                .enumerate()
                .map(|(i, p)| PlaylistNode::from_remote(p, i))
                .collect();
            snapshot.set_playlists(playlists, display);
            for (id, list) in tracks {
                snapshot.set_playlist_tracks(id, list.clone());
            }
        }
        let reconciler = PlaylistReconciler::new(ctx.clone());
        let supervisor = PollingSupervisor::new(ctx.clone());
        (PlaybackController::new(ctx.clone(), reconciler, supervisor), ctx)
    }

    fn two_tracks() -> Vec<Track> {
        vec![
            Track::new("t1", "One").in_playlist("a"),
            Track::new("t2", "Two").in_playlist("a"),
        ]
    }

    #[test]
    fn test_route() {
        assert_eq!(route(PlayerType::Legacy, true), BackendKind::LegacyLocal);
        assert_eq!(route(PlayerType::Web, true), BackendKind::Desktop);
        assert_eq!(route(PlayerType::Web, false), BackendKind::Web);
        assert_eq!(route(PlayerType::Desktop, false), BackendKind::Web);
    }

    #[tokio::test]
    async fn test_empty_playlist_aborts_without_side_effects() {
        let (controller, ctx) = controller(
            SyncConfig::default(),
            BackendRegistry::new().with_backend(Arc::new(backend(BackendKind::Web))),
            MockLaunchConfirmer::new(),
            vec![Playlist::new("a", "A", 0)],
            &[("a", Vec::new())],
        )
        .await;
        let previous = Track::new("old", "Old");
        ctx.snapshot
            .write()
            .await
            .set_selection(None, Some(previous.clone()));

        let outcome = controller
            .play(PlayRequest::Playlist {
                playlist_id: "a".to_string(),
            })
            .await
            .expect("play");

        assert_eq!(outcome, PlayOutcome::Aborted);
        assert_eq!(ctx.snapshot.read().await.selected_track(), Some(&previous));
        assert_eq!(controller.state().await, PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_unknown_playlist_is_an_error() {
        let (controller, _) = controller(
            SyncConfig::default(),
            BackendRegistry::new(),
            MockLaunchConfirmer::new(),
            Vec::new(),
            &[],
        )
        .await;
        let result = controller
            .play(PlayRequest::Playlist {
                playlist_id: "nope".to_string(),
            })
            .await;
        assert!(matches!(result, Err(Error::PlaylistNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_device_issues_immediately_scoped_to_playlist() {
        let mut web = backend(BackendKind::Web);
        web.expect_list_devices()
            .returning(|| Ok(vec![active_device(BackendKind::Web)]));
        web.expect_play_track()
            .withf(|c| c.track_id == "t2" && c.container_id.as_deref() == Some("a"))
            .times(1)
            .returning(|_| Ok(()));
        web.expect_get_player_context().returning(|| Ok(None));

        let (controller, ctx) = controller(
            SyncConfig::default(),
            BackendRegistry::new().with_backend(Arc::new(web)),
            MockLaunchConfirmer::new(),
            vec![Playlist::new("a", "A", 2)],
            &[("a", two_tracks())],
        )
        .await;

        let outcome = controller
            .play(PlayRequest::Track {
                playlist_id: "a".to_string(),
                track_id: "t2".to_string(),
            })
            .await
            .expect("play");

        assert_eq!(outcome, PlayOutcome::Issued(BackendKind::Web));
        assert_eq!(controller.state().await, PlaybackState::Idle);
        let snapshot = ctx.snapshot.read().await;
        assert_eq!(snapshot.selected_track().map(|t| t.id.as_str()), Some("t2"));
        assert!(snapshot.playlist("a").unwrap().decoration.playing);
        assert!(!snapshot.desktop_session());
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_waits_for_settle_delay() {
        let mut desktop = backend(BackendKind::Desktop);
        desktop.expect_list_devices().returning(|| Ok(Vec::new()));
        desktop.expect_launch().times(1).returning(|| Ok(()));
        desktop
            .expect_play_track()
            .withf(|c| c.track_id == "t1")
            .times(1)
            .returning(|_| Ok(()));
        desktop.expect_get_player_context().returning(|| Ok(None));

        let (controller, ctx) = controller(
            SyncConfig::default(),
            BackendRegistry::new().with_backend(Arc::new(desktop)),
            confirmer(Some(BackendKind::Desktop)),
            vec![Playlist::new("a", "A", 2)],
            &[("a", two_tracks())],
        )
        .await;

        let outcome = controller
            .play(PlayRequest::Playlist {
                playlist_id: "a".to_string(),
            })
            .await
            .expect("play");

        assert_eq!(outcome, PlayOutcome::Launching(BackendKind::Desktop));
        assert_eq!(
            controller.state().await,
            PlaybackState::LaunchingBackend(BackendKind::Desktop)
        );
        assert!(ctx.snapshot.read().await.is_loading());
        assert!(ctx.snapshot.read().await.desktop_session());

        tokio::time::sleep(Duration::from_millis(4_100)).await;

        assert!(!ctx.snapshot.read().await.is_loading());
        assert_eq!(controller.state().await, PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_declined_confirmation_returns_to_idle() {
        let mut web = backend(BackendKind::Web);
        web.expect_list_devices().returning(|| Ok(Vec::new()));

        let (controller, ctx) = controller(
            SyncConfig::default(),
            BackendRegistry::new().with_backend(Arc::new(web)),
            confirmer(None),
            vec![Playlist::new("a", "A", 2)],
            &[("a", two_tracks())],
        )
        .await;

        let outcome = controller
            .play(PlayRequest::Playlist {
                playlist_id: "a".to_string(),
            })
            .await
            .expect("play");

        assert_eq!(outcome, PlayOutcome::Declined);
        assert_eq!(controller.state().await, PlaybackState::Idle);
        assert!(!ctx.snapshot.read().await.is_loading());
    }

    async fn superseded_launch(cancel: bool) -> SyncContext {
        let mut web = backend(BackendKind::Web);
        web.expect_list_devices().returning(|| Ok(Vec::new()));
        web.expect_launch().times(2).returning(|| Ok(()));
        web.expect_play_track()
            .withf(|c| c.track_id == "t2")
            .times(1)
            .returning(|_| Ok(()));
        web.expect_get_player_context().returning(|| Ok(None));

        let mut config = SyncConfig::default();
        config.playback.cancel_superseded_launch = cancel;
        config.polling.try_count_until_found = 0;
        let (controller, ctx) = controller(
            config,
            BackendRegistry::new().with_backend(Arc::new(web)),
            confirmer(Some(BackendKind::Web)),
            vec![Playlist::new("a", "A", 2)],
            &[("a", two_tracks())],
        )
        .await;

        controller
            .play(PlayRequest::Track {
                playlist_id: "a".to_string(),
                track_id: "t1".to_string(),
            })
            .await
            .expect("first play");
        tokio::time::sleep(Duration::from_secs(1)).await;
        controller
            .play(PlayRequest::Track {
                playlist_id: "a".to_string(),
                track_id: "t2".to_string(),
            })
            .await
            .expect("second play");

        tokio::time::sleep(Duration::from_secs(10)).await;
        ctx
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_launch_timer_is_a_noop() {
        let ctx = superseded_launch(false).await;
        let snapshot = ctx.snapshot.read().await;
        assert_eq!(snapshot.selected_track().map(|t| t.id.as_str()), Some("t2"));
        assert!(!snapshot.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_launch_timer_is_cancelled() {
        let ctx = superseded_launch(true).await;
        assert_eq!(
            ctx.snapshot.read().await.selected_track().map(|t| t.id.as_str()),
            Some("t2")
        );
        assert_eq!(ctx.scheduler.pending_tasks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_legacy_playlist_routes_to_legacy_player() {
        let mut legacy = backend(BackendKind::LegacyLocal);
        legacy.expect_play_track().times(1).returning(|_| Ok(()));
        legacy.expect_list_devices().returning(|| Ok(Vec::new()));
        legacy.expect_get_player_context().returning(|| Ok(None));

        let mut playlist = Playlist::new("a", "A", 2);
        playlist.player_type = PlayerType::Legacy;

        let (controller, _) = controller(
            SyncConfig::default(),
            BackendRegistry::new().with_backend(Arc::new(legacy)),
            MockLaunchConfirmer::new(),
            vec![playlist],
            &[("a", two_tracks())],
        )
        .await;

        let outcome = controller
            .play(PlayRequest::Playlist {
                playlist_id: "a".to_string(),
            })
            .await
            .expect("play");
        assert_eq!(outcome, PlayOutcome::Issued(BackendKind::LegacyLocal));
    }

    #[tokio::test(start_paused = true)]
    async fn test_desktop_active_device_routes_to_desktop() {
        let mut desktop = backend(BackendKind::Desktop);
        desktop
            .expect_list_devices()
            .returning(|| Ok(vec![active_device(BackendKind::Desktop)]));
        desktop.expect_play_track().times(1).returning(|_| Ok(()));
        desktop.expect_get_player_context().returning(|| Ok(None));
        let mut web = backend(BackendKind::Web);
        web.expect_list_devices().returning(|| Ok(Vec::new()));
        web.expect_get_player_context().returning(|| Ok(None));

        let (controller, ctx) = controller(
            SyncConfig::default(),
            BackendRegistry::new()
                .with_backend(Arc::new(desktop))
                .with_backend(Arc::new(web)),
            MockLaunchConfirmer::new(),
            vec![Playlist::new("a", "A", 2)],
            &[("a", two_tracks())],
        )
        .await;

        let outcome = controller
            .play(PlayRequest::Playlist {
                playlist_id: "a".to_string(),
            })
            .await
            .expect("play");
        assert_eq!(outcome, PlayOutcome::Issued(BackendKind::Desktop));
        assert!(ctx.snapshot.read().await.desktop_session());
    }

    #[tokio::test(start_paused = true)]
    async fn test_declined_after_superseded_launch_clears_loading() {
        let mut web = backend(BackendKind::Web);
        web.expect_list_devices().returning(|| Ok(Vec::new()));
        web.expect_launch().times(1).returning(|| Ok(()));
        web.expect_play_track().never();
        web.expect_get_player_context().returning(|| Ok(None));

        let asked = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&asked);
        let mut confirmer = MockLaunchConfirmer::new();
        confirmer.expect_choose_backend().returning(move |_| {
            (counter.fetch_add(1, Ordering::SeqCst) == 0).then_some(BackendKind::Web)
        });

        let mut config = SyncConfig::default();
        config.polling.try_count_until_found = 0;
        let (controller, ctx) = controller(
            config,
            BackendRegistry::new().with_backend(Arc::new(web)),
            confirmer,
            vec![Playlist::new("a", "A", 2)],
            &[("a", two_tracks())],
        )
        .await;

        let first = controller
            .play(PlayRequest::Track {
                playlist_id: "a".to_string(),
                track_id: "t1".to_string(),
            })
            .await
            .expect("first play");
        assert_eq!(first, PlayOutcome::Launching(BackendKind::Web));
        assert!(ctx.snapshot.read().await.is_loading());

        tokio::time::sleep(Duration::from_secs(1)).await;
        let second = controller
            .play(PlayRequest::Track {
                playlist_id: "a".to_string(),
                track_id: "t2".to_string(),
            })
            .await
            .expect("second play");
        assert_eq!(second, PlayOutcome::Declined);

        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(!ctx.snapshot.read().await.is_loading());
        assert_eq!(controller.state().await, PlaybackState::Idle);
        assert_eq!(asked.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_timer_keeps_loading_of_newer_launch() {
        let mut web = backend(BackendKind::Web);
        web.expect_list_devices().returning(|| Ok(Vec::new()));
        web.expect_launch().times(2).returning(|| Ok(()));
        web.expect_play_track().returning(|_| Ok(()));
        web.expect_get_player_context().returning(|| Ok(None));

        let mut config = SyncConfig::default();
        config.polling.try_count_until_found = 0;
        let (controller, ctx) = controller(
            config,
            BackendRegistry::new().with_backend(Arc::new(web)),
            confirmer(Some(BackendKind::Web)),
            vec![Playlist::new("a", "A", 2)],
            &[("a", two_tracks())],
        )
        .await;

        for (delay, track_id) in [(0, "t1"), (2, "t2")] {
            tokio::time::sleep(Duration::from_secs(delay)).await;
            controller
                .play(PlayRequest::Track {
                    playlist_id: "a".to_string(),
                    track_id: track_id.to_string(),
                })
                .await
                .expect("play");
        }

        // The first timer fires here; the second launch is still settling.
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!(ctx.snapshot.read().await.is_loading());
        assert_eq!(
            controller.state().await,
            PlaybackState::LaunchingBackend(BackendKind::Web)
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!ctx.snapshot.read().await.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_web_computer_device_is_not_a_desktop_session() {
        let mut web = backend(BackendKind::Web);
        web.expect_list_devices().returning(|| {
            Ok(vec![Device {
                kind: DeviceKind::Computer,
                ..active_device(BackendKind::Web)
            }])
        });
        web.expect_play_track().times(1).returning(|_| Ok(()));
        web.expect_get_player_context().returning(|| Ok(None));

        let (controller, ctx) = controller(
            SyncConfig::default(),
            BackendRegistry::new().with_backend(Arc::new(web)),
            MockLaunchConfirmer::new(),
            vec![Playlist::new("a", "A", 2)],
            &[("a", two_tracks())],
        )
        .await;

        let outcome = controller
            .play(PlayRequest::Playlist {
                playlist_id: "a".to_string(),
            })
            .await
            .expect("play");

        assert_eq!(outcome, PlayOutcome::Issued(BackendKind::Web));
        assert!(!ctx.snapshot.read().await.desktop_session());
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_is_command_issued_while_backend_plays() {
        let inner: Arc<OnceLock<Arc<ControllerState>>> = Arc::new(OnceLock::new());
        let seen = Arc::new(std::sync::Mutex::new(None));

        let mut web = backend(BackendKind::Web);
        web.expect_list_devices()
            .returning(|| Ok(vec![active_device(BackendKind::Web)]));
        let (state_of, record) = (Arc::clone(&inner), Arc::clone(&seen));
        web.expect_play_track().times(1).returning(move |_| {
            *record.lock().unwrap() = state_of
                .get()
                .and_then(|inner| inner.state.try_read().ok().map(|state| *state));
            Ok(())
        });
        web.expect_get_player_context().returning(|| Ok(None));

        let (controller, _) = controller(
            SyncConfig::default(),
            BackendRegistry::new().with_backend(Arc::new(web)),
            MockLaunchConfirmer::new(),
            vec![Playlist::new("a", "A", 2)],
            &[("a", two_tracks())],
        )
        .await;
        inner.set(Arc::clone(&controller.inner)).unwrap();

        controller
            .play(PlayRequest::Playlist {
                playlist_id: "a".to_string(),
            })
            .await
            .expect("play");

        assert_eq!(*seen.lock().unwrap(), Some(PlaybackState::CommandIssued));
        assert_eq!(controller.state().await, PlaybackState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_polls_for_devices() {
        let mut web = backend(BackendKind::Web);
        web.expect_list_devices().returning(|| Ok(Vec::new()));
        web.expect_launch().times(1).returning(|| Ok(()));
        web.expect_play_track().returning(|_| Ok(()));
        web.expect_get_player_context().returning(|| Ok(None));

        let (controller, _) = controller(
            SyncConfig::default(),
            BackendRegistry::new().with_backend(Arc::new(web)),
            confirmer(Some(BackendKind::Web)),
            vec![Playlist::new("a", "A", 2)],
            &[("a", two_tracks())],
        )
        .await;

        controller
            .play(PlayRequest::Playlist {
                playlist_id: "a".to_string(),
            })
            .await
            .expect("play");

        assert!(controller.supervisor.is_pending(crate::polling::PollKind::DeviceList));
    }
}
