//! Polling supervisor.
//!
//! Each monitored condition runs as an independent bounded retry loop: wait,
//! evaluate, and either perform the one-time success side effect or spend one
//! attempt and go again. The supervisor is also the sole writer of the
//! device list, player context and running track, which it refreshes both on
//! demand and from a recurring [`ContextWatcher`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info};

use crate::config::PollingConfig;
use crate::context::SyncContext;
use crate::model::{Device, PlayerContext};
use crate::reconciler::PlaylistReconciler;
use crate::scheduler::TaskCategory;
use crate::snapshot::SnapshotEvent;
use crate::status::fetch_user_status;

/// Which condition a polling loop watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollKind {
    /// A spotify auth record appears.
    SpotifyConnection,
    /// A slack auth record appears.
    SlackConnection,
    /// At least one player device is visible.
    DeviceList,
}

impl PollKind {
    const COUNT: usize = 3;

    const fn index(self) -> usize {
        match self {
            Self::SpotifyConnection => 0,
            Self::SlackConnection => 1,
            Self::DeviceList => 2,
        }
    }

    /// Fixed delay between evaluations.
    #[must_use]
    pub const fn interval(self, config: &PollingConfig) -> Duration {
        match self {
            Self::SpotifyConnection | Self::SlackConnection => config.connect_check_interval(),
            Self::DeviceList => config.device_refresh_interval(),
        }
    }
}

impl std::fmt::Display for PollKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SpotifyConnection => write!(f, "spotify_connection"),
            Self::SlackConnection => write!(f, "slack_connection"),
            Self::DeviceList => write!(f, "device_list"),
        }
    }
}

/// Remaining attempts and the fixed resend interval of one polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffCounter {
    remaining: u32,
    interval: Duration,
}

impl BackoffCounter {
    /// Counter allowing `attempts` rescheduled checks.
    #[must_use]
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            remaining: attempts,
            interval,
        }
    }

    /// Attempts left.
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Delay before each check.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Record an unmet check. Returns `false` once exhausted.
    pub const fn record_miss(&mut self) -> bool {
        if self.remaining == 0 {
            false
        } else {
            self.remaining -= 1;
            true
        }
    }
}

/// A condition watched by a bounded polling loop.
#[async_trait]
pub trait PollCondition: Send + Sync {
    /// Which condition this is.
    fn kind(&self) -> PollKind;

    /// Evaluate the condition once.
    async fn check(&self, ctx: &SyncContext) -> bool;

    /// One-time side effect once the condition holds.
    async fn on_found(&self, ctx: &SyncContext);
}

/// Spotify got connected: notify and populate playlists shortly after.
pub struct SpotifyConnected {
    reconciler: PlaylistReconciler,
}

impl SpotifyConnected {
    /// Condition refreshing playlists through `reconciler` once connected.
    #[must_use]
    pub const fn new(reconciler: PlaylistReconciler) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl PollCondition for SpotifyConnected {
    fn kind(&self) -> PollKind {
        PollKind::SpotifyConnection
    }

    async fn check(&self, ctx: &SyncContext) -> bool {
        fetch_user_status(ctx).await.logged_on
    }

    async fn on_found(&self, ctx: &SyncContext) {
        ctx.notifier.info("Successfully connected to Spotify");
        let reconciler = self.reconciler.clone();
        ctx.scheduler.schedule(
            TaskCategory::PostConnectRefresh,
            ctx.config.polling.post_connect_refresh_delay(),
            async move {
                reconciler.refresh_playlists().await;
            },
        );
    }
}

/// Slack got connected.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlackConnected;

#[async_trait]
impl PollCondition for SlackConnected {
    fn kind(&self) -> PollKind {
        PollKind::SlackConnection
    }

    async fn check(&self, ctx: &SyncContext) -> bool {
        fetch_user_status(ctx).await;
        ctx.snapshot.read().await.integrations().slack
    }

    async fn on_found(&self, ctx: &SyncContext) {
        ctx.notifier.info("Successfully connected to Slack");
    }
}

/// A player device became visible.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceAvailable;

#[async_trait]
impl PollCondition for DeviceAvailable {
    fn kind(&self) -> PollKind {
        PollKind::DeviceList
    }

    async fn check(&self, ctx: &SyncContext) -> bool {
        !refresh_devices(ctx).await.is_empty()
    }

    async fn on_found(&self, ctx: &SyncContext) {
        refresh_player_context(ctx).await;
    }
}

/// Re-read devices from every backend into the snapshot.
pub async fn refresh_devices(ctx: &SyncContext) -> Vec<Device> {
    let devices = ctx.backends.list_all_devices().await;
    let changed = {
        let mut snapshot = ctx.snapshot.write().await;
        if snapshot.devices() == devices.as_slice() {
            false
        } else {
            snapshot.set_devices(devices.clone());
            true
        }
    };

    if changed {
        debug!("Device list changed: {} devices", devices.len());
        ctx.snapshot.notify(SnapshotEvent::DevicesChanged);
    }
    devices
}

/// Re-read the player context (and so the running track) into the snapshot.
///
/// When no backend reports a context, a previously stored one is cleared.
pub async fn refresh_player_context(ctx: &SyncContext) -> Option<PlayerContext> {
    let Some(context) = ctx.backends.current_context().await else {
        let cleared = {
            let mut snapshot = ctx.snapshot.write().await;
            let had_context = snapshot.player_context().is_some();
            if had_context {
                snapshot.clear_player_context();
            }
            had_context
        };
        if cleared {
            debug!("Player context gone");
            ctx.snapshot.notify(SnapshotEvent::PlayerContextChanged);
        }
        return None;
    };
    let changed = {
        let mut snapshot = ctx.snapshot.write().await;
        if snapshot.player_context() == Some(&context) {
            false
        } else {
            snapshot.set_player_context(context.clone());
            true
        }
    };

    if changed {
        debug!("Player context changed: {:?}", context.state);
        ctx.snapshot.notify(SnapshotEvent::PlayerContextChanged);
    }
    Some(context)
}

/// Clears the pending flag of a loop when it ends, cancelled or not.
struct PendingLoop {
    flags: Arc<[AtomicBool; PollKind::COUNT]>,
    kind: PollKind,
}

impl Drop for PendingLoop {
    fn drop(&mut self) {
        self.flags[self.kind.index()].store(false, Ordering::SeqCst);
    }
}

/// Owns the polling loops of one activation.
#[derive(Debug, Clone)]
pub struct PollingSupervisor {
    ctx: SyncContext,
    pending: Arc<[AtomicBool; PollKind::COUNT]>,
}

impl PollingSupervisor {
    /// Create a supervisor for `ctx`.
    #[must_use]
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            pending: Arc::new(std::array::from_fn(|_| AtomicBool::new(false))),
        }
    }

    /// Whether a loop of `kind` is pending.
    #[must_use]
    pub fn is_pending(&self, kind: PollKind) -> bool {
        self.pending[kind.index()].load(Ordering::SeqCst)
    }

    /// Start a bounded polling loop for `condition`.
    ///
    /// Returns `false` without doing anything when a loop for the same kind
    /// is already pending.
    pub fn start_loop(&self, condition: Arc<dyn PollCondition>) -> bool {
        let kind = condition.kind();
        if self.pending[kind.index()].swap(true, Ordering::SeqCst) {
            debug!("Polling loop {} already pending", kind);
            return false;
        }

        let guard = PendingLoop {
            flags: Arc::clone(&self.pending),
            kind,
        };
        let ctx = self.ctx.clone();
        let config = &self.ctx.config.polling;
        let mut backoff = BackoffCounter::new(config.try_count_until_found, kind.interval(config));

        debug!(
            "Starting polling loop {} ({} attempts every {:?})",
            kind,
            backoff.remaining(),
            backoff.interval()
        );

        self.ctx.scheduler.spawn(TaskCategory::Polling, move |_| async move {
            let _guard = guard;
            loop {
                tokio::time::sleep(backoff.interval()).await;
                if condition.check(&ctx).await {
                    info!("Polling loop {} found its condition", kind);
                    condition.on_found(&ctx).await;
                    break;
                }
                if !backoff.record_miss() {
                    debug!("Polling loop {} exhausted", kind);
                    break;
                }
            }
        });
        true
    }

    /// Poll until spotify is connected, then populate playlists.
    pub fn start_spotify_connection_poll(&self, reconciler: PlaylistReconciler) -> bool {
        self.start_loop(Arc::new(SpotifyConnected::new(reconciler)))
    }

    /// Poll until slack is connected.
    pub fn start_slack_connection_poll(&self) -> bool {
        self.start_loop(Arc::new(SlackConnected))
    }

    /// Poll until a player device shows up.
    pub fn start_device_poll(&self) -> bool {
        self.start_loop(Arc::new(DeviceAvailable))
    }

    /// Refresh the device list now.
    pub async fn refresh_devices(&self) -> Vec<Device> {
        refresh_devices(&self.ctx).await
    }

    /// Refresh the player context now.
    pub async fn refresh_player_context(&self) -> Option<PlayerContext> {
        refresh_player_context(&self.ctx).await
    }

    /// Start the recurring context watcher.
    #[must_use]
    pub fn watch_context(&self) -> (mpsc::Receiver<DeviceEvent>, ContextWatcherHandle) {
        ContextWatcher::new(self.ctx.clone())
            .with_device_poll(self.clone())
            .start()
    }
}

// =============================================================================
// Context Watcher
// =============================================================================

/// Device changes observed by the [`ContextWatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A device appeared.
    Connected(Device),
    /// A device went away.
    Disconnected(Device),
    /// Initial device list when the watcher starts.
    Refreshed(Vec<Device>),
}

/// Handle for controlling a running context watcher.
#[derive(Debug, Clone)]
pub struct ContextWatcherHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl ContextWatcherHandle {
    /// Stop the watcher.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Periodically re-reads devices and player context.
///
/// Emits [`DeviceEvent`]s when the device set changes. With a supervisor
/// attached, a device poll starts whenever the device set becomes empty.
#[derive(Debug)]
pub struct ContextWatcher {
    ctx: SyncContext,
    poll_interval: Duration,
    supervisor: Option<PollingSupervisor>,
}

impl ContextWatcher {
    /// Watcher using the configured interval.
    #[must_use]
    pub fn new(ctx: SyncContext) -> Self {
        let poll_interval = ctx.config.polling.context_watch_interval();
        Self::with_interval(ctx, poll_interval)
    }

    /// Watcher with an explicit interval.
    #[must_use]
    pub const fn with_interval(ctx: SyncContext, poll_interval: Duration) -> Self {
        Self {
            ctx,
            poll_interval,
            supervisor: None,
        }
    }

    /// Start device polls through `supervisor` when no device is left.
    #[must_use]
    pub fn with_device_poll(mut self, supervisor: PollingSupervisor) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    /// Start watching.
    ///
    /// The watcher also stops when the context's scheduler shuts down.
    #[must_use]
    pub fn start(self) -> (mpsc::Receiver<DeviceEvent>, ContextWatcherHandle) {
        let (event_tx, event_rx) = mpsc::channel::<DeviceEvent>(32);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let ctx = self.ctx;
        let poll_interval = self.poll_interval;
        let supervisor = self.supervisor;
        let poll_devices = move || {
            if let Some(supervisor) = &supervisor {
                debug!("No player device, starting device poll");
                supervisor.start_device_poll();
            }
        };

        ctx.scheduler.clone().spawn(TaskCategory::ContextWatch, move |_| async move {
            let devices = refresh_devices(&ctx).await;
            refresh_player_context(&ctx).await;
            if devices.is_empty() {
                poll_devices();
            }
            let mut known: HashMap<String, Device> =
                devices.iter().map(|d| (d.id.clone(), d.clone())).collect();
            let _ = event_tx.send(DeviceEvent::Refreshed(devices)).await;

            let mut interval_timer = interval(poll_interval);
            // The first tick completes immediately.
            interval_timer.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Context watcher shutting down");
                        break;
                    }
                    _ = interval_timer.tick() => {
                        let current = refresh_devices(&ctx).await;
                        refresh_player_context(&ctx).await;
                        if current.is_empty() && !known.is_empty() {
                            poll_devices();
                        }

                        for device in &current {
                            if !known.contains_key(&device.id) {
                                info!("Device connected: {}", device.name);
                                let _ = event_tx.send(DeviceEvent::Connected(device.clone())).await;
                            }
                        }

                        let current: HashMap<String, Device> =
                            current.into_iter().map(|d| (d.id.clone(), d)).collect();
                        for (id, device) in &known {
                            if !current.contains_key(id) {
                                info!("Device disconnected: {}", device.name);
                                let _ = event_tx.send(DeviceEvent::Disconnected(device.clone())).await;
                            }
                        }

                        known = current;
                    }
                }
            }
        });

        (event_rx, ContextWatcherHandle { shutdown_tx })
    }
}
