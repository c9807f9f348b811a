//! The data snapshot: the one authoritative record of what the user is
//! currently doing.
//!
//! Anyone can read the snapshot; each field has exactly one writing
//! component, enforced by keeping setters `pub(crate)` and calling them only
//! from the owning module:
//!
//! | Fields | Owner |
//! |---|---|
//! | playlists, display playlists, playlist tracks, liked tracks | [`crate::reconciler`] |
//! | selection pointers, loading flag, desktop session | [`crate::playback`] |
//! | devices, player context, running track | [`crate::polling`] |
//! | integration flags, credentials, user state | [`crate::status`] |
//!
//! Observers subscribe to [`SnapshotEvent`]s instead of polling.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, broadcast};
use tracing::{debug, trace};

use crate::model::{
    Device, IntegrationFlags, PlayerContext, Playlist, PlaylistNode, Track,
};
use crate::status::UserState;

/// Capacity of the observer broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Change notifications fanned out to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SnapshotEvent {
    /// The display playlist list changed.
    PlaylistsChanged,
    /// The track list of one playlist was (re)fetched.
    PlaylistTracksChanged(String),
    /// Selected playlist or track changed.
    SelectionChanged,
    /// Loading visual state changed.
    LoadingChanged(bool),
    /// Device list changed.
    DevicesChanged,
    /// Player context or running track changed.
    PlayerContextChanged,
    /// Integration flags changed.
    IntegrationsChanged,
    /// Snapshot was torn down.
    Reset,
}

/// In-memory snapshot state.
#[derive(Debug, Clone, Default)]
pub struct DataSnapshot {
    raw_playlists: Vec<Playlist>,
    display_playlists: Vec<PlaylistNode>,
    playlist_tracks: HashMap<String, Vec<Track>>,
    liked_tracks: Vec<Track>,
    selected_playlist: Option<PlaylistNode>,
    selected_track: Option<Track>,
    running_track: Option<Track>,
    devices: Vec<Device>,
    player_context: Option<PlayerContext>,
    integrations: IntegrationFlags,
    credentials: HashMap<String, String>,
    user_state: UserState,
    loading: bool,
    desktop_session: bool,
}

impl DataSnapshot {
    /// Raw remote playlist ordering from the last successful fetch.
    #[must_use]
    pub fn raw_playlists(&self) -> &[Playlist] {
        &self.raw_playlists
    }

    /// Reconciled display ordering.
    #[must_use]
    pub fn display_playlists(&self) -> &[PlaylistNode] {
        &self.display_playlists
    }

    /// Look up a displayed playlist by id.
    #[must_use]
    pub fn playlist(&self, id: &str) -> Option<&PlaylistNode> {
        self.display_playlists.iter().find(|p| p.id == id)
    }

    /// Fetched track list of a playlist, if any.
    #[must_use]
    pub fn playlist_tracks(&self, playlist_id: &str) -> Option<&[Track]> {
        self.playlist_tracks.get(playlist_id).map(Vec::as_slice)
    }

    /// Synthesized liked-songs list.
    #[must_use]
    pub fn liked_tracks(&self) -> &[Track] {
        &self.liked_tracks
    }

    /// Last playlist the user selected.
    #[must_use]
    pub const fn selected_playlist(&self) -> Option<&PlaylistNode> {
        self.selected_playlist.as_ref()
    }

    /// Last track the user selected.
    #[must_use]
    pub const fn selected_track(&self) -> Option<&Track> {
        self.selected_track.as_ref()
    }

    /// Track the active backend reports as playing.
    #[must_use]
    pub const fn running_track(&self) -> Option<&Track> {
        self.running_track.as_ref()
    }

    /// Current device list.
    #[must_use]
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Device currently holding the playback session.
    #[must_use]
    pub fn active_device(&self) -> Option<&Device> {
        self.devices.iter().find(|d| d.is_active)
    }

    /// Last reported player context.
    #[must_use]
    pub const fn player_context(&self) -> Option<&PlayerContext> {
        self.player_context.as_ref()
    }

    /// Integration flags.
    #[must_use]
    pub const fn integrations(&self) -> IntegrationFlags {
        self.integrations
    }

    /// Cached access token for an auth type (`"spotify"`, `"slack"`).
    #[must_use]
    pub fn credential(&self, auth_type: &str) -> Option<&str> {
        self.credentials.get(auth_type).map(String::as_str)
    }

    /// Last classified user state.
    #[must_use]
    pub const fn user_state(&self) -> UserState {
        self.user_state
    }

    /// Whether the UI is in the loading state.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.loading
    }

    /// Whether a desktop player session was confirmed.
    #[must_use]
    pub const fn desktop_session(&self) -> bool {
        self.desktop_session
    }

    // Reconciler-owned fields.

    pub(crate) fn set_playlists(&mut self, raw: Vec<Playlist>, display: Vec<PlaylistNode>) {
        self.raw_playlists = raw;
        self.display_playlists = display;
    }

    pub(crate) fn set_display_playlists(&mut self, display: Vec<PlaylistNode>) {
        self.display_playlists = display;
    }

    pub(crate) fn set_playlist_tracks(&mut self, playlist_id: &str, tracks: Vec<Track>) {
        self.playlist_tracks.insert(playlist_id.to_string(), tracks);
    }

    pub(crate) fn retain_playlist_tracks(&mut self, keep: impl Fn(&str) -> bool) {
        self.playlist_tracks.retain(|id, _| keep(id));
    }

    pub(crate) fn set_liked_tracks(&mut self, tracks: Vec<Track>) {
        self.liked_tracks = tracks;
    }

    // Playback-owned fields.

    pub(crate) fn set_selection(&mut self, playlist: Option<PlaylistNode>, track: Option<Track>) {
        self.selected_playlist = playlist;
        self.selected_track = track;
    }

    pub(crate) const fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
    }

    pub(crate) const fn set_desktop_session(&mut self, confirmed: bool) {
        self.desktop_session = confirmed;
    }

    // Polling-owned fields.

    pub(crate) fn set_devices(&mut self, devices: Vec<Device>) {
        self.devices = devices;
    }

    pub(crate) fn set_player_context(&mut self, context: PlayerContext) {
        self.running_track = context.track.clone();
        self.player_context = Some(context);
    }

    pub(crate) fn clear_player_context(&mut self) {
        self.running_track = None;
        self.player_context = None;
    }

    // Status-owned fields.

    pub(crate) const fn set_integrations(&mut self, flags: IntegrationFlags) {
        self.integrations = flags;
    }

    pub(crate) fn set_credential(&mut self, auth_type: &str, access_token: String) {
        self.credentials.insert(auth_type.to_string(), access_token);
    }

    pub(crate) const fn set_user_state(&mut self, state: UserState) {
        self.user_state = state;
    }
}

/// Shared handle to the snapshot plus the observer channel.
///
/// Clones refer to the same snapshot.
#[derive(Debug, Clone)]
pub struct SharedSnapshot {
    inner: Arc<RwLock<DataSnapshot>>,
    events: broadcast::Sender<SnapshotEvent>,
}

impl SharedSnapshot {
    /// Create an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(DataSnapshot::default())),
            events,
        }
    }

    /// Subscribe to change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SnapshotEvent> {
        self.events.subscribe()
    }

    /// Read access. Do not hold the guard across remote calls.
    pub async fn read(&self) -> RwLockReadGuard<'_, DataSnapshot> {
        self.inner.read().await
    }

    /// Cloned copy of the current state.
    pub async fn snapshot(&self) -> DataSnapshot {
        self.inner.read().await.clone()
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, DataSnapshot> {
        self.inner.write().await
    }

    /// Notify observers. A send with no subscribers is not an error.
    pub(crate) fn notify(&self, event: SnapshotEvent) {
        trace!("Snapshot event: {:?}", event);
        let _ = self.events.send(event);
    }

    /// Tear the snapshot down to its empty state.
    pub async fn reset(&self) {
        *self.inner.write().await = DataSnapshot::default();
        debug!("Snapshot reset");
        self.notify(SnapshotEvent::Reset);
    }
}

impl Default for SharedSnapshot {
    fn default() -> Self {
        Self::new()
    }
}
