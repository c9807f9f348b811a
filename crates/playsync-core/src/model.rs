//! Data model shared by every component: tracks, playlists, devices and the
//! player context reported by backends.

use serde::{Deserialize, Serialize};

/// Identifier of the synthetic "liked songs" playlist.
pub const LIKED_SONGS_PLAYLIST_ID: &str = "playsync:liked-songs";

/// Default display name of the synthetic "liked songs" playlist.
pub const DEFAULT_LIKED_SONGS_NAME: &str = "Liked Songs";

/// Which external player a command is routed to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Browser-hosted web player, driven through id-based API calls.
    Web,
    /// Desktop player application.
    Desktop,
    /// Legacy local player (e.g. an OS-scripted music app).
    LegacyLocal,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Web => write!(f, "web"),
            Self::Desktop => write!(f, "desktop"),
            Self::LegacyLocal => write!(f, "legacy-local"),
        }
    }
}

/// Player type declared on tracks and playlists by the library they came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PlayerType {
    /// Streamed through the web API (default).
    #[default]
    Web,
    /// Owned by the desktop application.
    Desktop,
    /// Owned by the legacy local player.
    Legacy,
}

impl PlayerType {
    /// Whether items of this type must be played by the legacy local backend.
    #[must_use]
    pub const fn is_legacy(self) -> bool {
        matches!(self, Self::Legacy)
    }
}

/// A single track as known to the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Track identifier (backend-specific URI or id).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Artist display name.
    #[serde(default)]
    pub artist: Option<String>,
    /// Duration in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,
    /// Session start (Unix epoch seconds).
    #[serde(default)]
    pub start: Option<i64>,
    /// Session end (Unix epoch seconds).
    #[serde(default)]
    pub end: Option<i64>,
    /// Session start shifted by the viewer's timezone offset.
    #[serde(default)]
    pub local_start: Option<i64>,
    /// Session end shifted by the viewer's timezone offset.
    #[serde(default)]
    pub local_end: Option<i64>,
    /// Timezone offset in minutes used for the local fields.
    #[serde(default)]
    pub offset_minutes: Option<i32>,
    /// Whether the user loved/liked this track.
    #[serde(default)]
    pub loved: bool,
    /// Player type the track belongs to.
    #[serde(default)]
    pub player_type: PlayerType,
    /// Owning playlist, if the track was fetched as part of one.
    #[serde(default)]
    pub playlist_id: Option<String>,
}

impl Track {
    /// Create a track with just an id and name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Attach the owning playlist id.
    #[must_use]
    pub fn in_playlist(mut self, playlist_id: impl Into<String>) -> Self {
        self.playlist_id = Some(playlist_id.into());
        self
    }

    /// Attach session timing and the timezone-local copies of it.
    ///
    /// `offset_secs` is the local offset east of UTC.
    #[must_use]
    pub fn with_session_timing(mut self, start: i64, end: i64, offset_secs: i32) -> Self {
        let offset = i64::from(offset_secs);
        self.start = Some(start);
        self.end = Some(end);
        self.local_start = Some(start + offset);
        self.local_end = Some(end + offset);
        self.offset_minutes = Some(offset_secs / 60);
        self
    }
}

/// A playlist as returned by the remote library, before reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    /// Playlist identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Number of tracks reported by the library.
    #[serde(default)]
    pub track_count: usize,
    /// Player type the playlist belongs to.
    #[serde(default)]
    pub player_type: PlayerType,
}

impl Playlist {
    /// Create a playlist entry.
    pub fn new(id: impl Into<String>, name: impl Into<String>, track_count: usize) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            track_count,
            player_type: PlayerType::default(),
        }
    }
}

/// Per-playlist UI bookkeeping carried across reconciliations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Decoration {
    /// Whether the playlist is expanded in the tree.
    pub expanded: bool,
    /// Whether the running track belongs to this playlist.
    pub playing: bool,
    /// Optional icon name.
    pub icon: Option<String>,
    /// Optional folder label the user grouped this playlist under.
    pub folder: Option<String>,
}

/// Playlist variant of a [`PlaylistItem`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistNode {
    /// Playlist identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Number of child tracks.
    pub track_count: usize,
    /// Position in the display ordering.
    pub position: usize,
    /// Player type the playlist belongs to.
    pub player_type: PlayerType,
    /// UI decoration carried by id.
    pub decoration: Decoration,
    /// Whether the node was constructed locally rather than fetched.
    pub synthetic: bool,
}

impl PlaylistNode {
    /// Build a node from a remote playlist with default decoration.
    #[must_use]
    pub fn from_remote(playlist: &Playlist, position: usize) -> Self {
        Self {
            id: playlist.id.clone(),
            name: playlist.name.clone(),
            track_count: playlist.track_count,
            position,
            player_type: playlist.player_type,
            decoration: Decoration::default(),
            synthetic: false,
        }
    }

    /// Build the synthetic liked-songs node.
    pub fn liked_songs(name: impl Into<String>, track_count: usize) -> Self {
        Self {
            id: LIKED_SONGS_PLAYLIST_ID.to_string(),
            name: name.into(),
            track_count,
            position: 0,
            player_type: PlayerType::Web,
            decoration: Decoration {
                icon: Some("heart".to_string()),
                ..Decoration::default()
            },
            synthetic: true,
        }
    }
}

/// Track variant of a [`PlaylistItem`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrackNode {
    /// The track itself.
    pub track: Track,
    /// Parent playlist this item renders under.
    pub playlist_id: String,
}

/// A node of the playlist tree: either a playlist or one of its tracks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum PlaylistItem {
    /// A playlist (container).
    Playlist(PlaylistNode),
    /// A track leaf.
    Track(TrackNode),
}

impl PlaylistItem {
    /// Identifier of the underlying playlist or track.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Playlist(p) => &p.id,
            Self::Track(t) => &t.track.id,
        }
    }

    /// Player type declared by the item.
    #[must_use]
    pub const fn player_type(&self) -> PlayerType {
        match self {
            Self::Playlist(p) => p.player_type,
            Self::Track(t) => t.track.player_type,
        }
    }
}

/// Device kind as reported by the backends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Desktop application on a computer.
    Computer,
    /// Browser web player.
    WebPlayer,
    /// Phone or tablet.
    Smartphone,
    /// Connected speaker.
    Speaker,
    /// Anything else.
    #[default]
    Other,
}

/// A playback device visible to a backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Device identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Device kind.
    #[serde(default)]
    pub kind: DeviceKind,
    /// Whether this device currently holds the playback session.
    #[serde(default)]
    pub is_active: bool,
    /// Volume percentage, if reported.
    #[serde(default)]
    pub volume_percent: Option<u8>,
    /// Backend that reported the device.
    pub backend: BackendKind,
}

impl Device {
    /// Whether the device is the desktop application.
    ///
    /// Decided by the reporting backend; browser players report as computers.
    #[must_use]
    pub fn is_desktop(&self) -> bool {
        self.backend == BackendKind::Desktop
    }
}

/// Playback state reported by a backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlayState {
    /// Playing.
    Playing,
    /// Paused.
    Paused,
    /// Nothing loaded.
    #[default]
    Stopped,
}

/// What the active backend reports about current playback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlayerContext {
    /// Play state.
    pub state: PlayState,
    /// Device holding the session.
    #[serde(default)]
    pub device: Option<Device>,
    /// Volume percentage.
    #[serde(default)]
    pub volume_percent: Option<u8>,
    /// Track currently loaded in the player.
    #[serde(default)]
    pub track: Option<Track>,
}

/// Integration flags for third-party services.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct IntegrationFlags {
    /// A spotify auth record is present.
    pub spotify: bool,
    /// A slack auth record is present.
    pub slack: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_session_timing_applies_offset() {
        let track = Track::new("t1", "Song").with_session_timing(1_000, 1_200, -18_000);
        assert_eq!(track.start, Some(1_000));
        assert_eq!(track.end, Some(1_200));
        assert_eq!(track.local_start, Some(1_000 - 18_000));
        assert_eq!(track.local_end, Some(1_200 - 18_000));
        assert_eq!(track.offset_minutes, Some(-300));
    }

    #[test]
    fn test_playlist_item_tagged_serialization() {
        let item = PlaylistItem::Track(TrackNode {
            track: Track::new("t1", "Song"),
            playlist_id: "pl".to_string(),
        });
        let json = serde_json::to_value(&item).expect("serialize failed");
        assert_eq!(json["type"], "track");
        assert_eq!(json["data"]["playlistId"], "pl");
        assert_eq!(item.id(), "t1");
    }

    #[test]
    fn test_liked_songs_node_is_synthetic() {
        let node = PlaylistNode::liked_songs(DEFAULT_LIKED_SONGS_NAME, 3);
        assert!(node.synthetic);
        assert_eq!(node.id, LIKED_SONGS_PLAYLIST_ID);
        assert_eq!(node.track_count, 3);
    }

    #[test]
    fn test_device_is_desktop() {
        let device = Device {
            id: "d".to_string(),
            name: "Laptop".to_string(),
            kind: DeviceKind::Computer,
            is_active: false,
            volume_percent: None,
            backend: BackendKind::Web,
        };
        assert!(!device.is_desktop());

        let desktop = Device {
            backend: BackendKind::Desktop,
            kind: DeviceKind::Other,
            ..device
        };
        assert!(desktop.is_desktop());
    }

    #[test]
    fn test_backend_kind_display() {
        assert_eq!(BackendKind::LegacyLocal.to_string(), "legacy-local");
        assert!(PlayerType::Legacy.is_legacy());
        assert!(!PlayerType::Web.is_legacy());
    }
}
