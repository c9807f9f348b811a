//! Tree projection of the snapshot and the commands a tree can dispatch.
//!
//! Items carry data only; clicking an item maps to a [`TreeCommand`] that the
//! engine executes.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::model::{LIKED_SONGS_PLAYLIST_ID, PlaylistItem, TrackNode};
use crate::snapshot::DataSnapshot;

/// Commands dispatched from the tree back to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum TreeCommand {
    /// Play a playlist from its first track.
    #[serde(rename_all = "camelCase")]
    PlayPlaylist {
        /// Playlist to play.
        playlist_id: String,
    },
    /// Play one track.
    #[serde(rename_all = "camelCase")]
    PlayTrack {
        /// Playlist the track belongs to.
        playlist_id: String,
        /// Track to play.
        track_id: String,
    },
    /// Expand a playlist, fetching its tracks if needed.
    #[serde(rename_all = "camelCase")]
    Expand {
        /// Playlist to expand.
        playlist_id: String,
    },
    /// Collapse a playlist.
    #[serde(rename_all = "camelCase")]
    Collapse {
        /// Playlist to collapse.
        playlist_id: String,
    },
    /// Re-fetch the playlists.
    RefreshPlaylists,
    /// Start waiting for a spotify connection.
    ConnectSpotify,
    /// Start waiting for a slack connection.
    ConnectSlack,
}

impl TreeCommand {
    /// The command a click on `item` maps to.
    #[must_use]
    pub fn for_item(item: &PlaylistItem) -> Self {
        match item {
            PlaylistItem::Playlist(node) => {
                if node.decoration.expanded {
                    Self::Collapse {
                        playlist_id: node.id.clone(),
                    }
                } else {
                    Self::Expand {
                        playlist_id: node.id.clone(),
                    }
                }
            }
            PlaylistItem::Track(node) => Self::PlayTrack {
                playlist_id: node.playlist_id.clone(),
                track_id: node.track.id.clone(),
            },
        }
    }
}

/// Flatten the snapshot into tree items: each displayed playlist followed by
/// its tracks when expanded.
#[must_use]
pub fn build_tree(snapshot: &DataSnapshot) -> Vec<PlaylistItem> {
    let mut items = Vec::new();
    for node in snapshot.display_playlists() {
        items.push(PlaylistItem::Playlist(node.clone()));
        if !node.decoration.expanded {
            continue;
        }

        let tracks = if node.id == LIKED_SONGS_PLAYLIST_ID {
            Some(snapshot.liked_tracks())
        } else {
            snapshot.playlist_tracks(&node.id)
        };
        for track in tracks.unwrap_or_default() {
            items.push(PlaylistItem::Track(TrackNode {
                track: track.clone(),
                playlist_id: node.id.clone(),
            }));
        }
    }
    drop_orphans(items)
}

/// Drop track items whose parent playlist is not among the items.
#[must_use]
pub fn drop_orphans(items: Vec<PlaylistItem>) -> Vec<PlaylistItem> {
    let parents: HashSet<String> = items
        .iter()
        .filter_map(|item| match item {
            PlaylistItem::Playlist(node) => Some(node.id.clone()),
            PlaylistItem::Track(_) => None,
        })
        .collect();

    items
        .into_iter()
        .filter(|item| match item {
            PlaylistItem::Playlist(_) => true,
            PlaylistItem::Track(node) => parents.contains(&node.playlist_id),
        })
        .collect()
}
