//! Playlist reconciliation.
//!
//! A fresh remote ordering is authoritative for membership and naming. The
//! synthetic liked-songs playlist is re-inserted at the head, and per-playlist
//! UI state (expanded, playing, icon, folder) is carried forward by id.
//!
//! A failed fetch never touches the snapshot. Rate-limit and server errors
//! schedule a bounded delayed retry of the whole refresh.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::config::PlaylistSortOrder;
use crate::context::SyncContext;
use crate::error::{Error, Result};
use crate::model::{Decoration, LIKED_SONGS_PLAYLIST_ID, Playlist, PlaylistNode, Track};
use crate::scheduler::TaskCategory;
use crate::snapshot::SnapshotEvent;

/// Merge a remote ordering with the previously displayed one.
///
/// `synthetic` nodes go first, in order; a remote entry whose id collides with
/// a synthetic one (or with an earlier remote entry) is dropped. Positions are
/// renumbered from zero. Running the result back through with the same
/// `remote` and `synthetic` yields the same list.
#[must_use]
pub fn reconcile(
    remote: &[Playlist],
    previous: &[PlaylistNode],
    synthetic: &[PlaylistNode],
    sort_order: PlaylistSortOrder,
) -> Vec<PlaylistNode> {
    let previous_by_id: HashMap<&str, &PlaylistNode> =
        previous.iter().map(|p| (p.id.as_str(), p)).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut merged = Vec::with_capacity(synthetic.len() + remote.len());

    for node in synthetic {
        if !seen.insert(node.id.as_str()) {
            continue;
        }
        let mut fresh = node.clone();
        fresh.synthetic = true;
        if let Some(prev) = previous_by_id.get(node.id.as_str()) {
            fresh.decoration = carry_forward(&prev.decoration, fresh.decoration);
        }
        merged.push(fresh);
    }

    let mut ordered: Vec<&Playlist> = remote.iter().collect();
    if sort_order == PlaylistSortOrder::Alphabetical {
        ordered.sort_by_cached_key(|p| p.name.to_lowercase());
    }

    for playlist in ordered {
        if !seen.insert(playlist.id.as_str()) {
            continue;
        }
        let mut node = PlaylistNode::from_remote(playlist, 0);
        if let Some(prev) = previous_by_id.get(playlist.id.as_str()) {
            node.decoration = carry_forward(&prev.decoration, node.decoration);
        }
        merged.push(node);
    }

    for (position, node) in merged.iter_mut().enumerate() {
        node.position = position;
    }
    merged
}

fn carry_forward(previous: &Decoration, fresh: Decoration) -> Decoration {
    Decoration {
        expanded: previous.expanded,
        playing: previous.playing,
        icon: previous.icon.clone().or(fresh.icon),
        folder: previous.folder.clone().or(fresh.folder),
    }
}

/// Clears the outstanding-retry flag when the retry task ends.
struct RetryGuard(Arc<AtomicBool>);

impl Drop for RetryGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Sole writer of the playlist fields of the snapshot.
#[derive(Debug, Clone)]
pub struct PlaylistReconciler {
    ctx: SyncContext,
    retry_outstanding: Arc<AtomicBool>,
}

impl PlaylistReconciler {
    /// Create a reconciler for `ctx`.
    #[must_use]
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            retry_outstanding: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a delayed retry is scheduled or running.
    #[must_use]
    pub fn retry_pending(&self) -> bool {
        self.retry_outstanding.load(Ordering::SeqCst)
    }

    /// Refresh the playlists from the library.
    ///
    /// Returns the number of displayed playlists on success. Failures leave
    /// the snapshot untouched; retryable ones schedule a delayed retry.
    pub async fn refresh_playlists(&self) -> Option<usize> {
        match self.try_refresh().await {
            Ok(count) => Some(count),
            Err(e) if e.is_retryable() => {
                warn!("Playlist fetch failed, scheduling retry: {}", e);
                self.schedule_retry();
                None
            }
            Err(e) => {
                warn!("Playlist fetch failed: {}", e);
                None
            }
        }
    }

    fn schedule_retry(&self) {
        let config = &self.ctx.config.playlists;
        let max_retries = config.max_fetch_retries;
        let delay = config.fetch_retry_delay();

        if max_retries == 0 {
            return;
        }
        if self.retry_outstanding.swap(true, Ordering::SeqCst) {
            debug!("Playlist retry already outstanding");
            return;
        }

        let this = self.clone();
        let guard = RetryGuard(Arc::clone(&self.retry_outstanding));
        self.ctx
            .scheduler
            .schedule(TaskCategory::PlaylistRetry, delay, async move {
                let _guard = guard;
                let mut attempt = 1;
                loop {
                    match this.try_refresh().await {
                        Ok(count) => {
                            info!("Playlist retry {} succeeded with {} playlists", attempt, count);
                            break;
                        }
                        Err(e) if e.is_retryable() && attempt < max_retries => {
                            debug!("Playlist retry {} failed: {}", attempt, e);
                            attempt += 1;
                            tokio::time::sleep(delay).await;
                        }
                        Err(e) => {
                            warn!("Giving up on playlist fetch after {} retries: {}", attempt, e);
                            break;
                        }
                    }
                }
            });
    }

    async fn try_refresh(&self) -> Result<usize> {
        let remote = self.ctx.library.fetch_playlists().await?;
        let liked = match self.ctx.library.fetch_liked_tracks().await {
            Ok(tracks) => Some(tag_liked(tracks)),
            Err(e) => {
                warn!("Liked songs fetch failed, keeping previous list: {}", e);
                None
            }
        };

        let config = &self.ctx.config.playlists;
        let count = {
            let mut snapshot = self.ctx.snapshot.write().await;
            let liked = liked.unwrap_or_else(|| snapshot.liked_tracks().to_vec());
            let synthetic = if liked.is_empty() {
                Vec::new()
            } else {
                vec![PlaylistNode::liked_songs(&config.liked_songs_name, liked.len())]
            };

            let display = reconcile(
                &remote,
                snapshot.display_playlists(),
                &synthetic,
                config.sort_order,
            );
            let ids: HashSet<String> = display.iter().map(|p| p.id.clone()).collect();
            let count = display.len();

            snapshot.retain_playlist_tracks(|id| ids.contains(id));
            snapshot.set_liked_tracks(liked);
            snapshot.set_playlists(remote, display);
            count
        };

        debug!("Reconciled {} playlists", count);
        self.ctx.snapshot.notify(SnapshotEvent::PlaylistsChanged);
        Ok(count)
    }

    /// Fetch and store the tracks of one playlist.
    ///
    /// The liked-songs playlist answers from the snapshot. Tracks of a
    /// playlist that disappeared during the fetch are not stored.
    pub async fn fetch_tracks(&self, playlist_id: &str) -> Result<Vec<Track>> {
        if playlist_id == LIKED_SONGS_PLAYLIST_ID {
            return Ok(self.ctx.snapshot.read().await.liked_tracks().to_vec());
        }

        let tracks: Vec<Track> = self
            .ctx
            .library
            .fetch_playlist_tracks(playlist_id)
            .await?
            .into_iter()
            .map(|t| t.in_playlist(playlist_id))
            .collect();

        {
            let mut snapshot = self.ctx.snapshot.write().await;
            if snapshot.playlist(playlist_id).is_none() {
                return Err(Error::PlaylistNotFound(playlist_id.to_string()));
            }
            snapshot.set_playlist_tracks(playlist_id, tracks.clone());
        }

        self.ctx
            .snapshot
            .notify(SnapshotEvent::PlaylistTracksChanged(playlist_id.to_string()));
        Ok(tracks)
    }

    /// Move the "playing" decoration to `playlist_id` (or clear it).
    pub async fn mark_playing(&self, playlist_id: Option<&str>) -> bool {
        let changed = self.update_display(|nodes| {
            let mut changed = false;
            for node in nodes {
                let playing = playlist_id == Some(node.id.as_str());
                if node.decoration.playing != playing {
                    node.decoration.playing = playing;
                    changed = true;
                }
            }
            changed
        })
        .await;

        if changed {
            debug!("Playing decoration moved to {:?}", playlist_id);
        }
        changed
    }

    /// Expand or collapse a playlist.
    pub async fn set_expanded(&self, playlist_id: &str, expanded: bool) -> Result<()> {
        let mut found = false;
        self.update_display(|nodes| {
            if let Some(node) = nodes.iter_mut().find(|n| n.id == playlist_id) {
                found = true;
                let changed = node.decoration.expanded != expanded;
                node.decoration.expanded = expanded;
                changed
            } else {
                false
            }
        })
        .await;

        if found {
            Ok(())
        } else {
            Err(Error::PlaylistNotFound(playlist_id.to_string()))
        }
    }

    async fn update_display(&self, update: impl FnOnce(&mut [PlaylistNode]) -> bool) -> bool {
        let changed = {
            let mut snapshot = self.ctx.snapshot.write().await;
            let mut display = snapshot.display_playlists().to_vec();
            let changed = update(&mut display);
            if changed {
                snapshot.set_display_playlists(display);
            }
            changed
        };

        if changed {
            self.ctx.snapshot.notify(SnapshotEvent::PlaylistsChanged);
        }
        changed
    }
}

fn tag_liked(tracks: Vec<Track>) -> Vec<Track> {
    tracks
        .into_iter()
        .map(|mut t| {
            t.loved = true;
            t.in_playlist(LIKED_SONGS_PLAYLIST_ID)
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::backend::MockMusicLibrary;
    use crate::config::SyncConfig;
    use crate::context::Collaborators;
    use crate::remote::MockRemoteSyncClient;

    fn remote(ids: &[&str]) -> Vec<Playlist> {
        ids.iter().map(|id| Playlist::new(*id, id.to_uppercase(), 1)).collect()
    }

    fn ids(nodes: &[PlaylistNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.id.as_str()).collect()
    }

    fn context(library: MockMusicLibrary, config: SyncConfig) -> SyncContext {
        SyncContext::new(
            Arc::new(config),
            Collaborators::new(Arc::new(MockRemoteSyncClient::new()), Arc::new(library)),
        )
    }

    // =========================================================================
    // reconcile
    // =========================================================================

    #[test]
    fn test_reconcile_is_idempotent() {
        let synthetic = vec![PlaylistNode::liked_songs("Liked", 2)];
        let fresh = remote(&["a", "b", "c"]);

        let once = reconcile(&fresh, &[], &synthetic, PlaylistSortOrder::Remote);
        let twice = reconcile(&fresh, &once, &synthetic, PlaylistSortOrder::Remote);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_reconcile_carries_decoration_by_id() {
        let mut previous = reconcile(&remote(&["a", "b"]), &[], &[], PlaylistSortOrder::Remote);
        previous[1].decoration.expanded = true;
        previous[1].decoration.folder = Some("Work".to_string());

        let merged = reconcile(&remote(&["c", "b", "a"]), &previous, &[], PlaylistSortOrder::Remote);

        assert_eq!(ids(&merged), vec!["c", "b", "a"]);
        let b = merged.iter().find(|n| n.id == "b").unwrap();
        assert!(b.decoration.expanded);
        assert_eq!(b.decoration.folder.as_deref(), Some("Work"));
        assert_eq!(b.position, 1);
        assert!(!merged[2].decoration.expanded);
    }

    #[test]
    fn test_reconcile_synthetic_at_head_without_duplicates() {
        let synthetic = vec![PlaylistNode::liked_songs("Liked", 2)];
        let mut fresh = remote(&["a"]);
        fresh.push(Playlist::new(LIKED_SONGS_PLAYLIST_ID, "Imposter", 9));

        let merged = reconcile(&fresh, &[], &synthetic, PlaylistSortOrder::Remote);

        assert_eq!(ids(&merged), vec![LIKED_SONGS_PLAYLIST_ID, "a"]);
        assert!(merged[0].synthetic);
        assert_eq!(merged[0].name, "Liked");
        assert_eq!(merged[0].position, 0);
        assert_eq!(merged[1].position, 1);
    }

    #[test]
    fn test_reconcile_empty_remote_replaces_list() {
        let previous = reconcile(&remote(&["a", "b"]), &[], &[], PlaylistSortOrder::Remote);
        let merged = reconcile(&[], &previous, &[], PlaylistSortOrder::Remote);
        assert!(merged.is_empty());
    }

    #[test]
    fn test_reconcile_alphabetical_sort() {
        let fresh = vec![
            Playlist::new("1", "zebra", 1),
            Playlist::new("2", "Apple", 1),
            Playlist::new("3", "mango", 1),
        ];
        let merged = reconcile(&fresh, &[], &[], PlaylistSortOrder::Alphabetical);
        assert_eq!(ids(&merged), vec!["2", "3", "1"]);
    }

    #[test]
    fn test_reconcile_keeps_synthetic_icon() {
        let synthetic = vec![PlaylistNode::liked_songs("Liked", 1)];
        let mut previous = reconcile(&[], &[], &synthetic, PlaylistSortOrder::Remote);
        previous[0].decoration.icon = None;
        previous[0].decoration.expanded = true;

        let merged = reconcile(&[], &previous, &synthetic, PlaylistSortOrder::Remote);
        assert_eq!(merged[0].decoration.icon.as_deref(), Some("heart"));
        assert!(merged[0].decoration.expanded);
    }

    // =========================================================================
    // PlaylistReconciler
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_server_error_leaves_list_and_schedules_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut library = MockMusicLibrary::new();
        library.expect_fetch_playlists().returning(move || {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(remote(&["a", "b"])),
                1 => Err(Error::ServerError { status: 503 }),
                _ => Ok(remote(&["a", "b", "c"])),
            }
        });
        library.expect_fetch_liked_tracks().returning(|| Ok(Vec::new()));

        let ctx = context(library, SyncConfig::default());
        let reconciler = PlaylistReconciler::new(ctx.clone());

        assert_eq!(reconciler.refresh_playlists().await, Some(2));
        assert_eq!(reconciler.refresh_playlists().await, None);

        assert_eq!(ids(ctx.snapshot.read().await.display_playlists()), vec!["a", "b"]);
        assert!(reconciler.retry_pending());

        tokio::time::sleep(Duration::from_millis(3_100)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            ids(ctx.snapshot.read().await.display_playlists()),
            vec!["a", "b", "c"]
        );
        assert!(!reconciler.retry_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded_and_single() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut library = MockMusicLibrary::new();
        library.expect_fetch_playlists().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::RateLimited)
        });

        let mut config = SyncConfig::default();
        config.playlists.max_fetch_retries = 2;
        let reconciler = PlaylistReconciler::new(context(library, config));

        reconciler.refresh_playlists().await;
        reconciler.refresh_playlists().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_secs(60)).await;

        // Two direct calls plus two retries from the single outstanding task.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(!reconciler.retry_pending());
    }

    #[tokio::test]
    async fn test_network_failure_is_not_retried() {
        let mut library = MockMusicLibrary::new();
        library
            .expect_fetch_playlists()
            .times(1)
            .returning(|| Err(Error::network_error("offline")));

        let reconciler = PlaylistReconciler::new(context(library, SyncConfig::default()));
        assert_eq!(reconciler.refresh_playlists().await, None);
        assert!(!reconciler.retry_pending());
    }

    #[tokio::test]
    async fn test_liked_failure_keeps_previous_liked_list() {
        let liked_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&liked_calls);

        let mut library = MockMusicLibrary::new();
        library
            .expect_fetch_playlists()
            .returning(|| Ok(remote(&["a"])));
        library.expect_fetch_liked_tracks().returning(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(vec![Track::new("t1", "One"), Track::new("t2", "Two")])
            } else {
                Err(Error::ServerError { status: 500 })
            }
        });

        let ctx = context(library, SyncConfig::default());
        let reconciler = PlaylistReconciler::new(ctx.clone());

        reconciler.refresh_playlists().await;
        reconciler.refresh_playlists().await;

        let snapshot = ctx.snapshot.read().await;
        assert_eq!(snapshot.liked_tracks().len(), 2);
        assert!(snapshot.liked_tracks().iter().all(|t| t.loved));
        assert_eq!(
            ids(snapshot.display_playlists()),
            vec![LIKED_SONGS_PLAYLIST_ID, "a"]
        );
        assert_eq!(snapshot.display_playlists()[0].track_count, 2);
    }

    #[tokio::test]
    async fn test_fetch_tracks_tags_playlist_and_notifies() {
        let mut library = MockMusicLibrary::new();
        library.expect_fetch_playlists().returning(|| Ok(remote(&["a"])));
        library.expect_fetch_liked_tracks().returning(|| Ok(Vec::new()));
        library
            .expect_fetch_playlist_tracks()
            .withf(|id| id == "a")
            .returning(|_| Ok(vec![Track::new("t1", "One")]));

        let ctx = context(library, SyncConfig::default());
        let reconciler = PlaylistReconciler::new(ctx.clone());
        reconciler.refresh_playlists().await;

        let mut events = ctx.snapshot.subscribe();
        let tracks = reconciler.fetch_tracks("a").await.expect("tracks");

        assert_eq!(tracks[0].playlist_id.as_deref(), Some("a"));
        assert_eq!(ctx.snapshot.read().await.playlist_tracks("a").map(<[Track]>::len), Some(1));
        assert_eq!(
            events.recv().await.ok(),
            Some(SnapshotEvent::PlaylistTracksChanged("a".to_string()))
        );
    }

    #[tokio::test]
    async fn test_mark_playing_moves_decoration() {
        let mut library = MockMusicLibrary::new();
        library
            .expect_fetch_playlists()
            .returning(|| Ok(remote(&["a", "b"])));
        library.expect_fetch_liked_tracks().returning(|| Ok(Vec::new()));

        let ctx = context(library, SyncConfig::default());
        let reconciler = PlaylistReconciler::new(ctx.clone());
        reconciler.refresh_playlists().await;

        assert!(reconciler.mark_playing(Some("a")).await);
        assert!(reconciler.mark_playing(Some("b")).await);
        assert!(!reconciler.mark_playing(Some("b")).await);

        // A refresh keeps the decoration on the same id.
        reconciler.refresh_playlists().await;
        let snapshot = ctx.snapshot.read().await;
        assert!(!snapshot.playlist("a").unwrap().decoration.playing);
        assert!(snapshot.playlist("b").unwrap().decoration.playing);
    }

    #[tokio::test]
    async fn test_set_expanded_unknown_playlist() {
        let reconciler = PlaylistReconciler::new(context(MockMusicLibrary::new(), SyncConfig::default()));
        assert!(matches!(
            reconciler.set_expanded("missing", true).await,
            Err(Error::PlaylistNotFound(_))
        ));
    }
}
