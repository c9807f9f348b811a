//! Play-session telemetry sent to the remote backend.
//!
//! Every call here is fire-and-report: failures are logged and turned into a
//! `false`/zero result, never propagated.

use chrono::{Local, Utc};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::context::SyncContext;
use crate::model::Track;
use crate::remote::server_is_online;

/// Endpoint receiving one play session.
pub const SESSION_PATH: &str = "/music/session";

/// Endpoint receiving liked-song seed batches.
pub const SEED_PATH: &str = "/music/session/seed";

/// Endpoint receiving heartbeats.
pub const HEARTBEAT_PATH: &str = "/data/heartbeat";

/// Endpoint receiving arbitrary payload batches.
pub const BATCH_PATH: &str = "/data/batch";

/// Local timezone offset east of UTC, in seconds.
fn local_offset_secs() -> i32 {
    Local::now().offset().local_minus_utc()
}

/// Sends play sessions, liked-song seeds and heartbeats.
#[derive(Debug, Clone)]
pub struct Telemetry {
    ctx: SyncContext,
}

impl Telemetry {
    /// Create a telemetry sender for `ctx`.
    #[must_use]
    pub const fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    fn enabled(&self) -> bool {
        self.ctx.config.telemetry.enabled
    }

    /// Send one play session stamped with `start`/`end` (epoch seconds).
    pub async fn send_session(&self, track: Track, start: i64, end: i64) -> bool {
        if !self.enabled() {
            return false;
        }
        let Some(token) = self.ctx.app_token() else {
            debug!("No app token, skipping session send");
            return false;
        };

        let track = track.with_session_timing(start, end, local_offset_secs());
        let body = match serde_json::to_value(&track) {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to encode session for {}: {}", track.id, e);
                return false;
            }
        };

        let response = self.ctx.remote.post(SESSION_PATH, body, Some(token)).await;
        if !response.is_ok() {
            warn!("Session send for {} failed: {:?}", track.id, response.status);
        }
        response.is_ok()
    }

    /// Seed the backend with liked songs in batches.
    ///
    /// Returns the number of batch calls made.
    pub async fn seed_liked_songs(&self, tracks: &[Track]) -> usize {
        if !self.enabled() || tracks.is_empty() {
            return 0;
        }
        let Some(token) = self.ctx.app_token() else {
            debug!("No app token, skipping liked songs seed");
            return 0;
        };

        let batch_size = self.ctx.config.telemetry.seed_batch_size.max(1);
        let mut batches = 0;
        for chunk in tracks.chunks(batch_size) {
            let body = match serde_json::to_value(chunk) {
                Ok(body) => body,
                Err(e) => {
                    warn!("Failed to encode liked songs batch: {}", e);
                    continue;
                }
            };
            let response = self.ctx.remote.post(SEED_PATH, body, Some(token.clone())).await;
            if !response.is_ok() {
                warn!("Liked songs batch {} failed: {:?}", batches + 1, response.status);
            }
            batches += 1;
        }

        debug!("Seeded {} liked songs in {} batches", tracks.len(), batches);
        batches
    }

    /// Send a heartbeat. Skipped when the server is unreachable or no token
    /// is available.
    pub async fn heartbeat(&self, reason: &str) -> bool {
        if !self.enabled() {
            return false;
        }
        if !server_is_online(self.ctx.remote.as_ref(), &self.ctx.cache).await {
            debug!("Server offline, skipping heartbeat");
            return false;
        }
        let Some(token) = self.ctx.app_token() else {
            debug!("No app token, skipping heartbeat");
            return false;
        };

        let offset = local_offset_secs();
        let body = json!({
            "pluginId": self.ctx.config.plugin_id,
            "os": std::env::consts::OS,
            "start": Utc::now().timestamp(),
            "offset": offset / 60,
            "version": env!("CARGO_PKG_VERSION"),
            "reason": reason,
        });

        let response = self.ctx.remote.post(HEARTBEAT_PATH, body, Some(token)).await;
        if !response.is_ok() {
            warn!("Heartbeat failed: {:?}", response.status);
        }
        response.is_ok()
    }

    /// Send an arbitrary payload batch.
    pub async fn send_batch(&self, payloads: Vec<Value>) -> bool {
        if !self.enabled() || payloads.is_empty() {
            return false;
        }
        let Some(token) = self.ctx.app_token() else {
            debug!("No app token, skipping batch send");
            return false;
        };

        let count = payloads.len();
        let response = self
            .ctx
            .remote
            .post(BATCH_PATH, Value::Array(payloads), Some(token))
            .await;
        if response.is_ok() {
            debug!("Sent batch of {} payloads", count);
        } else {
            warn!("Batch of {} payloads failed: {:?}", count, response.status);
        }
        response.is_ok()
    }
}
