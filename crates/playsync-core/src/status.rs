//! User and integration status reconciliation.
//!
//! The remote answers a combined user + auth-status document. This module
//! classifies it into a [`UserState`], refreshes the cached integration
//! credentials and flags, and reports whether a spotify auth is present.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::context::SyncContext;
use crate::model::IntegrationFlags;
use crate::remote::ApiResponse;
use crate::snapshot::SnapshotEvent;

/// Path of the combined user/auth status document.
pub const USER_STATUS_PATH: &str = "/users/plugin/state";

/// Auth type of the spotify integration.
pub const SPOTIFY_AUTH: &str = "spotify";

/// Auth type of the slack integration.
pub const SLACK_AUTH: &str = "slack";

/// Classified user state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserState {
    /// The remote has no record of this user.
    NotFound,
    /// Known but anonymous user.
    Anonymous,
    /// Registered user.
    Ok,
    /// Absent, unrecognized, or the fetch failed.
    #[default]
    Unknown,
}

impl UserState {
    /// Parse the remote's state string. Unrecognized values map to `Unknown`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "NOT_FOUND" => Self::NotFound,
            "ANONYMOUS" => Self::Anonymous,
            "OK" => Self::Ok,
            _ => Self::Unknown,
        }
    }
}

/// One third-party auth record attached to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRecord {
    /// Auth type (`"spotify"`, `"slack"`, ...).
    #[serde(rename = "type")]
    pub auth_type: String,
    /// Access token for the integration, if shared.
    #[serde(default)]
    pub access_token: Option<String>,
}

/// Result of a status fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether a spotify auth record was found.
    #[serde(rename = "loggedOn")]
    pub logged_on: bool,
    /// Classified state.
    pub state: UserState,
}

/// Parsed status document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusDocument {
    /// Classified state.
    pub state: UserState,
    /// Auth records in document order.
    pub auths: Vec<AuthRecord>,
}

impl StatusDocument {
    /// Parse a status body.
    ///
    /// `state` and each auth record are read independently: a missing or
    /// non-string state is `Unknown`, and malformed auth records are skipped.
    #[must_use]
    pub fn from_value(data: &Value) -> Self {
        let state = data
            .get("state")
            .and_then(Value::as_str)
            .map_or(UserState::Unknown, UserState::parse);

        let records = data
            .get("user")
            .and_then(|user| user.get("auths"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let auths = records
            .iter()
            .filter_map(|record| match AuthRecord::deserialize(record) {
                Ok(auth) => Some(auth),
                Err(e) => {
                    warn!("Skipping malformed auth record: {}", e);
                    None
                }
            })
            .collect();

        Self { state, auths }
    }

    /// `loggedOn` and state of this document.
    #[must_use]
    pub fn auth_status(&self) -> AuthStatus {
        AuthStatus {
            logged_on: self.has_auth(SPOTIFY_AUTH),
            state: self.state,
        }
    }

    /// Whether an auth record of the given type is present.
    #[must_use]
    pub fn has_auth(&self, auth_type: &str) -> bool {
        self.auths.iter().any(|a| a.auth_type == auth_type)
    }

    /// Integration flags implied by the auth records.
    #[must_use]
    pub fn integrations(&self) -> IntegrationFlags {
        IntegrationFlags {
            spotify: self.has_auth(SPOTIFY_AUTH),
            slack: self.has_auth(SLACK_AUTH),
        }
    }
}

/// Classify a status response.
///
/// `logged_on` reports whether a spotify auth exists, independent of the state.
#[must_use]
pub fn classify(response: &ApiResponse) -> AuthStatus {
    document(response).auth_status()
}

fn document(response: &ApiResponse) -> StatusDocument {
    if response.is_ok() {
        StatusDocument::from_value(&response.data)
    } else {
        StatusDocument::default()
    }
}

/// Fetch and apply the user status.
///
/// Without an app token the fetch is skipped and `Unknown` returned. On `OK`
/// every returned credential is cached (last write wins per auth type) and the
/// integration flags are updated.
pub async fn fetch_user_status(ctx: &SyncContext) -> AuthStatus {
    let Some(token) = ctx.tokens.app_token() else {
        debug!("No app token, skipping user status fetch");
        return AuthStatus::default();
    };

    let response = ctx.remote.get(USER_STATUS_PATH, Some(token)).await;
    let document = document(&response);
    let status = document.auth_status();

    let flags_changed = {
        let mut snapshot = ctx.snapshot.write().await;
        snapshot.set_user_state(status.state);

        if status.state == UserState::Ok {
            for auth in &document.auths {
                if let Some(access_token) = &auth.access_token {
                    snapshot.set_credential(&auth.auth_type, access_token.clone());
                }
            }
            let flags = document.integrations();
            let changed = snapshot.integrations() != flags;
            snapshot.set_integrations(flags);
            changed
        } else {
            false
        }
    };

    if flags_changed {
        info!("Integration flags updated");
        ctx.snapshot.notify(SnapshotEvent::IntegrationsChanged);
    }

    debug!("User status: {:?}", status);
    status
}
