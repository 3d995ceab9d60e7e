//! Connection authentication and session bookkeeping.
//!
//! When no token is configured every client is admitted. Sessions never
//! expire on a timer; they end on disconnect or explicit invalidation.

use std::collections::HashMap;
use std::sync::Arc;

use droidd_proto::{error, AgentError};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// An authenticated client session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub client_id: String,
    pub established_at: i64,
    pub last_activity: i64,
}

/// Validates bearer tokens and mints sessions
pub struct Authenticator {
    token: Option<String>,
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl Authenticator {
    pub fn new(token: Option<String>) -> Self {
        Authenticator {
            token,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Check a presented token and mint a session on success.
    /// With no configured token all clients are admitted.
    pub async fn authenticate(
        &self,
        presented: Option<&str>,
        client_id: &str,
    ) -> Result<Session, AgentError> {
        if let Some(expected) = &self.token {
            if presented != Some(expected.as_str()) {
                warn!(client_id, "Authentication rejected");
                return Err(AgentError::new(error::AUTH_FAILED, "Authentication failed"));
            }
        }

        let now = droidd_proto::now_ms();
        let session = Session {
            // uuid v4 simple form: 32 lowercase hex chars, 128 bits
            id: uuid::Uuid::new_v4().simple().to_string(),
            client_id: client_id.to_string(),
            established_at: now,
            last_activity: now,
        };
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        info!(session_id = %session.id, client_id, "Session established");
        Ok(session)
    }

    /// Look up a session and bump its last-activity stamp
    pub async fn validate(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(session) => {
                session.last_activity = droidd_proto::now_ms();
                true
            }
            None => false,
        }
    }

    /// Drop a session (disconnect or explicit invalidation)
    pub async fn invalidate(&self, session_id: &str) {
        if self.sessions.write().await.remove(session_id).is_some() {
            debug!(session_id, "Session invalidated");
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
