//! Session lifecycle management.
//!
//! Sessions are created up front, before any message exists, and the server
//! chooses the id: generating one locally races with transport construction
//! and leaves an earlier-built transport bound to a stale, empty id. A
//! detached expiry task deletes sessions that never received a message.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::ApiClient;
use crate::config::CleanupConfig;
use crate::error::SessionCreationError;
use crate::store::ConversationStore;

/// Lifecycle status of a tracked session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created on the server, no message attached yet.
    Created,
    /// At least one message successfully attached; exempt from expiry.
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub has_messages: bool,
    pub ttl_minutes: u64,
    pub first_message_at: Option<DateTime<Utc>>,
}

/// Server-side conversation context, tracked client-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub metadata: SessionMetadata,
}

/// Creates sessions, tracks usage, and schedules expiry of empty ones.
#[derive(Debug, Clone)]
pub struct SessionManager {
    client: Arc<ApiClient>,
    cleanup: CleanupConfig,
    ttl: Duration,
    store: Arc<ConversationStore>,
    sessions: Arc<Mutex<HashMap<String, Session>>>,
}

impl SessionManager {
    pub fn new(client: Arc<ApiClient>, cleanup: CleanupConfig, store: Arc<ConversationStore>) -> Self {
        Self {
            client,
            cleanup,
            ttl: Duration::from_secs(cleanup.ttl_minutes * 60),
            store,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Shrinks the expiry delay so tests run in real time.
    #[cfg(test)]
    pub(crate) fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Creates a session on the server and registers it locally.
    ///
    /// Failure surfaces synchronously and leaves nothing registered; message
    /// composition stays blocked until a later attempt succeeds.
    pub async fn create(&self) -> Result<Session, SessionCreationError> {
        let response = self.client.create_session().await?;

        let created_at = response
            .created_at
            .parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| Utc::now());
        let session = Session {
            id: response.session_id,
            app_name: response.app_name,
            user_id: response.user_id,
            status: SessionStatus::Created,
            created_at,
            metadata: SessionMetadata {
                has_messages: false,
                ttl_minutes: self.cleanup.ttl_minutes,
                first_message_at: None,
            },
        };

        self.sessions
            .lock()
            .expect("session map lock poisoned")
            .insert(session.id.clone(), session.clone());
        info!(session_id = %session.id, "session created");

        if self.cleanup.enabled {
            self.schedule_expiry(session.id.clone());
        }

        Ok(session)
    }

    /// Marks the first successful message attach. Idempotent: repeated calls
    /// keep the original `first_message_at`.
    pub fn mark_active(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().expect("session map lock poisoned");
        if let Some(session) = sessions.get_mut(session_id) {
            if !session.metadata.has_messages {
                session.metadata.has_messages = true;
                session.metadata.first_message_at = Some(Utc::now());
                session.status = SessionStatus::Active;
                debug!(%session_id, "session active");
            }
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .lock()
            .expect("session map lock poisoned")
            .get(session_id)
            .cloned()
    }

    /// Spawns the detached expiry task for one session.
    ///
    /// Tasks are independent and share no lock with each other; deletion is a
    /// single atomic removal. A session that vanished before the check runs
    /// is success, not an error.
    fn schedule_expiry(&self, session_id: String) {
        let ttl = self.ttl;
        let sessions = Arc::clone(&self.sessions);
        let store = Arc::clone(&self.store);
        let client = Arc::clone(&self.client);

        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;

            let expired = {
                let mut map = sessions.lock().expect("session map lock poisoned");
                match map.get(&session_id) {
                    // Still empty after the TTL: remove it.
                    Some(session) if !session.metadata.has_messages => {
                        map.remove(&session_id);
                        true
                    }
                    // Saw a message, or already gone. Either way, nothing to do.
                    _ => false,
                }
            };

            if !expired {
                return;
            }

            store.remove(&session_id);
            match client.delete_session(&session_id).await {
                Ok(()) => info!(%session_id, "expired empty session deleted"),
                Err(err) => warn!(%session_id, %err, "failed to delete expired session upstream"),
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn tracked_count(&self) -> usize {
        self.sessions.lock().expect("session map lock poisoned").len()
    }
}
