//! HTTP surface shared by the session manager and the stream transport.

use reqwest::Response;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::error::{classify_reqwest_error, SessionCreationError, TransportError};
use crate::events::Part;

/// Standard User-Agent header for tether API requests.
pub const USER_AGENT: &str = concat!("tether/", env!("CARGO_PKG_VERSION"));

/// Server response to session creation. The server chooses the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    #[serde(default)]
    pub success: bool,
    pub session_id: String,
    pub app_name: String,
    pub user_id: String,
    pub created_at: String,
}

/// Body of a canonical message submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    pub new_message: NewMessage,
    pub streaming: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub parts: Vec<Part>,
    pub role: String,
}

impl NewMessage {
    /// A single-text user message.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part::Text {
                text: text.into(),
                thought: false,
            }],
            role: "user".to_string(),
        }
    }
}

/// Client for the agent execution service.
///
/// One instance is shared by the session manager and every transport; all of
/// them see the same connect/read timeout policy.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    app_name: String,
    user_id: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeouts.connect())
            // Streams run for a long time; only idle reads are bounded.
            .read_timeout(config.timeouts.read())
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            app_name: config.app_name.clone(),
            user_id: config.user_id.clone(),
            http,
        })
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Creates a session at the per-app, per-user collection path.
    ///
    /// The body is intentionally empty: the server owns id assignment, and
    /// nothing else exists yet at creation time.
    pub async fn create_session(&self) -> Result<SessionResponse, SessionCreationError> {
        let url = format!(
            "{}/apps/{}/users/{}/sessions",
            self.base_url, self.app_name, self.user_id
        );
        debug!(%url, "creating session");

        let response = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .body("{}")
            .send()
            .await
            .map_err(|e| SessionCreationError::from(classify_reqwest_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::http_status(status.as_u16(), &body).into());
        }

        response
            .json::<SessionResponse>()
            .await
            .map_err(|e| SessionCreationError::new(format!("invalid creation response: {e}")))
    }

    /// Deletes a session. Used only by background expiry; a session that is
    /// already gone is not an error there.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), TransportError> {
        let url = format!(
            "{}/apps/{}/users/{}/sessions/{}",
            self.base_url, self.app_name, self.user_id, session_id
        );
        let response = self
            .http
            .delete(&url)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;
        let status = response.status();
        if status.is_success() || status.as_u16() == 404 {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(TransportError::http_status(status.as_u16(), &body))
        }
    }

    /// Path of the canonical message-submission endpoint.
    pub fn run_path(&self) -> String {
        format!("{}/run_sse", self.base_url)
    }

    /// Path of the legacy subscription endpoint for a session.
    pub fn subscribe_path(&self, session_id: &str) -> String {
        format!("{}/events/{}", self.base_url, session_id)
    }

    /// Opens a command-dialect stream: POST the run request, hand back the
    /// response for chunked reading once the status is confirmed good.
    pub(crate) async fn open_run_stream(
        &self,
        url: &str,
        request: &RunRequest,
    ) -> Result<Response, TransportError> {
        let response = self
            .http
            .post(url)
            .header("content-type", "application/json")
            .header("accept", "text/event-stream")
            .json(request)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::http_status(status.as_u16(), &body));
        }
        Ok(response)
    }

    /// Opens a subscription-dialect stream: long-lived read-only GET.
    pub(crate) async fn open_subscribe_stream(&self, url: &str) -> Result<Response, TransportError> {
        let response = self
            .http
            .get(url)
            .header("accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::http_status(status.as_u16(), &body));
        }
        Ok(response)
    }
}
