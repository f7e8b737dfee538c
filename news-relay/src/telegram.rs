use crate::config::TelegramConfig;
use crate::types::{MessageSink, OutboundMessage, RelayError, Result, SinkError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Fallback wait when Telegram answers 429 without `retry_after`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotUser {
    pub id: i64,
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// `MessageSink` over the Telegram Bot HTTP API.
#[derive(Debug, Clone)]
pub struct TelegramSink {
    client: Client,
    api_url: String,
    disable_web_page_preview: bool,
}

impl TelegramSink {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(RelayError::Http)?;

        Ok(Self {
            client,
            api_url: format!("{}/bot{}", config.api_base.trim_end_matches('/'), config.token),
            disable_web_page_preview: config.disable_web_page_preview,
        })
    }

    /// `getMe`, to check the token before anything else is started.
    pub async fn test_connection(&self) -> Result<BotUser> {
        let result = self.call("getMe", &json!({})).await?;
        let user: BotUser = serde_json::from_value(result)?;
        info!("Connected to Telegram as {} (id {})", user.first_name, user.id);
        Ok(user)
    }

    fn request_body(&self, destination: &str, message: &OutboundMessage) -> (&'static str, Value) {
        let mut body = match &message.image_url {
            Some(photo) => json!({
                "chat_id": destination,
                "photo": photo,
                "caption": message.text,
            }),
            None => json!({
                "chat_id": destination,
                "text": message.text,
                "disable_web_page_preview": self.disable_web_page_preview,
            }),
        };
        if let Some(mode) = message.parse_mode {
            body["parse_mode"] = json!(mode.as_str());
        }

        let method = if message.is_photo() { "sendPhoto" } else { "sendMessage" };
        (method, body)
    }

    async fn call(&self, method: &str, body: &Value) -> std::result::Result<Value, SinkError> {
        let url = format!("{}/{}", self.api_url, method);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                SinkError::Transport(format!("{} request failed: {}", method, e.without_url()))
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| {
                let reason = e.without_url();
                SinkError::Transport(format!("{} response unreadable: {}", method, reason))
            })?;

        let parsed: Option<ApiResponse> = serde_json::from_str(&text).ok();
        match parsed {
            Some(api) if api.ok && status.is_success() => Ok(api.result.unwrap_or(Value::Null)),
            Some(api) => Err(map_api_error(status, api)),
            None => Err(map_status(status, text)),
        }
    }
}

fn map_api_error(status: StatusCode, api: ApiResponse) -> SinkError {
    let retry_after = api.parameters.as_ref().and_then(|p| p.retry_after);
    if retry_after.is_some() || status == StatusCode::TOO_MANY_REQUESTS {
        let secs = retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        return SinkError::RetryAfter(Duration::from_secs(secs));
    }

    let description = api.description.unwrap_or_else(|| "no description".to_string());
    if status.is_server_error() {
        return SinkError::Transport(format!("HTTP {}: {}", status.as_u16(), description));
    }
    SinkError::Rejected {
        code: api.error_code.unwrap_or(status.as_u16()),
        description,
    }
}

fn map_status(status: StatusCode, body: String) -> SinkError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        SinkError::RetryAfter(Duration::from_secs(DEFAULT_RETRY_AFTER_SECS))
    } else if status.is_client_error() {
        SinkError::Rejected {
            code: status.as_u16(),
            description: body,
        }
    } else {
        SinkError::Transport(format!("HTTP {} with unexpected body", status.as_u16()))
    }
}

#[async_trait]
impl MessageSink for TelegramSink {
    async fn send(
        &self,
        destination: &str,
        message: &OutboundMessage,
    ) -> std::result::Result<(), SinkError> {
        let (method, body) = self.request_body(destination, message);
        self.call(method, &body).await?;
        debug!("Telegram {} to {} ok", method, destination);
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "telegram"
    }
}
