use async_trait::async_trait;
use std::time::Duration;

/// Markup flavour understood by a message sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseMode {
    Html,
}

impl ParseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseMode::Html => "HTML",
        }
    }
}

/// One message as handed to a sink.
///
/// When `image_url` is set the sink sends a photo and uses `text` as its caption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
    pub parse_mode: Option<ParseMode>,
    pub image_url: Option<String>,
}

impl OutboundMessage {
    pub fn rich(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parse_mode: Some(ParseMode::Html),
            image_url: None,
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parse_mode: None,
            image_url: None,
        }
    }

    pub fn with_image(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    pub fn is_photo(&self) -> bool {
        self.image_url.is_some()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("invalid page URL {url}: {message}")]
    InvalidUrl { url: String, message: String },
}

impl FetchError {
    /// Timeouts, connection failures and server-side errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Network { .. } => true,
            FetchError::Status { status, .. } => *status >= 500,
            FetchError::InvalidUrl { .. } => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The sink asked us to slow down for the given duration.
    #[error("sink requested backoff for {0:?}")]
    RetryAfter(Duration),

    #[error("sink rejected message ({code}): {description}")]
    Rejected { code: u16, description: String },

    #[error("sink transport failure: {0}")]
    Transport(String),
}

impl SinkError {
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SinkError::RetryAfter(wait) => Some(*wait),
            _ => None,
        }
    }
}

// Capability style note:
// The relay core only ever talks to the outside world through these two traits.
// Implementations are expected to be cheap handles (an HTTP client and a couple
// of strings) and hold no per-call state, so tests can swap in scripted fakes.

/// Fetch the raw body of one page of the upstream source.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError>;
}

/// Deliver one message to a destination (a chat id for Telegram).
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, destination: &str, message: &OutboundMessage) -> Result<(), SinkError>;

    fn sink_name(&self) -> &str;
}
