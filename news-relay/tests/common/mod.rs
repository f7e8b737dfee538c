// Shared fakes and fixtures for the news-relay integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use news_relay::config::Config;
use news_relay::{FetchError, MessageSink, OutboundMessage, PageSource, SinkError};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, Once};
use std::time::Duration;

pub const TEST_CHAT: &str = "-1001234";
pub const TEST_BASE_URL: &str = "https://news.test/city/";

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// Config pointed at the fake source, with no waits between pages or retries.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.telegram.token = "123:test".to_string();
    config.telegram.chat_id = TEST_CHAT.to_string();
    config.fetch.base_url = TEST_BASE_URL.to_string();
    config.fetch.max_pages = 1;
    config.fetch.request_delay_seconds = 0;
    config.fetch.retry_delay_seconds = 0;
    config.logging.file = None;
    config
}

pub struct ListingEntry<'a> {
    pub title: &'a str,
    pub link: &'a str,
    pub content: &'a str,
    pub image: Option<&'a str>,
}

pub fn entry<'a>(title: &'a str, link: &'a str, content: &'a str) -> ListingEntry<'a> {
    ListingEntry {
        title,
        link,
        content,
        image: None,
    }
}

/// Listing page in the default markup.
pub fn listing(entries: &[ListingEntry<'_>]) -> String {
    let mut html = String::from("<html><body><main>");
    for e in entries {
        html.push_str("<article class=\"post\">");
        if let Some(src) = e.image {
            html.push_str(&format!("<img class=\"wp-post-image\" src=\"{}\">", src));
        }
        html.push_str(&format!(
            concat!(
                "<h3><a href=\"{}\">{}</a></h3>",
                "<div class=\"articleMeta\">12.03.2024.</div>",
                "<div class=\"lead\">{}</div>"
            ),
            e.link, e.title, e.content
        ));
        html.push_str("</article>");
    }
    html.push_str("</main></body></html>");
    html
}

#[derive(Debug, Clone)]
pub enum PageStep {
    Body(String),
    Status(u16),
    Timeout,
}

/// `PageSource` that replays a script per URL. The last step of a script repeats forever.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, VecDeque<PageStep>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, steps: Vec<PageStep>) -> Self {
        self.scripts.lock().unwrap().insert(url.to_string(), steps.into());
        self
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;

        let step = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(url) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match step {
            Some(PageStep::Body(body)) => Ok(body),
            Some(PageStep::Status(status)) => Err(FetchError::Status {
                url: url.to_string(),
                status,
            }),
            Some(PageStep::Timeout) => Err(FetchError::Timeout { url: url.to_string() }),
            None => Err(FetchError::Status { url: url.to_string(), status: 404 }),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SinkStep {
    Ok,
    RetryAfter(u64),
    Rejected,
    Transport,
}

/// `MessageSink` that records every send attempt and answers from a script.
/// Once the script runs out every send succeeds, unless `fail_when_empty` is set.
#[derive(Default)]
pub struct RecordingSink {
    attempts: Mutex<Vec<(String, OutboundMessage)>>,
    script: Mutex<VecDeque<SinkStep>>,
    fail_when_empty: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(steps: Vec<SinkStep>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            ..Self::default()
        }
    }

    pub fn always_failing() -> Self {
        Self {
            fail_when_empty: true,
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> Vec<OutboundMessage> {
        self.attempts.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn destinations(&self) -> Vec<String> {
        self.attempts.lock().unwrap().iter().map(|(d, _)| d.clone()).collect()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send(&self, destination: &str, message: &OutboundMessage) -> Result<(), SinkError> {
        self.attempts
            .lock()
            .unwrap()
            .push((destination.to_string(), message.clone()));

        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(SinkStep::Ok) => Ok(()),
            Some(SinkStep::RetryAfter(secs)) => {
                Err(SinkError::RetryAfter(Duration::from_secs(secs)))
            }
            Some(SinkStep::Rejected) => Err(SinkError::Rejected {
                code: 400,
                description: "Bad Request: can't parse entities".to_string(),
            }),
            Some(SinkStep::Transport) => Err(SinkError::Transport("connection reset".to_string())),
            None if self.fail_when_empty => Err(SinkError::Transport("sink offline".to_string())),
            None => Ok(()),
        }
    }

    fn sink_name(&self) -> &str {
        "recording"
    }
}
