use crate::config::FetchConfig;
use crate::parser::PageParser;
use crate::retry::RetryPolicy;
use crate::types::{FetchError, PageSource, RawItem, RelayError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// `PageSource` over plain HTTP GET.
#[derive(Debug, Clone)]
pub struct HttpPageSource {
    client: Client,
}

impl HttpPageSource {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(RelayError::Http)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch_page(&self, url: &str) -> std::result::Result<String, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| classify(url, e))
    }
}

fn classify(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout { url: url.to_string() }
    } else if e.is_builder() {
        FetchError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

/// URL of listing page `page` (1-based): the base itself, then `{base}{segment}/{n}/`.
pub fn page_url(base_url: &str, segment: &str, page: u32) -> String {
    if page <= 1 {
        return base_url.to_string();
    }
    let base = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{}/", base_url)
    };
    format!("{}{}/{}/", base, segment.trim_matches('/'), page)
}

/// Fetches listing pages through a `PageSource`, retrying transient failures, and parses them.
pub struct Fetcher {
    source: Arc<dyn PageSource>,
    parser: PageParser,
    retry: RetryPolicy,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(source: Arc<dyn PageSource>, config: FetchConfig) -> Result<Self> {
        let parser = PageParser::new(&config)?;
        let retry = RetryPolicy::new(config.max_attempts, config.retry_delay());
        Ok(Self {
            source,
            parser,
            retry,
            config,
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// One page, with retries. An unparseable or empty page is an empty Vec, not an error.
    pub async fn fetch_page(&self, url: &str) -> std::result::Result<Vec<RawItem>, FetchError> {
        let start_time = Instant::now();
        let source = self.source.clone();

        let body = self
            .retry
            .run(url, || {
                let source = source.clone();
                async move { source.fetch_page(url).await }
            })
            .await?;

        let items = self.parser.parse_page(url, &body);
        debug!(
            "Fetched {} ({} bytes, {} items) in {}ms",
            url,
            body.len(),
            items.len(),
            start_time.elapsed().as_millis()
        );
        Ok(items)
    }

    /// Walk pages 1..=max_pages. A page that still fails after retries ends the walk,
    /// and whatever was collected before it is returned.
    pub async fn fetch_all(&self, base_url: &str, max_pages: u32) -> Vec<RawItem> {
        let mut all_items = Vec::new();

        for page in 1..=max_pages {
            if page > 1 && !self.config.request_delay().is_zero() {
                tokio::time::sleep(self.config.request_delay()).await;
            }

            let url = page_url(base_url, &self.config.page_path_segment, page);
            match self.fetch_page(&url).await {
                Ok(items) => {
                    if items.is_empty() {
                        warn!("No items found on page {} ({})", page, url);
                    }
                    all_items.extend(items);
                }
                Err(e) => {
                    error!("Failed to fetch page {} ({}): {}", page, url, e);
                    break;
                }
            }
        }

        info!("Collected {} items from {}", all_items.len(), base_url);
        all_items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_url() {
        let base = "https://013info.rs/pancevo/";
        assert_eq!(page_url(base, "strana", 1), base);
        assert_eq!(page_url(base, "strana", 2), "https://013info.rs/pancevo/strana/2/");
        assert_eq!(page_url("https://x/news", "/page/", 3), "https://x/news/page/3/");
    }
}
