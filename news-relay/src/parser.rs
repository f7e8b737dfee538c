use crate::config::{FetchConfig, SelectorConfig};
use crate::types::{RawItem, RelayError, Result, DEFAULT_CATEGORY};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

/// Compiled selectors for one listing layout.
#[derive(Debug, Clone)]
pub struct PageParser {
    item: Selector,
    title: Selector,
    link: Selector,
    content: Selector,
    date: Selector,
    image: Selector,
    category_segment_index: usize,
}

impl PageParser {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        Self::with_selectors(&config.selectors, config.category_segment_index)
    }

    pub fn with_selectors(
        selectors: &SelectorConfig,
        category_segment_index: usize,
    ) -> Result<Self> {
        Ok(Self {
            item: compile(&selectors.item)?,
            title: compile(&selectors.title)?,
            link: compile(&selectors.link)?,
            content: compile(&selectors.content)?,
            date: compile(&selectors.date)?,
            image: compile(&selectors.image)?,
            category_segment_index,
        })
    }

    /// Extract every item block from a listing page. Blocks without a title or link are skipped.
    pub fn parse_page(&self, page_url: &str, body: &str) -> Vec<RawItem> {
        let document = Html::parse_document(body);
        let base = Url::parse(page_url).ok();

        let mut items = Vec::new();
        for block in document.select(&self.item) {
            match self.parse_block(block, base.as_ref()) {
                Some(item) => items.push(item),
                None => debug!("Skipping item block without title or link on {}", page_url),
            }
        }

        debug!("Parsed {} items from {}", items.len(), page_url);
        items
    }

    fn parse_block(&self, block: ElementRef<'_>, base: Option<&Url>) -> Option<RawItem> {
        let title = first_text(block, &self.title).filter(|t| !t.is_empty())?;

        let href = block
            .select(&self.link)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::trim)
            .filter(|h| !h.is_empty())?;
        let link = resolve(base, href);

        let content = first_text(block, &self.content).unwrap_or_default();
        let date = first_text(block, &self.date).filter(|d| !d.is_empty());
        let image_url = block
            .select(&self.image)
            .next()
            .and_then(image_source)
            .map(|src| resolve(base, &src));

        let category = category_from_link(&link, self.category_segment_index);

        Some(RawItem {
            title,
            link,
            content,
            date,
            category,
            image_url,
        })
    }
}

/// Category slug at `index` of `link.split('/')`, or `general` when absent.
///
/// `https://host/city/drustvo/slug` splits as `["https:", "", "host", "city", "drustvo", "slug"]`.
pub fn category_from_link(link: &str, index: usize) -> String {
    link.split('/')
        .nth(index)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.to_lowercase())
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string())
}

fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| RelayError::Parse(format!("invalid selector {:?}: {}", selector, e)))
}

fn first_text(block: ElementRef<'_>, selector: &Selector) -> Option<String> {
    block
        .select(selector)
        .next()
        .map(|el| normalize_whitespace(&el.text().collect::<String>()))
}

/// Prefer the last (largest) `srcset` candidate, fall back to `src`.
fn image_source(img: ElementRef<'_>) -> Option<String> {
    let from_srcset = img.value().attr("srcset").and_then(|srcset| {
        srcset
            .split(',')
            .filter_map(|candidate| candidate.split_whitespace().next())
            .last()
            .map(str::to_string)
    });

    from_srcset
        .or_else(|| img.value().attr("src").map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
}

fn resolve(base: Option<&Url>, href: &str) -> String {
    match base.and_then(|b| b.join(href).ok()) {
        Some(url) => url.to_string(),
        None => href.to_string(),
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
