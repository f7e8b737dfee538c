use crate::config::FilterConfig;
use crate::types::RawItem;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
}

#[derive(Debug, thiserror::Error)]
#[error("filter rule {rule} failed: {message}")]
pub struct FilterError {
    pub rule: String,
    pub message: String,
}

/// The fields a rule gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub category: &'a str,
    pub title: &'a str,
    pub content: &'a str,
}

/// One exclusion check. Rules only ever reject; anything they don't match passes.
pub trait FilterRule: Send + Sync {
    fn evaluate(&self, candidate: &Candidate<'_>) -> Result<Verdict, FilterError>;

    fn rule_name(&self) -> String;
}

/// Rejects items whose category is in the exclusion set.
pub struct CategoryRule {
    excluded: Vec<String>,
}

impl CategoryRule {
    pub fn new(excluded: &[String]) -> Self {
        Self {
            excluded: excluded
                .iter()
                .map(|c| c.trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }
}

impl FilterRule for CategoryRule {
    fn evaluate(&self, candidate: &Candidate<'_>) -> Result<Verdict, FilterError> {
        let category = candidate.category.trim().to_lowercase();
        if self.excluded.iter().any(|c| *c == category) {
            return Ok(Verdict::Reject);
        }
        Ok(Verdict::Accept)
    }

    fn rule_name(&self) -> String {
        "category".to_string()
    }
}

/// Rejects items whose title or content mentions an excluded keyword.
pub struct KeywordRule {
    keywords: Vec<String>,
}

impl KeywordRule {
    pub fn new(keywords: &[String]) -> Self {
        Self {
            keywords: keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }
}

impl FilterRule for KeywordRule {
    fn evaluate(&self, candidate: &Candidate<'_>) -> Result<Verdict, FilterError> {
        let haystack = format!("{} {}", candidate.title, candidate.content).to_lowercase();
        if self.keywords.iter().any(|k| haystack.contains(k.as_str())) {
            return Ok(Verdict::Reject);
        }
        Ok(Verdict::Accept)
    }

    fn rule_name(&self) -> String {
        "keyword".to_string()
    }
}

/// Why an item failed the structural checks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidItem {
    #[error("title shorter than {0} characters")]
    TitleTooShort(usize),

    #[error("content shorter than {0} characters")]
    ContentTooShort(usize),

    #[error("link is not an absolute http(s) URL")]
    BadLink,
}

pub struct ItemFilter {
    rules: Vec<Box<dyn FilterRule>>,
    min_title_len: usize,
    min_content_len: usize,
}

impl ItemFilter {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            rules: vec![
                Box::new(CategoryRule::new(&config.excluded_categories)),
                Box::new(KeywordRule::new(&config.excluded_keywords)),
            ],
            min_title_len: config.min_title_len,
            min_content_len: config.min_content_len,
        }
    }

    pub fn add_rule(&mut self, rule: Box<dyn FilterRule>) {
        debug!("Adding filter rule: {}", rule.rule_name());
        self.rules.push(rule);
    }

    /// False as soon as any rule rejects. A rule that errors counts as accepting.
    pub fn should_accept(&self, category: &str, title: &str, content: &str) -> bool {
        let candidate = Candidate { category, title, content };

        for rule in &self.rules {
            match rule.evaluate(&candidate) {
                Ok(Verdict::Accept) => {}
                Ok(Verdict::Reject) => {
                    debug!("Rule {} rejected {:?}", rule.rule_name(), title);
                    return false;
                }
                Err(e) => {
                    warn!("{}; accepting {:?}", e, title);
                }
            }
        }
        true
    }

    pub fn accepts(&self, item: &RawItem) -> bool {
        self.should_accept(&item.category, &item.title, &item.content)
    }

    pub fn validate(&self, item: &RawItem) -> Result<(), InvalidItem> {
        if item.title.trim().chars().count() < self.min_title_len {
            return Err(InvalidItem::TitleTooShort(self.min_title_len));
        }
        if item.content.trim().chars().count() < self.min_content_len {
            return Err(InvalidItem::ContentTooShort(self.min_content_len));
        }
        match Url::parse(&item.link) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
            _ => Err(InvalidItem::BadLink),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenRule;

    impl FilterRule for BrokenRule {
        fn evaluate(&self, _candidate: &Candidate<'_>) -> Result<Verdict, FilterError> {
            Err(FilterError {
                rule: self.rule_name(),
                message: "lookup table unavailable".to_string(),
            })
        }

        fn rule_name(&self) -> String {
            "broken".to_string()
        }
    }

    fn item(title: &str, content: &str, link: &str) -> RawItem {
        RawItem {
            title: title.to_string(),
            link: link.to_string(),
            content: content.to_string(),
            date: None,
            category: "drustvo".to_string(),
            image_url: None,
        }
    }

    #[test]
    fn test_excluded_category_is_rejected_case_insensitively() {
        let filter = ItemFilter::new(&FilterConfig::default());
        assert!(!filter.should_accept("marketing", "Nova prodavnica", "Otvaranje u centru"));
        assert!(!filter.should_accept("Marketing", "Nova prodavnica", "Otvaranje u centru"));
        assert!(filter.should_accept("drustvo", "Nova skola", "Otvorena nova skola"));
    }

    #[test]
    fn test_keyword_in_title_or_content_is_rejected() {
        let filter = ItemFilter::new(&FilterConfig::default());
        assert!(!filter.should_accept("drustvo", "Veliki OGLAS za posao", "Detalji u nastavku"));
        assert!(!filter.should_accept("drustvo", "Vest dana", "Ovo je sponzorisani tekst"));
        assert!(filter.should_accept("drustvo", "Vest dana", "Obicna vest iz grada"));
    }

    #[test]
    fn test_failing_rule_accepts() {
        let mut filter = ItemFilter::new(&FilterConfig {
            excluded_categories: vec![],
            excluded_keywords: vec![],
            ..FilterConfig::default()
        });
        filter.add_rule(Box::new(BrokenRule));
        assert!(filter.should_accept("drustvo", "Vest", "Sadrzaj"));
    }

    #[test]
    fn test_failing_rule_does_not_mask_later_rejection() {
        let mut filter = ItemFilter::new(&FilterConfig {
            excluded_categories: vec![],
            excluded_keywords: vec![],
            ..FilterConfig::default()
        });
        filter.add_rule(Box::new(BrokenRule));
        filter.add_rule(Box::new(CategoryRule::new(&["marketing".to_string()])));
        assert!(!filter.should_accept("marketing", "Vest", "Sadrzaj"));
    }

    #[test]
    fn test_validate() {
        let filter = ItemFilter::new(&FilterConfig::default());
        assert_eq!(filter.validate(&item("Naslov", "Dovoljno dug sadrzaj", "https://x/a")), Ok(()));
        assert_eq!(
            filter.validate(&item("Kra", "Dovoljno dug sadrzaj", "https://x/a")),
            Err(InvalidItem::TitleTooShort(5))
        );
        assert_eq!(
            filter.validate(&item("Naslov", "kratko", "https://x/a")),
            Err(InvalidItem::ContentTooShort(10))
        );
        assert_eq!(
            filter.validate(&item("Naslov", "Dovoljno dug sadrzaj", "/relative/link")),
            Err(InvalidItem::BadLink)
        );
        assert_eq!(
            filter.validate(&item("Naslov", "Dovoljno dug sadrzaj", "ftp://x/a")),
            Err(InvalidItem::BadLink)
        );
    }
}
