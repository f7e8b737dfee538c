use crate::config::DeliveryConfig;
use crate::types::{DigestGroup, RawItem, Statistics};
use chrono::{DateTime, Utc};

/// A message in both Telegram HTML and a plain-text fallback with the same content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub html: String,
    pub plain: String,
}

const STARTUP_BODY: &str = "New items will be posted here automatically.";

pub fn category_glyph(category: &str) -> &'static str {
    match category.to_lowercase().as_str() {
        "drustvo" => "🏛️",
        "ekonomija" => "💰",
        "zdravstvo" => "🏥",
        "ekologija" => "🌱",
        "politika" => "🗳️",
        "hronika" => "📰",
        "servisne-informacije" => "🔧",
        "kultura" => "🎭",
        "sport" => "⚽",
        "najave-dogadjaja" => "📅",
        _ => "📰",
    }
}

/// `servisne-informacije` -> `Servisne-Informacije`.
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Cut to at most `max_chars` characters, preferring a word boundary, and mark the cut with `...`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let cut: String = text.chars().take(max_chars).collect();
    let trimmed = match cut.rfind(' ') {
        Some(space) if space > cut.len() / 2 => &cut[..space],
        _ => cut.as_str(),
    };
    format!("{}...", trimmed.trim_end())
}

fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "no data".to_string())
}

pub struct Renderer {
    max_content_length: usize,
    digest_title_limit: usize,
}

impl Renderer {
    pub fn new(config: &DeliveryConfig) -> Self {
        Self {
            max_content_length: config.max_content_length,
            digest_title_limit: config.digest_title_limit,
        }
    }

    pub fn item(&self, item: &RawItem) -> Rendered {
        let glyph = category_glyph(&item.category);
        let content = truncate_chars(item.content.trim(), self.max_content_length);

        let mut html = vec![format!("{} <b>{}</b>", glyph, escape_html(&item.title))];
        let mut plain = vec![format!("{} {}", glyph, item.title)];

        if let Some(date) = item.date.as_deref().filter(|d| !d.trim().is_empty()) {
            html.push(format!("📅 {}", escape_html(date)));
            plain.push(format!("📅 {}", date));
        }
        if !content.is_empty() {
            html.push(format!("📝 {}", escape_html(&content)));
            plain.push(format!("📝 {}", content));
        }
        html.push(format!("🔗 <a href=\"{}\">Read more</a>", escape_html(&item.link)));
        plain.push(format!("🔗 Read more: {}", item.link));

        Rendered {
            html: html.join("\n\n"),
            plain: plain.join("\n\n"),
        }
    }

    /// `None` when there is nothing to report.
    pub fn digest(&self, groups: &[DigestGroup]) -> Option<Rendered> {
        if groups.is_empty() {
            return None;
        }

        let mut html = String::from("📰 <b>Daily news digest</b>\n\n");
        let mut plain = String::from("📰 Daily news digest\n\n");

        for group in groups {
            let glyph = category_glyph(&group.category);
            let name = title_case(&group.category);
            let titles = truncate_titles(&group.titles, self.digest_title_limit);

            html.push_str(&format!(
                "{} <b>{}</b> ({}):\n{}\n\n",
                glyph,
                escape_html(&name),
                group.count,
                escape_html(&titles)
            ));
            plain.push_str(&format!("{} {} ({}):\n{}\n\n", glyph, name, group.count, titles));
        }

        Some(Rendered {
            html: html.trim_end().to_string(),
            plain: plain.trim_end().to_string(),
        })
    }

    pub fn statistics(&self, stats: &Statistics) -> Rendered {
        let body = format!(
            "📰 Total items: {}\n✅ Sent: {}\n⏳ Waiting: {}\n📅 Days active: {}\n\
             🕐 Last item: {}\n📤 Last sent: {}",
            stats.total,
            stats.sent,
            stats.unsent,
            stats.days_active,
            format_timestamp(stats.last_item_at),
            format_timestamp(stats.last_sent_at)
        );
        Rendered {
            html: format!("📊 <b>News relay statistics</b>\n\n{}", escape_html(&body)),
            plain: format!("📊 News relay statistics\n\n{}", body),
        }
    }

    pub fn error_notice(&self, error: &str) -> Rendered {
        Rendered {
            html: format!("⚠️ <b>News relay error</b>\n\n{}", escape_html(error)),
            plain: format!("⚠️ News relay error\n\n{}", error),
        }
    }

    pub fn startup_notice(&self) -> Rendered {
        Rendered {
            html: format!("🚀 <b>News relay started</b>\n\n{}", STARTUP_BODY),
            plain: format!("🚀 News relay started\n\n{}", STARTUP_BODY),
        }
    }

    pub fn shutdown_notice(&self) -> Rendered {
        Rendered {
            html: "🛑 <b>News relay stopped</b>".to_string(),
            plain: "🛑 News relay stopped".to_string(),
        }
    }
}

/// Hard cut without word snapping; the joined titles are a list, not prose.
fn truncate_titles(titles: &str, limit: usize) -> String {
    if titles.chars().count() <= limit {
        return titles.to_string();
    }
    let cut: String = titles.chars().take(limit).collect();
    format!("{}...", cut)
}
