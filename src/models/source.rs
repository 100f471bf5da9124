// src/models/source.rs

//! Source definitions: where to fetch and which selectors to apply.

use serde::{Deserialize, Serialize};

/// How a source's listing page is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Plain HTTP GET, markup parsed locally
    #[default]
    Static,
    /// Rendered in a headless browser, extracted in-page
    Rendered,
}

/// Language used for relative-day words and month names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateLocale {
    #[default]
    Uk,
    En,
}

/// One listing page of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePage {
    pub url: String,

    /// Sub-type stamped on every candidate from this page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl SourcePage {
    fn new(url: &str, content_type: Option<&str>) -> Self {
        Self {
            url: url.to_string(),
            content_type: content_type.map(str::to_string),
        }
    }
}

/// CSS selectors for scraping a listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSelectors {
    /// Selector for each item in the listing
    pub item: String,

    /// Selector for the article link within an item
    pub link: String,

    /// Tried when `link` matches nothing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_fallback: Option<String>,

    /// Selector for the title element (defaults to the link text)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Selector for the date element
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    /// Attribute holding a machine-readable date, read before the text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_attr: Option<String>,

    /// Selector for the lead paragraph
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,

    /// Selector a rendered page must show before extraction (defaults to `item`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for: Option<String>,
}

impl SourceSelectors {
    pub fn new(item: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            link: link.into(),
            link_fallback: None,
            title: None,
            date: None,
            date_attr: None,
            excerpt: None,
            wait_for: None,
        }
    }

    fn link_fallback(mut self, selector: &str) -> Self {
        self.link_fallback = Some(selector.to_string());
        self
    }

    fn title(mut self, selector: &str) -> Self {
        self.title = Some(selector.to_string());
        self
    }

    fn date(mut self, selector: &str) -> Self {
        self.date = Some(selector.to_string());
        self
    }

    fn date_attr(mut self, attr: &str) -> Self {
        self.date_attr = Some(attr.to_string());
        self
    }

    fn excerpt(mut self, selector: &str) -> Self {
        self.excerpt = Some(selector.to_string());
        self
    }

    fn wait_for(mut self, selector: &str) -> Self {
        self.wait_for = Some(selector.to_string());
        self
    }

    /// The selector a rendered page is awaited on.
    pub fn ready_selector(&self) -> &str {
        self.wait_for.as_deref().unwrap_or(&self.item)
    }
}

/// A news source and how to read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Identifier stored on every article from this source
    pub name: String,

    #[serde(default)]
    pub kind: SourceKind,

    /// Base for resolving relative links
    pub base_url: String,

    pub pages: Vec<SourcePage>,

    #[serde(default)]
    pub locale: DateLocale,

    pub selectors: SourceSelectors,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl SourceConfig {
    fn new(
        name: &str,
        kind: SourceKind,
        base_url: &str,
        pages: Vec<SourcePage>,
        selectors: SourceSelectors,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind,
            base_url: base_url.to_string(),
            pages,
            locale: DateLocale::Uk,
            selectors,
            enabled: true,
        }
    }

    /// The sources crawled when the configuration names none.
    pub fn builtin() -> Vec<Self> {
        vec![
            Self::new(
                "minfin.com.ua",
                SourceKind::Static,
                "https://minfin.com.ua",
                vec![
                    SourcePage::new("https://minfin.com.ua/ua/articles/", Some("articles")),
                    SourcePage::new("https://minfin.com.ua/ua/news/", Some("news")),
                ],
                SourceSelectors::new("ul.items > li.item", "span.link a").link_fallback("a[href]"),
            ),
            Self::new(
                "liga.net",
                SourceKind::Static,
                "https://news.liga.net",
                vec![SourcePage::new("https://news.liga.net/ua", Some("news"))],
                SourceSelectors::new("div.news-list-page article.news-card", "a.news-card__title")
                    .title("a.news-card__title h4"),
            ),
            Self::new(
                "buhgalter911.com",
                SourceKind::Static,
                "https://buhgalter911.com",
                vec![SourcePage::new("https://buhgalter911.com/uk/news/", Some("news"))],
                SourceSelectors::new("div.news__description", "a.news__link"),
            ),
            Self::new(
                "dtkt.ua",
                SourceKind::Static,
                "https://news.dtkt.ua",
                vec![SourcePage::new("https://news.dtkt.ua/?sort=main", Some("news"))],
                SourceSelectors::new("div.article-item", "div.article-item-title a")
                    .date("div.article-item-info span.date-info"),
            ),
            Self::new(
                "buhplatforma.com.ua",
                SourceKind::Static,
                "https://buhplatforma.com.ua",
                vec![
                    SourcePage::new("https://buhplatforma.com.ua/news", Some("news")),
                    SourcePage::new("https://buhplatforma.com.ua/article", Some("articles")),
                ],
                SourceSelectors::new("div.news-list article.article", "h4.h4 a")
                    .excerpt("div.description")
                    .date("time.time")
                    .date_attr("datetime"),
            ),
            Self::new(
                "7eminar.ua",
                SourceKind::Static,
                "https://7eminar.ua",
                vec![SourcePage::new("https://7eminar.ua/news?type=all", Some("news"))],
                SourceSelectors::new("div.card-news__body", "a.card-news__link")
                    .title("h2.card-news__title")
                    .excerpt("div.card-news__description p")
                    .date("div.date-info"),
            ),
            Self::new(
                "tax.gov.ua",
                SourceKind::Rendered,
                "https://tax.gov.ua",
                vec![SourcePage::new("https://tax.gov.ua/media-tsentr/novini/", Some("news"))],
                SourceSelectors::new("div.news__item", "a.news__title")
                    .date("div.shortnews__date")
                    .wait_for("div.news__item"),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names_are_unique() {
        let sources = SourceConfig::builtin();
        let mut names: Vec<&str> = sources.iter().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), sources.len());
    }

    #[test]
    fn test_ready_selector_defaults_to_item() {
        let selectors = SourceSelectors::new("li.item", "a");
        assert_eq!(selectors.ready_selector(), "li.item");
        assert_eq!(selectors.wait_for("div.ready").ready_selector(), "div.ready");
    }

    #[test]
    fn test_source_from_toml_uses_defaults() {
        let source: SourceConfig = toml::from_str(
            r#"
            name = "example"
            base_url = "https://example.com"
            pages = [{ url = "https://example.com/news" }]
            selectors = { item = "li", link = "a" }
            "#,
        )
        .unwrap();

        assert_eq!(source.kind, SourceKind::Static);
        assert_eq!(source.locale, DateLocale::Uk);
        assert!(source.enabled);
        assert!(source.pages[0].content_type.is_none());
    }
}
