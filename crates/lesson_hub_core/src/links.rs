//! crates/lesson_hub_core/src/links.rs
//!
//! The compatibility shim for the `link` annotation field.
//!
//! The field is stored as one opaque string. Older rows hold a single bare URL,
//! newer rows hold a JSON array of `{url, title}` objects (or bare strings).
//! [`decode`] accepts every generation; [`encode`] only ever writes the array
//! form, so the rest of the crate works with `Vec<LinkItem>` alone.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// Title given to a link added from the editor before it has a URL.
pub const NEW_LINK_TITLE: &str = "New Link";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkItem {
    pub url: String,
    pub title: String,
}

impl LinkItem {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }

    pub fn blank() -> Self {
        Self::new("", NEW_LINK_TITLE)
    }
}

/// What a stored `link` value turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredLinks {
    Empty,
    /// A pre-list value: the whole string is one URL.
    Legacy(String),
    List(Vec<LinkItem>),
}

impl StoredLinks {
    pub fn parse(raw: Option<&str>) -> Self {
        let raw = match raw {
            None | Some("") => return StoredLinks::Empty,
            Some(raw) => raw,
        };
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(items)) => StoredLinks::List(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| item_from_value(i, item))
                    .collect(),
            ),
            _ => StoredLinks::Legacy(raw.to_string()),
        }
    }

    pub fn into_links(self) -> Vec<LinkItem> {
        match self {
            StoredLinks::Empty => Vec::new(),
            StoredLinks::Legacy(url) => vec![LinkItem::new(url, placeholder_title(0))],
            StoredLinks::List(links) => links,
        }
    }
}

fn placeholder_title(index: usize) -> String {
    format!("Link {}", index + 1)
}

fn item_from_value(index: usize, item: Value) -> LinkItem {
    match item {
        Value::String(url) => LinkItem::new(url, placeholder_title(index)),
        Value::Object(map) => {
            let url = map
                .get("url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let title = map
                .get("title")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| placeholder_title(index));
            LinkItem::new(url, title)
        }
        // Numbers, nulls and nested arrays carry no usable URL.
        _ => LinkItem::new("", placeholder_title(index)),
    }
}

/// Decodes a stored `link` value. Never fails.
pub fn decode(raw: Option<&str>) -> Vec<LinkItem> {
    StoredLinks::parse(raw).into_links()
}

/// Encodes a link list in the canonical JSON-array form.
pub fn encode(links: &[LinkItem]) -> String {
    serde_json::to_string(links).unwrap_or_else(|_| "[]".to_string())
}

/// True for titles the editor treats as not chosen by the user.
pub fn is_placeholder_title(title: &str) -> bool {
    if title.is_empty() || title == NEW_LINK_TITLE {
        return true;
    }
    match title.strip_prefix("Link ") {
        Some(n) => !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

/// A capitalized guess from the URL's host, e.g. `https://www.youtube.com/x`
/// gives `Youtube`. `None` when the URL does not parse or has no host.
pub fn guess_title(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    let label = host.split('.').next().filter(|l| !l.is_empty())?;
    let mut chars = label.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().chain(chars).collect())
}

/// Replaces the URL at `index`, swapping a placeholder title for a guess from
/// the new URL. Returns `false` when `index` is out of range.
pub fn set_url(links: &mut [LinkItem], index: usize, url: &str) -> bool {
    let Some(link) = links.get_mut(index) else {
        return false;
    };
    link.url = url.to_string();
    if is_placeholder_title(&link.title) {
        if let Some(title) = guess_title(url) {
            link.title = title;
        }
    }
    true
}
