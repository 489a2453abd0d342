//! Page nodes: the tree entity representing one discovered page.
//!
//! Nodes are arena-stored: parent and children are id strings resolved
//! through the graph, never references, so the whole tree serializes flat
//! and crosses process boundaries intact.

use serde::{Deserialize, Serialize};
use url::Url;

use calque_render::blockmap::{is_raw_block_id, raw_block_id};

/// One discovered page.
///
/// `path_segments` is the sanitized title chain from the root down to this
/// node. It is computed once, when the page itself is probed, and carried
/// through serialization so descendants never need to walk a parent chain
/// that may not exist after transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageNode {
    pub id: String,
    pub url: String,
    pub title: String,
    pub depth: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub path_segments: Vec<String>,
}

impl PageNode {
    pub fn root(id: &str, url: &str) -> Self {
        Self {
            id: id.to_string(),
            url: url.to_string(),
            title: String::new(),
            depth: 0,
            parent: None,
            children: Vec::new(),
            path_segments: Vec::new(),
        }
    }

    pub fn child(id: &str, url: &str, parent: &PageNode) -> Self {
        Self {
            id: id.to_string(),
            url: url.to_string(),
            title: String::new(),
            depth: parent.depth + 1,
            parent: Some(parent.id.clone()),
            children: Vec::new(),
            path_segments: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Derives the stable page identifier from a canonical URL.
///
/// Script-rendered sites of the kind this tool mirrors embed a 32-hex block
/// identifier at the end of the path (`/Page-Title-29d979ee...`). When one
/// is present it is the identity; otherwise the normalized URL itself is.
pub fn page_id_for(url: &str) -> String {
    if let Ok(parsed) = Url::parse(url)
        && let Some(segments) = parsed.path_segments()
    {
        if let Some(last) = segments.filter(|s| !s.is_empty()).next_back() {
            let stripped = raw_block_id(last);
            if stripped.len() >= 32 {
                let tail = &stripped[stripped.len() - 32..];
                if is_raw_block_id(tail) {
                    return tail.to_string();
                }
            }
        }
    }
    normalize_url(url).unwrap_or_else(|| url.to_string())
}

/// Canonical form used for the URL registry: fragment dropped, trailing
/// slash trimmed.
pub fn normalize_url(url: &str) -> Option<String> {
    let mut parsed = Url::parse(url).ok()?;
    parsed.set_fragment(None);
    let normalized = parsed.to_string();
    Some(normalized.trim_end_matches('/').to_string())
}

/// Turns a page title into a filesystem-safe path segment.
///
/// Whitespace becomes underscores, anything outside `[A-Za-z0-9._-]` is
/// dropped, runs collapse, and an empty result falls back to "untitled".
pub fn sanitize_segment(title: &str) -> String {
    let mut segment = String::with_capacity(title.len());
    let mut last_was_fill = true;
    for c in title.trim().chars() {
        if c.is_whitespace() || c == '_' {
            if !last_was_fill {
                segment.push('_');
                last_was_fill = true;
            }
        } else if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            segment.push(c);
            last_was_fill = false;
        }
        // everything else is dropped outright
    }
    let segment = segment.trim_matches(|c| c == '_' || c == '.').to_string();
    let mut segment = if segment.is_empty() {
        "untitled".to_string()
    } else {
        segment
    };
    segment.truncate(80);
    segment
}

/// Fallback title for a page whose probe failed: the URL's slug with the
/// trailing identifier removed.
pub fn title_from_url(url: &str) -> String {
    let slug = Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|s| s.filter(|p| !p.is_empty()).next_back().map(str::to_string))
        })
        .unwrap_or_default();
    if slug.is_empty() {
        return "untitled".to_string();
    }
    // "Page-Title-29d979ee..." -> "Page-Title"
    let stripped = raw_block_id(&slug);
    if stripped.len() >= 32 && is_raw_block_id(&stripped[stripped.len() - 32..]) {
        let without_id = slug
            .trim_end_matches(|c: char| c.is_ascii_hexdigit() || c == '-')
            .trim_end_matches('-');
        if !without_id.is_empty() {
            return without_id.replace('-', " ");
        }
    }
    slug.replace('-', " ")
}
