//! Block-ID maps: raw 32-hex block identifiers mapped to the canonical
//! dashed form actually rendered on a page.
//!
//! Anchor targets inside a rendered document carry a `data-block-id`
//! attribute. URLs embed the same identifier without separators, so anchor
//! resolution needs the mapping to emit the exact attribute value the page
//! uses. The map is persisted as a small sidecar next to the saved document
//! and is consulted, never required: a missing or corrupt sidecar degrades
//! to the structural reformat.

use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::Result;

/// Attribute stamped on anchorable blocks by the sites this tool mirrors.
pub const BLOCK_ID_ATTR: &str = "data-block-id";

/// Sidecar filename, stored in the same directory as the page document.
pub const SIDECAR_FILENAME: &str = "block_map.json";

/// Raw (32 lowercase hex chars) to canonical (as rendered on the page).
pub type BlockMap = BTreeMap<String, String>;

/// True for a well-formed raw block identifier.
pub fn is_raw_block_id(candidate: &str) -> bool {
    candidate.len() == 32
        && candidate
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Strips separators and lowercases, producing the raw lookup key.
pub fn raw_block_id(value: &str) -> String {
    value
        .chars()
        .filter(|c| *c != '-')
        .collect::<String>()
        .to_lowercase()
}

/// Reformats a raw identifier into the canonical dashed 8-4-4-4-12 form.
///
/// Returns `None` when the input is not a valid raw identifier; with a valid
/// one the reformat is always safe, which is what makes it an acceptable
/// fallback when no sidecar entry exists.
pub fn format_block_id(raw: &str) -> Option<String> {
    let raw = raw.to_lowercase();
    if !is_raw_block_id(&raw) {
        return None;
    }
    Some(format!(
        "{}-{}-{}-{}-{}",
        &raw[0..8],
        &raw[8..12],
        &raw[12..16],
        &raw[16..20],
        &raw[20..32]
    ))
}

/// Returns the canonical form rendered on the page when the map knows it,
/// falling back to the structural reformat.
pub fn formatted_id(raw: &str, map: Option<&BlockMap>) -> Option<String> {
    let key = raw_block_id(raw);
    if let Some(map) = map
        && let Some(canonical) = map.get(&key)
    {
        return Some(canonical.clone());
    }
    format_block_id(&key)
}

/// Scans a rendered document for every element carrying the anchor
/// attribute and builds the raw-to-canonical mapping.
pub fn extract_block_ids(html: &str) -> BlockMap {
    let document = Html::parse_document(html);
    let selector = Selector::parse("[data-block-id]").unwrap();

    let mut map = BlockMap::new();
    for element in document.select(&selector) {
        if let Some(value) = element.value().attr(BLOCK_ID_ATTR) {
            let raw = raw_block_id(value);
            if is_raw_block_id(&raw) {
                map.insert(raw, value.to_string());
            }
        }
    }
    map
}

/// Persists a page's block map next to its saved document.
pub fn save_block_map(page_dir: &Path, map: &BlockMap) -> Result<()> {
    let path = page_dir.join(SIDECAR_FILENAME);
    let encoded = serde_json::to_string_pretty(map)?;
    fs::write(path, encoded)?;
    Ok(())
}

/// Loads a page's block map. Missing or corrupt sidecars return `None`;
/// anchor correctness is never load-bearing for reachability.
pub fn load_block_map(page_dir: &Path) -> Option<BlockMap> {
    let path = page_dir.join(SIDECAR_FILENAME);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            debug!("no block map at {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(map) => Some(map),
        Err(e) => {
            debug!("unreadable block map at {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const RAW: &str = "29d979ee64ae4a5aa7d9f09a102a5a23";

    #[test]
    fn format_inserts_separators_at_fixed_positions() {
        assert_eq!(
            format_block_id(RAW).unwrap(),
            "29d979ee-64ae-4a5a-a7d9-f09a102a5a23"
        );
    }

    #[test]
    fn format_round_trips_through_strip() {
        let formatted = format_block_id(RAW).unwrap();
        assert_eq!(raw_block_id(&formatted), RAW);
    }

    #[test]
    fn format_rejects_invalid_input() {
        assert_eq!(format_block_id("not-an-id"), None);
        assert_eq!(format_block_id(&RAW[..31]), None);
        assert_eq!(format_block_id(&format!("{}0", RAW)), None);
        // 'g' is outside the hex alphabet
        assert_eq!(format_block_id(&format!("g{}", &RAW[1..])), None);
    }

    #[test]
    fn extraction_keys_by_stripped_lowercase_id() {
        let html = r#"<html><body>
                <div data-block-id="29d979ee-64ae-4a5a-a7d9-f09a102a5a23">one</div>
                <div data-block-id="bogus">skipped</div>
            </body></html>"#;
        let map = extract_block_ids(html);
        assert_eq!(map.len(), 1);
        assert_eq!(
            map.get(RAW).map(String::as_str),
            Some("29d979ee-64ae-4a5a-a7d9-f09a102a5a23")
        );
    }

    #[test]
    fn formatted_id_prefers_the_rendered_attribute() {
        let mut map = BlockMap::new();
        map.insert(RAW.to_string(), "29D979EE-64AE-4A5A-A7D9-F09A102A5A23".to_string());

        // Cache hit returns the page's own casing.
        assert_eq!(
            formatted_id(RAW, Some(&map)).unwrap(),
            "29D979EE-64AE-4A5A-A7D9-F09A102A5A23"
        );
        // Cache miss falls back to the structural reformat.
        assert_eq!(
            formatted_id(RAW, None).unwrap(),
            "29d979ee-64ae-4a5a-a7d9-f09a102a5a23"
        );
    }

    #[test]
    fn sidecar_round_trips_and_degrades_silently() {
        let dir = TempDir::new().unwrap();
        let mut map = BlockMap::new();
        map.insert(RAW.to_string(), format_block_id(RAW).unwrap());

        save_block_map(dir.path(), &map).unwrap();
        assert_eq!(load_block_map(dir.path()), Some(map));

        // Corrupt sidecar degrades to None instead of failing.
        fs::write(dir.path().join(SIDECAR_FILENAME), "{truncated").unwrap();
        assert_eq!(load_block_map(dir.path()), None);

        // Missing sidecar likewise.
        let empty = TempDir::new().unwrap();
        assert_eq!(load_block_map(empty.path()), None);
    }
}
