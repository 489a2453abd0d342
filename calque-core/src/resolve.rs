//! The path resolution chain.
//!
//! Every link a rendered page carries is resolved by the first strategy
//! that claims its context: same-page anchors, then page-to-page relative
//! paths, then external passthrough. The filesystem strategy is never part
//! of automatic selection; it is invoked explicitly to compute where a
//! single page lives on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use calque_render::blockmap::{self, BlockMap};

use crate::graph::PageGraph;
use crate::node::PageNode;

/// Canonical document filename every mirrored page is saved under.
pub const DOCUMENT_FILENAME: &str = "index.html";

/// Block maps for every page that has one, keyed by page id.
#[derive(Debug, Default)]
pub struct BlockMapCache {
    maps: HashMap<String, BlockMap>,
}

impl BlockMapCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, page_id: &str, map: BlockMap) {
        self.maps.insert(page_id.to_string(), map);
    }

    pub fn get(&self, page_id: &str) -> Option<&BlockMap> {
        self.maps.get(page_id)
    }

    /// Loads every sidecar the mirrored tree has. Missing or unreadable
    /// sidecars are simply absent; anchor resolution falls back to the
    /// structural reformat.
    pub fn load(output_root: &Path, graph: &PageGraph) -> Self {
        let mut cache = Self::new();
        for node in graph.nodes_in_depth_order() {
            let page_dir = FilesystemResolver::page_dir(output_root, node);
            if let Some(map) = blockmap::load_block_map(&page_dir) {
                cache.insert(&node.id, map);
            }
        }
        debug!("loaded {} block maps", cache.maps.len());
        cache
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverKind {
    Intra,
    Inter,
    External,
    Filesystem,
}

/// Everything a resolver may need about one link.
pub struct LinkContext<'a> {
    pub source: &'a PageNode,
    pub target: Option<&'a PageNode>,
    pub href: &'a str,
    pub block_id: Option<&'a str>,
    pub block_maps: &'a BlockMapCache,
}

pub trait PathResolver {
    fn kind(&self) -> ResolverKind;
    fn supports(&self, context: &LinkContext) -> bool;
    fn resolve(&self, context: &LinkContext) -> String;
}

/// Formats the anchor for `raw` as it appears on `page`, consulting the
/// page's block map before falling back to the structural reformat.
fn anchor_for(page: &PageNode, raw: &str, block_maps: &BlockMapCache) -> Option<String> {
    blockmap::formatted_id(raw, block_maps.get(&page.id))
}

/// Same-page links: anchor-only hrefs, or a target that is the source.
pub struct IntraPageResolver;

impl PathResolver for IntraPageResolver {
    fn kind(&self) -> ResolverKind {
        ResolverKind::Intra
    }

    fn supports(&self, context: &LinkContext) -> bool {
        context.href.starts_with('#')
            || context
                .target
                .map(|t| t.id == context.source.id)
                .unwrap_or(false)
    }

    fn resolve(&self, context: &LinkContext) -> String {
        let page = context.target.unwrap_or(context.source);
        match context.block_id {
            Some(raw) => match anchor_for(page, raw, context.block_maps) {
                Some(anchor) => format!("#{}", anchor),
                None => context.href.to_string(),
            },
            // A self-link with no block id points at the current location.
            None => String::new(),
        }
    }
}

/// Page-to-page links between two registered nodes.
pub struct InterPageResolver;

impl PathResolver for InterPageResolver {
    fn kind(&self) -> ResolverKind {
        ResolverKind::Inter
    }

    fn supports(&self, context: &LinkContext) -> bool {
        context
            .target
            .map(|t| !t.id.is_empty() && t.id != context.source.id)
            .unwrap_or(false)
    }

    /// Emits `(source_depth - c)` parent tokens, the target segments past
    /// the common prefix, and the document filename. The one algorithm
    /// covers child-to-root, root-to-child and divergent branches.
    fn resolve(&self, context: &LinkContext) -> String {
        let Some(target) = context.target else {
            return context.href.to_string();
        };
        let source_segments = &context.source.path_segments;
        let target_segments = &target.path_segments;

        let common = source_segments
            .iter()
            .zip(target_segments.iter())
            .take_while(|(s, t)| s == t)
            .count();

        let mut path = String::new();
        for _ in common..source_segments.len() {
            path.push_str("../");
        }
        for segment in &target_segments[common..] {
            path.push_str(segment);
            path.push('/');
        }
        path.push_str(DOCUMENT_FILENAME);

        if let Some(raw) = context.block_id
            && let Some(anchor) = anchor_for(target, raw, context.block_maps)
        {
            path.push('#');
            path.push_str(&anchor);
        }
        path
    }
}

/// Anything without a valid internal target passes through untouched.
pub struct ExternalResolver;

impl PathResolver for ExternalResolver {
    fn kind(&self) -> ResolverKind {
        ResolverKind::External
    }

    fn supports(&self, context: &LinkContext) -> bool {
        context.target.is_none()
    }

    fn resolve(&self, context: &LinkContext) -> String {
        context.href.to_string()
    }
}

/// Computes a page's own output location. Never part of the automatic
/// chain; the execution layer invokes it directly, which is what makes the
/// output tree conflict-free across workers.
pub struct FilesystemResolver;

impl FilesystemResolver {
    pub fn page_dir(output_root: &Path, node: &PageNode) -> PathBuf {
        let mut path = output_root.to_path_buf();
        for segment in &node.path_segments {
            path.push(segment);
        }
        path
    }

    pub fn output_path(output_root: &Path, node: &PageNode) -> PathBuf {
        Self::page_dir(output_root, node).join(DOCUMENT_FILENAME)
    }
}

impl PathResolver for FilesystemResolver {
    fn kind(&self) -> ResolverKind {
        ResolverKind::Filesystem
    }

    fn supports(&self, _context: &LinkContext) -> bool {
        false
    }

    fn resolve(&self, context: &LinkContext) -> String {
        let mut path = String::new();
        for segment in &context.source.path_segments {
            path.push_str(segment);
            path.push('/');
        }
        path.push_str(DOCUMENT_FILENAME);
        path
    }
}

/// The strategy chain, tried in priority order; first match wins.
pub struct ResolverChain {
    resolvers: Vec<Box<dyn PathResolver>>,
}

impl ResolverChain {
    pub fn standard() -> Self {
        Self {
            resolvers: vec![
                Box::new(IntraPageResolver),
                Box::new(InterPageResolver),
                Box::new(ExternalResolver),
            ],
        }
    }

    /// Resolves the context through the chain. A context nothing claims is
    /// an unresolved passthrough, logged but never an error.
    pub fn resolve(&self, context: &LinkContext) -> String {
        for resolver in &self.resolvers {
            if resolver.supports(context) {
                return resolver.resolve(context);
            }
        }
        warn!(
            "no resolver claimed href {:?} on page {}; passing through",
            context.href, context.source.id
        );
        context.href.to_string()
    }
}

/// The target of a parsed href, as seen from a source page.
pub enum HrefTarget<'a> {
    /// Anchor-only href on the current page.
    SamePage { block_id: &'a str },
    /// A registered page, possibly with an anchor.
    Internal {
        node: &'a PageNode,
        block_id: Option<String>,
    },
    /// Everything else.
    External,
}

/// Matches an href against the graph: anchor-only fragments stay on the
/// source page; absolute or relative URLs are looked up by registered URL
/// first, then by trailing page identifier.
pub fn classify_href<'a>(
    href: &'a str,
    source: &PageNode,
    graph: &'a PageGraph,
) -> HrefTarget<'a> {
    if let Some(fragment) = href.strip_prefix('#') {
        return HrefTarget::SamePage { block_id: fragment };
    }

    let Ok(base) = url::Url::parse(&source.url) else {
        return HrefTarget::External;
    };
    let Ok(absolute) = base.join(href) else {
        return HrefTarget::External;
    };

    let block_id = absolute.fragment().map(|f| f.to_string());
    let mut stripped = absolute.clone();
    stripped.set_fragment(None);

    if let Some(node) = graph.node_by_url(stripped.as_str()) {
        return HrefTarget::Internal { node, block_id };
    }
    let id = crate::node::page_id_for(stripped.as_str());
    if let Some(node) = graph.node(&id) {
        return HrefTarget::Internal { node, block_id };
    }
    HrefTarget::External
}
