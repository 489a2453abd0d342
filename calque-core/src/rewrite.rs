//! The link-rewrite pass.
//!
//! Runs after every page is saved: walks the mirrored tree, resolves each
//! link against the graph and the block-map cache, and mutates the saved
//! documents in place. Per-page filesystem failures are recorded and
//! skipped; the pass never aborts the run.

use scraper::{Html, Selector};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::graph::PageGraph;
use crate::node::PageNode;
use crate::resolve::{
    classify_href, BlockMapCache, FilesystemResolver, HrefTarget, LinkContext, ResolverChain,
};

/// A page the pass could not rewrite.
#[derive(Debug, Clone)]
pub struct RewriteFailure {
    pub page_id: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct RewriteStats {
    pub pages_visited: usize,
    pub pages_rewritten: usize,
    pub links_rewritten: usize,
    pub failures: Vec<RewriteFailure>,
}

/// Rewrites every saved document under `output_root`.
pub fn rewrite_tree(graph: &PageGraph, output_root: &Path) -> RewriteStats {
    let chain = ResolverChain::standard();
    let block_maps = BlockMapCache::load(output_root, graph);
    let mut stats = RewriteStats::default();

    for node in graph.nodes_in_depth_order() {
        stats.pages_visited += 1;
        let path = FilesystemResolver::output_path(output_root, node);

        let html = match fs::read_to_string(&path) {
            Ok(html) => html,
            Err(e) => {
                warn!("cannot read {}: {}", path.display(), e);
                stats.failures.push(RewriteFailure {
                    page_id: node.id.clone(),
                    error: format!("read {}: {}", path.display(), e),
                });
                continue;
            }
        };

        let (rewritten, changed) = rewrite_document(&html, node, graph, &chain, &block_maps);
        if changed == 0 {
            continue;
        }

        match fs::write(&path, rewritten) {
            Ok(()) => {
                debug!("{}: {} links rewritten", path.display(), changed);
                stats.pages_rewritten += 1;
                stats.links_rewritten += changed;
            }
            Err(e) => {
                warn!("cannot write {}: {}", path.display(), e);
                stats.failures.push(RewriteFailure {
                    page_id: node.id.clone(),
                    error: format!("write {}: {}", path.display(), e),
                });
            }
        }
    }

    stats
}

/// Rewrites one document's links, returning the new markup and how many
/// hrefs changed.
pub fn rewrite_document(
    html: &str,
    source: &PageNode,
    graph: &PageGraph,
    chain: &ResolverChain,
    block_maps: &BlockMapCache,
) -> (String, usize) {
    let mut document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").unwrap();

    let mut planned = Vec::new();
    for element in document.select(&selector) {
        if let Some(href) = element.value().attr("href")
            && let Some(resolved) = resolve_href(href, source, graph, chain, block_maps)
            && resolved != href
        {
            planned.push((element.id(), resolved));
        }
    }

    let changed = planned.len();
    for (node_id, resolved) in planned {
        if let Some(mut node) = document.tree.get_mut(node_id)
            && let scraper::Node::Element(element) = node.value()
        {
            for (name, value) in element.attrs.iter_mut() {
                if &*name.local == "href" {
                    *value = resolved.as_str().into();
                }
            }
        }
    }

    (serialize_document(&document), changed)
}

/// Resolves one href through the chain. `None` leaves the attribute alone.
fn resolve_href(
    href: &str,
    source: &PageNode,
    graph: &PageGraph,
    chain: &ResolverChain,
    block_maps: &BlockMapCache,
) -> Option<String> {
    if href.is_empty()
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    match classify_href(href, source, graph) {
        HrefTarget::SamePage { block_id } => {
            let context = LinkContext {
                source,
                target: Some(source),
                href,
                block_id: Some(block_id),
                block_maps,
            };
            Some(chain.resolve(&context))
        }
        HrefTarget::Internal { node, block_id } => {
            let context = LinkContext {
                source,
                target: Some(node),
                href,
                block_id: block_id.as_deref(),
                block_maps,
            };
            Some(chain.resolve(&context))
        }
        HrefTarget::External => {
            let context = LinkContext {
                source,
                target: None,
                href,
                block_id: None,
                block_maps,
            };
            Some(chain.resolve(&context))
        }
    }
}

fn serialize_document(document: &Html) -> String {
    format!("<!DOCTYPE html>\n{}", document.root_element().html())
}
