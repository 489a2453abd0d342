//! Depth-synchronous site discovery.
//!
//! Every node at depth d is probed before any node at depth d+1. The
//! ordering is load-bearing: path resolution caches a node's segment chain
//! the moment the node is probed, which is only sound if no node can later
//! reappear at a different depth. The registry check runs before anything
//! else so links back to already-placed ancestors and siblings become
//! classified edges, never new children.

use std::collections::HashSet;
use tracing::{debug, info, warn};
use url::Url;

use calque_render::prober::{PageProber, ProbedPage};

use crate::error::{MirrorError, Result};
use crate::graph::PageGraph;
use crate::node::{self, PageNode};

/// A page whose probe failed. The node stays in the tree as a childless
/// leaf; the crawl continues.
#[derive(Debug, Clone)]
pub struct ProbeFailure {
    pub url: String,
    pub error: String,
}

#[derive(Debug)]
pub struct DiscoveryOutcome {
    pub graph: PageGraph,
    pub probe_failures: Vec<ProbeFailure>,
}

pub struct Discovery<P> {
    prober: P,
}

impl<P: PageProber> Discovery<P> {
    pub fn new(prober: P) -> Self {
        Self { prober }
    }

    /// Runs the breadth-first discovery from `root_url` down to
    /// `max_depth`. Nodes at `max_depth` are still probed (their titles
    /// place them on disk) but their links are not expanded.
    pub async fn discover(&self, root_url: &str, max_depth: usize) -> Result<DiscoveryOutcome> {
        let parsed_root =
            Url::parse(root_url).map_err(|e| MirrorError::InvalidUrl(format!("{}: {}", root_url, e)))?;
        let site_host = parsed_root
            .host_str()
            .ok_or_else(|| MirrorError::InvalidUrl(format!("{} has no host", root_url)))?
            .to_string();

        let mut graph = PageGraph::new();
        let mut probe_failures = Vec::new();

        let root_id = node::page_id_for(root_url);
        graph.insert_root(PageNode::root(&root_id, root_url))?;

        let mut frontier = vec![root_id];
        let mut depth = 0usize;

        while !frontier.is_empty() {
            debug!("probing level {} ({} pages)", depth, frontier.len());
            let mut next_frontier = Vec::new();

            for node_id in frontier {
                let page_url = match graph.node(&node_id) {
                    Some(n) => n.url.clone(),
                    None => continue,
                };

                let probed = match self.prober.probe(&page_url).await {
                    Ok(probed) => Some(probed),
                    Err(e) => {
                        warn!("probe failed for {}: {}", page_url, e);
                        probe_failures.push(ProbeFailure {
                            url: page_url.clone(),
                            error: e.to_string(),
                        });
                        None
                    }
                };

                let title = probed
                    .as_ref()
                    .map(|p| p.title.clone())
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| node::title_from_url(&page_url));
                self.place_node(&mut graph, &node_id, title);

                // A failed probe leaves a childless leaf; so does the
                // depth boundary.
                let Some(ProbedPage { links, .. }) = probed else {
                    continue;
                };
                if depth >= max_depth {
                    continue;
                }

                for link in links {
                    self.register_link(&mut graph, &node_id, &link, &site_host, &mut next_frontier);
                }
            }

            frontier = next_frontier;
            depth += 1;
        }

        info!(
            "discovery complete: {} pages, {} edges, {} probe failures",
            graph.len(),
            graph.edge_count(),
            probe_failures.len()
        );
        Ok(DiscoveryOutcome {
            graph,
            probe_failures,
        })
    }

    /// Fixes a node's title and cached segment chain at its own probe time,
    /// before any deeper node exists. Sibling collisions on the sanitized
    /// segment get a short id suffix; the first sibling keeps the bare name.
    fn place_node(&self, graph: &mut PageGraph, node_id: &str, title: String) {
        let (parent_segments, sibling_segments) = match graph.node(node_id) {
            Some(n) if n.is_root() => (Vec::new(), HashSet::new()),
            Some(n) => {
                let parent_id = n.parent.clone().unwrap_or_default();
                let parent = graph.node(&parent_id);
                let parent_segments = parent
                    .map(|p| p.path_segments.clone())
                    .unwrap_or_default();
                let sibling_segments: HashSet<String> = parent
                    .map(|p| {
                        p.children
                            .iter()
                            .filter(|c| c.as_str() != node_id)
                            .filter_map(|c| graph.node(c))
                            .filter_map(|c| c.path_segments.last().cloned())
                            .collect()
                    })
                    .unwrap_or_default();
                (parent_segments, sibling_segments)
            }
            None => return,
        };

        let Some(page) = graph.node_mut(node_id) else {
            return;
        };
        page.title = title;

        if page.is_root() {
            // The root's segment chain is empty: it lives at the output root.
            page.path_segments = Vec::new();
            return;
        }

        let mut segment = node::sanitize_segment(&page.title);
        if sibling_segments.contains(&segment) {
            let suffix: String = page.id.chars().take(4).collect();
            segment = format!("{}-{}", segment, suffix);
        }
        let mut segments = parent_segments;
        segments.push(segment);
        page.path_segments = segments;
    }

    /// Handles one outbound link of a just-probed page: registry first
    /// (already-known targets become classified edges), then registration
    /// of a genuinely new child.
    fn register_link(
        &self,
        graph: &mut PageGraph,
        source_id: &str,
        link: &str,
        site_host: &str,
        next_frontier: &mut Vec<String>,
    ) {
        let Ok(parsed) = Url::parse(link) else {
            return;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return;
        }
        if parsed.host_str() != Some(site_host) {
            return;
        }
        let Some(normalized) = node::normalize_url(link) else {
            return;
        };

        let target_id = node::page_id_for(&normalized);

        // Registered anywhere already - ancestors and earlier siblings
        // included - means edge metadata only, never a new child.
        if graph.contains_url(&normalized) || graph.contains_id(&target_id) {
            let known_id = graph
                .node_by_url(&normalized)
                .map(|n| n.id.clone())
                .unwrap_or(target_id);
            let info = graph.record_edge(source_id, &known_id);
            debug!(
                "edge {} -> {} classified {:?}",
                source_id, known_id, info.kind
            );
            return;
        }

        let Some(parent) = graph.node(source_id) else {
            return;
        };
        let child = PageNode::child(&target_id, &normalized, parent);
        match graph.insert_child(source_id, child) {
            Ok(()) => next_frontier.push(target_id),
            Err(e) => warn!("could not register {}: {}", normalized, e),
        }
    }
}
