//! The page graph: every discovered node plus every classified edge.
//!
//! Built during discovery, read-only afterwards. Only FORWARD edges create
//! tree structure; BACK and CROSS edges are metadata kept so the rewrite
//! pass can still resolve the links that produced them. The graph
//! round-trips through a flat manifest because discovery and execution may
//! run in different processes.

use petgraph::dot::Dot;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::{MirrorError, Result};
use crate::node::{self, PageNode};

/// Classification of a discovered link relative to the discovery tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Forward,
    Back,
    Cross,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Forward => "forward",
            EdgeKind::Back => "back",
            EdgeKind::Cross => "cross",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeInfo {
    pub kind: EdgeKind,
    pub depth_delta: i64,
    pub is_ancestor: bool,
}

/// Flat edge representation used in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
    pub depth_delta: i64,
    pub is_ancestor: bool,
}

/// Serializable flat form of the whole graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphManifest {
    pub root: String,
    pub nodes: Vec<PageNode>,
    pub edges: Vec<EdgeRecord>,
}

#[derive(Debug, Default, Clone)]
pub struct PageGraph {
    root: Option<String>,
    nodes: HashMap<String, PageNode>,
    edges: HashMap<String, BTreeSet<String>>,
    edge_info: HashMap<(String, String), EdgeInfo>,
    by_url: HashMap<String, String>,
}

impl PageGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn root_id(&self) -> Option<&str> {
        self.root.as_deref()
    }

    pub fn root(&self) -> Option<&PageNode> {
        self.root.as_deref().and_then(|id| self.nodes.get(id))
    }

    pub fn node(&self, id: &str) -> Option<&PageNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut PageNode> {
        self.nodes.get_mut(id)
    }

    /// Looks a node up by URL, in the same normalized form the registry
    /// uses.
    pub fn node_by_url(&self, url: &str) -> Option<&PageNode> {
        let normalized = node::normalize_url(url)?;
        self.by_url.get(&normalized).and_then(|id| self.nodes.get(id))
    }

    pub fn contains_url(&self, url: &str) -> bool {
        node::normalize_url(url)
            .map(|n| self.by_url.contains_key(&n))
            .unwrap_or(false)
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes in breadth-first order: by depth, then by registration order
    /// within each parent.
    pub fn nodes_in_depth_order(&self) -> Vec<&PageNode> {
        let mut ordered = Vec::with_capacity(self.nodes.len());
        let Some(root) = self.root() else {
            return ordered;
        };
        let mut frontier = vec![root];
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for node in frontier {
                for child_id in &node.children {
                    if let Some(child) = self.nodes.get(child_id) {
                        next.push(child);
                    }
                }
                ordered.push(node);
            }
            frontier = next;
        }
        ordered
    }

    /// Registers the root page. The graph owns exactly one.
    pub fn insert_root(&mut self, node: PageNode) -> Result<()> {
        if self.root.is_some() {
            return Err(MirrorError::Other("graph already has a root".to_string()));
        }
        let key = node::normalize_url(&node.url)
            .ok_or_else(|| MirrorError::InvalidUrl(node.url.clone()))?;
        self.root = Some(node.id.clone());
        self.by_url.insert(key, node.id.clone());
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Registers a freshly discovered child and records the FORWARD edge
    /// that introduced it. Once registered, a URL is never re-parented:
    /// that is what keeps navigation and breadcrumb links from corrupting
    /// the tree.
    pub fn insert_child(&mut self, parent_id: &str, node: PageNode) -> Result<()> {
        let key = node::normalize_url(&node.url)
            .ok_or_else(|| MirrorError::InvalidUrl(node.url.clone()))?;
        if self.by_url.contains_key(&key) || self.nodes.contains_key(&node.id) {
            return Err(MirrorError::DuplicateRegistration {
                id: node.id.clone(),
                url: node.url.clone(),
            });
        }
        let parent = self
            .nodes
            .get_mut(parent_id)
            .ok_or_else(|| MirrorError::UnknownPage(parent_id.to_string()))?;
        if node.depth != parent.depth + 1 {
            return Err(MirrorError::DepthInvariant {
                parent: parent_id.to_string(),
                child: node.id.clone(),
            });
        }
        parent.children.push(node.id.clone());

        self.edges
            .entry(parent_id.to_string())
            .or_default()
            .insert(node.id.clone());
        self.edge_info.insert(
            (parent_id.to_string(), node.id.clone()),
            EdgeInfo {
                kind: EdgeKind::Forward,
                depth_delta: 1,
                is_ancestor: false,
            },
        );

        self.by_url.insert(key, node.id.clone());
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// True when `ancestor` lies on `id`'s parent chain.
    pub fn is_ancestor_of(&self, ancestor: &str, id: &str) -> bool {
        let mut cursor = self.nodes.get(id).and_then(|n| n.parent.as_deref());
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.nodes.get(current).and_then(|n| n.parent.as_deref());
        }
        false
    }

    /// Classifies a link to an already-registered target. Never re-parents;
    /// its only effect is metadata.
    pub fn classify(&self, source_id: &str, target_id: &str) -> EdgeInfo {
        if source_id == target_id {
            return EdgeInfo {
                kind: EdgeKind::Back,
                depth_delta: 0,
                is_ancestor: false,
            };
        }
        let depth_delta = match (self.nodes.get(source_id), self.nodes.get(target_id)) {
            (Some(s), Some(t)) => t.depth as i64 - s.depth as i64,
            _ => 0,
        };
        if self.is_ancestor_of(target_id, source_id) {
            EdgeInfo {
                kind: EdgeKind::Back,
                depth_delta,
                is_ancestor: true,
            }
        } else {
            EdgeInfo {
                kind: EdgeKind::Cross,
                depth_delta,
                is_ancestor: false,
            }
        }
    }

    /// Records a non-tree edge (the first sighting of a pair wins).
    pub fn record_edge(&mut self, source_id: &str, target_id: &str) -> EdgeInfo {
        let info = self.classify(source_id, target_id);
        let key = (source_id.to_string(), target_id.to_string());
        if !self.edge_info.contains_key(&key) {
            self.edges
                .entry(source_id.to_string())
                .or_default()
                .insert(target_id.to_string());
            self.edge_info.insert(key, info);
        }
        info
    }

    pub fn edge(&self, source_id: &str, target_id: &str) -> Option<EdgeInfo> {
        self.edge_info
            .get(&(source_id.to_string(), target_id.to_string()))
            .copied()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_info.len()
    }

    /// Flattens into the serializable manifest. Nodes come out in
    /// breadth-first order, edges sorted by (source, target), so the output
    /// is deterministic.
    pub fn manifest(&self) -> GraphManifest {
        let nodes = self
            .nodes_in_depth_order()
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();
        let mut edges: Vec<EdgeRecord> = self
            .edge_info
            .iter()
            .map(|((source, target), info)| EdgeRecord {
                source: source.clone(),
                target: target.clone(),
                kind: info.kind,
                depth_delta: info.depth_delta,
                is_ancestor: info.is_ancestor,
            })
            .collect();
        edges.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));
        GraphManifest {
            root: self.root.clone().unwrap_or_default(),
            nodes,
            edges,
        }
    }

    /// Rebuilds a graph from its flat form.
    pub fn from_manifest(manifest: GraphManifest) -> Result<Self> {
        let mut graph = Self::default();
        graph.root = Some(manifest.root.clone());
        for node in manifest.nodes {
            if let Some(key) = node::normalize_url(&node.url) {
                graph.by_url.insert(key, node.id.clone());
            }
            graph.nodes.insert(node.id.clone(), node);
        }
        if !graph.nodes.contains_key(&manifest.root) {
            return Err(MirrorError::UnknownPage(manifest.root));
        }
        for record in manifest.edges {
            graph
                .edges
                .entry(record.source.clone())
                .or_default()
                .insert(record.target.clone());
            graph.edge_info.insert(
                (record.source, record.target),
                EdgeInfo {
                    kind: record.kind,
                    depth_delta: record.depth_delta,
                    is_ancestor: record.is_ancestor,
                },
            );
        }
        Ok(graph)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let encoded = serde_json::to_string_pretty(&self.manifest())?;
        fs::write(path, encoded)?;
        debug!("graph manifest written to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let manifest: GraphManifest = serde_json::from_str(&content)?;
        Self::from_manifest(manifest)
    }

    /// Renders the graph in DOT form for diagnostics.
    pub fn to_dot(&self) -> String {
        let mut dot_graph: DiGraph<String, &'static str> = DiGraph::new();
        let mut indices = HashMap::new();
        for node in self.nodes_in_depth_order() {
            let label = if node.title.is_empty() {
                node.id.clone()
            } else {
                node.title.clone()
            };
            indices.insert(node.id.clone(), dot_graph.add_node(label));
        }
        for ((source, target), info) in &self.edge_info {
            if let (Some(&s), Some(&t)) = (indices.get(source), indices.get(target)) {
                dot_graph.add_edge(s, t, info.kind.as_str());
            }
        }
        format!("{}", Dot::new(&dot_graph))
    }
}
