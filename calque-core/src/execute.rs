//! The execution driver: turns a confirmed discovery graph into a mirrored
//! tree.
//!
//! Output paths were fixed during discovery, so the task list is computed
//! once, handed to the pool, and never recomputed mid-run. Invoking
//! execution without a confirmed discovery tree is the one condition that
//! aborts the whole run; every other failure is isolated to a single page
//! or worker.

use std::path::Path;
use tracing::info;

use calque_render::pool::WorkerPool;
use calque_render::protocol::{Cookie, DownloadTask};
use calque_render::worker::WorkerCommand;
use calque_render::MirrorConfig;

use crate::error::{MirrorError, Result};
use crate::graph::PageGraph;
use crate::report::RunReport;
use crate::resolve::FilesystemResolver;
use crate::rewrite;

/// Filename of the graph manifest written at the output root.
pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Builds the download task list from the confirmed tree. Paths come from
/// the filesystem resolver, absolute, one directory per page.
pub fn build_tasks(graph: &PageGraph, output_root: &Path) -> Result<Vec<DownloadTask>> {
    if graph.root().is_none() {
        return Err(MirrorError::ExecutionWithoutDiscovery);
    }
    let absolute_root = std::path::absolute(output_root)?;
    Ok(graph
        .nodes_in_depth_order()
        .into_iter()
        .map(|node| DownloadTask {
            url: node.url.clone(),
            page_id: node.id.clone(),
            save_path: FilesystemResolver::output_path(&absolute_root, node),
        })
        .collect())
}

/// Runs the full execution phase: download pool, graph manifest, rewrite
/// pass, report.
pub async fn execute_mirror(
    graph: &PageGraph,
    config: &MirrorConfig,
    command: WorkerCommand,
    cookies: Vec<Cookie>,
) -> Result<RunReport> {
    let mut report = RunReport::begin();
    report.pages_discovered = graph.len();

    let output_root = &config.output_root;
    let tasks = build_tasks(graph, output_root)?;
    std::fs::create_dir_all(output_root)?;

    info!(
        "mirroring {} pages into {}",
        tasks.len(),
        output_root.display()
    );

    let mut pool = WorkerPool::new(config.clone(), command, cookies);
    let pool_report = pool.run(tasks).await?;
    pool.shutdown().await;

    graph.save(&output_root.join(MANIFEST_FILENAME))?;

    let rewrite_stats = rewrite::rewrite_tree(graph, output_root);

    report.absorb_pool(&pool_report);
    report.absorb_rewrite(&rewrite_stats);
    report.finish();
    Ok(report)
}
