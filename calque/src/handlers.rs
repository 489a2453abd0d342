use anyhow::Context;
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use calque_core::discovery::Discovery;
use calque_core::execute::{self, MANIFEST_FILENAME};
use calque_core::graph::PageGraph;
use calque_core::node::PageNode;
use calque_core::report::REPORT_FILENAME;
use calque_core::rewrite;
use calque_render::agent;
use calque_render::prober::HttpProber;
use calque_render::protocol::Cookie;
use calque_render::renderer::HttpRenderer;
use calque_render::worker::WorkerCommand;
use calque_render::MirrorConfig;

/// Parses a `name=value` cookie argument against the site's domain.
pub fn parse_cookie_arg(raw: &str, domain: &str) -> Option<Cookie> {
    let (name, value) = raw.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some(Cookie::new(name, value.trim(), domain))
}

/// Renders the discovered tree, one indented line per page.
pub fn render_tree(graph: &PageGraph) -> String {
    let mut out = String::new();
    if let Some(root) = graph.root() {
        render_node(graph, root, 0, &mut out);
    }
    out
}

fn render_node(graph: &PageGraph, node: &PageNode, indent: usize, out: &mut String) {
    let label = if node.title.is_empty() {
        node.url.as_str()
    } else {
        node.title.as_str()
    };
    out.push_str(&format!("{}{}  {}\n", "  ".repeat(indent), label, node.url.dimmed()));
    for child_id in &node.children {
        if let Some(child) = graph.node(child_id) {
            render_node(graph, child, indent + 1, out);
        }
    }
}

fn discovery_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap(),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(message.to_string());
    pb
}

fn expanded_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

pub async fn handle_discover(args: &ArgMatches) -> anyhow::Result<()> {
    let url = args.get_one::<Url>("url").expect("clap enforces url");
    let depth = *args.get_one::<usize>("depth").unwrap_or(&5);
    let timeout = *args.get_one::<u64>("timeout").unwrap_or(&30);
    let user_agent = args
        .get_one::<String>("user-agent")
        .cloned()
        .unwrap_or_else(|| MirrorConfig::default().user_agent);

    let spinner = discovery_spinner(&format!("Discovering {}...", url));

    let prober = HttpProber::new(&user_agent, Duration::from_secs(timeout))?;
    let outcome = Discovery::new(prober)
        .discover(url.as_str(), depth)
        .await
        .context("discovery failed")?;

    spinner.finish_with_message(format!(
        "Discovery complete: {} pages, {} edges",
        outcome.graph.len(),
        outcome.graph.edge_count()
    ));

    print!("{}", render_tree(&outcome.graph));
    if !outcome.probe_failures.is_empty() {
        println!("\n{} unreachable pages:", outcome.probe_failures.len());
        for failure in &outcome.probe_failures {
            println!("  {} {}: {}", "✗".red(), failure.url, failure.error);
        }
    }

    if let Some(path) = args.get_one::<PathBuf>("manifest") {
        outcome.graph.save(path)?;
        println!("\nManifest written to {}", path.display());
    }
    if let Some(path) = args.get_one::<PathBuf>("dot") {
        std::fs::write(path, outcome.graph.to_dot())?;
        println!("DOT graph written to {}", path.display());
    }
    Ok(())
}

pub async fn handle_mirror(args: &ArgMatches) -> anyhow::Result<()> {
    let url = args.get_one::<Url>("url").expect("clap enforces url");
    let output = expanded_path(args.get_one::<String>("output").expect("has default"));
    let workers = *args.get_one::<usize>("workers").unwrap_or(&4);
    let depth = *args.get_one::<usize>("depth").unwrap_or(&5);
    let retries = *args.get_one::<u32>("retries").unwrap_or(&3);
    let timeout = *args.get_one::<u64>("timeout").unwrap_or(&30);
    let no_respawn = args.get_flag("no-respawn");
    let user_agent = args
        .get_one::<String>("user-agent")
        .cloned()
        .unwrap_or_else(|| MirrorConfig::default().user_agent);

    let domain = url.host_str().unwrap_or("unknown").to_string();
    let cookies: Vec<Cookie> = args
        .get_many::<String>("cookie")
        .map(|values| {
            values
                .filter_map(|raw| parse_cookie_arg(raw, &domain))
                .collect()
        })
        .unwrap_or_default();

    println!("\nMirroring {}", domain);
    println!("Workers: {}", workers);
    println!("Max depth: {}", depth);
    println!("Output: {}\n", output.display());

    let mut config = MirrorConfig::default()
        .with_workers(workers)
        .with_max_depth(depth)
        .with_max_retries(retries)
        .with_respawn(!no_respawn)
        .with_user_agent(&user_agent)
        .with_output_root(output.clone());
    config.request_timeout = Duration::from_secs(timeout);

    // Phase 1: discovery, single-threaded and level-synchronous.
    let spinner = discovery_spinner("Discovering site structure...");
    let prober = HttpProber::new(&user_agent, config.request_timeout)?;
    let outcome = Discovery::new(prober)
        .discover(url.as_str(), depth)
        .await
        .context("discovery failed")?;
    spinner.finish_with_message(format!("Discovered {} pages", outcome.graph.len()));

    // Phase 2: the download pool, one OS process per worker.
    let command = WorkerCommand::current_exe(vec![
        "worker".to_string(),
        "--user-agent".to_string(),
        user_agent.clone(),
        "--timeout".to_string(),
        timeout.to_string(),
    ])?;

    let download_bar = discovery_spinner("Downloading pages...");
    let report = execute::execute_mirror(&outcome.graph, &config, command, cookies).await?;
    download_bar.finish_and_clear();

    report.save(&output.join(REPORT_FILENAME))?;
    print!("{}", report.render());
    Ok(())
}

pub fn handle_rewrite(args: &ArgMatches) -> anyhow::Result<()> {
    let output = expanded_path(args.get_one::<String>("output").expect("clap enforces output"));
    let manifest_path = output.join(MANIFEST_FILENAME);
    let graph = PageGraph::load(&manifest_path)
        .with_context(|| format!("no graph manifest at {}", manifest_path.display()))?;

    let stats = rewrite::rewrite_tree(&graph, &output);
    println!(
        "Rewrote {} links across {} of {} pages",
        stats.links_rewritten, stats.pages_rewritten, stats.pages_visited
    );
    for failure in &stats.failures {
        println!("  {} {}: {}", "✗".red(), failure.page_id, failure.error);
    }
    Ok(())
}

/// The hidden worker entry point: everything on stdout belongs to the
/// pool protocol, so all logging goes to stderr.
pub async fn handle_worker(args: &ArgMatches) -> anyhow::Result<()> {
    let timeout = *args.get_one::<u64>("timeout").unwrap_or(&30);
    let user_agent = args
        .get_one::<String>("user-agent")
        .cloned()
        .unwrap_or_else(|| MirrorConfig::default().user_agent);

    let renderer = HttpRenderer::new(&user_agent, Duration::from_secs(timeout))?;
    agent::run(renderer).await?;
    Ok(())
}

/// Re-runs the rewrite pass from a directory handed over without a flag,
/// used by tests that drive the handler layer directly.
pub fn rewrite_existing_mirror(output: &Path) -> anyhow::Result<rewrite::RewriteStats> {
    let graph = PageGraph::load(&output.join(MANIFEST_FILENAME))?;
    Ok(rewrite::rewrite_tree(&graph, output))
}
