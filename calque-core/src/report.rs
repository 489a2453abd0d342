//! The run report: what happened, page by page and in aggregate.

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use calque_render::pool::PoolReport;

use crate::error::Result;
use crate::rewrite::RewriteStats;

pub const REPORT_FILENAME: &str = "report.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageFailure {
    pub page_id: String,
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pages_discovered: usize,
    pub pages_mirrored: usize,
    pub pages_failed: Vec<PageFailure>,
    pub requeues: usize,
    pub respawns: usize,
    pub pages_rewritten: usize,
    pub links_rewritten: usize,
}

impl RunReport {
    pub fn begin() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            pages_discovered: 0,
            pages_mirrored: 0,
            pages_failed: Vec::new(),
            requeues: 0,
            respawns: 0,
            pages_rewritten: 0,
            links_rewritten: 0,
        }
    }

    pub fn absorb_pool(&mut self, pool: &PoolReport) {
        self.pages_mirrored = pool.completed.len();
        self.requeues = pool.requeues;
        self.respawns = pool.respawns;
        for failure in pool.failures() {
            self.pages_failed.push(PageFailure {
                page_id: failure.page_id.clone(),
                url: failure.url.clone(),
                error: failure.error.clone(),
            });
        }
    }

    pub fn absorb_rewrite(&mut self, stats: &RewriteStats) {
        self.pages_rewritten = stats.pages_rewritten;
        self.links_rewritten = stats.links_rewritten;
        for failure in &stats.failures {
            self.pages_failed.push(PageFailure {
                page_id: failure.page_id.clone(),
                url: String::new(),
                error: failure.error.clone(),
            });
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_secs(&self) -> i64 {
        self.finished_at
            .map(|end| (end - self.started_at).num_seconds())
            .unwrap_or(0)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Renders the summary the CLI prints after a run.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");
        out.push_str("# Summary:\n");
        out.push_str(&format!("  Pages discovered: {}\n", self.pages_discovered));
        out.push_str(&format!(
            "  Pages mirrored:   {}\n",
            self.pages_mirrored.to_string().green()
        ));
        if self.pages_failed.is_empty() {
            out.push_str("  Pages failed:     0\n");
        } else {
            out.push_str(&format!(
                "  Pages failed:     {}\n",
                self.pages_failed.len().to_string().red()
            ));
        }
        out.push_str(&format!("  Links rewritten:  {}\n", self.links_rewritten));
        if self.requeues > 0 || self.respawns > 0 {
            out.push_str(&format!(
                "  Crash recovery:   {} requeues, {} respawns\n",
                self.requeues, self.respawns
            ));
        }
        out.push_str(&format!("  Duration:         {}s\n", self.duration_secs()));

        if !self.pages_failed.is_empty() {
            out.push_str("\n# Failures:\n");
            for failure in &self.pages_failed {
                let place = if failure.url.is_empty() {
                    failure.page_id.as_str()
                } else {
                    failure.url.as_str()
                };
                out.push_str(&format!("  {} {}: {}\n", "✗".red(), place, failure.error));
            }
        }

        out.push_str("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
        out
    }
}
