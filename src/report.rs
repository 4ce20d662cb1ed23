//! Rendering of run reports for the terminal and as JSON.

use std::fmt::Write;

use console::{measure_text_width, pad_str, Alignment};
use serde::Serialize;

use crate::bulk::BulkReport;
use crate::error::Result;
use crate::orchestrator::SyncReport;
use crate::output::{emoji, OutputConfig};
use crate::result::{RepoResult, Summary};

/// One line per repository: label, status, message.
pub fn render_results(results: &[RepoResult], config: &OutputConfig) -> String {
    let width = results
        .iter()
        .map(|r| measure_text_width(&r.repository().label()))
        .max()
        .unwrap_or(0);
    let status_width = results
        .iter()
        .map(|r| r.status().as_str().len())
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    for r in results {
        let label = r.repository().label();
        let status = config.status(r.status());
        let _ = writeln!(
            out,
            "  {}  {}  {}",
            pad_str(&label, width, Alignment::Left, None),
            pad_str(&status, status_width, Alignment::Left, None),
            r.message()
        );
    }
    out
}

/// `5 repositories: 2 updated, 1 dirty, 2 up-to-date`
pub fn render_summary(summary: &Summary, config: &OutputConfig) -> String {
    let parts: Vec<String> = summary
        .counts
        .iter()
        .map(|(status, n)| format!("{} {}", n, config.status(*status)))
        .collect();
    let noun = if summary.total == 1 {
        "repository"
    } else {
        "repositories"
    };
    if parts.is_empty() {
        format!("{} {}", summary.total, noun)
    } else {
        format!("{} {}: {}", summary.total, noun, parts.join(", "))
    }
}

pub fn render_bulk(report: &BulkReport, config: &OutputConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {}",
        emoji(config, "🔍", "[SCAN]"),
        config.bold(&report.root.display().to_string())
    );
    if report.results.is_empty() {
        let _ = writeln!(out, "  no repositories found");
        return out;
    }
    out.push_str(&render_results(&report.results, config));
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{} {}",
        done_marker(report.has_failures(), config),
        render_summary(&report.summary, config)
    );
    out
}

pub fn render_sync(report: &SyncReport, config: &OutputConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {}/{} → {}",
        emoji(config, "🔄", "[SYNC]"),
        report.provider,
        config.bold(&report.organization),
        report.target.display()
    );
    if report.resumed {
        let _ = writeln!(out, "  resumed an interrupted session");
    }
    let _ = writeln!(
        out,
        "  manifest {} ({})",
        report.manifest_path.display(),
        if report.manifest_reused {
            "reused"
        } else {
            "generated"
        }
    );
    out.push_str(&render_results(&report.results, config));

    if !report.orphans.is_empty() {
        let verb = if report.orphans_removed {
            "removed"
        } else {
            "not in manifest"
        };
        let _ = writeln!(
            out,
            "\n{} {} orphaned directories {}:",
            emoji(config, "🧹", "[ORPHANS]"),
            report.orphans.len(),
            verb
        );
        for path in &report.orphans {
            let _ = writeln!(out, "  {}", path.display());
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{} {}",
        done_marker(report.has_failures(), config),
        render_summary(&report.summary, config)
    );
    out
}

fn done_marker(failed: bool, config: &OutputConfig) -> &'static str {
    if failed {
        emoji(config, "❌", "[FAIL]")
    } else {
        emoji(config, "✅", "[OK]")
    }
}

/// Pretty-printed JSON for any report.
pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
