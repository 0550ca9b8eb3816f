//! CLI output formatting for a mirror run.
//!
//! # Information-First Display
//!
//! Output is **content-centric, not request-centric**. Every gallery is shown
//! by its title and visit position, every image by the file it became, with
//! PBase URLs as secondary context on indented `Source:` lines. Read top to
//! bottom, the output is an inventory of the mirrored account.
//!
//! Diagnostics (requests, skipped images, warnings) go through
//! `tracing` on stderr; this module only renders progress for stdout.
//!
//! # Output Format
//!
//! ```text
//! 001 alice/root (2 photos)
//!     Source: https://pbase.com/alice/root
//!     Harbour.jpg (original, 2.4 MB)
//!     Sunset.jpg: already mirrored
//!     002 Trip 2024 (3 photos)
//!         Source: https://pbase.com/alice/trip
//!         Trip 2024 - Fjord.jpg (large, 812.0 KB)
//!         (https://pbase.com/alice/image/17): no downloadable size
//!         (https://pbase.com/alice/image/18): failed: … returned HTTP 500
//! ! https://pbase.com/alice/broken: … returned HTTP 500
//!
//! Galleries: 2 visited, 1 failed
//! Images: 1 downloaded (812.0 KB), 1 already mirrored, 1 unresolved, 1 failed
//! ```
//!
//! # Architecture
//!
//! [`format_mirror_event`] and [`format_summary`] return `Vec<String>` for
//! testability; [`print_summary`] writes to stdout. Format functions are
//! pure: no I/O, no side effects.

use crate::mirror::{ItemOutcome, MirrorEvent, RunReport};

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Gallery header: visit index + title, falling back to the URL path.
///
/// ```text
/// 002 Trip 2024 (3 photos)
/// 001 alice/root (1 photo)
/// ```
fn gallery_header(index: usize, title: Option<&str>, url: &str, items: usize) -> String {
    let label = match title {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => url_path(url).to_string(),
    };
    let noun = if items == 1 { "photo" } else { "photos" };
    format!("{} {} ({} {})", format_index(index), label, items, noun)
}

fn url_path(url: &str) -> &str {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    without_scheme
        .split_once('/')
        .map_or(without_scheme, |(_, path)| path)
        .trim_end_matches('/')
}

/// Human-readable byte count with one decimal.
fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Item line: the saved filename, or the item page in parens when nothing
/// was saved.
fn item_line(page: &str, outcome: &ItemOutcome) -> String {
    match outcome {
        ItemOutcome::Saved {
            filename,
            label,
            bytes,
        } => format!("{filename} ({label}, {})", human_bytes(*bytes)),
        ItemOutcome::Existing { filename } => format!("{filename}: already mirrored"),
        ItemOutcome::Placeholder => format!("({page}): placeholder skipped"),
        ItemOutcome::NotFound => format!("({page}): no downloadable size"),
        ItemOutcome::Failed { reason } => format!("({page}): failed: {reason}"),
        ItemOutcome::Cancelled => format!("({page}): cancelled"),
    }
}

// ============================================================================
// Progress
// ============================================================================

/// Format a single progress event for incremental output.
///
/// Cancelled items print nothing; the summary already says the run was cut
/// short.
pub fn format_mirror_event(event: &MirrorEvent) -> Vec<String> {
    match event {
        MirrorEvent::GalleryEntered {
            index,
            depth,
            title,
            url,
            items,
        } => {
            let base = indent(*depth);
            vec![
                format!(
                    "{}{}",
                    base,
                    gallery_header(*index, title.as_deref(), url, *items)
                ),
                format!("{}    Source: {}", base, url),
            ]
        }
        MirrorEvent::GalleryFailed { url, reason } => vec![format!("! {url}: {reason}")],
        MirrorEvent::ItemFinished {
            outcome: ItemOutcome::Cancelled,
            ..
        } => Vec::new(),
        MirrorEvent::ItemFinished {
            depth,
            page,
            outcome,
            ..
        } => vec![format!("{}{}", indent(depth + 1), item_line(page, outcome))],
    }
}

// ============================================================================
// Summary
// ============================================================================

pub fn format_summary(report: &RunReport) -> Vec<String> {
    let mut lines = vec![String::new()];

    let mut galleries = format!("Galleries: {} visited", report.galleries_visited);
    if report.galleries_failed > 0 {
        galleries.push_str(&format!(", {} failed", report.galleries_failed));
    }
    lines.push(galleries);

    let mut images = vec![format!(
        "{} downloaded ({})",
        report.downloaded,
        human_bytes(report.bytes)
    )];
    let counts = [
        (report.already_present, "already mirrored"),
        (report.placeholders, "placeholder"),
        (report.not_found, "unresolved"),
        (report.failed, "failed"),
    ];
    for (count, what) in counts {
        if count > 0 {
            images.push(format!("{count} {what}"));
        }
    }
    lines.push(format!("Images: {}", images.join(", ")));

    if !report.failures.is_empty() {
        lines.push("Failures".to_string());
        for failure in &report.failures {
            lines.push(format!("    {}: {}", failure.target, failure.reason));
        }
    }
    if report.cancelled {
        lines.push("Cancelled before completion; rerun to resume.".to_string());
    }
    lines
}

pub fn print_summary(report: &RunReport) {
    for line in format_summary(report) {
        println!("{}", line);
    }
}
