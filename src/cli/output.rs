//! Output formatting and progress indicators
//!
//! This module provides utilities for displaying progress bars, run
//! summaries and errors, either human-readable or as JSON.

use std::sync::OnceLock;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::core::model::ZoneImage;
use crate::core::pipeline::{RunPlan, RunSummary};
use crate::infra::download::ProgressCallback;

static GLOBAL: OnceLock<OutputConfig> = OnceLock::new();

/// Output mode selected on the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputConfig {
    pub quiet: bool,
    pub json: bool,
    pub verbose: u8,
}

impl OutputConfig {
    pub fn new(quiet: bool, json: bool, verbose: u8) -> Self {
        Self {
            quiet,
            json,
            verbose,
        }
    }

    /// Make this the process-wide output mode
    ///
    /// Only the first call has an effect.
    pub fn apply_global(self) {
        let _ = GLOBAL.set(self);
    }

    /// Process-wide output mode, default if never applied
    pub fn global() -> Self {
        GLOBAL.get().copied().unwrap_or_default()
    }

    /// Whether progress indicators should be drawn
    pub fn show_progress(&self) -> bool {
        !self.quiet && !self.json
    }

    /// Default log level when `RUST_LOG` is unset
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}

/// Print an error and its causes to stderr
pub fn display_error(error: &anyhow::Error) {
    if OutputConfig::global().json {
        let causes: Vec<String> = error.chain().skip(1).map(ToString::to_string).collect();
        let value = serde_json::json!({
            "error": error.to_string(),
            "causes": causes,
        });
        eprintln!("{value}");
        return;
    }

    eprintln!("{} Error: {}", status::ERROR, error);
    for cause in error.chain().skip(1) {
        eprintln!("  caused by: {cause}");
    }
}

/// Banner printed when a device overwrite failed midway
pub fn display_fatal_write(error: &dyn std::fmt::Display) {
    let rule = "!".repeat(72);
    eprintln!("{rule}");
    eprintln!("{} {}", status::ERROR, error);
    eprintln!("The target device is in an undefined state. Do not reboot from it.");
    eprintln!("{rule}");
}

/// Create a spinner for operations with unknown duration
pub fn create_spinner(message: &str) -> ProgressBar {
    if !OutputConfig::global().show_progress() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}

/// Create a progress bar for downloads
///
/// The length is set from the first progress report.
pub fn create_download_bar() -> ProgressBar {
    if !OutputConfig::global().show_progress() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░"),
    );
    pb
}

/// Progress callback driving `bar`
pub fn download_progress(bar: &ProgressBar) -> ProgressCallback {
    let bar = bar.clone();
    Box::new(move |downloaded, total| {
        if total > 0 && bar.length() != Some(total) {
            bar.set_length(total);
        }
        bar.set_position(downloaded);
    })
}

/// Print a value as pretty JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a published image
pub fn print_image(image: &ZoneImage) -> anyhow::Result<()> {
    if OutputConfig::global().json {
        return print_json(image);
    }
    println!(
        "{} Published {} ({}) in {}",
        status::SUCCESS,
        image.name,
        image.image_id,
        image.zone
    );
    println!("    snapshot: {}", image.snapshot_id);
    println!("    artifact: {}:{}", image.zone, image.image_id);
    Ok(())
}

/// Print a dry-run plan
pub fn print_plan(plan: &RunPlan) -> anyhow::Result<()> {
    if OutputConfig::global().json {
        return print_json(plan);
    }
    println!(
        "Origin: {} ({}) in {}",
        plan.origin.name, plan.origin.image_id, plan.origin.zone
    );
    println!("Stable name: {}", plan.stable_name);

    if plan.targets.is_empty() {
        println!("No target zones; only the origin zone is reconciled");
    } else {
        println!("Relay: s3://{}/{}", plan.bucket, plan.relay_key);
        println!("Targets: {}", join_zones(&plan.targets));
    }

    for zone in &plan.current_aliases {
        let steps = if zone.zone == plan.origin.zone {
            "alias"
        } else {
            "import, publish, alias"
        };
        let current = if zone.image_ids.is_empty() {
            "none".to_string()
        } else {
            zone.image_ids.join(", ")
        };
        println!("  {}: {} (current stable: {})", zone.zone, steps, current);
    }
    Ok(())
}

/// Print the outcome of a distribution run
pub fn print_summary(summary: &RunSummary) -> anyhow::Result<()> {
    if OutputConfig::global().json {
        return print_json(summary);
    }
    println!(
        "Distribution of {} ({})",
        summary.stable_name, summary.origin.name
    );

    for zone in &summary.succeeded {
        let action = if zone.reused { "reused" } else { "created" };
        println!(
            "{} {}: {} {}",
            status::SUCCESS,
            zone.zone,
            action,
            zone.stable_image.image_id
        );
        if !zone.removed_images.is_empty() {
            println!("    removed images: {}", zone.removed_images.join(", "));
        }
        if !zone.pruned_snapshots.is_empty() {
            println!("    pruned snapshots: {}", zone.pruned_snapshots.join(", "));
        }
        for warning in &zone.warnings {
            println!(
                "    {} {}: {}",
                status::WARNING,
                warning.resource,
                warning.message
            );
        }
    }

    for failure in &summary.failed {
        println!(
            "{} {}: failed during {}: {}",
            status::ERROR,
            failure.zone,
            failure.stage,
            failure.error
        );
    }
    Ok(())
}

fn join_zones(zones: &[crate::core::model::ZoneId]) -> String {
    zones
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Status message prefixes
pub mod status {
    /// Success prefix (green checkmark)
    pub const SUCCESS: &str = "✓";

    /// Error prefix (red X)
    pub const ERROR: &str = "✗";

    /// Warning prefix (yellow triangle)
    pub const WARNING: &str = "⚠";

    /// Info prefix (blue circle)
    pub const INFO: &str = "ℹ";
}
