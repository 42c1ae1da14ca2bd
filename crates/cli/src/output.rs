//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print rows as a table, or the underlying items as JSON
pub fn print_list<T: Serialize, R: Tabled>(items: &[T], rows: Vec<R>, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "No watches found".yellow());
                return;
            }
            let table = Table::new(rows).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => print_json(items),
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    if let Ok(json) = serde_json::to_string_pretty(value) {
        println!("{}", json);
    }
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Cooldown state of a watch
pub fn watch_status(remaining_cooldown_secs: u64) -> &'static str {
    if remaining_cooldown_secs > 0 {
        "cooling"
    } else {
        "ready"
    }
}

/// Remaining over configured cooldown, e.g. `4s/10s`
pub fn format_cooldown(remaining_secs: u64, total_secs: u64) -> String {
    format!("{}s/{}s", remaining_secs, total_secs)
}

/// Human-readable threshold for a metric
pub fn format_threshold(metric: &str, value: i64) -> String {
    match metric {
        "cpu" => format!("{}m", value / 1_000_000),
        "memory" => format!("{}Mi", value / (1024 * 1024)),
        _ => value.to_string(),
    }
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "ready" | "active" => status.green().to_string(),
        "cooling" => status.yellow().to_string(),
        "inactive" => status.red().to_string(),
        _ => status.to_string(),
    }
}
