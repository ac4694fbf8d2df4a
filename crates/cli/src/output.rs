//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

use trackprobe_e2e::{Report, ScenarioVerdict};

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    if items.is_empty() {
        println!("No scenarios found.");
        return;
    }

    match format {
        OutputFormat::Table => {
            let mut table = new_table();
            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }

            println!("{table}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items).unwrap_or_default());
        }
        OutputFormat::Plain => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    println!("---");
                }
                let row = item.row();
                for (header, value) in T::headers().iter().zip(row.iter()) {
                    println!("{}: {}", header, value);
                }
            }
        }
    }
}

fn verdict_color(verdict: ScenarioVerdict) -> Color {
    match verdict {
        ScenarioVerdict::Passed => Color::Green,
        ScenarioVerdict::Failed => Color::Red,
        ScenarioVerdict::Errored => Color::Magenta,
        ScenarioVerdict::Incomplete => Color::Yellow,
    }
}

/// Print a run report: one row per scenario, then the totals
pub fn print_report(report: &Report, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            let mut table = new_table();
            table.set_header(vec!["Scenario", "Verdict", "Duration", "Diagnostic"]);
            for result in &report.results {
                table.add_row(vec![
                    Cell::new(&result.name),
                    Cell::new(result.verdict).fg(verdict_color(result.verdict)),
                    Cell::new(format!("{} ms", result.duration_ms)),
                    Cell::new(
                        result
                            .first_failure()
                            .map(ToString::to_string)
                            .unwrap_or_default(),
                    ),
                ]);
            }
            println!("{table}");

            let s = &report.summary;
            let line = format!(
                "{} scenario(s): {} passed, {} failed, {} errored, {} incomplete ({} ms)",
                s.total, s.passed, s.failed, s.errored, s.incomplete, report.duration_ms
            );
            if report.all_passed() {
                println!("{}", line.green().bold());
            } else {
                println!("{}", line.red().bold());
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report).unwrap_or_default());
        }
        OutputFormat::Plain => {
            print!("{}", report.render_text());
        }
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "!".yellow(), message);
}
