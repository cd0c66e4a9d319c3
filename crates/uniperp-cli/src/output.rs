// crates/uniperp-cli/src/output.rs
//
// Output formatting for the UniPerp CLI: tables for people, JSON for scripts.

use serde::Serialize;
use tabled::{Table, Tabled};

use uniperp_core::{Amount, Units};

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Pretty-printed table output (default).
    Table,
    /// JSON output for machine consumption.
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputFormat::Json
        } else {
            OutputFormat::Table
        }
    }
}

/// Format a slice of Tabled items as a table string.
pub fn format_table<T: Tabled>(data: &[T]) -> String {
    Table::new(data).to_string()
}

/// Format a serializable value as a pretty-printed JSON string.
pub fn format_json<T: Serialize>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|e| format!("JSON serialization error: {}", e))
}

/// Render a raw 18-decimal amount as a decimal token string.
pub fn units(amount: Amount) -> String {
    Units(amount).to_string()
}
