//! Rendering of command results

use anyhow::{Context, Result};
use colored::Colorize;
use log::info;
use serde_json::Value;
use std::io::{self, IsTerminal};
use std::path::Path;
use tabled::builder::Builder;
use tabled::settings::Style;

/// How results are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    JsonPretty,
    Table,
}

impl OutputFormat {
    /// Unknown names fall back to pretty JSON
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "table" => Self::Table,
            _ => Self::JsonPretty,
        }
    }
}

/// `always`, `never`, or anything else to color only terminals
pub fn setup_colors(mode: &str) {
    let enabled = match mode.to_ascii_lowercase().as_str() {
        "always" => true,
        "never" => false,
        _ => io::stdout().is_terminal(),
    };
    colored::control::set_override(enabled);
}

pub fn format_error(error: &anyhow::Error) -> String {
    format!("{} {error:#}", "error:".red().bold())
}

/// One line per isolated evaluation failure
pub fn format_warning(warning: &str) -> String {
    format!("{} {warning}", "warning:".yellow().bold())
}

/// Rows of objects become a table with the first row's keys as columns; a
/// single object becomes a key/value table. Other values have no table form.
pub fn format_as_table(value: &Value) -> Option<String> {
    let mut builder = Builder::default();
    match value {
        Value::Array(rows) if rows.is_empty() => return Some("(no rows)".to_string()),
        Value::Array(rows) => {
            let Some(Value::Object(first)) = rows.first() else {
                return Some(rows.iter().map(cell).collect::<Vec<_>>().join("\n"));
            };
            let columns: Vec<&String> = first.keys().collect();
            builder.push_record(columns.iter().map(|c| c.to_string()));
            for row in rows {
                builder.push_record(columns.iter().map(|c| row.get(*c).map_or_else(String::new, cell)));
            }
        }
        Value::Object(fields) => {
            builder.push_record(["Key", "Value"]);
            for (key, field) in fields {
                builder.push_record([key.clone(), cell(field)]);
            }
        }
        _ => return None,
    }
    Some(builder.build().with(Style::modern()).to_string())
}

/// Table cell text; serialized results show their `value`
fn cell(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(cell).collect::<Vec<_>>().join(", "),
        Value::Object(fields) => fields
            .get("value")
            .map_or_else(|| format!("{{{} fields}}", fields.len()), cell),
        other => other.to_string(),
    }
}

/// Render `value` and write it to `output_file`, or to stdout
pub fn print_output(value: &Value, format: OutputFormat, output_file: Option<&Path>) -> Result<()> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string(value),
        OutputFormat::JsonPretty => serde_json::to_string_pretty(value),
        OutputFormat::Table => match format_as_table(value) {
            Some(table) => Ok(table),
            None => serde_json::to_string_pretty(value),
        },
    }
    .context("Cannot serialize results")?;

    match output_file {
        Some(path) => {
            std::fs::write(path, rendered + "\n")
                .with_context(|| format!("Cannot write {}", path.display()))?;
            info!("Results written to {}", path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}
