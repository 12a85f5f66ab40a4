//! Output rendering for the operator surface: json, jsonl, or a plain table.

use clap::ValueEnum;
use serde_json::Value;

/// Output format selected with `--output`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON document.
    Json,
    /// One JSON object per line.
    Jsonl,
    /// Human-oriented aligned table.
    Table,
}

/// Print a single object in the chosen format.
pub fn render_value(format: OutputFormat, value: &Value) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()));
        }
        OutputFormat::Jsonl => {
            println!("{value}");
        }
        OutputFormat::Table => render_table(std::slice::from_ref(value)),
    }
}

/// Print a list of homogeneous objects in the chosen format.
pub fn render_list(format: OutputFormat, rows: &[Value]) {
    match format {
        OutputFormat::Json => {
            let all = Value::Array(rows.to_vec());
            println!("{}", serde_json::to_string_pretty(&all).unwrap_or_else(|_| all.to_string()));
        }
        OutputFormat::Jsonl => {
            for row in rows {
                println!("{row}");
            }
        }
        OutputFormat::Table => render_table(rows),
    }
}

fn render_table(rows: &[Value]) {
    if rows.is_empty() {
        println!("(empty)");
        return;
    }

    // Columns come from the first row; scalar cells only, the rest collapses
    // to compact JSON.
    let columns: Vec<String> = match rows[0].as_object() {
        Some(map) => map.keys().cloned().collect(),
        None => {
            for row in rows {
                println!("{row}");
            }
            return;
        }
    };

    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|col| match row.get(col) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                })
                .collect()
        })
        .collect();

    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, col)| {
            cells
                .iter()
                .map(|row| row[i].len())
                .chain(std::iter::once(col.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let header: Vec<String> = columns
        .iter()
        .zip(&widths)
        .map(|(col, w)| format!("{col:<width$}", width = *w))
        .collect();
    println!("{}", header.join("  "));
    println!("{}", widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("  "));
    for row in cells {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!("{cell:<width$}", width = *w))
            .collect();
        println!("{}", line.join("  "));
    }
}
