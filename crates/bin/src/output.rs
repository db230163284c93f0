//! Output formatting helpers for human-readable and JSON output.

use serde_json::Value;

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    pub fn from_flag(json: bool) -> Self {
        if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Print a table with aligned columns in human-readable format.
///
/// `headers` and each row in `rows` must have the same length.
pub fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    if rows.is_empty() {
        return;
    }

    let col_count = headers.len();
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(col_count) {
            widths[i] = widths[i].max(cell.len());
        }
    }

    println!("{}", format_line(headers, &widths));
    for row in rows {
        let cells: Vec<&str> = row.iter().take(col_count).map(String::as_str).collect();
        println!("{}", format_line(&cells, &widths));
    }
}

fn format_line(cells: &[&str], widths: &[usize]) -> String {
    let line: Vec<String> = cells
        .iter()
        .enumerate()
        .map(|(i, cell)| format!("{:<width$}", cell, width = widths[i]))
        .collect();
    line.join("  ").trim_end().to_string()
}

/// Rows of `tag`, `element id`, `value` for a `{tag: {element_id: value}}` tree.
///
/// Tags whose value is not a map get a single row with an empty element id.
pub fn tree_rows(tree: &Value) -> Vec<Vec<String>> {
    let Value::Object(tags) = tree else {
        return Vec::new();
    };
    let mut rows = Vec::new();
    for (tag, entries) in tags {
        match entries {
            Value::Object(elements) => {
                for (id, value) in elements {
                    rows.push(vec![tag.clone(), id.clone(), value.to_string()]);
                }
            }
            other => rows.push(vec![tag.clone(), String::new(), other.to_string()]),
        }
    }
    rows
}
