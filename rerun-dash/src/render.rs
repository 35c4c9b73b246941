//! Plain-text rendering of output blocks

use crate::ui::Block;
use std::fmt::Write;

const BAR_WIDTH: usize = 40;

/// Render blocks as terminal text
pub fn render_blocks(blocks: &[Block]) -> String {
    let mut out = String::new();

    for block in blocks {
        match block {
            Block::Title { text } => {
                let _ = writeln!(out, "{}", text);
                let _ = writeln!(out, "{}", "=".repeat(text.chars().count().max(3)));
            }
            Block::Text { text } => {
                let _ = writeln!(out, "{}", text);
            }
            Block::Metric { label, value } => {
                let _ = writeln!(out, "{:>16}: {}", label, value);
            }
            Block::Table { headers, rows } => out.push_str(&render_table(headers, rows)),
            Block::BarChart { title, bars } => out.push_str(&render_bar_chart(title, bars)),
            Block::Error { message } => {
                let _ = writeln!(out, "✗ {}", message);
            }
        }
        out.push('\n');
    }

    out
}

/// Render a table with left-aligned, width-fitted columns
pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let columns = headers
        .len()
        .max(rows.iter().map(Vec::len).max().unwrap_or(0));
    let mut widths = vec![0usize; columns];

    for row in std::iter::once(headers).chain(rows.iter().map(Vec::as_slice)) {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let line = |cells: &[String]| -> String {
        let padded: Vec<String> = (0..columns)
            .map(|i| {
                let cell = cells.get(i).map(String::as_str).unwrap_or("");
                format!("{:<width$}", cell, width = widths[i])
            })
            .collect();
        format!("| {} |", padded.join(" | ")).trim_end().to_string()
    };

    let separator = format!(
        "|{}|",
        widths
            .iter()
            .map(|w| "-".repeat(w + 2))
            .collect::<Vec<_>>()
            .join("|")
    );

    let mut out = String::new();
    let _ = writeln!(out, "{}", line(headers));
    let _ = writeln!(out, "{}", separator);
    for row in rows {
        let _ = writeln!(out, "{}", line(row));
    }
    out
}

/// Render horizontal bars scaled to the largest value
pub fn render_bar_chart(title: &str, bars: &[(String, f64)]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", title);

    let label_width = bars.iter().map(|(l, _)| l.chars().count()).max().unwrap_or(0);
    let max = bars
        .iter()
        .map(|(_, v)| *v)
        .filter(|v| v.is_finite())
        .fold(0.0f64, f64::max);

    for (label, value) in bars {
        let len = if max > 0.0 && value.is_finite() && *value > 0.0 {
            ((value / max) * BAR_WIDTH as f64).round() as usize
        } else {
            0
        };
        let _ = writeln!(
            out,
            "{:>width$} | {} {}",
            label,
            "█".repeat(len),
            format_number(*value),
            width = label_width
        );
    }
    out
}

/// Two decimals unless the value is integral
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}
