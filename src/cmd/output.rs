use std::fs;
use std::io::{self, Write};

use anyhow::{Context, Result};
use crossterm::style::Stylize;
use serde::Serialize;

/// Write `rows` as pretty JSON to stdout (`-`) or a file.
pub fn emit_json<T: Serialize + ?Sized>(rows: &T, dest: &str) -> Result<()> {
    let output = serde_json::to_string_pretty(rows)?;
    if dest == "-" {
        println!("{output}");
    } else {
        fs::write(dest, &output).with_context(|| format!("Failed to write JSON to {dest}"))?;
        eprintln!("{} Wrote {dest}", "✔".green());
    }
    Ok(())
}

/// Left-aligned text table; the last column is never padded.
pub struct Table {
    headers: Vec<&'static str>,
    min_widths: Vec<usize>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: &[&'static str]) -> Self {
        Self {
            headers: headers.to_vec(),
            min_widths: vec![0; headers.len()],
            rows: Vec::new(),
        }
    }

    pub fn min_width(mut self, column: usize, width: usize) -> Self {
        if let Some(w) = self.min_widths.get_mut(column) {
            *w = width;
        }
        self
    }

    pub fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    fn widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self
            .headers
            .iter()
            .zip(&self.min_widths)
            .map(|(h, min)| h.len().max(*min))
            .collect();
        for row in &self.rows {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(cell.chars().count());
            }
        }
        widths
    }

    pub fn render(&self) -> String {
        let widths = self.widths();
        let mut out = String::new();
        let header: Vec<String> = self.headers.iter().map(|h| h.to_string()).collect();
        for row in std::iter::once(&header).chain(&self.rows) {
            let last = row.len().saturating_sub(1);
            let mut line = String::new();
            for (i, cell) in row.iter().enumerate() {
                if i == last {
                    line.push_str(cell);
                } else {
                    let pad = widths[i] - cell.chars().count();
                    line.push_str(cell);
                    line.push_str(&" ".repeat(pad + 1));
                }
            }
            out.push_str(line.trim_end());
            out.push('\n');
        }
        out
    }

    /// Print to stdout, or a note to stderr when there is nothing to show.
    pub fn print(&self) -> Result<()> {
        if self.rows.is_empty() {
            eprintln!("{} no results", "!".yellow().bold());
            return Ok(());
        }
        io::stdout().write_all(self.render().as_bytes())?;
        Ok(())
    }
}
