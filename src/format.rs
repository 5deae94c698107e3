use std::io::Write;

use colored::Colorize;
use serde::Serialize;

use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    #[default]
    Table,
    Json,
}

impl OutputMode {
    /// Only `json` (any case) switches modes; anything else keeps tables.
    pub fn from_flag(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Table,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    headers: Vec<&'static str>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: &[&'static str]) -> Self {
        Self {
            headers: headers.to_vec(),
            rows: Vec::new(),
        }
    }

    pub fn row(mut self, cells: Vec<String>) -> Self {
        self.rows.push(cells);
        self
    }

    pub fn rows<I: IntoIterator<Item = Vec<String>>>(mut self, rows: I) -> Self {
        self.rows.extend(rows);
        self
    }

    pub fn build_lines(&self) -> Vec<String> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let mut lines = vec![render_row(self.headers.iter().copied(), &widths)];
        lines.push(
            widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("  "),
        );
        for row in &self.rows {
            lines.push(render_row(row.iter().map(String::as_str), &widths));
        }
        lines
    }
}

fn render_row<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    cells
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join("  ")
        .trim_end()
        .to_string()
}

pub fn count(value: Option<u64>) -> String {
    value.unwrap_or(0).to_string()
}

pub fn optional(value: Option<&str>) -> String {
    value.unwrap_or("").to_string()
}

/// Renders one result either as a single JSON line or as a titled table.
pub fn emit<J, F>(out: &mut impl Write, mode: OutputMode, title: &str, json: &J, table: F) -> Result<()>
where
    J: Serialize + ?Sized,
    F: FnOnce() -> Table,
{
    match mode {
        OutputMode::Json => {
            writeln!(out, "{}", serde_json::to_string(json)?)?;
        }
        OutputMode::Table => {
            writeln!(out, "\n{}", format!("{title}:").green())?;
            for line in table().build_lines() {
                writeln!(out, "{line}")?;
            }
        }
    }
    Ok(())
}
