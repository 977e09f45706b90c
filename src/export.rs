//! Semester attendance spreadsheet export.
//!
//! The sheet is plain CSV written under `<workspace>/exports/` with a
//! filename that encodes department, semester, month and year. Columns:
//! Student, Present, Total, Percentage.

use anyhow::Context;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct ExportRow {
    pub student: String,
    pub present: i64,
    pub total: i64,
    pub percentage: f64,
}

pub struct ExportSummary {
    pub filename: String,
    pub path: PathBuf,
    pub rows: usize,
}

pub fn export_filename(department_id: &str, semester: i64, year: i64, month: i64) -> String {
    format!(
        "attendance_{}_sem{}_{}_{}.csv",
        department_id, semester, month, year
    )
}

pub fn write_semester_sheet(
    workspace: &Path,
    filename: &str,
    rows: &[ExportRow],
) -> anyhow::Result<ExportSummary> {
    let dir = workspace.join("exports");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create directory {}", dir.to_string_lossy()))?;
    let path = dir.join(filename);

    let mut out = File::create(&path)
        .with_context(|| format!("failed to create export file {}", path.to_string_lossy()))?;
    writeln!(out, "Student,Present,Total,Percentage").context("failed to write header row")?;
    for row in rows {
        writeln!(
            out,
            "{},{},{},{}",
            csv_field(&row.student),
            row.present,
            row.total,
            row.percentage
        )
        .context("failed to write data row")?;
    }
    out.flush().context("failed to flush export file")?;

    Ok(ExportSummary {
        filename: filename.to_string(),
        path,
        rows: rows.len(),
    })
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
