use anyhow::{Context, Result};
use chrono::Local;
use csv::Writer;
use serde::Serialize;
use serde_json::to_string_pretty;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::types::{BloodGroup, ScoreResult};

/// Supported report formats
#[derive(Debug, Clone, Copy)]
pub enum ReportFormat {
    Text,
    Json,
    Csv,
    All,
}

/// One candidate's scored outcome together with its request context,
/// mirroring the shape the surrounding service returns to callers
#[derive(Debug, Clone, Serialize)]
pub struct CandidateReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub bg: BloodGroup,
    pub specs: Vec<String>,
    pub recip_hla: Vec<String>,
    /// Snapshot size before blood-group restriction
    pub total: usize,
    pub results: ScoreResult,
}

impl CandidateReport {
    /// Plain-text rendering of one report
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        if let Some(id) = &self.id {
            let _ = writeln!(out, "Candidate:     {}", id);
        }
        let _ = writeln!(out, "Blood group:   {}", self.bg);
        let _ = writeln!(
            out,
            "Specs:         {}",
            if self.specs.is_empty() {
                "none".to_string()
            } else {
                self.specs.join(", ")
            }
        );
        let _ = writeln!(out, "Donors (all):  {}", self.total);
        let _ = writeln!(out, "CRF:           {:.4}", self.results.crf);
        let _ = writeln!(out, "Available:     {}", self.results.available);

        match (self.results.favourable, self.results.matchability) {
            (Some(favourable), Some(band)) => {
                let _ = writeln!(out, "Favourable:    {}", favourable);
                let _ = writeln!(out, "Matchability:  band {}", band);
                if let Some(counts) = &self.results.match_counts {
                    let _ = writeln!(
                        out,
                        "Grades:        m12a={} m2b={} m3a={} m3b={} m4a={} m4b={}",
                        counts.m12a, counts.m2b, counts.m3a, counts.m3b, counts.m4a, counts.m4b
                    );
                }
            }
            _ => {
                let _ = writeln!(out, "Matchability:  not requested");
            }
        }
        out
    }
}

/// Report generator for scoring results
pub struct ReportGenerator {
    output_dir: PathBuf,
}

impl ReportGenerator {
    pub fn new(output_dir: &Path) -> Result<Self> {
        if !output_dir.exists() {
            fs::create_dir_all(output_dir).with_context(|| {
                format!("Failed to create output directory {}", output_dir.display())
            })?;
        }
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
        })
    }

    /// Write reports in the requested format(s)
    pub fn generate(&self, reports: &[CandidateReport], format: ReportFormat) -> Result<()> {
        match format {
            ReportFormat::Text => self.write_text(reports)?,
            ReportFormat::Json => self.write_json(reports)?,
            ReportFormat::Csv => self.write_csv(reports)?,
            ReportFormat::All => {
                self.write_text(reports)?;
                self.write_json(reports)?;
                self.write_csv(reports)?;
            }
        }
        Ok(())
    }

    fn report_path(&self, extension: &str) -> PathBuf {
        let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
        self.output_dir
            .join(format!("report_{}.{}", timestamp, extension))
    }

    fn write_text(&self, reports: &[CandidateReport]) -> Result<()> {
        let path = self.report_path("txt");
        let mut content = String::new();
        for report in reports {
            content.push_str(&report.render_text());
            content.push('\n');
        }
        fs::write(&path, content)
            .with_context(|| format!("Failed to write text report to {}", path.display()))?;
        info!("Wrote text report to {}", path.display());
        Ok(())
    }

    fn write_json(&self, reports: &[CandidateReport]) -> Result<()> {
        let path = self.report_path("json");
        let content = to_string_pretty(reports)?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write JSON report to {}", path.display()))?;
        info!("Wrote JSON report to {}", path.display());
        Ok(())
    }

    fn write_csv(&self, reports: &[CandidateReport]) -> Result<()> {
        let path = self.report_path("csv");
        let mut writer = Writer::from_path(&path)
            .with_context(|| format!("Failed to write CSV report to {}", path.display()))?;
        write_csv_rows(&mut writer, reports)?;
        writer.flush()?;
        info!("Wrote CSV report to {}", path.display());
        Ok(())
    }
}

/// Write the CSV rendering of reports to stdout
pub fn print_csv(reports: &[CandidateReport]) -> Result<()> {
    let mut writer = Writer::from_writer(io::stdout());
    write_csv_rows(&mut writer, reports)?;
    writer.flush()?;
    Ok(())
}

/// Unavailable favourable/matchability fields are written as empty cells,
/// distinct from zero.
fn write_csv_rows<W: io::Write>(
    writer: &mut Writer<W>,
    reports: &[CandidateReport],
) -> Result<()> {
    writer.write_record([
        "id",
        "bg",
        "specs",
        "recip_hla",
        "total",
        "crf",
        "available",
        "favourable",
        "matchability",
        "m12a",
        "m2b",
        "m3a",
        "m3b",
        "m4a",
        "m4b",
    ])?;

    for report in reports {
        let results = &report.results;
        let counts = results.match_counts;
        let grade = |value: Option<usize>| value.map(|v| v.to_string()).unwrap_or_default();

        writer.write_record([
            report.id.clone().unwrap_or_default(),
            report.bg.to_string(),
            report.specs.join(","),
            report.recip_hla.join(","),
            report.total.to_string(),
            format!("{:.6}", results.crf),
            results.available.to_string(),
            grade(results.favourable),
            results
                .matchability
                .map(|band| band.to_string())
                .unwrap_or_default(),
            grade(counts.map(|c| c.m12a)),
            grade(counts.map(|c| c.m2b)),
            grade(counts.map(|c| c.m3a)),
            grade(counts.map(|c| c.m3b)),
            grade(counts.map(|c| c.m4a)),
            grade(counts.map(|c| c.m4b)),
        ])?;
    }
    Ok(())
}
