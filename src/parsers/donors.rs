use anyhow::{anyhow, Context, Result};
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;

use crate::parsers::open_file;
use crate::reference::locus_of;
use crate::types::{BloodGroup, DonorRecord};

/// A validated donor snapshot: records in file order plus the antigen
/// columns seen in the header, grouped by locus
#[derive(Debug, Clone)]
pub struct DonorSnapshot {
    donors: Vec<DonorRecord>,
    antigen_index: HashMap<String, Vec<String>>,
}

impl DonorSnapshot {
    pub fn donors(&self) -> &[DonorRecord] {
        &self.donors
    }

    pub fn len(&self) -> usize {
        self.donors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.donors.is_empty()
    }

    /// Antigen columns present in the snapshot, grouped by locus
    pub fn antigen_index(&self) -> &HashMap<String, Vec<String>> {
        &self.antigen_index
    }

    /// The stricter donor set: donors with at least one DPB antigen typed
    pub fn dpb_typed(&self) -> Vec<DonorRecord> {
        let dpb_cols = self
            .antigen_index
            .get("DPB")
            .map(Vec::as_slice)
            .unwrap_or_default();
        self.donors
            .iter()
            .filter(|donor| dpb_cols.iter().any(|code| donor.has_antigen(code)))
            .cloned()
            .collect()
    }
}

/// Column layout derived from a snapshot header
struct SnapshotLayout {
    id: Option<usize>,
    blood_group: usize,
    antigens: Vec<(usize, String)>,
    index: HashMap<String, Vec<String>>,
}

/// Wide-format donor CSV parser: a `bg` column, an optional `id` column and
/// one 0/1 column per antigen. Columns that do not parse as antigen codes
/// (helper columns like `A19_S`) are ignored.
pub struct SnapshotParser;

impl SnapshotParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, path: &Path) -> Result<DonorSnapshot> {
        let reader = open_file(path)?;
        self.parse_reader(reader)
            .with_context(|| format!("Failed to parse donor snapshot {}", path.display()))
    }

    /// Parse snapshot rows from any reader; used directly by tests and by
    /// callers that hold the snapshot in memory
    pub fn parse_reader(&self, reader: impl Read) -> Result<DonorSnapshot> {
        let mut csv = csv::Reader::from_reader(reader);
        let headers = csv.headers().context("Failed to read header row")?.clone();
        let layout = self.map_columns(&headers)?;

        let mut donors = Vec::new();
        for (row, record) in csv.records().enumerate() {
            let record = record?;
            let donor = self
                .parse_record(&record, &layout)
                .with_context(|| format!("Invalid donor record on row {}", row + 2))?;
            donors.push(donor);
        }

        Ok(DonorSnapshot {
            donors,
            antigen_index: layout.index,
        })
    }

    fn map_columns(&self, headers: &csv::StringRecord) -> Result<SnapshotLayout> {
        let mut id = None;
        let mut blood_group = None;
        let mut antigens = Vec::new();
        let mut index: HashMap<String, Vec<String>> = HashMap::new();

        for (position, header) in headers.iter().enumerate() {
            let header = header.trim();
            match header {
                "id" => id = Some(position),
                "bg" => blood_group = Some(position),
                _ => {
                    if let Some(locus) = locus_of(header) {
                        antigens.push((position, header.to_string()));
                        index
                            .entry(locus.to_string())
                            .or_default()
                            .push(header.to_string());
                    }
                    // anything else is a helper column; skip it
                }
            }
        }

        let blood_group =
            blood_group.ok_or_else(|| anyhow!("Required column 'bg' not found in header"))?;
        if antigens.is_empty() {
            return Err(anyhow!("No antigen columns found in header"));
        }

        Ok(SnapshotLayout {
            id,
            blood_group,
            antigens,
            index,
        })
    }

    fn parse_record(
        &self,
        record: &csv::StringRecord,
        layout: &SnapshotLayout,
    ) -> Result<DonorRecord> {
        let id = layout
            .id
            .and_then(|position| record.get(position))
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        let code = record
            .get(layout.blood_group)
            .ok_or_else(|| anyhow!("Missing blood group field"))?
            .trim();
        let blood_group = BloodGroup::from_code(code)?;

        let mut antigens = HashSet::new();
        for (position, antigen) in &layout.antigens {
            let flag = record.get(*position).unwrap_or("").trim();
            match flag {
                "1" => {
                    antigens.insert(antigen.clone());
                }
                "0" | "" => {}
                other => {
                    return Err(anyhow!(
                        "Invalid presence flag '{}' in column {}",
                        other,
                        antigen
                    ))
                }
            }
        }

        Ok(DonorRecord::new(id, blood_group, antigens))
    }
}
