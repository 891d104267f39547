use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::warn;

use crate::error::Error;
use crate::types::BloodGroup;

lazy_static! {
    /// Serological antigen code: locus letters followed by a numeric designation.
    /// Anchored at both ends so helper columns like "A19_S" never qualify.
    static ref ANTIGEN_CODE: Regex = Regex::new(r"^([ABCDRQPW]{1,3})\d{1,4}$").unwrap();
}

/// Extract the locus prefix of an antigen code, e.g. "DR3" -> "DR"
pub fn locus_of(code: &str) -> Option<&str> {
    ANTIGEN_CODE
        .captures(code)
        .and_then(|caps| caps.get(1))
        .map(|locus| locus.as_str())
}

/// Antigens participating in mismatch counting, per locus, with a
/// code-to-locus map precomputed at construction
#[derive(Debug, Clone)]
pub struct AntigenCatalog {
    by_locus: HashMap<String, Vec<String>>,
    locus_by_code: HashMap<String, String>,
}

impl AntigenCatalog {
    pub fn new(by_locus: HashMap<String, Vec<String>>) -> Result<Self, Error> {
        let mut locus_by_code = HashMap::new();
        for (locus, codes) in &by_locus {
            for code in codes {
                match locus_of(code) {
                    Some(parsed) if parsed == locus => {
                        locus_by_code.insert(code.clone(), locus.clone());
                    }
                    Some(parsed) => {
                        return Err(Error::MalformedReference(format!(
                            "antigen {code} (locus {parsed}) listed under locus {locus}"
                        )))
                    }
                    None => {
                        return Err(Error::MalformedReference(format!(
                            "unparseable antigen code '{code}' under locus {locus}"
                        )))
                    }
                }
            }
        }
        Ok(Self {
            by_locus,
            locus_by_code,
        })
    }

    /// Antigen codes counted at a locus; unknown loci count nothing
    pub fn antigens_at(&self, locus: &str) -> &[String] {
        self.by_locus
            .get(locus)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn locus_by_code(&self, code: &str) -> Option<&str> {
        self.locus_by_code.get(code).map(String::as_str)
    }
}

/// Rare-to-default antigen equivalences used to widen a candidate's broad
/// set before mismatch comparison. Pairs must stay within one locus.
#[derive(Debug, Clone, Default)]
pub struct AntigenDefaults {
    map: HashMap<String, String>,
}

impl AntigenDefaults {
    pub fn new(pairs: HashMap<String, String>) -> Result<Self, Error> {
        for (rare, default) in &pairs {
            match (locus_of(rare), locus_of(default)) {
                (Some(a), Some(b)) if a == b => {}
                (Some(_), Some(_)) => {
                    return Err(Error::CrossLocusDefault {
                        rare: rare.clone(),
                        default: default.clone(),
                    })
                }
                _ => {
                    return Err(Error::MalformedReference(format!(
                        "unparseable antigen default {rare} -> {default}"
                    )))
                }
            }
        }
        Ok(Self { map: pairs })
    }

    /// Expanded comparison set: the original antigens plus the mapped default
    /// of every member found in the mapping's domain. Used for comparison
    /// only, never written back to the profile.
    pub fn expand(&self, broad: &HashSet<String>) -> HashSet<String> {
        let mut expanded = broad.clone();
        for antigen in broad {
            if let Some(default) = self.map.get(antigen) {
                expanded.insert(default.clone());
            }
        }
        expanded
    }
}

/// Per-blood-group band tables: band identifier (lower = better) to the
/// minimum favourable count qualifying for that band
#[derive(Debug, Clone)]
pub struct MatchabilityBands {
    tables: HashMap<BloodGroup, BTreeMap<u32, u32>>,
}

impl MatchabilityBands {
    pub fn new(tables: HashMap<BloodGroup, BTreeMap<u32, u32>>) -> Result<Self, Error> {
        for (blood_group, table) in &tables {
            if table.is_empty() {
                return Err(Error::MalformedReference(format!(
                    "empty band table for blood group {blood_group}"
                )));
            }
        }
        Ok(Self { tables })
    }

    /// Best band whose threshold the favourable count satisfies. Bands scan
    /// best-first; the data contract keeps thresholds strictly decreasing as
    /// identifiers increase, so the first hit is the largest satisfied
    /// threshold.
    pub fn band_for(&self, blood_group: BloodGroup, favourable: usize) -> Result<u32, Error> {
        let table = self
            .tables
            .get(&blood_group)
            .ok_or(Error::MissingBandTable(blood_group))?;

        for (band, threshold) in table {
            if favourable >= *threshold as usize {
                return Ok(*band);
            }
        }

        // A table whose floor is above the favourable count is a data defect;
        // degrade to the worst configured band instead of failing the call.
        let worst = *table.keys().next_back().unwrap_or(&0);
        warn!(
            "no matchability threshold satisfied for blood group {} (favourable {}); falling back to band {}",
            blood_group, favourable, worst
        );
        Ok(worst)
    }

    pub fn table(&self, blood_group: BloodGroup) -> Option<&BTreeMap<u32, u32>> {
        self.tables.get(&blood_group)
    }

    pub fn blood_groups(&self) -> impl Iterator<Item = BloodGroup> + '_ {
        self.tables.keys().copied()
    }
}

/// Raw layout of the reference TOML file
#[derive(Debug, Deserialize)]
struct ReferenceFile {
    /// Locus -> matchability antigen codes
    antigens: HashMap<String, Vec<String>>,
    /// Locus -> rare code -> default code
    #[serde(default)]
    defaults: HashMap<String, HashMap<String, String>>,
    /// Blood group -> band id -> minimum favourable count
    bands: HashMap<String, HashMap<String, u32>>,
}

/// Validated reference data, shared read-only across scoring calls
#[derive(Debug, Clone)]
pub struct ReferenceData {
    pub catalog: AntigenCatalog,
    pub defaults: AntigenDefaults,
    pub bands: MatchabilityBands,
}

impl ReferenceData {
    pub fn new(
        catalog: AntigenCatalog,
        defaults: AntigenDefaults,
        bands: MatchabilityBands,
    ) -> Self {
        Self {
            catalog,
            defaults,
            bands,
        }
    }

    /// Load and validate reference data from its TOML representation
    pub fn from_toml_str(raw: &str) -> Result<Self, Error> {
        let file: ReferenceFile =
            toml::from_str(raw).map_err(|err| Error::MalformedReference(err.to_string()))?;

        let catalog = AntigenCatalog::new(file.antigens)?;

        let mut pairs = HashMap::new();
        for (locus, defaults) in file.defaults {
            for (rare, default) in defaults {
                if locus_of(&rare) != Some(locus.as_str()) {
                    return Err(Error::MalformedReference(format!(
                        "default {rare} listed under locus {locus}"
                    )));
                }
                pairs.insert(rare, default);
            }
        }
        let defaults = AntigenDefaults::new(pairs)?;

        let mut tables = HashMap::new();
        for (code, raw_table) in file.bands {
            let blood_group = BloodGroup::from_code(&code)
                .map_err(|_| Error::MalformedReference(format!("unknown blood group '{code}'")))?;
            let mut table = BTreeMap::new();
            for (band, threshold) in raw_table {
                let band: u32 = band.parse().map_err(|_| {
                    Error::MalformedReference(format!("band id '{band}' is not numeric"))
                })?;
                table.insert(band, threshold);
            }
            tables.insert(blood_group, table);
        }
        let bands = MatchabilityBands::new(tables)?;

        Ok(Self::new(catalog, defaults, bands))
    }
}
