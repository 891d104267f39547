use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// ABO blood group
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum BloodGroup {
    O,
    A,
    B,
    AB,
}

impl BloodGroup {
    /// Parse the exact codes used in donor snapshots and query strings
    pub fn from_code(code: &str) -> Result<Self, Error> {
        match code {
            "O" => Ok(BloodGroup::O),
            "A" => Ok(BloodGroup::A),
            "B" => Ok(BloodGroup::B),
            "AB" => Ok(BloodGroup::AB),
            other => Err(Error::UnknownBloodGroup(other.to_string())),
        }
    }

    pub fn as_code(&self) -> &'static str {
        match self {
            BloodGroup::O => "O",
            BloodGroup::A => "A",
            BloodGroup::B => "B",
            BloodGroup::AB => "AB",
        }
    }
}

impl fmt::Display for BloodGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

impl FromStr for BloodGroup {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BloodGroup::from_code(s)
    }
}

/// One donor row from a snapshot: blood group plus the antigens flagged present.
/// Read-only once loaded; absent codes are simply not in the set, so unknown
/// spec columns never match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonorRecord {
    id: Option<String>,
    blood_group: BloodGroup,
    antigens: HashSet<String>,
}

impl DonorRecord {
    pub fn new(id: Option<String>, blood_group: BloodGroup, antigens: HashSet<String>) -> Self {
        Self {
            id,
            blood_group,
            antigens,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn blood_group(&self) -> BloodGroup {
        self.blood_group
    }

    pub fn has_antigen(&self, code: &str) -> bool {
        self.antigens.contains(code)
    }

    pub fn antigens(&self) -> &HashSet<String> {
        &self.antigens
    }
}

/// Donors restricted to a single blood group, in snapshot order
#[derive(Debug, Clone)]
pub struct DonorPool {
    blood_group: BloodGroup,
    donors: Vec<DonorRecord>,
}

impl DonorPool {
    /// Keep only the donors blood-group identical to the candidate
    pub fn restrict(records: &[DonorRecord], blood_group: BloodGroup) -> Self {
        let donors = records
            .iter()
            .filter(|donor| donor.blood_group() == blood_group)
            .cloned()
            .collect();
        Self {
            blood_group,
            donors,
        }
    }

    pub fn blood_group(&self) -> BloodGroup {
        self.blood_group
    }

    pub fn donors(&self) -> &[DonorRecord] {
        &self.donors
    }

    pub fn len(&self) -> usize {
        self.donors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.donors.is_empty()
    }
}

/// Candidate broad HLA-B/DR antigens for matchability
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadHla {
    pub b: HashSet<String>,
    pub dr: HashSet<String>,
}

/// Everything the engine needs to know about one candidate
#[derive(Debug, Clone)]
pub struct CandidateProfile {
    pub blood_group: BloodGroup,
    /// Unacceptable antigens the candidate carries antibodies against
    pub specs: HashSet<String>,
    /// `None` means matchability was not requested
    pub broad_hla: Option<BroadHla>,
}

/// Mismatch grade over (DR, B) mismatch counts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchGrade {
    M12a,
    M2b,
    M3a,
    M3b,
    M4a,
    M4b,
}

impl MatchGrade {
    /// Fixed 2x3 lattice over DR in {0, 1, 2+} and B in {0, 1, 2+}
    pub fn classify(dr_mismatches: usize, b_mismatches: usize) -> Self {
        match (dr_mismatches, b_mismatches) {
            (0, 0 | 1) => MatchGrade::M12a,
            (0, _) => MatchGrade::M3a,
            (1, 0) => MatchGrade::M2b,
            (1, 1) => MatchGrade::M3b,
            (1, _) => MatchGrade::M4a,
            (_, _) => MatchGrade::M4b,
        }
    }

    /// Favourable grades are the ones counted towards matchability
    pub fn is_favourable(&self) -> bool {
        matches!(self, MatchGrade::M12a | MatchGrade::M2b)
    }
}

/// Donor counts per mismatch grade over the compatible set
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GradeCounts {
    pub m12a: usize,
    pub m2b: usize,
    pub m3a: usize,
    pub m3b: usize,
    pub m4a: usize,
    pub m4b: usize,
}

impl GradeCounts {
    pub fn record(&mut self, grade: MatchGrade) {
        match grade {
            MatchGrade::M12a => self.m12a += 1,
            MatchGrade::M2b => self.m2b += 1,
            MatchGrade::M3a => self.m3a += 1,
            MatchGrade::M3b => self.m3b += 1,
            MatchGrade::M4a => self.m4a += 1,
            MatchGrade::M4b => self.m4b += 1,
        }
    }

    /// Favourable total: the sole score fed into the band lookup
    pub fn favourable(&self) -> usize {
        self.m12a + self.m2b
    }

    pub fn total(&self) -> usize {
        self.m12a + self.m2b + self.m3a + self.m3b + self.m4a + self.m4b
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            m12a: self.m12a + other.m12a,
            m2b: self.m2b + other.m2b,
            m3a: self.m3a + other.m3a,
            m3b: self.m3b + other.m3b,
            m4a: self.m4a + other.m4a,
            m4b: self.m4b + other.m4b,
        }
    }
}

/// Outcome of one scoring call. Favourable, matchability and grade counts are
/// `None` when the candidate supplied no broad antigens, which is distinct
/// from a count of zero.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreResult {
    /// Fraction of the blood-group-identical pool the candidate would reject
    pub crf: f64,
    /// Antibody-compatible donor count
    pub available: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favourable: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matchability: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_counts: Option<GradeCounts>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blood_group_codes() {
        assert_eq!(BloodGroup::from_code("AB").unwrap(), BloodGroup::AB);
        assert_eq!(BloodGroup::AB.as_code(), "AB");
        assert!(matches!(
            BloodGroup::from_code("ab"),
            Err(Error::UnknownBloodGroup(_))
        ));
        assert!(matches!(
            BloodGroup::from_code("C"),
            Err(Error::UnknownBloodGroup(_))
        ));
    }

    #[test]
    fn test_classify_covers_the_lattice() {
        assert_eq!(MatchGrade::classify(0, 0), MatchGrade::M12a);
        assert_eq!(MatchGrade::classify(0, 1), MatchGrade::M12a);
        assert_eq!(MatchGrade::classify(0, 2), MatchGrade::M3a);
        assert_eq!(MatchGrade::classify(0, 5), MatchGrade::M3a);
        assert_eq!(MatchGrade::classify(1, 0), MatchGrade::M2b);
        assert_eq!(MatchGrade::classify(1, 1), MatchGrade::M3b);
        assert_eq!(MatchGrade::classify(1, 2), MatchGrade::M4a);
        assert_eq!(MatchGrade::classify(2, 0), MatchGrade::M4b);
        assert_eq!(MatchGrade::classify(3, 2), MatchGrade::M4b);
    }

    #[test]
    fn test_only_m12a_and_m2b_are_favourable() {
        assert!(MatchGrade::M12a.is_favourable());
        assert!(MatchGrade::M2b.is_favourable());
        for grade in [
            MatchGrade::M3a,
            MatchGrade::M3b,
            MatchGrade::M4a,
            MatchGrade::M4b,
        ] {
            assert!(!grade.is_favourable());
        }
    }

    #[test]
    fn test_grade_counts_favourable_total() {
        let mut counts = GradeCounts::default();
        counts.record(MatchGrade::M12a);
        counts.record(MatchGrade::M12a);
        counts.record(MatchGrade::M2b);
        counts.record(MatchGrade::M4b);
        assert_eq!(counts.favourable(), 3);
        assert_eq!(counts.total(), 4);

        let merged = counts.merge(counts);
        assert_eq!(merged.favourable(), 6);
        assert_eq!(merged.total(), 8);
    }
}
