use rayon::prelude::*;
use std::collections::HashSet;

use crate::error::Error;
use crate::reference::{AntigenCatalog, AntigenDefaults, ReferenceData};
use crate::types::{
    BroadHla, CandidateProfile, DonorPool, DonorRecord, GradeCounts, MatchGrade, ScoreResult,
};

/// Splits a donor pool into antibody-compatible and incompatible sides
pub struct DonorFilter<'a> {
    specs: &'a HashSet<String>,
}

impl<'a> DonorFilter<'a> {
    pub fn new(specs: &'a HashSet<String>) -> Self {
        Self { specs }
    }

    /// Partition the pool, preserving snapshot order on both sides. A donor
    /// is incompatible iff any spec antigen is flagged on its record; spec
    /// codes the snapshot never saw match nobody.
    pub fn partition(&self, pool: &'a DonorPool) -> (Vec<&'a DonorRecord>, Vec<&'a DonorRecord>) {
        pool.donors()
            .iter()
            .partition(|donor| !self.has_antibody_target(donor))
    }

    fn has_antibody_target(&self, donor: &DonorRecord) -> bool {
        self.specs.iter().any(|spec| donor.has_antigen(spec))
    }
}

/// Grades compatible donors against the candidate's normalized broad antigens
pub struct MatchScorer<'a> {
    catalog: &'a AntigenCatalog,
    b_broad: HashSet<String>,
    dr_broad: HashSet<String>,
}

impl<'a> MatchScorer<'a> {
    /// The candidate's broad sets are widened with the antigen defaults up
    /// front; the expansion lives only inside the scorer.
    pub fn new(catalog: &'a AntigenCatalog, defaults: &AntigenDefaults, hla: &BroadHla) -> Self {
        Self {
            catalog,
            b_broad: defaults.expand(&hla.b),
            dr_broad: defaults.expand(&hla.dr),
        }
    }

    /// Classify every donor and reduce into per-grade totals
    pub fn score(&self, donors: &[&DonorRecord]) -> GradeCounts {
        donors
            .par_iter()
            .map(|donor| self.grade(donor))
            .fold(GradeCounts::default, |mut counts, grade| {
                counts.record(grade);
                counts
            })
            .reduce(GradeCounts::default, GradeCounts::merge)
    }

    fn grade(&self, donor: &DonorRecord) -> MatchGrade {
        let dr = self.mismatches(donor, "DR", &self.dr_broad);
        let b = self.mismatches(donor, "B", &self.b_broad);
        MatchGrade::classify(dr, b)
    }

    /// Donor antigens at the locus (catalog entries flagged on the record)
    /// not covered by the candidate's expanded set. A donor with no typed
    /// antigens at the locus scores zero mismatches.
    fn mismatches(&self, donor: &DonorRecord, locus: &str, candidate: &HashSet<String>) -> usize {
        self.catalog
            .antigens_at(locus)
            .iter()
            .filter(|code| donor.has_antigen(code) && !candidate.contains(*code))
            .count()
    }
}

/// One scoring call over immutable snapshots: filter, grade, band lookup
pub struct Calculator<'a> {
    pool: &'a DonorPool,
    profile: &'a CandidateProfile,
    reference: &'a ReferenceData,
}

impl<'a> Calculator<'a> {
    pub fn new(pool: &'a DonorPool, profile: &'a CandidateProfile, reference: &'a ReferenceData) -> Self {
        Self {
            pool,
            profile,
            reference,
        }
    }

    pub fn calculate(&self) -> Result<ScoreResult, Error> {
        if self.pool.blood_group() != self.profile.blood_group {
            return Err(Error::PoolMismatch {
                pool: self.pool.blood_group(),
                candidate: self.profile.blood_group,
            });
        }
        if self.pool.is_empty() {
            return Err(Error::EmptyPool(self.pool.blood_group()));
        }

        let (compatible, incompatible) = DonorFilter::new(&self.profile.specs).partition(self.pool);
        debug_assert_eq!(compatible.len() + incompatible.len(), self.pool.len());
        let crf = incompatible.len() as f64 / self.pool.len() as f64;

        let hla = match &self.profile.broad_hla {
            Some(hla) => hla,
            None => {
                return Ok(ScoreResult {
                    crf,
                    available: compatible.len(),
                    favourable: None,
                    matchability: None,
                    match_counts: None,
                })
            }
        };

        let scorer = MatchScorer::new(&self.reference.catalog, &self.reference.defaults, hla);
        let counts = scorer.score(&compatible);
        let favourable = counts.favourable();
        let matchability = self
            .reference
            .bands
            .band_for(self.profile.blood_group, favourable)?;

        Ok(ScoreResult {
            crf,
            available: compatible.len(),
            favourable: Some(favourable),
            matchability: Some(matchability),
            match_counts: Some(counts),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::MatchabilityBands;
    use crate::types::BloodGroup;
    use std::collections::{BTreeMap, HashMap};

    fn donor(id: &str, blood_group: BloodGroup, antigens: &[&str]) -> DonorRecord {
        DonorRecord::new(
            Some(id.to_string()),
            blood_group,
            antigens.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn set(codes: &[&str]) -> HashSet<String> {
        codes.iter().map(|s| s.to_string()).collect()
    }

    fn reference() -> ReferenceData {
        let mut by_locus = HashMap::new();
        by_locus.insert(
            "B".to_string(),
            vec!["B7", "B8", "B12", "B42", "B46"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        by_locus.insert(
            "DR".to_string(),
            vec!["DR3", "DR4", "DR7", "DR9"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        let catalog = AntigenCatalog::new(by_locus).unwrap();

        let mut pairs = HashMap::new();
        pairs.insert("B42".to_string(), "B7".to_string());
        pairs.insert("DR9".to_string(), "DR4".to_string());
        let defaults = AntigenDefaults::new(pairs).unwrap();

        let mut tables = HashMap::new();
        for blood_group in [BloodGroup::O, BloodGroup::A, BloodGroup::B, BloodGroup::AB] {
            let table: BTreeMap<u32, u32> = [
                (1, 35),
                (2, 30),
                (3, 25),
                (4, 20),
                (5, 15),
                (6, 10),
                (7, 5),
                (8, 2),
                (9, 1),
                (10, 0),
            ]
            .into_iter()
            .collect();
            tables.insert(blood_group, table);
        }
        let bands = MatchabilityBands::new(tables).unwrap();

        ReferenceData::new(catalog, defaults, bands)
    }

    fn profile(
        blood_group: BloodGroup,
        specs: &[&str],
        hla: Option<(&[&str], &[&str])>,
    ) -> CandidateProfile {
        CandidateProfile {
            blood_group,
            specs: set(specs),
            broad_hla: hla.map(|(b, dr)| BroadHla {
                b: set(b),
                dr: set(dr),
            }),
        }
    }

    #[test]
    fn test_partition_preserves_order_and_size() {
        let records = vec![
            donor("d1", BloodGroup::A, &["A2", "B7"]),
            donor("d2", BloodGroup::A, &["B8"]),
            donor("d3", BloodGroup::A, &["A2"]),
            donor("d4", BloodGroup::A, &["DR3"]),
        ];
        let pool = DonorPool::restrict(&records, BloodGroup::A);
        let specs = set(&["A2"]);
        let (compatible, incompatible) = DonorFilter::new(&specs).partition(&pool);

        assert_eq!(compatible.len() + incompatible.len(), pool.len());
        let compatible_ids: Vec<_> = compatible.iter().map(|d| d.id().unwrap()).collect();
        let incompatible_ids: Vec<_> = incompatible.iter().map(|d| d.id().unwrap()).collect();
        assert_eq!(compatible_ids, vec!["d2", "d4"]);
        assert_eq!(incompatible_ids, vec!["d1", "d3"]);
    }

    #[test]
    fn test_empty_specs_everyone_compatible() {
        let records = vec![
            donor("d1", BloodGroup::O, &["A2"]),
            donor("d2", BloodGroup::O, &["B7"]),
        ];
        let pool = DonorPool::restrict(&records, BloodGroup::O);
        let result = Calculator::new(&pool, &profile(BloodGroup::O, &[], None), &reference())
            .calculate()
            .unwrap();
        assert_eq!(result.crf, 0.0);
        assert_eq!(result.available, 2);
    }

    #[test]
    fn test_unknown_spec_codes_match_nobody() {
        let records = vec![donor("d1", BloodGroup::O, &["A2"])];
        let pool = DonorPool::restrict(&records, BloodGroup::O);
        let result = Calculator::new(
            &pool,
            &profile(BloodGroup::O, &["XX999", "B7"], None),
            &reference(),
        )
        .calculate()
        .unwrap();
        assert_eq!(result.crf, 0.0);
        assert_eq!(result.available, 1);
    }

    #[test]
    fn test_crf_is_incompatible_over_pool() {
        let mut records = Vec::new();
        for i in 0..20 {
            records.push(donor(&format!("p{i}"), BloodGroup::A, &["A2"]));
        }
        for i in 0..19 {
            records.push(donor(&format!("n{i}"), BloodGroup::A, &["B7", "DR3"]));
        }
        // other blood groups never enter the pool
        records.push(donor("o1", BloodGroup::O, &["A2"]));

        let pool = DonorPool::restrict(&records, BloodGroup::A);
        assert_eq!(pool.len(), 39);

        let result = Calculator::new(&pool, &profile(BloodGroup::A, &["A2"], None), &reference())
            .calculate()
            .unwrap();
        assert!((result.crf - 20.0 / 39.0).abs() < 1e-12);
        assert_eq!(result.available, 19);
        assert_eq!(result.favourable, None);
        assert_eq!(result.matchability, None);
        assert_eq!(result.match_counts, None);
    }

    #[test]
    fn test_every_compatible_donor_lands_in_one_bucket() {
        let records = vec![
            donor("d1", BloodGroup::A, &["B7", "DR3"]),          // DR 0, B 0 -> m12a
            donor("d2", BloodGroup::A, &["B7", "B12", "DR3"]),   // DR 0, B 1 -> m12a
            donor("d3", BloodGroup::A, &["B12", "B46", "DR3"]),  // DR 0, B 2 -> m3a
            donor("d4", BloodGroup::A, &["B7", "DR9"]),          // DR 1, B 0 -> m2b
            donor("d5", BloodGroup::A, &["B12", "DR9"]),         // DR 1, B 1 -> m3b
            donor("d6", BloodGroup::A, &["B12", "B46", "DR9"]),  // DR 1, B 2 -> m4a
            donor("d7", BloodGroup::A, &["DR4", "DR7", "B7"]),   // DR 2 -> m4b
            donor("d8", BloodGroup::A, &[]),                     // untyped -> m12a
        ];
        let pool = DonorPool::restrict(&records, BloodGroup::A);
        let candidate = profile(BloodGroup::A, &[], Some((&["B7", "B8"], &["DR3"])));

        // DR9 -> DR4 default must not rescue DR9 mismatches for this
        // candidate, who has no DR9 and no DR4
        let result = Calculator::new(&pool, &candidate, &reference())
            .calculate()
            .unwrap();
        let counts = result.match_counts.unwrap();

        assert_eq!(counts.m12a, 3);
        assert_eq!(counts.m2b, 1);
        assert_eq!(counts.m3a, 1);
        assert_eq!(counts.m3b, 1);
        assert_eq!(counts.m4a, 1);
        assert_eq!(counts.m4b, 1);
        assert_eq!(counts.total(), pool.len());
        assert_eq!(result.favourable, Some(counts.m12a + counts.m2b));
        assert_eq!(result.favourable, Some(4));
    }

    #[test]
    fn test_defaults_widen_and_never_hurt() {
        // donor expresses B7 and B12; candidate carries the rare split B42
        let records = vec![donor("d1", BloodGroup::O, &["B7", "B12", "DR3"])];
        let pool = DonorPool::restrict(&records, BloodGroup::O);

        let with_rare = profile(BloodGroup::O, &[], Some((&["B42"], &["DR3"])));
        let result = Calculator::new(&pool, &with_rare, &reference())
            .calculate()
            .unwrap();
        // B42 expands to B7, covering the donor's B7: one B mismatch left
        assert_eq!(result.match_counts.unwrap().m12a, 1);
        assert_eq!(result.favourable, Some(1));

        // the same candidate without the rare antigen scores worse, never better
        let without = profile(BloodGroup::O, &[], Some((&[], &["DR3"])));
        let baseline = Calculator::new(&pool, &without, &reference())
            .calculate()
            .unwrap();
        assert_eq!(baseline.favourable, Some(0));
        assert!(baseline.favourable.unwrap() <= result.favourable.unwrap());
    }

    #[test]
    fn test_matchability_band_from_favourable() {
        let mut records = Vec::new();
        for i in 0..19 {
            records.push(donor(&format!("d{i}"), BloodGroup::A, &["B7", "DR3"]));
        }
        let pool = DonorPool::restrict(&records, BloodGroup::A);
        let candidate = profile(BloodGroup::A, &[], Some((&["B7", "B8"], &["DR3"])));

        let result = Calculator::new(&pool, &candidate, &reference())
            .calculate()
            .unwrap();
        assert_eq!(result.favourable, Some(19));
        assert_eq!(result.matchability, Some(5));
        let counts = result.match_counts.unwrap();
        assert_eq!(counts.m12a, 19);
        assert_eq!(counts.total(), 19);
    }

    #[test]
    fn test_no_broad_hla_reports_unavailable_not_zero() {
        let records = vec![donor("d1", BloodGroup::B, &["B7"])];
        let pool = DonorPool::restrict(&records, BloodGroup::B);
        let result = Calculator::new(&pool, &profile(BloodGroup::B, &[], None), &reference())
            .calculate()
            .unwrap();
        assert_eq!(result.favourable, None);
        assert_eq!(result.matchability, None);
        assert_eq!(result.match_counts, None);
    }

    #[test]
    fn test_empty_pool_is_rejected() {
        let pool = DonorPool::restrict(&[], BloodGroup::AB);
        let err = Calculator::new(&pool, &profile(BloodGroup::AB, &[], None), &reference())
            .calculate()
            .unwrap_err();
        assert_eq!(err, Error::EmptyPool(BloodGroup::AB));
    }

    #[test]
    fn test_pool_blood_group_must_match_candidate() {
        let records = vec![donor("d1", BloodGroup::A, &["B7"])];
        let pool = DonorPool::restrict(&records, BloodGroup::A);
        let err = Calculator::new(&pool, &profile(BloodGroup::O, &[], None), &reference())
            .calculate()
            .unwrap_err();
        assert_eq!(
            err,
            Error::PoolMismatch {
                pool: BloodGroup::A,
                candidate: BloodGroup::O,
            }
        );
    }
}
