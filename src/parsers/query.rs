use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

use crate::error::Error;
use crate::types::{BloodGroup, BroadHla};

lazy_static! {
    /// Antibody spec code, any locus, e.g. "A2", "CW6", "DQ7", "DPB1"
    static ref SPEC_CODE: Regex = Regex::new(r"^[ABCD][QRPW]?[AB]?\d{1,4}$").unwrap();
    /// Broad HLA code with its locus prefix captured, e.g. "B7", "DR3"
    static ref HLA_CODE: Regex = Regex::new(r"^([ABCD][QRPW]?)\d{1,3}$").unwrap();
}

/// Parse a blood group query value
pub fn parse_blood_group(raw: &str) -> Result<BloodGroup, Error> {
    BloodGroup::from_code(raw.trim())
}

/// Parse a comma-separated unacceptable-antigen list. Empty input means the
/// candidate has no antibody specs.
pub fn parse_antigen_list(raw: &str) -> Result<HashSet<String>, Error> {
    let mut specs = HashSet::new();
    for token in raw.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        if !SPEC_CODE.is_match(token) {
            return Err(Error::MalformedAntigen(token.to_string()));
        }
        specs.insert(token.to_string());
    }
    Ok(specs)
}

/// Parse a comma-separated broad HLA list into per-locus B/DR sets. Returns
/// `None` for empty input: matchability was not requested. Codes outside
/// loci B and DR are rejected rather than silently misfiled.
pub fn parse_recipient_hla(raw: &str) -> Result<Option<BroadHla>, Error> {
    let mut hla = BroadHla::default();
    let mut seen = false;

    for token in raw.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let caps = HLA_CODE
            .captures(token)
            .ok_or_else(|| Error::MalformedAntigen(token.to_string()))?;
        match &caps[1] {
            "B" => {
                hla.b.insert(token.to_string());
            }
            "DR" => {
                hla.dr.insert(token.to_string());
            }
            _ => return Err(Error::UnsupportedHlaLocus(token.to_string())),
        }
        seen = true;
    }

    Ok(if seen { Some(hla) } else { None })
}
