// 👤 Candidate Entity - local identity + external citizen identifier
//
// Local id is what ballots point at; citizen_id is what the national
// registry knows the candidate by. Import keys on citizen_id.

use serde::{Deserialize, Serialize};

/// Length of a national citizen identifier
pub const CITIZEN_ID_LEN: usize = 13;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: i64,

    /// Identifier assigned by the national registry
    pub citizen_id: String,

    pub name: String,

    #[serde(default)]
    pub picture_url: Option<String>,

    /// Constituency the candidate stands in (None = not yet assigned)
    #[serde(default)]
    pub area_id: Option<i64>,

    #[serde(default)]
    pub party_id: Option<i64>,
}

impl Candidate {
    /// True when the citizen id can be submitted to the registry as-is
    pub fn has_valid_citizen_id(&self) -> bool {
        is_well_formed_citizen_id(&self.citizen_id)
    }
}

/// Fields needed to insert a candidate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewCandidate {
    pub citizen_id: String,
    pub name: String,
    pub picture_url: Option<String>,
    pub area_id: Option<i64>,
    pub party_id: Option<i64>,
}

impl NewCandidate {
    pub fn new(citizen_id: impl Into<String>, name: impl Into<String>, area_id: Option<i64>) -> Self {
        NewCandidate {
            citizen_id: citizen_id.into(),
            name: name.into(),
            area_id,
            ..Default::default()
        }
    }

    pub fn with_party(mut self, party_id: i64) -> Self {
        self.party_id = Some(party_id);
        self
    }
}

/// Exactly 13 ASCII digits
pub fn is_well_formed_citizen_id(citizen_id: &str) -> bool {
    citizen_id.len() == CITIZEN_ID_LEN && citizen_id.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_citizen_id_format() {
        assert!(is_well_formed_citizen_id("1100700123456"));
        assert!(!is_well_formed_citizen_id("12345"));
        assert!(!is_well_formed_citizen_id("11007001234567"));
        assert!(!is_well_formed_citizen_id("11007001234X6"));
        assert!(!is_well_formed_citizen_id(""));
    }

    #[test]
    fn test_new_candidate_builder() {
        let c = NewCandidate::new("1100700123456", "Somchai Jaidee", Some(2)).with_party(4);
        assert_eq!(c.area_id, Some(2));
        assert_eq!(c.party_id, Some(4));
        assert!(c.picture_url.is_none());
    }
}
