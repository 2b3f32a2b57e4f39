// 🗳️ Ballot Entity - one append-only vote for one topic
//
// "A ballot is a fact, not a record you edit"
//
// Topics are never mixed: a Constituency ballot points at a candidate,
// a PartyList ballot points at a party, and each lives in its own table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ElectionError, Result};

// ============================================================================
// TOPIC
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Constituency representative - ballot targets a candidate
    Constituency,

    /// Party list - ballot targets a party
    PartyList,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::Constituency, Topic::PartyList];

    /// Decode the wire code used by the voting endpoints (1 = MP, 2 = party)
    pub fn from_code(code: i64) -> Result<Topic> {
        match code {
            1 => Ok(Topic::Constituency),
            2 => Ok(Topic::PartyList),
            other => Err(ElectionError::UnknownTopic(other)),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Topic::Constituency => 1,
            Topic::PartyList => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Constituency => "constituency",
            Topic::PartyList => "party_list",
        }
    }

    /// Table holding this topic's ballots
    pub fn ballot_table(&self) -> &'static str {
        match self {
            Topic::Constituency => "constituency_ballots",
            Topic::PartyList => "party_list_ballots",
        }
    }

    /// Kind of entity a ballot of this topic targets
    pub fn target_entity(&self) -> &'static str {
        match self {
            Topic::Constituency => "candidate",
            Topic::PartyList => "party",
        }
    }
}

impl std::str::FromStr for Topic {
    type Err = ElectionError;

    fn from_str(s: &str) -> Result<Topic> {
        match s.to_lowercase().as_str() {
            "constituency" | "mp" | "1" => Ok(Topic::Constituency),
            "party_list" | "party-list" | "party" | "2" => Ok(Topic::PartyList),
            _ => Err(ElectionError::UnknownTopic(s.parse().unwrap_or(-1))),
        }
    }
}

// ============================================================================
// BALLOT ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ballot {
    /// Local identity (0 for an abstention, which is never stored)
    pub id: i64,

    pub topic: Topic,

    /// Area the vote counts towards (copied from the target when it has one)
    pub area_id: i64,

    /// Candidate id (Constituency) or party id (PartyList)
    pub target_id: i64,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cast_at: Option<DateTime<Utc>>,
}

impl Ballot {
    /// Zero-valued ballot returned for "no selection"
    pub fn abstain(topic: Topic) -> Self {
        Ballot {
            id: 0,
            topic,
            area_id: 0,
            target_id: 0,
            cast_at: None,
        }
    }

    pub fn is_abstention(&self) -> bool {
        self.target_id == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_codes_round_trip() {
        for topic in Topic::ALL {
            assert_eq!(Topic::from_code(topic.code()).unwrap(), topic);
        }
    }

    #[test]
    fn test_unknown_topic_code_rejected() {
        let err = Topic::from_code(3).unwrap_err();
        assert!(matches!(err, ElectionError::UnknownTopic(3)));
    }

    #[test]
    fn test_topic_from_str_aliases() {
        assert_eq!("mp".parse::<Topic>().unwrap(), Topic::Constituency);
        assert_eq!("party-list".parse::<Topic>().unwrap(), Topic::PartyList);
        assert!("senate".parse::<Topic>().is_err());
    }

    #[test]
    fn test_topics_use_separate_tables() {
        assert_ne!(
            Topic::Constituency.ballot_table(),
            Topic::PartyList.ballot_table()
        );
    }

    #[test]
    fn test_abstain_is_zero_valued() {
        let ballot = Ballot::abstain(Topic::PartyList);
        assert_eq!(ballot.id, 0);
        assert_eq!(ballot.area_id, 0);
        assert_eq!(ballot.target_id, 0);
        assert!(ballot.is_abstention());

        let json = serde_json::to_value(&ballot).unwrap();
        assert_eq!(json["topic"], "party_list");
        assert!(json.get("cast_at").is_none());
    }
}
