// 🏆 Winner Resolver - highest count wins, lowest entity id breaks ties
//
// The tie-break is part of the contract: the same tally always resolves
// to the same winner, whatever order the ballots were counted in.

use serde::{Deserialize, Serialize};

use crate::tally::Tally;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    /// `entity_id` had the most votes; `tied_with` lists other entities
    /// that reached the same count and lost on the id tie-break
    Winner {
        entity_id: i64,
        votes: u64,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tied_with: Vec<i64>,
    },

    /// Empty tally: nobody voted in this group
    NoWinner,
}

impl Resolution {
    pub fn winner(&self) -> Option<i64> {
        match self {
            Resolution::Winner { entity_id, .. } => Some(*entity_id),
            Resolution::NoWinner => None,
        }
    }

    pub fn is_tie(&self) -> bool {
        matches!(self, Resolution::Winner { tied_with, .. } if !tied_with.is_empty())
    }
}

/// Pick the maximum-count entity; ties go to the lowest entity id.
pub fn resolve(tally: &Tally) -> Resolution {
    let Some(max_votes) = tally.iter().map(|(_, votes)| votes).max() else {
        return Resolution::NoWinner;
    };

    // Tally iterates in ascending id order, so the first at max is the lowest id
    let mut leaders = tally
        .iter()
        .filter(|(_, votes)| *votes == max_votes)
        .map(|(id, _)| id);

    match leaders.next() {
        Some(entity_id) => Resolution::Winner {
            entity_id,
            votes: max_votes,
            tied_with: leaders.collect(),
        },
        None => Resolution::NoWinner,
    }
}
