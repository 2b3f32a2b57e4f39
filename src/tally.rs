// 🧮 Tally Aggregator - votes per target entity, optionally per area
//
// Counting is a pure fold over the ballots of one read, so a tally always
// reflects a single snapshot of the store. Nothing is cached between calls.

use std::collections::BTreeMap;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db;
use crate::entities::{Ballot, Topic};
use crate::error::Result;
use crate::registry_client::ExternalLocationStat;

// ============================================================================
// TALLY
// ============================================================================

/// Entity id -> number of ballots, ordered by entity id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tally(BTreeMap<i64, u64>);

impl Tally {
    pub fn new() -> Self {
        Tally(BTreeMap::new())
    }

    /// Count each ballot exactly once under its target id
    pub fn from_ballots<'a>(ballots: impl IntoIterator<Item = &'a Ballot>) -> Self {
        let mut counts = BTreeMap::new();
        for ballot in ballots {
            *counts.entry(ballot.target_id).or_insert(0) += 1;
        }
        Tally(counts)
    }

    pub fn votes_for(&self, entity_id: i64) -> u64 {
        self.0.get(&entity_id).copied().unwrap_or(0)
    }

    /// Sum of all counts (equals the number of ballots tallied)
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, u64)> + '_ {
        self.0.iter().map(|(id, count)| (*id, *count))
    }
}

impl FromIterator<(i64, u64)> for Tally {
    fn from_iter<I: IntoIterator<Item = (i64, u64)>>(iter: I) -> Self {
        Tally(iter.into_iter().collect())
    }
}

// ============================================================================
// AGGREGATION
// ============================================================================

/// Tally all ballots of `topic`, restricted to `area_id` when given.
/// Area 0 counts as not given. No matching ballots is an empty tally, not an error.
pub fn tally(conn: &Connection, topic: Topic, area_id: Option<i64>) -> Result<Tally> {
    let area_id = area_id.filter(|area| *area != 0);
    let ballots = db::list_ballots(conn, topic, area_id)?;
    let tally = Tally::from_ballots(&ballots);

    debug!(
        topic = topic.as_str(),
        area_id,
        ballots = ballots.len(),
        entities = tally.len(),
        "tally computed"
    );

    Ok(tally)
}

/// Per-location tally for one registry location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaTally {
    pub area_id: i64,
    pub area_name: String,
    pub counts: Tally,
}

/// One tally per location of the population dataset, in dataset order
pub fn tally_areas(
    conn: &Connection,
    topic: Topic,
    locations: &[ExternalLocationStat],
) -> Result<Vec<AreaTally>> {
    locations
        .iter()
        .map(|location| {
            Ok(AreaTally {
                area_id: location.location_id,
                area_name: location.location.clone(),
                counts: tally(conn, topic, Some(location.location_id))?,
            })
        })
        .collect()
}
