// 🗳️ Ballot Recorder - validate and append a single ballot
//
// Rules, in order:
//   1. target 0 = abstain: return a zero ballot, store nothing
//   2. the target must exist (NotFound otherwise)
//   3. area comes from the target when it declares one; the caller's
//      area is only used when the target has none
//   4. exactly one row is appended, inside one transaction

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::db::{self, Event};
use crate::entities::{Ballot, Topic};
use crate::error::{ElectionError, Result};

/// Record one vote. `area_id` of `None` or `Some(0)` means "not supplied".
pub fn cast(conn: &Connection, topic: Topic, area_id: Option<i64>, target_id: i64) -> Result<Ballot> {
    if target_id == 0 {
        debug!(topic = topic.as_str(), "abstention, nothing recorded");
        return Ok(Ballot::abstain(topic));
    }

    let supplied_area = area_id.filter(|area| *area != 0);

    // existence check, area resolution and insert see the same state
    let tx = conn.unchecked_transaction()?;

    let canonical_area = canonical_area(&tx, topic, target_id)?;
    let area_id = match (canonical_area, supplied_area) {
        (Some(canonical), Some(supplied)) if canonical != supplied => {
            warn!(
                topic = topic.as_str(),
                target_id,
                supplied,
                canonical,
                "caller area overridden by target area"
            );
            canonical
        }
        (Some(canonical), _) => canonical,
        (None, Some(supplied)) => supplied,
        (None, None) => {
            return Err(ElectionError::MissingArea {
                topic: topic.as_str(),
                target_id,
            })
        }
    };

    let ballot = db::create_ballot(&tx, topic, area_id, target_id)?;

    db::insert_event(
        &tx,
        &Event::new(
            "ballot_cast",
            topic.ballot_table(),
            &ballot.id.to_string(),
            serde_json::json!({
                "area_id": ballot.area_id,
                "target_id": ballot.target_id,
            }),
            "ballot_recorder",
        ),
    )?;

    tx.commit()?;

    debug!(
        topic = topic.as_str(),
        ballot_id = ballot.id,
        area_id = ballot.area_id,
        target_id = ballot.target_id,
        "ballot recorded"
    );

    Ok(ballot)
}

/// Area declared by the ballot target, after checking it exists.
///
/// Candidates carry an (optional) area; parties never do.
fn canonical_area(conn: &Connection, topic: Topic, target_id: i64) -> Result<Option<i64>> {
    match topic {
        Topic::Constituency => {
            let candidate = db::find_candidate(conn, target_id)?
                .ok_or_else(|| ElectionError::not_found(topic.target_entity(), target_id))?;
            Ok(candidate.area_id)
        }
        Topic::PartyList => {
            db::find_party(conn, target_id)?
                .ok_or_else(|| ElectionError::not_found(topic.target_entity(), target_id))?;
            Ok(None)
        }
    }
}
