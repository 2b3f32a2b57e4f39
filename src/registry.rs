// 📇 Registry reads - lookups that the routing layer exposes directly
//
// Persistence returns Ok(None) for a missing row; here that becomes a
// NotFound, and id 0 is rejected before touching the store.

use rusqlite::Connection;

use crate::db;
use crate::entities::{Candidate, Party};
use crate::error::{ElectionError, Result};

pub fn candidate(conn: &Connection, id: i64) -> Result<Candidate> {
    require_id("candidate", id)?;
    db::find_candidate(conn, id)?.ok_or_else(|| ElectionError::not_found("candidate", id))
}

pub fn party(conn: &Connection, id: i64) -> Result<Party> {
    require_id("party", id)?;
    db::find_party(conn, id)?.ok_or_else(|| ElectionError::not_found("party", id))
}

/// Members of an existing party (empty list if it has none)
pub fn party_members(conn: &Connection, party_id: i64) -> Result<Vec<Candidate>> {
    let party = party(conn, party_id)?;
    db::find_party_members(conn, party.id)
}

/// Candidates standing in an area. An unknown area is just empty.
pub fn candidates_in_area(conn: &Connection, area_id: i64) -> Result<Vec<Candidate>> {
    db::find_candidates_by_area(conn, area_id)
}

pub(crate) fn require_id(entity: &'static str, id: i64) -> Result<()> {
    if id == 0 {
        return Err(ElectionError::InvalidSentinel { entity });
    }
    Ok(())
}
