use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::entities::{Ballot, Candidate, NewCandidate, Party, Topic};
use crate::error::Result;

/// Event for audit trail: every ballot, import and submission leaves one
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Reference data: parties and candidates
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS parties (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            picture_url TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS candidates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            citizen_id TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            picture_url TEXT,
            area_id INTEGER,
            party_id INTEGER REFERENCES parties(id),
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Ballots: one append-only table per topic
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS constituency_ballots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            area_id INTEGER NOT NULL,
            target_id INTEGER NOT NULL REFERENCES candidates(id),
            cast_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS party_list_ballots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            area_id INTEGER NOT NULL,
            target_id INTEGER NOT NULL REFERENCES parties(id),
            cast_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_candidates_area ON candidates(area_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_candidates_party ON candidates(party_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_constituency_area ON constituency_ballots(area_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_party_list_area ON party_list_ballots(area_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// PARTIES
// ============================================================================

pub fn create_party(conn: &Connection, name: &str, picture_url: Option<&str>) -> Result<Party> {
    conn.execute(
        "INSERT INTO parties (name, picture_url) VALUES (?1, ?2)",
        params![name, picture_url],
    )?;

    Ok(Party {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        picture_url: picture_url.map(str::to_string),
    })
}

pub fn find_party(conn: &Connection, id: i64) -> Result<Option<Party>> {
    let party = conn
        .query_row(
            "SELECT id, name, picture_url FROM parties WHERE id = ?1",
            [id],
            party_from_row,
        )
        .optional()?;

    Ok(party)
}

pub fn list_parties(conn: &Connection) -> Result<Vec<Party>> {
    let mut stmt = conn.prepare("SELECT id, name, picture_url FROM parties ORDER BY id")?;

    let parties = stmt
        .query_map([], party_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(parties)
}

fn party_from_row(row: &Row<'_>) -> rusqlite::Result<Party> {
    Ok(Party {
        id: row.get(0)?,
        name: row.get(1)?,
        picture_url: row.get(2)?,
    })
}

// ============================================================================
// CANDIDATES
// ============================================================================

const CANDIDATE_COLUMNS: &str = "id, citizen_id, name, picture_url, area_id, party_id";

pub fn create_candidate(conn: &Connection, candidate: &NewCandidate) -> Result<Candidate> {
    conn.execute(
        "INSERT INTO candidates (citizen_id, name, picture_url, area_id, party_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            candidate.citizen_id,
            candidate.name,
            candidate.picture_url,
            candidate.area_id,
            candidate.party_id,
        ],
    )?;

    Ok(Candidate {
        id: conn.last_insert_rowid(),
        citizen_id: candidate.citizen_id.clone(),
        name: candidate.name.clone(),
        picture_url: candidate.picture_url.clone(),
        area_id: candidate.area_id,
        party_id: candidate.party_id,
    })
}

pub fn find_candidate(conn: &Connection, id: i64) -> Result<Option<Candidate>> {
    let candidate = conn
        .query_row(
            &format!("SELECT {CANDIDATE_COLUMNS} FROM candidates WHERE id = ?1"),
            [id],
            candidate_from_row,
        )
        .optional()?;

    Ok(candidate)
}

pub fn find_candidate_by_citizen_id(conn: &Connection, citizen_id: &str) -> Result<Option<Candidate>> {
    let candidate = conn
        .query_row(
            &format!("SELECT {CANDIDATE_COLUMNS} FROM candidates WHERE citizen_id = ?1"),
            [citizen_id],
            candidate_from_row,
        )
        .optional()?;

    Ok(candidate)
}

pub fn list_candidates(conn: &Connection) -> Result<Vec<Candidate>> {
    query_candidates(
        conn,
        &format!("SELECT {CANDIDATE_COLUMNS} FROM candidates ORDER BY id"),
        None,
    )
}

pub fn find_candidates_by_area(conn: &Connection, area_id: i64) -> Result<Vec<Candidate>> {
    query_candidates(
        conn,
        &format!("SELECT {CANDIDATE_COLUMNS} FROM candidates WHERE area_id = ?1 ORDER BY id"),
        Some(area_id),
    )
}

pub fn find_party_members(conn: &Connection, party_id: i64) -> Result<Vec<Candidate>> {
    query_candidates(
        conn,
        &format!("SELECT {CANDIDATE_COLUMNS} FROM candidates WHERE party_id = ?1 ORDER BY id"),
        Some(party_id),
    )
}

pub fn count_candidates(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM candidates", [], |row| row.get(0))?;

    Ok(count)
}

fn query_candidates(conn: &Connection, sql: &str, key: Option<i64>) -> Result<Vec<Candidate>> {
    let mut stmt = conn.prepare(sql)?;

    let rows = match key {
        Some(key) => stmt.query_map([key], candidate_from_row)?,
        None => stmt.query_map([], candidate_from_row)?,
    };

    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

fn candidate_from_row(row: &Row<'_>) -> rusqlite::Result<Candidate> {
    Ok(Candidate {
        id: row.get(0)?,
        citizen_id: row.get(1)?,
        name: row.get(2)?,
        picture_url: row.get(3)?,
        area_id: row.get(4)?,
        party_id: row.get(5)?,
    })
}

// ============================================================================
// BALLOTS
// ============================================================================

/// Append one ballot row. Callers validate the target first.
pub fn create_ballot(conn: &Connection, topic: Topic, area_id: i64, target_id: i64) -> Result<Ballot> {
    let cast_at = Utc::now();

    conn.execute(
        &format!(
            "INSERT INTO {} (area_id, target_id, cast_at) VALUES (?1, ?2, ?3)",
            topic.ballot_table()
        ),
        params![area_id, target_id, cast_at.to_rfc3339()],
    )?;

    Ok(Ballot {
        id: conn.last_insert_rowid(),
        topic,
        area_id,
        target_id,
        cast_at: Some(cast_at),
    })
}

/// All ballots of a topic, optionally restricted to one area, in one read
pub fn list_ballots(conn: &Connection, topic: Topic, area_id: Option<i64>) -> Result<Vec<Ballot>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, area_id, target_id, cast_at
         FROM {}
         WHERE (?1 IS NULL OR area_id = ?1)
         ORDER BY id",
        topic.ballot_table()
    ))?;

    let ballots = stmt
        .query_map(params![area_id], |row| {
            let cast_at_str: String = row.get(3)?;
            let cast_at = DateTime::parse_from_rfc3339(&cast_at_str)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?
                .with_timezone(&Utc);

            Ok(Ballot {
                id: row.get(0)?,
                topic,
                area_id: row.get(1)?,
                target_id: row.get(2)?,
                cast_at: Some(cast_at),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(ballots)
}

pub fn count_ballots(conn: &Connection, topic: Topic, area_id: Option<i64>) -> Result<i64> {
    let count: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {} WHERE (?1 IS NULL OR area_id = ?1)",
            topic.ballot_table()
        ),
        params![area_id],
        |row| row.get(0),
    )?;

    Ok(count)
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            event.data.to_string(),
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
                actor: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(events)
}
