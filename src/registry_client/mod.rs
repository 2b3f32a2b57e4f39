//! External registry collaborator.
//!
//! The national registry owns the candidate roster and the population
//! statistics, and accepts the winning candidate of each area. Every
//! implementation has to bound its calls with [`RegistryClient::timeout`]
//! and report transport failures as `ExternalUnavailable` (reads) or
//! `SubmissionFailed` (the write) instead of hanging or panicking.

mod http;
mod mock;

pub use http::{HttpRegistryClient, RegistryConfig};
pub use mock::MockRegistryClient;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ElectionError, Result};

/// Default bound on a single registry call.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

// ============================================================================
// WIRE TYPES
// ============================================================================

/// One row of the registry's candidate roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalCandidateRecord {
    #[serde(rename = "CitizenID", deserialize_with = "de_citizen_id")]
    pub citizen_id: String,

    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Lastname", default)]
    pub lastname: String,

    /// Constituency the registry assigns the candidate to
    #[serde(rename = "DistrictID")]
    pub district_id: i64,
}

impl ExternalCandidateRecord {
    /// Display name as stored locally: first and last name joined
    pub fn full_name(&self) -> String {
        format!("{} {}", self.name.trim(), self.lastname.trim())
            .trim()
            .to_string()
    }
}

/// One location of the population-statistics dataset.
///
/// Only the id and name matter to the engine; everything else the
/// registry sends is kept so it can be passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalLocationStat {
    #[serde(rename = "LocationID")]
    pub location_id: i64,

    #[serde(rename = "Location")]
    pub location: String,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ExternalLocationStat {
    pub fn new(location_id: i64, location: &str) -> Self {
        ExternalLocationStat {
            location_id,
            location: location.to_string(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Registry ids arrive as JSON strings or bare numbers.
fn de_citizen_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct CitizenIdVisitor;

    impl<'de> Visitor<'de> for CitizenIdVisitor {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a citizen id as string or integer")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<String, E> {
            Ok(v.trim().to_string())
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<String, E> {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_any(CitizenIdVisitor)
}

// ============================================================================
// CLIENT TRAIT
// ============================================================================

#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Human-readable client name for logging.
    fn name(&self) -> &'static str;

    /// Upper bound for one call; callers enforce it as well.
    fn timeout(&self) -> Duration {
        Duration::from_millis(DEFAULT_TIMEOUT_MS)
    }

    async fn fetch_candidate_roster(&self) -> Result<Vec<ExternalCandidateRecord>>;

    async fn fetch_population_statistics(&self) -> Result<Vec<ExternalLocationStat>>;

    /// Submit one area's winner. Returns the registry's acknowledgement.
    async fn submit_winning_candidate(&self, citizen_id: &str) -> Result<serde_json::Value>;
}

/// Stand-in used when no registry endpoint is configured.
pub struct UnavailableRegistryClient {
    reason: String,
}

impl UnavailableRegistryClient {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl RegistryClient for UnavailableRegistryClient {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn fetch_candidate_roster(&self) -> Result<Vec<ExternalCandidateRecord>> {
        Err(ElectionError::ExternalUnavailable(self.reason.clone()))
    }

    async fn fetch_population_statistics(&self) -> Result<Vec<ExternalLocationStat>> {
        Err(ElectionError::ExternalUnavailable(self.reason.clone()))
    }

    async fn submit_winning_candidate(&self, _citizen_id: &str) -> Result<serde_json::Value> {
        Err(ElectionError::SubmissionFailed(self.reason.clone()))
    }
}

// ============================================================================
// OFFLINE ROSTER
// ============================================================================

#[derive(Deserialize)]
struct RosterRow {
    #[serde(rename = "CitizenID")]
    citizen_id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Lastname", default)]
    lastname: String,
    #[serde(rename = "DistrictID")]
    district_id: i64,
}

/// Read a roster export (CSV with the registry's column names).
pub fn load_roster_csv(path: &Path) -> Result<Vec<ExternalCandidateRecord>> {
    let mut rdr = csv::Reader::from_path(path)?;

    let mut records = Vec::new();
    for row in rdr.deserialize() {
        let row: RosterRow = row?;
        records.push(ExternalCandidateRecord {
            citizen_id: row.citizen_id.trim().to_string(),
            name: row.name,
            lastname: row.lastname,
            district_id: row.district_id,
        });
    }

    Ok(records)
}
