// ⚖️ Reconciliation Engine - local registry vs. national registry
//
// Two directions:
//   inbound:  roster import, keyed on citizen id (re-running is a no-op)
//   outbound: per-area constituency winner submitted to the registry
//
// Outbound runs in two phases. Planning (tally, resolve, validate the
// citizen id) needs the store; submission needs the network. The store
// lock is never held while a registry call is in flight.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::{self, Event};
use crate::entities::{candidate::is_well_formed_citizen_id, NewCandidate, Topic};
use crate::error::{ElectionError, Result};
use crate::registry_client::{ExternalCandidateRecord, ExternalLocationStat, RegistryClient};
use crate::resolver::{resolve, Resolution};
use crate::tally::tally;

const ACTOR: &str = "registry_reconciler";

// ============================================================================
// IMPORT REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    /// New candidates created
    pub imported: usize,

    /// Records whose citizen id already existed locally
    pub skipped_existing: usize,

    /// Records without a usable citizen id
    pub rejected: usize,
}

impl ImportReport {
    pub fn total(&self) -> usize {
        self.imported + self.skipped_existing + self.rejected
    }
}

// ============================================================================
// SUBMISSION RESULT
// ============================================================================

/// Final state of one area in a submission batch.
///
/// `NoWinner` and `SubmissionFailed` are different outcomes and are
/// reported separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Registry accepted the winner
    Submitted {
        candidate_id: i64,
        citizen_id: String,
        votes: u64,
        ack: serde_json::Value,
    },

    /// No constituency ballots in this area; nothing sent
    NoWinner,

    /// Winner's citizen id is not 13 digits; nothing sent
    MalformedIdentifier { candidate_id: i64, citizen_id: String },

    /// Winner id has no local candidate row; nothing sent
    UnknownCandidate { candidate_id: i64 },

    /// Registry call failed or timed out
    SubmissionFailed {
        candidate_id: i64,
        citizen_id: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionItem {
    pub area_id: i64,
    pub area_name: String,

    #[serde(flatten)]
    pub status: SubmissionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionReport {
    pub items: Vec<SubmissionItem>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SubmissionReport {
    /// Citizen ids the registry accepted, in area order
    pub fn submitted_ids(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter_map(|item| match &item.status {
                SubmissionStatus::Submitted { citizen_id, .. } => Some(citizen_id.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn item_for_area(&self, area_id: i64) -> Option<&SubmissionItem> {
        self.items.iter().find(|item| item.area_id == area_id)
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, SubmissionStatus::SubmissionFailed { .. }))
    }

    pub fn summary(&self) -> String {
        format!(
            "Submission batch: {} areas, {} submitted, {} without winner, {} malformed ids, {} failed",
            self.items.len(),
            self.count(|s| matches!(s, SubmissionStatus::Submitted { .. })),
            self.count(|s| matches!(s, SubmissionStatus::NoWinner)),
            self.count(|s| matches!(s, SubmissionStatus::MalformedIdentifier { .. })),
            self.failed(),
        )
    }

    fn count(&self, pred: impl Fn(&SubmissionStatus) -> bool) -> usize {
        self.items.iter().filter(|item| pred(&item.status)).count()
    }
}

/// Area after planning, before any network call
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedSubmission {
    pub area_id: i64,
    pub area_name: String,
    pub plan: Plan,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Submit {
        candidate_id: i64,
        citizen_id: String,
        votes: u64,
    },
    /// Settled without contacting the registry
    Skip(SubmissionStatus),
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    /// Overrides the client's own timeout when set
    pub timeout: Option<Duration>,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine { timeout: None }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        ReconciliationEngine {
            timeout: Some(timeout),
        }
    }

    fn call_timeout(&self, client: &dyn RegistryClient) -> Duration {
        self.timeout.unwrap_or_else(|| client.timeout())
    }

    // ------------------------------------------------------------------------
    // Registry reads (degrade to empty)
    // ------------------------------------------------------------------------

    /// Roster from the registry, or empty when it cannot be reached
    pub async fn fetch_roster(&self, client: &dyn RegistryClient) -> Vec<ExternalCandidateRecord> {
        let limit = self.call_timeout(client);
        let result = match tokio::time::timeout(limit, client.fetch_candidate_roster()).await {
            Ok(result) => result,
            Err(_) => Err(timed_out(limit)),
        };
        degrade("candidate roster", client, result)
    }

    /// Population locations from the registry, or empty when it cannot be reached
    pub async fn fetch_locations(&self, client: &dyn RegistryClient) -> Vec<ExternalLocationStat> {
        let limit = self.call_timeout(client);
        let result = match tokio::time::timeout(limit, client.fetch_population_statistics()).await {
            Ok(result) => result,
            Err(_) => Err(timed_out(limit)),
        };
        degrade("population statistics", client, result)
    }

    // ------------------------------------------------------------------------
    // Inbound: roster import
    // ------------------------------------------------------------------------

    /// Create a local candidate for every record whose citizen id is new.
    ///
    /// Runs in one transaction; importing the same roster again changes nothing.
    pub fn import_candidates(
        &self,
        conn: &Connection,
        records: &[ExternalCandidateRecord],
    ) -> Result<ImportReport> {
        let tx = conn.unchecked_transaction()?;
        let mut report = ImportReport::default();

        for record in records {
            let citizen_id = record.citizen_id.trim();
            if citizen_id.is_empty() {
                warn!(name = %record.full_name(), "roster record without citizen id");
                report.rejected += 1;
                continue;
            }

            if db::find_candidate_by_citizen_id(&tx, citizen_id)?.is_some() {
                report.skipped_existing += 1;
                continue;
            }

            let area_id = (record.district_id != 0).then_some(record.district_id);
            let candidate =
                db::create_candidate(&tx, &NewCandidate::new(citizen_id, record.full_name(), area_id))?;

            db::insert_event(
                &tx,
                &Event::new(
                    "candidate_imported",
                    "candidate",
                    &candidate.id.to_string(),
                    serde_json::json!({
                        "citizen_id": candidate.citizen_id,
                        "area_id": candidate.area_id,
                    }),
                    ACTOR,
                ),
            )?;
            report.imported += 1;
        }

        tx.commit()?;

        info!(
            imported = report.imported,
            skipped = report.skipped_existing,
            rejected = report.rejected,
            "roster import finished"
        );

        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Outbound: area winners
    // ------------------------------------------------------------------------

    /// Tally and resolve the constituency race of every location.
    pub fn plan_submissions(
        &self,
        conn: &Connection,
        locations: &[ExternalLocationStat],
    ) -> Result<Vec<PlannedSubmission>> {
        locations
            .iter()
            .map(|location| {
                Ok(PlannedSubmission {
                    area_id: location.location_id,
                    area_name: location.location.clone(),
                    plan: plan_area(conn, location.location_id)?,
                })
            })
            .collect()
    }

    /// Settle one area: skips pass through, winners go to the registry.
    /// A failure here stays with this area.
    async fn submit_one(&self, client: &dyn RegistryClient, planned: PlannedSubmission) -> SubmissionItem {
        let PlannedSubmission {
            area_id,
            area_name,
            plan,
        } = planned;

        let status = match plan {
            Plan::Skip(status) => status,
            Plan::Submit {
                candidate_id,
                citizen_id,
                votes,
            } => {
                let limit = self.call_timeout(client);
                let sent = tokio::time::timeout(limit, client.submit_winning_candidate(&citizen_id)).await;
                match sent {
                    Ok(Ok(ack)) => {
                        info!(area_id, candidate_id, votes, "area winner submitted");
                        SubmissionStatus::Submitted {
                            candidate_id,
                            citizen_id,
                            votes,
                            ack,
                        }
                    }
                    Ok(Err(e)) => failed(area_id, candidate_id, citizen_id, e),
                    Err(_) => failed(area_id, candidate_id, citizen_id, timed_out(limit)),
                }
            }
        };

        SubmissionItem {
            area_id,
            area_name,
            status,
        }
    }

    /// Plan under the store lock, then submit area by area without it.
    /// Each outcome is written to the audit trail as soon as it is settled,
    /// so an interrupted batch still leaves a row for every finished area.
    pub async fn submit_area_winners(
        &self,
        db: &Mutex<Connection>,
        client: &dyn RegistryClient,
        locations: &[ExternalLocationStat],
    ) -> Result<SubmissionReport> {
        let started_at = Utc::now();

        let planned = {
            let conn = lock(db);
            self.plan_submissions(&conn, locations)?
        };

        let mut items = Vec::with_capacity(planned.len());
        for area in planned {
            let item = self.submit_one(client, area).await;
            record_outcome(&lock(db), &item);
            items.push(item);
        }

        let report = SubmissionReport {
            items,
            started_at,
            finished_at: Utc::now(),
        };

        info!("{}", report.summary());
        Ok(report)
    }

    /// Whole batch: fetch locations (empty when the registry is down), then submit.
    pub async fn run_submission_batch(
        &self,
        db: &Mutex<Connection>,
        client: &dyn RegistryClient,
    ) -> Result<SubmissionReport> {
        let locations = self.fetch_locations(client).await;
        self.submit_area_winners(db, client, &locations).await
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn plan_area(conn: &Connection, area_id: i64) -> Result<Plan> {
    let resolution = resolve(&tally(conn, Topic::Constituency, Some(area_id))?);

    let Resolution::Winner {
        entity_id: candidate_id,
        votes,
        tied_with,
    } = resolution
    else {
        return Ok(Plan::Skip(SubmissionStatus::NoWinner));
    };

    if !tied_with.is_empty() {
        warn!(area_id, candidate_id, ?tied_with, "tie resolved to lowest candidate id");
    }

    let Some(candidate) = db::find_candidate(conn, candidate_id)? else {
        warn!(area_id, candidate_id, "winning candidate missing from registry");
        return Ok(Plan::Skip(SubmissionStatus::UnknownCandidate { candidate_id }));
    };

    if !is_well_formed_citizen_id(&candidate.citizen_id) {
        let err = ElectionError::MalformedIdentifier(candidate.citizen_id.clone());
        warn!(area_id, candidate_id, "{err}, skipping submission");
        return Ok(Plan::Skip(SubmissionStatus::MalformedIdentifier {
            candidate_id,
            citizen_id: candidate.citizen_id,
        }));
    }

    Ok(Plan::Submit {
        candidate_id,
        citizen_id: candidate.citizen_id,
        votes,
    })
}

fn failed(area_id: i64, candidate_id: i64, citizen_id: String, err: ElectionError) -> SubmissionStatus {
    let reason = match err {
        ElectionError::SubmissionFailed(reason) => reason,
        other => other.to_string(),
    };
    warn!(area_id, candidate_id, %reason, "area winner submission failed");
    SubmissionStatus::SubmissionFailed {
        candidate_id,
        citizen_id,
        reason,
    }
}

fn timed_out(limit: Duration) -> ElectionError {
    ElectionError::ExternalUnavailable(format!("registry call timed out after {limit:?}"))
}

fn degrade<T>(what: &str, client: &dyn RegistryClient, result: Result<Vec<T>>) -> Vec<T> {
    result.unwrap_or_else(|e| {
        warn!(client = client.name(), "{what} unavailable, using empty set: {e}");
        Vec::new()
    })
}

fn lock(db: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Audit row for one settled area. A failed write is logged, not raised:
/// the submission already happened.
fn record_outcome(conn: &Connection, item: &SubmissionItem) {
    let data = match serde_json::to_value(item) {
        Ok(data) => data,
        Err(e) => {
            warn!(area_id = item.area_id, "could not encode submission outcome: {e}");
            return;
        }
    };
    let event = Event::new("area_submission", "area", &item.area_id.to_string(), data, ACTOR);
    if let Err(e) = db::insert_event(conn, &event) {
        warn!(area_id = item.area_id, "could not record submission outcome: {e}");
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_candidates, create_candidate, get_events_for_entity, setup_database};
    use crate::recorder::cast;
    use crate::registry_client::MockRegistryClient;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn record(citizen_id: &str, name: &str, district_id: i64) -> ExternalCandidateRecord {
        ExternalCandidateRecord {
            citizen_id: citizen_id.to_string(),
            name: name.to_string(),
            lastname: "Test".to_string(),
            district_id,
        }
    }

    fn roster() -> Vec<ExternalCandidateRecord> {
        vec![
            record("1100700000001", "Somchai", 1),
            record("1100700000002", "Malee", 1),
            record("1100700000003", "Anan", 2),
        ]
    }

    fn vote(conn: &Connection, candidate_id: i64, times: usize) {
        for _ in 0..times {
            cast(conn, Topic::Constituency, None, candidate_id).unwrap();
        }
    }

    #[test]
    fn test_import_is_idempotent() {
        let conn = setup();
        let engine = ReconciliationEngine::new();

        let first = engine.import_candidates(&conn, &roster()).unwrap();
        let count_once = count_candidates(&conn).unwrap();

        let second = engine.import_candidates(&conn, &roster()).unwrap();
        let count_twice = count_candidates(&conn).unwrap();

        assert_eq!(first.imported, 3);
        assert_eq!(second.imported, 0);
        assert_eq!(second.skipped_existing, 3);
        assert_eq!(count_once, 3);
        assert_eq!(count_twice, count_once);
    }

    #[test]
    fn test_import_maps_record_fields() {
        let conn = setup();
        ReconciliationEngine::new()
            .import_candidates(&conn, &[record("1100700000009", "Somchai", 4)])
            .unwrap();

        let candidate = db::find_candidate_by_citizen_id(&conn, "1100700000009")
            .unwrap()
            .unwrap();
        assert_eq!(candidate.name, "Somchai Test");
        assert_eq!(candidate.area_id, Some(4));
        assert_eq!(candidate.party_id, None);
    }

    #[test]
    fn test_import_dedupes_within_one_roster_and_rejects_blank_ids() {
        let conn = setup();
        let records = vec![
            record("1100700000001", "Somchai", 1),
            record("1100700000001", "Somchai again", 1),
            record("  ", "Nobody", 1),
        ];

        let report = ReconciliationEngine::new().import_candidates(&conn, &records).unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.skipped_existing, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.total(), 3);
        assert_eq!(count_candidates(&conn).unwrap(), 1);
    }

    #[test]
    fn test_plan_skips_empty_area() {
        let conn = setup();
        let planned = ReconciliationEngine::new()
            .plan_submissions(&conn, &[ExternalLocationStat::new(9, "Empty")])
            .unwrap();

        assert_eq!(planned[0].plan, Plan::Skip(SubmissionStatus::NoWinner));
    }

    #[tokio::test]
    async fn test_submits_winner_and_skips_area_without_ballots() {
        let conn = setup();
        let engine = ReconciliationEngine::new();
        engine.import_candidates(&conn, &roster()).unwrap();

        vote(&conn, 1, 2);
        vote(&conn, 2, 3);
        vote(&conn, 3, 1);

        let db = Mutex::new(conn);
        let client = MockRegistryClient::new();
        let locations = vec![
            ExternalLocationStat::new(1, "North"),
            ExternalLocationStat::new(2, "South"),
            ExternalLocationStat::new(9, "Island"),
        ];

        let report = engine.submit_area_winners(&db, &client, &locations).await.unwrap();

        assert_eq!(report.submitted_ids(), vec!["1100700000002", "1100700000003"]);
        assert_eq!(client.submitted(), vec!["1100700000002", "1100700000003"]);
        assert_eq!(
            report.item_for_area(9).unwrap().status,
            SubmissionStatus::NoWinner
        );

        // outcomes are in the audit trail
        let conn = db.lock().unwrap();
        let events = get_events_for_entity(&conn, "area", "9").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["status"], "no_winner");
    }

    #[tokio::test]
    async fn test_malformed_identifier_is_skipped_and_batch_continues() {
        let conn = setup();
        let short = create_candidate(&conn, &NewCandidate::new("12345", "Short Id", Some(1))).unwrap();
        let good = create_candidate(&conn, &NewCandidate::new("1100700000002", "Good Id", Some(2))).unwrap();
        vote(&conn, short.id, 2);
        vote(&conn, good.id, 1);

        let db = Mutex::new(conn);
        let client = MockRegistryClient::new();
        let locations = vec![ExternalLocationStat::new(1, "A"), ExternalLocationStat::new(2, "B")];

        let report = ReconciliationEngine::new()
            .submit_area_winners(&db, &client, &locations)
            .await
            .unwrap();

        assert_eq!(
            report.item_for_area(1).unwrap().status,
            SubmissionStatus::MalformedIdentifier {
                candidate_id: short.id,
                citizen_id: "12345".to_string(),
            }
        );
        assert_eq!(report.submitted_ids(), vec!["1100700000002"]);
        assert!(!client.submitted().contains(&"12345".to_string()));
    }

    #[tokio::test]
    async fn test_one_failed_submission_does_not_abort_batch() {
        let conn = setup();
        let engine = ReconciliationEngine::new();
        engine.import_candidates(&conn, &roster()).unwrap();
        vote(&conn, 1, 1);
        vote(&conn, 3, 1);

        let db = Mutex::new(conn);
        let client = MockRegistryClient::new().rejecting("1100700000001");
        let locations = vec![ExternalLocationStat::new(1, "North"), ExternalLocationStat::new(2, "South")];

        let report = engine.submit_area_winners(&db, &client, &locations).await.unwrap();

        assert!(matches!(
            report.item_for_area(1).unwrap().status,
            SubmissionStatus::SubmissionFailed { .. }
        ));
        assert_eq!(report.failed(), 1);
        assert_eq!(report.submitted_ids(), vec!["1100700000003"]);
        // failure and "no winner" stay distinguishable
        assert_ne!(report.item_for_area(1).unwrap().status, SubmissionStatus::NoWinner);
    }

    #[tokio::test]
    async fn test_slow_registry_times_out_as_failure() {
        let conn = setup();
        let engine = ReconciliationEngine::with_timeout(Duration::from_millis(20));
        engine.import_candidates(&conn, &roster()).unwrap();
        vote(&conn, 3, 1);

        let db = Mutex::new(conn);
        let client = MockRegistryClient::new().with_delay(Duration::from_millis(500));

        let report = engine
            .submit_area_winners(&db, &client, &[ExternalLocationStat::new(2, "South")])
            .await
            .unwrap();

        match &report.items[0].status {
            SubmissionStatus::SubmissionFailed { reason, .. } => assert!(reason.contains("timed out")),
            other => panic!("expected timeout failure, got {:?}", other),
        }
        assert!(client.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_client_timeout_applies_without_engine_override() {
        let conn = setup();
        let engine = ReconciliationEngine::new();
        engine.import_candidates(&conn, &roster()).unwrap();
        vote(&conn, 3, 1);

        let db = Mutex::new(conn);
        let client = MockRegistryClient::new()
            .with_delay(Duration::from_millis(500))
            .with_timeout(Duration::from_millis(20));

        let report = engine
            .submit_area_winners(&db, &client, &[ExternalLocationStat::new(2, "South")])
            .await
            .unwrap();

        assert_eq!(report.failed(), 1);
        assert!(client.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_batch_keeps_settled_outcomes() {
        let conn = setup();
        let engine = ReconciliationEngine::new();
        engine.import_candidates(&conn, &roster()).unwrap();
        vote(&conn, 1, 1);
        vote(&conn, 3, 1);

        let db = Mutex::new(conn);
        let client = MockRegistryClient::new().with_delay(Duration::from_millis(200));
        let locations = vec![ExternalLocationStat::new(1, "North"), ExternalLocationStat::new(2, "South")];

        // first area settles at ~200ms, the batch is dropped at 300ms mid-way through the second
        let interrupted = tokio::time::timeout(
            Duration::from_millis(300),
            engine.submit_area_winners(&db, &client, &locations),
        )
        .await;
        assert!(interrupted.is_err());

        let conn = db.lock().unwrap();
        let north = get_events_for_entity(&conn, "area", "1").unwrap();
        assert_eq!(north.len(), 1);
        assert_eq!(north[0].data["status"], "submitted");
        assert!(get_events_for_entity(&conn, "area", "2").unwrap().is_empty());
        assert_eq!(client.submitted(), vec!["1100700000001"]);
    }

    #[tokio::test]
    async fn test_casting_is_not_blocked_during_submission() {
        let conn = setup();
        let engine = ReconciliationEngine::new();
        engine.import_candidates(&conn, &roster()).unwrap();
        vote(&conn, 1, 1);

        let db = Mutex::new(conn);
        let client = MockRegistryClient::new().with_delay(Duration::from_millis(200));
        let locations = vec![ExternalLocationStat::new(1, "North")];

        let cast_while_submitting = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let conn = db.lock().unwrap();
            cast(&conn, Topic::Constituency, None, 2).unwrap();
            client.submitted().len()
        };

        let (report, submitted_before_cast) = tokio::join!(
            engine.submit_area_winners(&db, &client, &locations),
            cast_while_submitting
        );

        assert_eq!(submitted_before_cast, 0);
        assert_eq!(report.unwrap().submitted_ids(), vec!["1100700000001"]);
        let conn = db.lock().unwrap();
        assert_eq!(tally(&conn, Topic::Constituency, Some(1)).unwrap().total(), 2);
    }

    #[tokio::test]
    async fn test_registry_down_degrades_to_empty() {
        let conn = setup();
        let party = db::create_party(&conn, "Green", None).unwrap();
        cast(&conn, Topic::PartyList, Some(1), party.id).unwrap();

        let db = Mutex::new(conn);
        let client = MockRegistryClient::new()
            .with_locations(vec![ExternalLocationStat::new(1, "North")])
            .failing_reads();
        let engine = ReconciliationEngine::new();

        assert!(engine.fetch_locations(&client).await.is_empty());
        assert!(engine.fetch_roster(&client).await.is_empty());

        let report = engine.run_submission_batch(&db, &client).await.unwrap();
        assert!(report.items.is_empty());

        // ballots are still there
        let conn = db.lock().unwrap();
        assert_eq!(tally(&conn, Topic::PartyList, None).unwrap().total(), 1);
    }
}
