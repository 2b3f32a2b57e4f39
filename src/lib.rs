// Election Tally - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod reconciliation; // Registry Reconciler: roster import + area winner submission
pub mod recorder;       // Ballot Recorder
pub mod registry;
pub mod registry_client;
pub mod resolver;       // Winner Resolver
pub mod tally;          // Tally Aggregator
pub mod telemetry;

// Re-export commonly used types
pub use config::Config;
pub use db::{
    Event,
    setup_database, create_party, find_party, list_parties,
    create_candidate, find_candidate, find_candidate_by_citizen_id,
    list_candidates, find_candidates_by_area, find_party_members, count_candidates,
    create_ballot, list_ballots, count_ballots,
    insert_event, get_events_for_entity,
};
pub use entities::{Ballot, Candidate, NewCandidate, Party, Topic};
pub use error::{ElectionError, Result};
pub use reconciliation::{
    ImportReport, Plan, PlannedSubmission, ReconciliationEngine,
    SubmissionItem, SubmissionReport, SubmissionStatus,
};
pub use recorder::cast;
pub use registry_client::{
    ExternalCandidateRecord, ExternalLocationStat,
    HttpRegistryClient, MockRegistryClient, RegistryClient, RegistryConfig,
    UnavailableRegistryClient, load_roster_csv,
};
pub use resolver::{resolve, Resolution};
pub use tally::{tally, tally_areas, AreaTally, Tally};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
