use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{ExternalCandidateRecord, ExternalLocationStat, RegistryClient};
use crate::error::{ElectionError, Result};

#[derive(Default)]
struct MockState {
    roster: Vec<ExternalCandidateRecord>,
    locations: Vec<ExternalLocationStat>,
    reads_fail: bool,
    rejected: HashSet<String>,
    delay: Option<Duration>,
    submitted: Vec<String>,
}

/// In-memory registry for tests.
/// Serves a fixed roster and population dataset and records submissions.
#[derive(Clone, Default)]
pub struct MockRegistryClient {
    state: Arc<Mutex<MockState>>,
    timeout: Option<Duration>,
}

impl MockRegistryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_roster(self, roster: Vec<ExternalCandidateRecord>) -> Self {
        self.state().roster = roster;
        self
    }

    pub fn with_locations(self, locations: Vec<ExternalLocationStat>) -> Self {
        self.state().locations = locations;
        self
    }

    /// Every read fails as if the registry were down
    pub fn failing_reads(self) -> Self {
        self.state().reads_fail = true;
        self
    }

    /// Submissions of this citizen id are refused
    pub fn rejecting(self, citizen_id: &str) -> Self {
        self.state().rejected.insert(citizen_id.to_string());
        self
    }

    /// Submissions take this long before answering
    pub fn with_delay(self, delay: Duration) -> Self {
        self.state().delay = Some(delay);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Citizen ids accepted so far, in submission order.
    pub fn submitted(&self) -> Vec<String> {
        self.state().submitted.clone()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read<T: Clone>(&self, pick: impl FnOnce(&MockState) -> &Vec<T>) -> Result<Vec<T>> {
        let state = self.state();
        if state.reads_fail {
            return Err(ElectionError::ExternalUnavailable("mock registry down".into()));
        }
        Ok(pick(&*state).clone())
    }
}

#[async_trait]
impl RegistryClient for MockRegistryClient {
    fn name(&self) -> &'static str {
        "mock-registry"
    }

    fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(Duration::from_millis(super::DEFAULT_TIMEOUT_MS))
    }

    async fn fetch_candidate_roster(&self) -> Result<Vec<ExternalCandidateRecord>> {
        self.read(|state| &state.roster)
    }

    async fn fetch_population_statistics(&self) -> Result<Vec<ExternalLocationStat>> {
        self.read(|state| &state.locations)
    }

    async fn submit_winning_candidate(&self, citizen_id: &str) -> Result<serde_json::Value> {
        let delay = self.state().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if state.rejected.contains(citizen_id) {
            return Err(ElectionError::SubmissionFailed(format!(
                "mock registry rejected {citizen_id}"
            )));
        }
        state.submitted.push(citizen_id.to_string());
        tracing::debug!("MockRegistryClient: accepted {}", citizen_id);

        Ok(serde_json::json!({ "CitizenID": citizen_id, "status": "accepted" }))
    }
}
