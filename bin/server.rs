// Election Tally - Web Server
// REST API with Axum over the tally engine

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use election_tally::{
    db, reconciliation::ReconciliationEngine, recorder, registry, setup_database, tally,
    tally_areas, telemetry, AreaTally, Ballot, Candidate, Config, ElectionError,
    ExternalCandidateRecord, ExternalLocationStat, Party, RegistryClient,
    Resolution, SubmissionReport, Tally, Topic,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    registry: Arc<dyn RegistryClient>,
    engine: Arc<ReconciliationEngine>,
    project_name: String,
}

impl AppState {
    /// Store access. Never held across an await.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

/// Engine error translated to an HTTP response
struct ApiError(ElectionError);

impl From<ElectionError> for ApiError {
    fn from(err: ElectionError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ElectionError::NotFound { .. } => StatusCode::NOT_FOUND,
            err if err.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("request failed: {}", self.0);
        }

        let body = ApiResponse {
            success: false,
            data: serde_json::Value::Null,
            error: Some(self.0.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok(data)))
}

// ============================================================================
// Query parameters
// ============================================================================

#[derive(Deserialize)]
struct VoteQuery {
    vote_topic_id: i64,
    #[serde(default)]
    area_id: Option<i64>,
    vote_target_id: i64,
}

#[derive(Deserialize)]
struct MpVoteQuery {
    candidate_id: i64,
    #[serde(default)]
    area_id: Option<i64>,
}

#[derive(Deserialize)]
struct PartyVoteQuery {
    party_id: i64,
    area_id: i64,
}

#[derive(Deserialize)]
struct AreaQuery {
    #[serde(default)]
    vote_topic_id: Option<i64>,
    area_id: i64,
}

#[derive(Deserialize)]
struct WinnerQuery {
    vote_topic_id: i64,
    #[serde(default)]
    area_id: Option<i64>,
}

#[derive(Serialize)]
struct WinnerResponse {
    topic: Topic,
    area_id: Option<i64>,
    tally: Tally,
    resolution: Resolution,
}

/// Topic from an optional wire code; party list when absent
fn topic_or_party_list(code: Option<i64>) -> Result<Topic, ElectionError> {
    code.map(Topic::from_code).unwrap_or(Ok(Topic::PartyList))
}

// ============================================================================
// API Handlers - voter
// ============================================================================

/// GET / - Greeting
async fn hello(State(state): State<AppState>) -> impl IntoResponse {
    Json(format!("Hello from {}", state.project_name))
}

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /candidates
async fn get_candidates(State(state): State<AppState>) -> ApiResult<Vec<Candidate>> {
    ok(db::list_candidates(&state.conn())?)
}

/// GET /candidates/:id
async fn get_candidate(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Candidate> {
    ok(registry::candidate(&state.conn(), id)?)
}

/// GET /candidates/area/:area_id
async fn get_candidates_area(
    State(state): State<AppState>,
    Path(area_id): Path<i64>,
) -> ApiResult<Vec<Candidate>> {
    ok(registry::candidates_in_area(&state.conn(), area_id)?)
}

/// GET /party
async fn get_parties(State(state): State<AppState>) -> ApiResult<Vec<Party>> {
    ok(db::list_parties(&state.conn())?)
}

/// GET /party/:id
async fn get_party(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Party> {
    ok(registry::party(&state.conn(), id)?)
}

/// GET /party/member/:id
async fn get_party_members(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<Candidate>> {
    ok(registry::party_members(&state.conn(), id)?)
}

/// GET /vote?vote_topic_id&area_id&vote_target_id
async fn vote(State(state): State<AppState>, Query(q): Query<VoteQuery>) -> ApiResult<Ballot> {
    let topic = Topic::from_code(q.vote_topic_id)?;
    ok(recorder::cast(&state.conn(), topic, q.area_id, q.vote_target_id)?)
}

/// GET /vote/mp?candidate_id&area_id
async fn vote_mp(State(state): State<AppState>, Query(q): Query<MpVoteQuery>) -> ApiResult<Ballot> {
    ok(recorder::cast(&state.conn(), Topic::Constituency, q.area_id, q.candidate_id)?)
}

/// GET /vote/party?party_id&area_id
async fn vote_party(
    State(state): State<AppState>,
    Query(q): Query<PartyVoteQuery>,
) -> ApiResult<Ballot> {
    ok(recorder::cast(&state.conn(), Topic::PartyList, Some(q.area_id), q.party_id)?)
}

/// GET /validation?vote_topic_id&area_id - raw ballots of one area
async fn validation(State(state): State<AppState>, Query(q): Query<AreaQuery>) -> ApiResult<Vec<Ballot>> {
    let topic = topic_or_party_list(q.vote_topic_id)?;
    ok(db::list_ballots(&state.conn(), topic, Some(q.area_id))?)
}

// ============================================================================
// API Handlers - election commission
// ============================================================================

/// GET /score/mp - global constituency tally
async fn score_mp(State(state): State<AppState>) -> ApiResult<Tally> {
    ok(tally(&state.conn(), Topic::Constituency, None)?)
}

/// GET /score/party - global party-list tally
async fn score_party(State(state): State<AppState>) -> ApiResult<Tally> {
    ok(tally(&state.conn(), Topic::PartyList, None)?)
}

/// GET /score/area?area_id[&vote_topic_id] - one area's tally (party list by default)
async fn score_area(State(state): State<AppState>, Query(q): Query<AreaQuery>) -> ApiResult<Tally> {
    let topic = topic_or_party_list(q.vote_topic_id)?;
    ok(tally(&state.conn(), topic, Some(q.area_id))?)
}

/// GET /score/areas - party-list tally of every registry location
async fn score_areas(State(state): State<AppState>) -> ApiResult<Vec<AreaTally>> {
    let locations = state.engine.fetch_locations(state.registry.as_ref()).await;
    ok(tally_areas(&state.conn(), Topic::PartyList, &locations)?)
}

/// GET /winner?vote_topic_id[&area_id]
async fn winner(State(state): State<AppState>, Query(q): Query<WinnerQuery>) -> ApiResult<WinnerResponse> {
    let topic = Topic::from_code(q.vote_topic_id)?;
    let counts = tally(&state.conn(), topic, q.area_id)?;
    let resolution = election_tally::resolve(&counts);

    ok(WinnerResponse {
        topic,
        area_id: q.area_id,
        tally: counts,
        resolution,
    })
}

/// GET /gov/candidates - fetch the registry roster, import it, echo it back
async fn gov_candidates(State(state): State<AppState>) -> ApiResult<Vec<ExternalCandidateRecord>> {
    let candidates = state.engine.fetch_roster(state.registry.as_ref()).await;
    let report = state.engine.import_candidates(&state.conn(), &candidates)?;
    info!(
        imported = report.imported,
        skipped = report.skipped_existing,
        "registry roster synced"
    );

    ok(candidates)
}

/// GET /population - registry population statistics
async fn population(State(state): State<AppState>) -> ApiResult<Vec<ExternalLocationStat>> {
    ok(state.engine.fetch_locations(state.registry.as_ref()).await)
}

/// POST /submit - submit every area's constituency winner
async fn submit(State(state): State<AppState>) -> ApiResult<SubmissionReport> {
    let report = state
        .engine
        .run_submission_batch(&state.db, state.registry.as_ref())
        .await?;
    ok(report)
}

// ============================================================================
// Router
// ============================================================================

fn cors_layer(origins: Option<&[String]>) -> CorsLayer {
    match origins {
        None => CorsLayer::permissive(),
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match origin.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!(%origin, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();

            CorsLayer::new()
                .allow_origin(allowed)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }
}

fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/", get(hello))
        .route("/api/health", get(health_check))
        .route("/candidates", get(get_candidates))
        .route("/candidates/:id", get(get_candidate))
        .route("/candidates/area/:area_id", get(get_candidates_area))
        .route("/party", get(get_parties))
        .route("/party/:id", get(get_party))
        .route("/party/member/:id", get(get_party_members))
        .route("/vote", get(vote))
        .route("/vote/mp", get(vote_mp))
        .route("/vote/party", get(vote_party))
        .route("/validation", get(validation))
        .route("/score/mp", get(score_mp))
        .route("/score/party", get(score_party))
        .route("/score/area", get(score_area))
        .route("/score/areas", get(score_areas))
        .route("/winner", get(winner))
        .route("/gov/candidates", get(gov_candidates))
        .route("/population", get(population))
        .route("/submit", post(submit))
        .with_state(state)
        .layer(cors)
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();

    let config = Config::from_env().context("Failed to read configuration")?;

    let conn = Connection::open(&config.database_path)
        .with_context(|| format!("Failed to open database {:?}", config.database_path))?;
    setup_database(&conn).context("Failed to set up schema")?;
    info!(path = ?config.database_path, "database opened");

    let registry = config.registry_client()?;
    info!(client = registry.name(), "registry client ready");

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        registry,
        engine: Arc::new(ReconciliationEngine::new()),
        project_name: config.project_name.clone(),
    };

    let app = router(state, cors_layer(config.cors_origins.as_deref()));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!("server running on http://{}", config.bind_addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use election_tally::{MockRegistryClient, NewCandidate};
    use tower::ServiceExt;

    fn state_with(registry: MockRegistryClient) -> AppState {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        AppState {
            db: Arc::new(Mutex::new(conn)),
            registry: Arc::new(registry),
            engine: Arc::new(ReconciliationEngine::new()),
            project_name: "test".to_string(),
        }
    }

    async fn call(state: &AppState, method: Method, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router(state.clone(), CorsLayer::permissive())
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn get(state: &AppState, uri: &str) -> (StatusCode, serde_json::Value) {
        call(state, Method::GET, uri).await
    }

    fn seed_area_two(state: &AppState) {
        let conn = state.conn();
        for i in 1..=7 {
            let area = if i == 5 || i == 7 { 2 } else { 1 };
            db::create_candidate(
                &conn,
                &NewCandidate::new(format!("110070000000{i}"), format!("Candidate {i}"), Some(area)),
            )
            .unwrap();
        }
    }

    #[tokio::test]
    async fn test_missing_candidate_is_404() {
        let state = state_with(MockRegistryClient::new());
        let (status, body) = get(&state, "/candidates/1").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_vote_and_score_flow() {
        let state = state_with(MockRegistryClient::new());
        seed_area_two(&state);

        for _ in 0..3 {
            let (status, body) = get(&state, "/vote?vote_topic_id=1&area_id=9&vote_target_id=5").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["data"]["area_id"], 2);
        }
        get(&state, "/vote/mp?candidate_id=7").await;

        let (_, body) = get(&state, "/winner?vote_topic_id=1&area_id=2").await;
        assert_eq!(body["data"]["tally"], serde_json::json!({"5": 3, "7": 1}));
        assert_eq!(body["data"]["resolution"]["entity_id"], 5);

        let (_, body) = get(&state, "/score/mp").await;
        assert_eq!(body["data"], serde_json::json!({"5": 3, "7": 1}));
    }

    #[tokio::test]
    async fn test_abstain_vote_is_not_stored() {
        let state = state_with(MockRegistryClient::new());

        let (status, body) = get(&state, "/vote?vote_topic_id=2&area_id=3&vote_target_id=0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["id"], 0);
        assert_eq!(body["data"]["area_id"], 0);

        let (_, body) = get(&state, "/validation?vote_topic_id=2&area_id=3").await;
        assert_eq!(body["data"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_unknown_topic_is_400() {
        let state = state_with(MockRegistryClient::new());
        let (status, _) = get(&state, "/vote?vote_topic_id=7&area_id=1&vote_target_id=1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_registry_down_returns_empty_lists() {
        let state = state_with(MockRegistryClient::new().failing_reads());
        let party = db::create_party(&state.conn(), "Green", None).unwrap();
        recorder::cast(&state.conn(), Topic::PartyList, Some(1), party.id).unwrap();

        let (status, body) = get(&state, "/population").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], serde_json::json!([]));

        let (_, body) = get(&state, "/score/areas").await;
        assert_eq!(body["data"], serde_json::json!([]));

        let (_, body) = get(&state, "/gov/candidates").await;
        assert_eq!(body["data"], serde_json::json!([]));

        // voting data still readable
        let (_, body) = get(&state, "/score/area?area_id=1").await;
        assert_eq!(body["data"][party.id.to_string()], 1);
    }

    #[tokio::test]
    async fn test_gov_candidates_imports_roster_once() {
        let roster = vec![
            ExternalCandidateRecord {
                citizen_id: "1100700000001".to_string(),
                name: "Somchai".to_string(),
                lastname: "Dee".to_string(),
                district_id: 1,
            },
            ExternalCandidateRecord {
                citizen_id: "1100700000002".to_string(),
                name: "Malee".to_string(),
                lastname: "Sukjai".to_string(),
                district_id: 2,
            },
        ];
        let state = state_with(MockRegistryClient::new().with_roster(roster));

        let (status, body) = get(&state, "/gov/candidates").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
        assert_eq!(body["data"][0]["CitizenID"], "1100700000001");
        assert_eq!(db::count_candidates(&state.conn()).unwrap(), 2);

        get(&state, "/gov/candidates").await;
        assert_eq!(db::count_candidates(&state.conn()).unwrap(), 2);

        let (_, body) = get(&state, "/candidates/area/2").await;
        assert_eq!(body["data"][0]["name"], "Malee Sukjai");
    }

    #[tokio::test]
    async fn test_winner_with_area_zero_covers_all_areas() {
        let state = state_with(MockRegistryClient::new());
        seed_area_two(&state);
        recorder::cast(&state.conn(), Topic::Constituency, None, 5).unwrap();
        recorder::cast(&state.conn(), Topic::Constituency, None, 1).unwrap();
        recorder::cast(&state.conn(), Topic::Constituency, None, 1).unwrap();

        let (_, scoped_to_nothing) = get(&state, "/winner?vote_topic_id=1&area_id=0").await;
        let (_, unscoped) = get(&state, "/winner?vote_topic_id=1").await;

        assert_eq!(scoped_to_nothing["data"]["tally"], unscoped["data"]["tally"]);
        assert_eq!(unscoped["data"]["resolution"]["entity_id"], 1);
    }

    #[tokio::test]
    async fn test_submit_skips_area_without_ballots() {
        let registry = MockRegistryClient::new().with_locations(vec![
            ExternalLocationStat::new(2, "Area Two"),
            ExternalLocationStat::new(9, "Area Nine"),
        ]);
        let state = state_with(registry.clone());
        seed_area_two(&state);
        recorder::cast(&state.conn(), Topic::Constituency, None, 5).unwrap();

        let (status, body) = call(&state, Method::POST, "/submit").await;
        assert_eq!(status, StatusCode::OK);

        let items = body["data"]["items"].as_array().unwrap();
        assert_eq!(items[0]["status"], "submitted");
        assert_eq!(items[1]["status"], "no_winner");
        assert_eq!(registry.submitted(), vec!["1100700000005"]);
    }
}
