use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::auth::AuthUser;
use crate::api::latency::{track_latency, LatencySnapshot, LatencyStats};
use crate::config::{
    Config, DASHBOARD_RECENT_QUESTIONS, DASHBOARD_UPCOMING_QUESTIONS, UNKNOWN_USER_NAME,
};
use crate::db::ProfileStore;
use crate::error::AppError;
use crate::ledger::PredictionLedger;
use crate::registry::{QuestionFilter, QuestionOrder, QuestionRegistry};
use crate::scorer::{aggregate, apply_display_names, leaderboard, ScoringEngine};
use crate::types::{
    now_ms, Answer, Correctness, Prediction, Profile, Question, QuestionType, UserScore,
};

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub registry: QuestionRegistry,
    pub ledger: PredictionLedger,
    pub engine: ScoringEngine,
    pub profiles: ProfileStore,
    pub latency: Arc<LatencyStats>,
    pub auth_header: String,
    pub leaderboard_preview: usize,
}

impl ApiState {
    pub fn new(pool: sqlx::SqlitePool, cfg: &Config) -> Self {
        Self {
            registry: QuestionRegistry::new(pool.clone()),
            ledger: PredictionLedger::new(pool.clone(), cfg.deadline_policy),
            engine: ScoringEngine::new(pool.clone(), cfg.resolver_policy, cfg.deadline_policy),
            profiles: ProfileStore::new(pool.clone()),
            latency: Arc::new(LatencyStats::new()),
            auth_header: cfg.auth_header.clone(),
            leaderboard_preview: cfg.leaderboard_preview,
            pool,
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .route("/profile", put(put_profile))
        .route("/dashboard", get(get_dashboard))
        .route("/questions", get(get_questions).post(create_question))
        .route("/questions/:id", get(get_question))
        .route("/questions/:id/prediction", put(put_prediction))
        .route("/questions/:id/resolve", post(resolve_question))
        .route("/predictions/me", get(get_my_predictions))
        .route("/leaderboard", get(get_leaderboard))
        .route("/leaderboard/:user_id", get(get_user_detail))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.latency),
            track_latency,
        ))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request bodies and query params
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct CreateQuestionRequest {
    pub title: String,
    pub question_type: QuestionType,
    /// Unix epoch milliseconds.
    pub deadline: Option<i64>,
}

#[derive(Deserialize)]
pub struct PredictionRequest {
    pub answer: Answer,
    pub confidence: i64,
}

#[derive(Deserialize)]
pub struct ResolveRequest {
    pub correct_answer: Answer,
    /// prediction id → verdict; only read for text and float questions.
    pub predictions_correctness: Option<HashMap<i64, bool>>,
}

#[derive(Deserialize)]
pub struct ProfileRequest {
    pub display_name: Option<String>,
}

#[derive(Deserialize)]
pub struct QuestionsQuery {
    pub resolved: Option<bool>,
    /// Only unresolved questions whose deadline is still ahead, soonest first.
    pub upcoming: Option<bool>,
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types: flat "one typed column per answer kind" layout
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct QuestionResponse {
    pub id: i64,
    pub creator_id: String,
    pub creator_name: String,
    pub title: String,
    pub question_type: QuestionType,
    pub deadline: Option<i64>,
    pub resolved: bool,
    pub resolved_at: Option<i64>,
    pub resolved_by: Option<String>,
    pub correct_answer_boolean: Option<bool>,
    pub correct_answer_text: Option<String>,
    pub correct_answer_float: Option<f64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl QuestionResponse {
    fn new(q: &Question, names: &HashMap<String, String>) -> Self {
        let (boolean, text, float) = q
            .resolution
            .as_ref()
            .map(|r| r.correct_answer.columns())
            .unwrap_or((None, None, None));

        QuestionResponse {
            id: q.id,
            creator_id: q.creator_id.clone(),
            creator_name: display_name(names, &q.creator_id),
            title: q.title.clone(),
            question_type: q.question_type,
            deadline: q.deadline,
            resolved: q.is_resolved(),
            resolved_at: q.resolution.as_ref().map(|r| r.resolved_at),
            resolved_by: q.resolution.as_ref().map(|r| r.resolved_by.clone()),
            correct_answer_boolean: boolean,
            correct_answer_text: text.map(str::to_string),
            correct_answer_float: float,
            created_at: q.created_at,
            updated_at: q.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub id: i64,
    pub question_id: i64,
    pub user_id: String,
    pub user_name: String,
    pub prediction_boolean: Option<bool>,
    pub prediction_text: Option<String>,
    pub prediction_float: Option<f64>,
    pub confidence: u8,
    /// `null` while the question is open.
    pub is_correct: Option<bool>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PredictionResponse {
    fn new(p: &Prediction, names: &HashMap<String, String>) -> Self {
        let (boolean, text, float) = p.answer.columns();
        PredictionResponse {
            id: p.id,
            question_id: p.question_id,
            user_id: p.user_id.clone(),
            user_name: display_name(names, &p.user_id),
            prediction_boolean: boolean,
            prediction_text: text.map(str::to_string),
            prediction_float: float,
            confidence: p.confidence,
            is_correct: p.correctness.as_flag(),
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictionWithQuestion {
    #[serde(flatten)]
    pub prediction: PredictionResponse,
    pub question: Option<QuestionResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuestionDetailResponse {
    pub question: QuestionResponse,
    pub predictions: Vec<PredictionResponse>,
    pub my_prediction: Option<PredictionResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub question: QuestionResponse,
    pub predictions: Vec<PredictionResponse>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub user_id: String,
    pub profile: Option<Profile>,
    pub score: Option<UserScore>,
    pub resolved: Vec<PredictionWithQuestion>,
    pub pending: Vec<PredictionWithQuestion>,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub score: Option<UserScore>,
    pub total_predictions: usize,
    pub pending_predictions: usize,
    pub recent_questions: Vec<QuestionResponse>,
    pub upcoming_questions: Vec<QuestionResponse>,
}

#[derive(Debug, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    #[serde(flatten)]
    pub score: UserScore,
    /// Most recently created resolved predictions, newest first.
    pub recent_predictions: Vec<PredictionResponse>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Result<Json<serde_json::Value>, AppError> {
    sqlx::query("SELECT 1").execute(&state.pool).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySnapshot> {
    Json(state.latency.snapshot())
}

async fn put_profile(
    State(state): State<ApiState>,
    user: AuthUser,
    Json(body): Json<ProfileRequest>,
) -> Result<Json<Profile>, AppError> {
    let profile = state
        .profiles
        .upsert(&user.user_id, body.display_name.as_deref())
        .await?;
    Ok(Json(profile))
}

async fn get_dashboard(
    State(state): State<ApiState>,
    user: AuthUser,
) -> Result<Json<DashboardResponse>, AppError> {
    let predictions = state.ledger.list_for_user(&user.user_id).await?;
    let score = named_score(&state, &predictions).await?;
    let pending = predictions
        .iter()
        .filter(|p| p.correctness == Correctness::Pending)
        .count();

    let recent = state
        .registry
        .list(&QuestionFilter {
            limit: Some(DASHBOARD_RECENT_QUESTIONS),
            ..Default::default()
        })
        .await?;
    let upcoming = state
        .registry
        .list(&QuestionFilter {
            resolved: Some(false),
            deadline_from: Some(now_ms()),
            order: QuestionOrder::DeadlineAsc,
            limit: Some(DASHBOARD_UPCOMING_QUESTIONS),
        })
        .await?;

    let names = lookup_names(
        &state,
        recent.iter().chain(&upcoming).map(|q| q.creator_id.as_str()),
    )
    .await?;

    Ok(Json(DashboardResponse {
        score,
        total_predictions: predictions.len(),
        pending_predictions: pending,
        recent_questions: recent.iter().map(|q| QuestionResponse::new(q, &names)).collect(),
        upcoming_questions: upcoming.iter().map(|q| QuestionResponse::new(q, &names)).collect(),
    }))
}

async fn get_questions(
    State(state): State<ApiState>,
    _user: AuthUser,
    Query(params): Query<QuestionsQuery>,
) -> Result<Json<Vec<QuestionResponse>>, AppError> {
    let filter = if params.upcoming.unwrap_or(false) {
        QuestionFilter {
            resolved: Some(false),
            deadline_from: Some(now_ms()),
            order: QuestionOrder::DeadlineAsc,
            limit: params.limit,
        }
    } else {
        QuestionFilter {
            resolved: params.resolved,
            limit: params.limit,
            ..Default::default()
        }
    };

    let questions = state.registry.list(&filter).await?;
    let names = lookup_names(&state, questions.iter().map(|q| q.creator_id.as_str())).await?;
    Ok(Json(questions.iter().map(|q| QuestionResponse::new(q, &names)).collect()))
}

async fn create_question(
    State(state): State<ApiState>,
    user: AuthUser,
    Json(body): Json<CreateQuestionRequest>,
) -> Result<(StatusCode, Json<QuestionResponse>), AppError> {
    let question = state
        .registry
        .create(&user.user_id, &body.title, body.question_type, body.deadline)
        .await?;
    let names = lookup_names(&state, [question.creator_id.as_str()]).await?;
    Ok((StatusCode::CREATED, Json(QuestionResponse::new(&question, &names))))
}

async fn get_question(
    State(state): State<ApiState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<QuestionDetailResponse>, AppError> {
    let question = state.registry.get(id).await?;
    let predictions = state.ledger.list_for_question(id).await?;
    let names = lookup_names(
        &state,
        predictions
            .iter()
            .map(|p| p.user_id.as_str())
            .chain([question.creator_id.as_str()]),
    )
    .await?;
    let mine = predictions
        .iter()
        .find(|p| p.user_id == user.user_id)
        .map(|p| PredictionResponse::new(p, &names));

    Ok(Json(QuestionDetailResponse {
        question: QuestionResponse::new(&question, &names),
        predictions: predictions.iter().map(|p| PredictionResponse::new(p, &names)).collect(),
        my_prediction: mine,
    }))
}

async fn put_prediction(
    State(state): State<ApiState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<PredictionRequest>,
) -> Result<Json<PredictionResponse>, AppError> {
    let prediction = state
        .ledger
        .upsert(id, &user.user_id, body.answer, body.confidence)
        .await?;
    let names = lookup_names(&state, [prediction.user_id.as_str()]).await?;
    Ok(Json(PredictionResponse::new(&prediction, &names)))
}

async fn resolve_question(
    State(state): State<ApiState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<ResolveRequest>,
) -> Result<Json<ResolveResponse>, AppError> {
    let resolved = state
        .engine
        .resolve(id, body.correct_answer, body.predictions_correctness, &user.user_id)
        .await?;

    let names = lookup_names(
        &state,
        resolved
            .predictions
            .iter()
            .map(|p| p.user_id.as_str())
            .chain([resolved.question.creator_id.as_str()]),
    )
    .await?;

    Ok(Json(ResolveResponse {
        question: QuestionResponse::new(&resolved.question, &names),
        predictions: resolved
            .predictions
            .iter()
            .map(|p| PredictionResponse::new(p, &names))
            .collect(),
    }))
}

async fn get_my_predictions(
    State(state): State<ApiState>,
    user: AuthUser,
) -> Result<Json<HistoryResponse>, AppError> {
    Ok(Json(history(&state, &user.user_id).await?))
}

async fn get_leaderboard(
    State(state): State<ApiState>,
    _user: AuthUser,
) -> Result<Json<Vec<LeaderboardEntry>>, AppError> {
    let resolved = state.ledger.list_resolved().await?;
    let mut scores = leaderboard(&resolved);

    let user_ids: Vec<String> = scores.iter().map(|s| s.user_id.clone()).collect();
    let names = state.profiles.display_names(&user_ids).await?;
    apply_display_names(&mut scores, &names);

    // `resolved` is in insertion order, so walking it backwards yields newest first.
    let mut recent: HashMap<&str, Vec<PredictionResponse>> = HashMap::new();
    for p in resolved.iter().rev() {
        let previews = recent.entry(p.user_id.as_str()).or_default();
        if previews.len() < state.leaderboard_preview {
            previews.push(PredictionResponse::new(p, &names));
        }
    }

    let entries = scores
        .into_iter()
        .enumerate()
        .map(|(i, score)| {
            let recent_predictions = recent.remove(score.user_id.as_str()).unwrap_or_default();
            LeaderboardEntry { rank: i + 1, score, recent_predictions }
        })
        .collect();

    Ok(Json(entries))
}

async fn get_user_detail(
    State(state): State<ApiState>,
    _user: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    let detail = history(&state, &user_id).await?;
    if detail.profile.is_none() && detail.resolved.is_empty() && detail.pending.is_empty() {
        return Err(AppError::NotFound(format!("user {user_id}")));
    }
    Ok(Json(detail))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Display names for the distinct ids in `user_ids`; ids without one are left out.
async fn lookup_names<'a>(
    state: &ApiState,
    user_ids: impl IntoIterator<Item = &'a str>,
) -> Result<HashMap<String, String>, AppError> {
    let mut ids: Vec<String> = user_ids.into_iter().map(str::to_string).collect();
    ids.sort_unstable();
    ids.dedup();
    state.profiles.display_names(&ids).await
}

fn display_name(names: &HashMap<String, String>, user_id: &str) -> String {
    names
        .get(user_id)
        .cloned()
        .unwrap_or_else(|| UNKNOWN_USER_NAME.to_string())
}

/// Score for one user's predictions, carrying their display name when set.
async fn named_score(
    state: &ApiState,
    predictions: &[Prediction],
) -> Result<Option<UserScore>, AppError> {
    let Some(mut score) = aggregate(predictions) else {
        return Ok(None);
    };
    let names = state.profiles.display_names(&[score.user_id.clone()]).await?;
    apply_display_names(std::slice::from_mut(&mut score), &names);
    Ok(Some(score))
}

/// A user's predictions split into resolved and pending, each with its question.
async fn history(state: &ApiState, user_id: &str) -> Result<HistoryResponse, AppError> {
    let profile = state.profiles.get(user_id).await?;
    let predictions = state.ledger.list_for_user(user_id).await?;
    let score = named_score(state, &predictions).await?;

    let question_ids: Vec<i64> = predictions.iter().map(|p| p.question_id).collect();
    let questions = state.registry.get_many(&question_ids).await?;
    let names = lookup_names(
        state,
        questions
            .values()
            .map(|q| q.creator_id.as_str())
            .chain([user_id]),
    )
    .await?;

    let (resolved, pending): (Vec<_>, Vec<_>) = predictions
        .iter()
        .map(|p| {
            let item = PredictionWithQuestion {
                prediction: PredictionResponse::new(p, &names),
                question: questions
                    .get(&p.question_id)
                    .map(|q| QuestionResponse::new(q, &names)),
            };
            (p.correctness.is_resolved(), item)
        })
        .partition(|(is_resolved, _)| *is_resolved);

    Ok(HistoryResponse {
        user_id: user_id.to_string(),
        profile,
        score,
        resolved: resolved.into_iter().map(|(_, item)| item).collect(),
        pending: pending.into_iter().map(|(_, item)| item).collect(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
