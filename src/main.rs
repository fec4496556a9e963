use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use clap::Parser;
use culturec::services::training::{JobKind, TrainingJob};
use culturec::utils::validation::validate_similarity_threshold;
use culturec::{
    init_tracing, AppState, Config, ItemId, ItemType, RecommendationRequest, RecommendationResponse,
    RecommenderError, SimilarItem, TrainingInfo,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    message: String,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: "Success".to_string(),
        }
    }

    fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message,
        }
    }
}

struct ApiError(RecommenderError);

impl From<RecommenderError> for ApiError {
    fn from(err: RecommenderError) -> Self {
        ApiError(err)
    }
}

fn status_for(err: &RecommenderError) -> StatusCode {
    match err {
        RecommenderError::InvalidRequest(_)
        | RecommenderError::InvalidStrategyForLevel { .. }
        | RecommenderError::UnknownItemType(_) => StatusCode::BAD_REQUEST,
        RecommenderError::UnresolvedAnchorItem { .. } | RecommenderError::MissingSimilarityData { .. } => {
            StatusCode::NOT_FOUND
        }
        RecommenderError::EmptyCorpus { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        RecommenderError::StoreWriteConflict(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (status, Json(ApiResponse::<()>::error(self.0.to_string()))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecommendationQuery {
    level: String,
    item_type: String,
    recommend_type: String,
    quantity: Option<usize>,
    domain: Option<String>,
    item_url: Option<String>,
    item_id: Option<ItemId>,
}

impl RecommendationQuery {
    fn into_request(self, default_quantity: usize) -> Result<RecommendationRequest, RecommenderError> {
        let mut request = RecommendationRequest::new(
            self.level.parse()?,
            self.item_type.parse()?,
            self.recommend_type.parse()?,
            self.quantity.unwrap_or(default_quantity),
        );
        request.domain = self.domain;
        request.item_url = self.item_url;
        request.item_id = self.item_id;
        Ok(request)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimilarQuery {
    min_similarity: Option<f64>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrainingRequest {
    item_type: String,
    n_topics: Option<usize>,
    #[serde(default)]
    refresh: bool,
}

async fn health_check() -> Json<ApiResponse<HashMap<String, String>>> {
    let mut status = HashMap::new();
    status.insert("status".to_string(), "healthy".to_string());
    status.insert("service".to_string(), "culturec-recommendation".to_string());
    status.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());

    Json(ApiResponse::success(status))
}

async fn get_recommendations(
    State(state): State<AppState>,
    Query(params): Query<RecommendationQuery>,
) -> ApiResult<RecommendationResponse> {
    let request = params.into_request(state.config.recommendation.default_quantity)?;
    let response = state.recommendation_service.recommend(&request).await?;
    Ok(Json(ApiResponse::success(response)))
}

async fn get_recommendation_url(
    State(state): State<AppState>,
    Query(params): Query<RecommendationQuery>,
) -> ApiResult<String> {
    let request = params.into_request(state.config.recommendation.default_quantity)?;
    Ok(Json(ApiResponse::success(
        state.recommendation_service.recommend_api_url(&request),
    )))
}

async fn get_similar_items(
    State(state): State<AppState>,
    Path((item_type, item_id)): Path<(String, ItemId)>,
    Query(params): Query<SimilarQuery>,
) -> ApiResult<Vec<SimilarItem>> {
    let item_type: ItemType = item_type.parse()?;
    if let Some(min_similarity) = params.min_similarity {
        validate_similarity_threshold(min_similarity)?;
    }

    let similar = state
        .similarity
        .similar_to(item_type, item_id, params.min_similarity, params.limit)
        .await?;
    Ok(Json(ApiResponse::success(similar)))
}

async fn submit_training(
    State(state): State<AppState>,
    Json(body): Json<TrainingRequest>,
) -> ApiResult<TrainingJob> {
    let item_type: ItemType = body.item_type.parse()?;
    let kind = if body.refresh { JobKind::Refresh } else { JobKind::Train };
    let job = state.training_service.submit(item_type, kind, body.n_topics)?;
    Ok(Json(ApiResponse::success(job)))
}

async fn list_training_jobs(State(state): State<AppState>) -> Json<ApiResponse<Vec<TrainingJob>>> {
    Json(ApiResponse::success(state.training_service.jobs()))
}

fn job_not_found(job_id: Uuid) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::error(format!("Training job {} not found", job_id))),
    )
        .into_response()
}

async fn get_training_job(State(state): State<AppState>, Path(job_id): Path<Uuid>) -> Response {
    match state.training_service.job(job_id) {
        Some(job) => Json(ApiResponse::success(job)).into_response(),
        None => job_not_found(job_id),
    }
}

async fn cancel_training_job(State(state): State<AppState>, Path(job_id): Path<Uuid>) -> Response {
    match state.training_service.cancel(job_id) {
        Some(job) => Json(ApiResponse::success(job)).into_response(),
        None => job_not_found(job_id),
    }
}

async fn get_training_info(State(state): State<AppState>) -> ApiResult<Vec<TrainingInfo>> {
    let info = state.training_service.trainer().training_info().await?;
    Ok(Json(ApiResponse::success(info)))
}

async fn get_activity_weights(State(state): State<AppState>) -> ApiResult<BTreeMap<String, f64>> {
    let weights = state.activity_weights.get_activity_weights().await?;
    Ok(Json(ApiResponse::success(weights)))
}

async fn put_activity_weights(
    State(state): State<AppState>,
    Json(weights): Json<HashMap<String, f64>>,
) -> ApiResult<BTreeMap<String, f64>> {
    state.activity_weights.set_activity_weights(&weights).await?;
    let weights = state.activity_weights.get_activity_weights().await?;
    Ok(Json(ApiResponse::success(weights)))
}

async fn get_domains(State(state): State<AppState>, Path(item_type): Path<String>) -> ApiResult<Vec<String>> {
    let item_type: ItemType = item_type.parse()?;
    let domains = state.recommendation_service.domains(item_type).await?;
    Ok(Json(ApiResponse::success(domains)))
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/recommendations", get(get_recommendations))
        .route("/recommendations/url", get(get_recommendation_url))
        .route("/similar/:item_type/:item_id", get(get_similar_items))
        .route("/training", get(list_training_jobs).post(submit_training))
        .route(
            "/training/:job_id",
            get(get_training_job).delete(cancel_training_job),
        )
        .route("/training-info", get(get_training_info))
        .route(
            "/activity-weights",
            get(get_activity_weights).put(put_activity_weights),
        )
        .route("/domains/:item_type", get(get_domains))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = config.server.socket_addr()?;
    let state = AppState::new(config).await?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    std::env::set_var("RUST_LOG", &args.log_level);
    init_tracing();

    let config = Config::load_or_default(&args.config)?;
    info!("Starting culturec recommendation server with config: {:?}", config.server);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.workers.max(1))
        .enable_all()
        .build()?;
    runtime.block_on(serve(config))
}
