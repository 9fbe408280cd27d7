use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fop_shared::cache::{CachedFeeRates, CachedPermits, PublicKeySet};
use fop_shared::constants::ONLINE_RECORD_PREFIX;
use fop_shared::records::GeoLocation;
use fop_shared::sync::{SyncBatch, SyncResult};
use fop_shared::telemetry::TelemetryBatch;
use fop_shared::types::{PermitStatus, ServiceLogStatus, VerificationResult};
use fop_shared::verifier::{verify, PermitLookup, VerificationOutcome};
use fop_store::{
    Database, FeeRate, IssuedCredential, Officer, Operator, Permit, ServiceLog, SyncSession,
    VerificationLog,
};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::issuer::CredentialIssuer;
use crate::keys::KeyMaterial;
use crate::provision::Provisioner;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::sync::Reconciler;

/// The store handle shared by every request.
pub type SharedDatabase = Arc<Mutex<Database>>;

const DEFAULT_HISTORY_LIMIT: u32 = 50;
const MAX_HISTORY_LIMIT: u32 = 500;
const SYNC_STATUS_LIMIT: u32 = 20;

#[derive(Clone)]
pub struct AppState {
    pub db: SharedDatabase,
    pub keys: Arc<KeyMaterial>,
    pub reconciler: Reconciler,
    pub provisioner: Provisioner,
    pub issuer: CredentialIssuer,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(db: Database, keys: KeyMaterial, config: ServerConfig) -> Self {
        let db: SharedDatabase = Arc::new(Mutex::new(db));
        let signer = Arc::new(keys.signer.clone());
        Self {
            reconciler: Reconciler::new(db.clone(), config.max_batch_size),
            provisioner: Provisioner::new(db.clone(), config.cache_max_results_cap),
            issuer: CredentialIssuer::new(db.clone(), signer, config.credential_max_validity_days),
            rate_limiter: RateLimiter::from_config(&config),
            keys: Arc::new(keys),
            config: Arc::new(config),
            db,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/public-key", get(public_key))
        .route("/verify", post(verify_online))
        .route("/sync", post(sync_batch))
        .route("/sync/status/:device_id", get(sync_status))
        .route("/cache/permits", get(cache_permits))
        .route("/cache/fee-rates", get(cache_fee_rates))
        .route("/telemetry", post(telemetry))
        .route("/permits/:id/credential", get(permit_credential))
        .route("/permits/:id/verifications", get(permit_verifications))
        .route("/admin/operators/:id", put(admin_put_operator))
        .route("/admin/officers/:id", put(admin_put_officer))
        .route("/admin/permits/:id", put(admin_put_permit))
        .route("/admin/permits/:id/credential", post(admin_issue_credential))
        .route("/admin/fee-rates", post(admin_add_fee_rate))
        .route("/admin/service-logs", get(admin_list_service_logs))
        .route("/admin/service-logs/invoice", post(admin_invoice_service_logs))
        .route("/admin/service-logs/:id/cancel", post(admin_cancel_service_log))
        .layer(DefaultBodyLimit::max(8 * 1024 * 1024))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Public endpoints ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    instance: String,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        instance: state.config.instance_name.clone(),
    })
}

async fn public_key(State(state): State<AppState>) -> Json<PublicKeySet> {
    Json(state.keys.public_keys.clone())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest {
    token: String,
    device_id: Option<String>,
    officer_id: Option<String>,
    airport: Option<String>,
    location: Option<GeoLocation>,
    scan_duration_ms: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponse {
    #[serde(flatten)]
    outcome: VerificationOutcome,
    /// Server id of the persisted attempt, when the officer was known.
    log_id: Option<Uuid>,
}

/// Online verification. Same verifier as the device, with the store as the
/// live permit source.
async fn verify_online(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ServerError> {
    let now = Utc::now();
    let db = state.db.lock().await;

    // The live state is consulted only once the credential itself checks
    // out, so read it after a pass against the embedded claims. A read
    // failure is a 500, never a fallback to those claims.
    let mut outcome = verify(&req.token, now, &state.keys.key_ring, None);
    let live = match outcome.permit_id() {
        Some(permit_id) if outcome.is_valid => Some(db.live_permit(permit_id)?),
        _ => None,
    };
    if let Some(live) = live {
        let lookup: &dyn PermitLookup = &live;
        outcome = verify(&req.token, now, &state.keys.key_ring, Some(lookup));
    }

    match outcome.result {
        VerificationResult::SignatureInvalid => warn!(
            device = req.device_id.as_deref().unwrap_or("-"),
            officer = req.officer_id.as_deref().unwrap_or("-"),
            reason = outcome.failure_reason.as_deref().unwrap_or(""),
            "Credential signature rejected"
        ),
        result => debug!(%result, permit = outcome.permit_id().unwrap_or("-"), "Online verification"),
    }

    let officer = match req.officer_id.as_deref() {
        Some(id) => db.get_officer(id)?,
        None => None,
    };

    let log_id = match officer {
        Some(officer) => {
            let log = VerificationLog {
                id: Uuid::new_v4(),
                client_record_id: format!("{ONLINE_RECORD_PREFIX}{}", Uuid::new_v4()),
                device_id: req.device_id.clone().unwrap_or_default(),
                officer_id: officer.id,
                officer_name: officer.name,
                scanned_raw_content: req.token,
                permit_id: outcome.permit_id().map(String::from),
                permit_number: outcome.permit_number().map(String::from),
                result: outcome.result,
                failure_reason: outcome.failure_reason.clone(),
                location: req.location,
                airport: req.airport,
                verified_at: now,
                scan_duration_ms: req.scan_duration_ms,
                was_offline_verification: false,
                synced_at: now,
            };
            Some(db.insert_verification_log(&log)?.id())
        }
        None => None,
    };

    Ok(Json(VerifyResponse { outcome, log_id }))
}

async fn sync_batch(
    State(state): State<AppState>,
    payload: Result<Json<SyncBatch>, JsonRejection>,
) -> Result<Json<SyncResult>, ServerError> {
    let Json(batch) = payload.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let result = state.reconciler.reconcile(&batch, Utc::now()).await?;
    Ok(Json(result))
}

async fn sync_status(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<Vec<SyncSession>>, ServerError> {
    let db = state.db.lock().await;
    Ok(Json(db.recent_sync_sessions(&device_id, SYNC_STATUS_LIMIT)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheQuery {
    operator_id: Option<String>,
    max_results: Option<u32>,
}

async fn cache_permits(
    State(state): State<AppState>,
    Query(query): Query<CacheQuery>,
) -> Result<Json<CachedPermits>, ServerError> {
    let cache = state
        .provisioner
        .permits(query.operator_id.as_deref(), query.max_results, Utc::now())
        .await?;
    Ok(Json(cache))
}

async fn cache_fee_rates(State(state): State<AppState>) -> Result<Json<CachedFeeRates>, ServerError> {
    Ok(Json(state.provisioner.fee_rates(Utc::now()).await?))
}

async fn telemetry(
    State(state): State<AppState>,
    Json(batch): Json<TelemetryBatch>,
) -> Result<(StatusCode, Json<serde_json::Value>), ServerError> {
    if batch.device_id.trim().is_empty() {
        return Err(ServerError::BadRequest("deviceId is required".into()));
    }
    let accepted = {
        let mut db = state.db.lock().await;
        db.insert_telemetry_events(&batch.device_id, &batch.events, Utc::now())?
    };
    debug!(device = %batch.device_id, accepted, "Telemetry received");
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "accepted": accepted })),
    ))
}

async fn permit_credential(
    State(state): State<AppState>,
    Path(permit_id): Path<String>,
) -> Result<Json<IssuedCredential>, ServerError> {
    let db = state.db.lock().await;
    db.latest_credential(&permit_id)?
        .map(Json)
        .ok_or_else(|| ServerError::NotFound(format!("no credential issued for permit {permit_id}")))
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
}

async fn permit_verifications(
    State(state): State<AppState>,
    Path(permit_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<VerificationLog>>, ServerError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let db = state.db.lock().await;
    Ok(Json(db.verification_history(&permit_id, limit)?))
}

// ─── Admin endpoints ───

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

#[derive(Deserialize)]
struct OperatorBody {
    name: String,
    country: Option<String>,
    #[serde(default = "default_true")]
    active: bool,
}

#[derive(Deserialize)]
struct OfficerBody {
    name: String,
    airport: Option<String>,
    #[serde(default = "default_true")]
    active: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermitBody {
    permit_number: String,
    operator_id: String,
    aircraft_registration: String,
    valid_from: NaiveDate,
    valid_until: NaiveDate,
    status: PermitStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeeRateBody {
    service_type: String,
    unit: String,
    rate: i64,
    currency: String,
    effective_from: NaiveDate,
    #[serde(default = "default_true")]
    active: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvoiceBody {
    ids: Vec<Uuid>,
    invoice_ref: String,
}

#[derive(Deserialize)]
struct CancelBody {
    reason: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceLogQuery {
    operator_id: String,
    status: Option<ServiceLogStatus>,
}

fn default_true() -> bool {
    true
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ServerError> {
    if value.trim().is_empty() {
        return Err(ServerError::BadRequest(format!("{field} must not be empty")));
    }
    Ok(())
}

async fn admin_put_operator(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<OperatorBody>,
) -> Result<Json<Operator>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    require_non_empty("name", &body.name)?;

    let operator = Operator {
        id,
        name: body.name,
        country: body.country,
        active: body.active,
        updated_at: Utc::now(),
    };
    state.db.lock().await.upsert_operator(&operator)?;
    info!(operator = %operator.id, "Operator upserted");
    Ok(Json(operator))
}

async fn admin_put_officer(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<OfficerBody>,
) -> Result<Json<Officer>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    require_non_empty("name", &body.name)?;

    let officer = Officer {
        id,
        name: body.name,
        airport: body.airport,
        active: body.active,
        updated_at: Utc::now(),
    };
    state.db.lock().await.upsert_officer(&officer)?;
    info!(officer = %officer.id, active = officer.active, "Officer upserted");
    Ok(Json(officer))
}

/// Hand-off point from the approval workflow: replaces the authoritative
/// state of one permit.
async fn admin_put_permit(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PermitBody>,
) -> Result<Json<Permit>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    require_non_empty("permitNumber", &body.permit_number)?;

    let permit = Permit {
        id,
        permit_number: body.permit_number,
        operator_id: body.operator_id,
        aircraft_registration: body.aircraft_registration,
        valid_from: body.valid_from,
        valid_until: body.valid_until,
        status: body.status,
        updated_at: Utc::now(),
    };
    state.db.lock().await.upsert_permit(&permit)?;
    info!(permit = %permit.id, status = %permit.status, "Permit upserted");
    Ok(Json(permit))
}

async fn admin_issue_credential(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(permit_id): Path<String>,
) -> Result<(StatusCode, Json<IssuedCredential>), ServerError> {
    verify_admin_token(&headers, &state.config)?;
    let issued = state.issuer.issue(&permit_id, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

async fn admin_add_fee_rate(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(body): Json<FeeRateBody>,
) -> Result<(StatusCode, Json<FeeRate>), ServerError> {
    verify_admin_token(&headers, &state.config)?;
    require_non_empty("serviceType", &body.service_type)?;
    require_non_empty("unit", &body.unit)?;
    require_non_empty("currency", &body.currency)?;

    let rate = FeeRate {
        id: Uuid::new_v4(),
        service_type: body.service_type,
        unit: body.unit,
        rate: body.rate,
        currency: body.currency,
        effective_from: body.effective_from,
        active: body.active,
    };
    state.db.lock().await.insert_fee_rate(&rate)?;
    info!(service = %rate.service_type, rate = rate.rate, "Fee rate added");
    Ok((StatusCode::CREATED, Json(rate)))
}

async fn admin_list_service_logs(
    headers: HeaderMap,
    State(state): State<AppState>,
    Query(query): Query<ServiceLogQuery>,
) -> Result<Json<Vec<ServiceLog>>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    let status = query.status.unwrap_or(ServiceLogStatus::Pending);
    let db = state.db.lock().await;
    Ok(Json(db.list_service_logs(&query.operator_id, status)?))
}

async fn admin_invoice_service_logs(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(body): Json<InvoiceBody>,
) -> Result<Json<serde_json::Value>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    if body.ids.is_empty() {
        return Err(ServerError::BadRequest("ids must not be empty".into()));
    }
    let invoiced = state
        .db
        .lock()
        .await
        .mark_service_logs_invoiced(&body.ids, &body.invoice_ref, Utc::now())?;
    Ok(Json(serde_json::json!({ "invoiced": invoiced })))
}

async fn admin_cancel_service_log(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CancelBody>,
) -> Result<Json<ServiceLog>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    let db = state.db.lock().await;
    Ok(Json(db.cancel_service_log(id, &body.reason, Utc::now())?))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
