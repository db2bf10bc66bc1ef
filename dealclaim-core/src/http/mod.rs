// src/http/mod.rs
//
// JSON surface over the claim engine. Handlers are thin: parse, call the
// engine, map `Error` to a status code.

pub mod server;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRef, FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};
use uuid::Uuid;

use dealclaim_common::models::{AttemptRecord, Claim, RequestIdentity};

use crate::services::{
    ClaimEngine, ClaimTicket, ClaimVerification, IssuedPin, PinVerification, RedemptionReceipt, RotatingPin,
};
use crate::Error;

pub use server::{start_http_server, HttpServerHandle};

const UNKNOWN_ADDRESS: &str = "unknown";

/// Router state: the engine plus the peers allowed to speak for a client.
#[derive(Clone)]
pub struct ApiState {
    pub engine: ClaimEngine,
    /// Front ends whose `x-user-id` and `x-forwarded-for` headers are
    /// believed. Requests from anyone else are identified by socket peer.
    pub trusted_proxies: Arc<[IpAddr]>,
}

impl FromRef<ApiState> for ClaimEngine {
    fn from_ref(state: &ApiState) -> Self {
        state.engine.clone()
    }
}

pub fn router(engine: ClaimEngine, trusted_proxies: Vec<IpAddr>) -> Router {
    let state = ApiState {
        engine,
        trusted_proxies: trusted_proxies.into(),
    };

    Router::new()
        .route("/health", get(health))
        .route("/claims", post(claim_deal))
        .route("/claims/verify", post(verify_claim_code))
        .route("/claims/complete", post(complete_redemption))
        .route("/claims/{claim_id}/activate", post(activate_claim))
        .route("/deals/{deal_id}/pin", post(issue_deal_pin))
        .route("/deals/{deal_id}/pin/verify", post(verify_deal_pin))
        .route("/deals/{deal_id}/pin/current", get(current_rotating_pin))
        .route("/deals/{deal_id}/attempts", get(recent_attempts))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

// ---------------------------------------------------------------------------
// errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    Engine(Error),
    BadRequest(String),
    Unauthorized(&'static str),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError::Engine(e)
    }
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InvalidCode | Error::DealNotFound(_) | Error::ClaimNotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidPin => StatusCode::UNAUTHORIZED,
        Error::NotDealVendor { .. } => StatusCode::FORBIDDEN,
        Error::ClaimExpired => StatusCode::GONE,
        Error::DuplicateActiveClaim { .. }
        | Error::AlreadyRedeemed
        | Error::ClaimPending
        | Error::InvalidTransition(_)
        | Error::DealUnavailable(_) => StatusCode::CONFLICT,
        Error::InvalidAmount(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        Error::StorageUnavailable(_) | Error::CodeSpaceExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Config(_) | Error::Hashing(_) | Error::Migration(_) | Error::Io(_) | Error::Join(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            ApiError::BadRequest(msg) => {
                let body = json!({ "error": "bad_request", "message": msg });
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
            ApiError::Unauthorized(msg) => {
                let body = json!({ "error": "unauthorized", "message": msg });
                let mut response = (StatusCode::UNAUTHORIZED, Json(body)).into_response();
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                return response;
            }
            ApiError::Engine(err) => err,
        };

        let status = status_for(&err);
        let message = if status.is_server_error() {
            error!("request failed: {}", err);
            "internal error, try again later".to_string()
        } else {
            err.to_string()
        };

        let body = json!({ "error": err.code(), "message": message });
        let mut response = (status, Json(body)).into_response();
        if let Error::RateLimited { retry_after_secs } = err {
            if let Ok(v) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, v);
            }
        }
        response
    }
}

// ---------------------------------------------------------------------------
// request identity
// ---------------------------------------------------------------------------

/// Who is calling. The socket peer is the address unless the peer is a
/// trusted proxy, in which case its `x-forwarded-for` and `x-user-id`
/// headers are used instead.
pub struct CallerIdentity(pub RequestIdentity);

impl FromRequestParts<ApiState> for CallerIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        let peer = ConnectInfo::<SocketAddr>::from_request_parts(parts, state)
            .await
            .ok()
            .map(|ConnectInfo(addr)| addr.ip());
        identity_from_headers(&parts.headers, peer, &state.trusted_proxies).map(CallerIdentity)
    }
}

fn identity_from_headers(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trusted_proxies: &[IpAddr],
) -> Result<RequestIdentity, ApiError> {
    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);
    let user_agent = header_str(header::USER_AGENT.as_str()).map(str::to_string);

    let Some(peer) = peer.filter(|p| trusted_proxies.contains(p)) else {
        if headers.contains_key("x-user-id") || headers.contains_key("x-forwarded-for") {
            debug!("ignoring identity headers from untrusted peer {:?}", peer);
        }
        return Ok(RequestIdentity {
            user_id: None,
            ip_address: peer.map_or_else(|| UNKNOWN_ADDRESS.to_string(), |p| p.to_string()),
            user_agent,
        });
    };

    let user_id = match header_str("x-user-id") {
        Some(raw) if !raw.is_empty() => Some(
            raw.parse::<i64>()
                .map_err(|_| ApiError::BadRequest(format!("x-user-id '{raw}' is not a number")))?,
        ),
        _ => None,
    };

    // Right to left, the first hop that is not one of ours is the client.
    let forwarded = header_str("x-forwarded-for").and_then(|v| {
        v.rsplit(',')
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
            .find(|hop| hop.parse::<IpAddr>().map_or(true, |ip| !trusted_proxies.contains(&ip)))
            .map(str::to_string)
    });

    Ok(RequestIdentity {
        user_id,
        ip_address: forwarded.unwrap_or_else(|| peer.to_string()),
        user_agent,
    })
}

/// A merchant authenticated by `Authorization: Bearer <vendor token>`.
pub struct VendorCaller(pub i64);

impl FromRequestParts<ApiState> for VendorCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized("vendor token required"))?;
        state
            .engine
            .vendor_tokens
            .verify(token)
            .map(VendorCaller)
            .ok_or(ApiError::Unauthorized("vendor token not recognised"))
    }
}

// ---------------------------------------------------------------------------
// handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ClaimDealRequest {
    pub user_id: i64,
    pub deal_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct VerifyClaimRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct CompleteRedemptionRequest {
    pub code: String,
    pub bill_amount: i64,
    pub actual_discount: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyPinRequest {
    pub pin: String,
}

#[derive(Debug, Deserialize)]
pub struct AttemptsQuery {
    pub limit: Option<i64>,
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn claim_deal(
    State(engine): State<ClaimEngine>,
    Json(req): Json<ClaimDealRequest>,
) -> Result<(StatusCode, Json<ClaimTicket>), ApiError> {
    let ticket = engine.credentials.claim_deal(req.user_id, req.deal_id).await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

async fn activate_claim(
    State(engine): State<ClaimEngine>,
    Path(claim_id): Path<Uuid>,
) -> Result<Json<Claim>, ApiError> {
    Ok(Json(engine.credentials.activate_claim(claim_id).await?))
}

async fn verify_claim_code(
    State(engine): State<ClaimEngine>,
    CallerIdentity(identity): CallerIdentity,
    Json(req): Json<VerifyClaimRequest>,
) -> Result<Json<ClaimVerification>, ApiError> {
    Ok(Json(engine.verification.verify_claim_code(&req.code, &identity).await?))
}

async fn complete_redemption(
    State(engine): State<ClaimEngine>,
    CallerIdentity(identity): CallerIdentity,
    Json(req): Json<CompleteRedemptionRequest>,
) -> Result<Json<RedemptionReceipt>, ApiError> {
    let receipt = engine
        .verification
        .complete_redemption(&req.code, req.bill_amount, req.actual_discount, &identity)
        .await?;
    Ok(Json(receipt))
}

async fn verify_deal_pin(
    State(engine): State<ClaimEngine>,
    Path(deal_id): Path<i64>,
    CallerIdentity(identity): CallerIdentity,
    Json(req): Json<VerifyPinRequest>,
) -> Result<Json<PinVerification>, ApiError> {
    Ok(Json(engine.verification.verify_deal_pin(deal_id, &req.pin, &identity).await?))
}

async fn current_rotating_pin(
    State(engine): State<ClaimEngine>,
    Path(deal_id): Path<i64>,
    VendorCaller(vendor_id): VendorCaller,
) -> Result<Json<RotatingPin>, ApiError> {
    engine.verification.authorize_vendor(deal_id, vendor_id).await?;
    Ok(Json(engine.verification.current_rotating_pin(deal_id).await?))
}

async fn issue_deal_pin(
    State(engine): State<ClaimEngine>,
    Path(deal_id): Path<i64>,
    VendorCaller(vendor_id): VendorCaller,
) -> Result<(StatusCode, Json<IssuedPin>), ApiError> {
    engine.verification.authorize_vendor(deal_id, vendor_id).await?;
    let issued = engine.credentials.issue_deal_pin(deal_id).await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

async fn recent_attempts(
    State(engine): State<ClaimEngine>,
    Path(deal_id): Path<i64>,
    VendorCaller(vendor_id): VendorCaller,
    Query(q): Query<AttemptsQuery>,
) -> Result<Json<Vec<AttemptRecord>>, ApiError> {
    engine.verification.authorize_vendor(deal_id, vendor_id).await?;
    Ok(Json(engine.throttle.recent_attempts(deal_id, q.limit.unwrap_or(50)).await?))
}
