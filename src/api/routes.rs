//! API route handlers.
//!
//! All endpoints return JSON. The vault lives behind a single write lock:
//! the lock order is the operation order, which keeps every mutation
//! serialized exactly as the ledger requires.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::events::{EventLog, EventRecord};
use crate::types::{Amount, PoolAllocation, Principal, VaultError};
use crate::vault::Vault;

/// Shared handle to the single-writer vault.
pub type SharedVault = Arc<RwLock<Vault>>;

/// State available to all route handlers.
#[derive(Clone)]
pub struct ApiState {
    pub vault: SharedVault,
    pub events: Arc<EventLog>,
}

type ApiError = (StatusCode, Json<ErrorBody>);
type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Response / request types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub paused: bool,
    pub total_assets: Amount,
    pub total_shares: Amount,
    pub share_price: Decimal,
    pub holders: usize,
    pub operations: usize,
    pub events: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct YieldsResponse {
    pub apy_a_bps: u64,
    pub apy_b_bps: u64,
    pub divergence_bps: u64,
    pub apy_a_pct: Decimal,
    pub apy_b_pct: Decimal,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocationsResponse {
    pub allocations: Vec<PoolAllocation>,
    pub total_allocated: Amount,
    pub vault_held: Amount,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub since: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub principal: Principal,
    pub amount: Amount,
    /// Defaults to the depositing principal.
    pub receiver: Option<Principal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepositResponse {
    pub shares: Amount,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub principal: Principal,
    pub shares: Amount,
    pub receiver: Option<Principal>,
    /// Defaults to the calling principal.
    pub owner: Option<Principal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WithdrawResponse {
    pub amount: Amount,
}

#[derive(Debug, Clone, Serialize)]
pub struct RebalanceResponse {
    pub rebalanced: bool,
    pub from_venue: Option<String>,
    pub to_venue: Option<String>,
    pub amount: Option<Amount>,
}

#[derive(Debug, Deserialize)]
pub struct ThresholdRequest {
    pub principal: Principal,
    pub value: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThresholdResponse {
    pub rebalance_threshold_bps: u32,
}

// ---------------------------------------------------------------------------
// Read handlers
// ---------------------------------------------------------------------------

pub async fn get_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let vault = state.vault.read().await;
    Json(StatusResponse {
        paused: vault.policy().is_paused(),
        total_assets: vault.total_assets(),
        total_shares: vault.total_shares(),
        share_price: share_price(vault.total_assets(), vault.total_shares()),
        holders: vault.ledger().share_of.len(),
        operations: vault.ops().len(),
        events: state.events.len(),
    })
}

pub async fn get_yields(State(state): State<ApiState>) -> ApiResult<YieldsResponse> {
    let vault = state.vault.read().await;
    let data = vault.current_yield_data().await.map_err(error_response)?;
    Ok(Json(YieldsResponse {
        apy_a_bps: data.apy_a_bps,
        apy_b_bps: data.apy_b_bps,
        divergence_bps: data.divergence_bps,
        apy_a_pct: bps_to_pct(data.apy_a_bps),
        apy_b_pct: bps_to_pct(data.apy_b_bps),
        last_update: vault.last_yield_data().map(|d| d.observed_at),
    }))
}

pub async fn get_allocations(State(state): State<ApiState>) -> ApiResult<AllocationsResponse> {
    let vault = state.vault.read().await;
    let total_allocated = vault.allocations().total().map_err(error_response)?;
    Ok(Json(AllocationsResponse {
        allocations: vault.pool_allocations(),
        total_allocated,
        vault_held: vault.ledger().vault_held,
    }))
}

pub async fn get_events(
    State(state): State<ApiState>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<EventRecord>> {
    let records = match query.since {
        Some(since) => state.events.since(since),
        None => state.events.snapshot(),
    };
    Json(records)
}

// ---------------------------------------------------------------------------
// Write handlers
// ---------------------------------------------------------------------------

pub async fn post_deposit(
    State(state): State<ApiState>,
    Json(req): Json<DepositRequest>,
) -> ApiResult<DepositResponse> {
    let receiver = req.receiver.unwrap_or_else(|| req.principal.clone());
    let mut vault = state.vault.write().await;
    let shares = vault
        .deposit(&req.principal, req.amount, &receiver)
        .await
        .map_err(error_response)?;
    Ok(Json(DepositResponse { shares }))
}

pub async fn post_withdraw(
    State(state): State<ApiState>,
    Json(req): Json<WithdrawRequest>,
) -> ApiResult<WithdrawResponse> {
    let receiver = req.receiver.unwrap_or_else(|| req.principal.clone());
    let owner = req.owner.unwrap_or_else(|| req.principal.clone());
    let mut vault = state.vault.write().await;
    let amount = vault
        .withdraw(&req.principal, req.shares, &receiver, &owner)
        .await
        .map_err(error_response)?;
    Ok(Json(WithdrawResponse { amount }))
}

pub async fn post_rebalance(State(state): State<ApiState>) -> ApiResult<RebalanceResponse> {
    let mut vault = state.vault.write().await;
    let plan = vault
        .check_yields_and_rebalance()
        .await
        .map_err(error_response)?;
    Ok(Json(match plan {
        Some(plan) => RebalanceResponse {
            rebalanced: true,
            from_venue: Some(plan.from.to_string()),
            to_venue: Some(plan.to.to_string()),
            amount: Some(plan.amount),
        },
        None => RebalanceResponse {
            rebalanced: false,
            from_venue: None,
            to_venue: None,
            amount: None,
        },
    }))
}

pub async fn post_threshold(
    State(state): State<ApiState>,
    Json(req): Json<ThresholdRequest>,
) -> ApiResult<ThresholdResponse> {
    let mut vault = state.vault.write().await;
    vault
        .update_rebalance_threshold(&req.principal, req.value)
        .map_err(error_response)?;
    Ok(Json(ThresholdResponse {
        rebalance_threshold_bps: vault.policy().config().rebalance_threshold_bps,
    }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn share_price(total_assets: Amount, total_shares: Amount) -> Decimal {
    if total_shares == 0 {
        return Decimal::ONE;
    }
    match (
        Decimal::from_u128(total_assets),
        Decimal::from_u128(total_shares),
    ) {
        (Some(assets), Some(shares)) if !shares.is_zero() => assets / shares,
        _ => Decimal::ONE,
    }
}

fn bps_to_pct(bps: u64) -> Decimal {
    Decimal::from(bps) / dec!(100)
}

fn error_response(err: VaultError) -> ApiError {
    let status = match &err {
        VaultError::NotAuthorized { .. } => StatusCode::FORBIDDEN,
        VaultError::AlreadyPaused
        | VaultError::AlreadyActive
        | VaultError::MonitoringPaused
        | VaultError::VaultPaused => StatusCode::CONFLICT,
        VaultError::Venue { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::BAD_REQUEST,
    };
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::build_router;
    use crate::engine::RebalanceEngine;
    use crate::oracle::YieldOracle;
    use crate::policy::{PolicyConfig, PolicyStore};
    use crate::venues::fixed::FixedRateVenue;
    use crate::venues::LendingVenue;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_state() -> ApiState {
        let venue_a = Arc::new(FixedRateVenue::with_apy_bps("aave-pool", 500));
        let venue_b = Arc::new(FixedRateVenue::with_apy_bps("compound-pool", 500));
        let events = Arc::new(EventLog::new());
        let owner = Principal::from("owner");

        let policy = PolicyStore::with_config(
            owner.clone(),
            PolicyConfig {
                min_deposit_amount: 10,
                ..Default::default()
            },
            Arc::clone(&events),
        );
        let oracle = YieldOracle::new(
            venue_a.clone() as Arc<dyn LendingVenue>,
            venue_b.clone() as Arc<dyn LendingVenue>,
            owner,
        );
        let engine = RebalanceEngine::new(oracle, Arc::clone(&events));
        let vault = Vault::new(
            venue_a as Arc<dyn LendingVenue>,
            venue_b as Arc<dyn LendingVenue>,
            policy,
            engine,
            Arc::clone(&events),
        );

        ApiState {
            vault: Arc::new(RwLock::new(vault)),
            events,
        }
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let app = build_router(make_state());
        let response = app
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("\"total_assets\":0"));
        assert!(body.contains("\"paused\":false"));
    }

    #[tokio::test]
    async fn test_deposit_then_status() {
        let state = make_state();
        let app = build_router(state.clone());

        let request = Request::builder()
            .method("POST")
            .uri("/api/deposit")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"principal":"alice","amount":100}"#,
            ))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("\"shares\":100"));

        let response = app
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_string(response).await;
        assert!(body.contains("\"total_assets\":100"));
    }

    #[tokio::test]
    async fn test_deposit_below_minimum_is_bad_request() {
        let app = build_router(make_state());
        let request = Request::builder()
            .method("POST")
            .uri("/api/deposit")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"principal":"alice","amount":1}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_string(response).await;
        assert!(body.contains("below minimum"));
    }

    #[tokio::test]
    async fn test_threshold_update_authorization() {
        let app = build_router(make_state());
        let request = Request::builder()
            .method("POST")
            .uri("/api/policy/threshold")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"principal":"mallory","value":75}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_yields_endpoint() {
        let app = build_router(make_state());
        let response = app
            .oneshot(Request::builder().uri("/api/yields").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("\"apy_a_bps\":500"));
        assert!(body.contains("\"divergence_bps\":0"));
    }

    #[test]
    fn test_share_price_math() {
        assert_eq!(share_price(0, 0), Decimal::ONE);
        assert_eq!(share_price(505, 500), dec!(1.01));
        assert_eq!(bps_to_pct(500), dec!(5));
        assert_eq!(bps_to_pct(510), dec!(5.1));
    }
}
