use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{labordtos::ApiResponse, walletdtos::*},
    error::HttpError,
    middleware::{role_check, JWTAuthMiddleware},
    models::usermodel::UserRole,
    service::notification_service::EngineEvent,
    utils::currency::format_minor_units,
    AppState,
};

const DEFAULT_PAGE_SIZE: i64 = 20;
const DEFAULT_STATS_PERIOD_DAYS: i64 = 30;

pub fn wallet_handler() -> Router {
    Router::new()
        .route("/", get(get_wallet))
        .route("/transactions", get(get_transaction_history))
        .route("/stats", get(get_wallet_stats))
        .route(
            "/fund",
            post(fund_wallet).layer(middleware::from_fn(|state, req, next| {
                role_check(state, req, next, vec![UserRole::Admin])
            })),
        )
        .route(
            "/payouts/run",
            post(run_payouts).layer(middleware::from_fn(|state, req, next| {
                role_check(state, req, next, vec![UserRole::Admin])
            })),
        )
        .route(
            "/:wallet_id/deactivate",
            post(deactivate_wallet).layer(middleware::from_fn(|state, req, next| {
                role_check(state, req, next, vec![UserRole::Admin])
            })),
        )
}

pub async fn get_wallet(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
) -> Result<impl IntoResponse, HttpError> {
    let wallet = app_state.ledger_service.wallet_for_owner(auth.user.id).await?;

    Ok(Json(ApiResponse::success(
        "Wallet retrieved successfully",
        WalletResponseDto::from(wallet),
    )))
}

pub async fn get_transaction_history(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Query(query): Query<TransactionHistoryQueryDto>,
) -> Result<impl IntoResponse, HttpError> {
    query.validate().map_err(|e| HttpError::bad_request(e.to_string()))?;

    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);

    let wallet = app_state.ledger_service.wallet_for_owner(auth.user.id).await?;
    let entries = app_state
        .ledger_service
        .transactions(wallet.id, limit, offset)
        .await?;

    Ok(Json(ApiResponse::success(
        "Transactions retrieved successfully",
        TransactionHistoryDto {
            entries: entries.into_iter().map(LedgerEntryDto::from).collect(),
            limit,
            offset,
        },
    )))
}

pub async fn get_wallet_stats(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Query(query): Query<WalletStatsQueryDto>,
) -> Result<impl IntoResponse, HttpError> {
    query.validate().map_err(|e| HttpError::bad_request(e.to_string()))?;

    let period_days = query.period_days.unwrap_or(DEFAULT_STATS_PERIOD_DAYS);
    let wallet = app_state.ledger_service.wallet_for_owner(auth.user.id).await?;
    let stats = app_state.ledger_service.stats(wallet.id, period_days).await?;

    Ok(Json(ApiResponse::success(
        "Wallet statistics retrieved successfully",
        WalletStatsDto::new(stats, period_days),
    )))
}

/// Runs one payout pass now instead of waiting for the next tick.
pub async fn run_payouts(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
) -> Result<impl IntoResponse, HttpError> {
    tracing::info!(admin_id = %auth.user.id, "manual payout run requested");
    let summary = app_state.payout_scheduler().run_once().await?;

    Ok(Json(ApiResponse::success("Payout run completed", summary)))
}

/// Trusted top-up. A repeated `reference` replays the original credit.
pub async fn fund_wallet(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Json(body): Json<FundWalletDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(|e| HttpError::bad_request(e.to_string()))?;

    let mutation = app_state
        .ledger_service
        .fund_owner(body.owner_id, body.amount, body.reference)
        .await?;

    if !mutation.replayed {
        tracing::info!(
            admin_id = %auth.user.id,
            owner_id = %body.owner_id,
            amount = %format_minor_units(body.amount, &mutation.wallet.currency),
            "wallet funded"
        );
        app_state
            .notifications
            .publish(EngineEvent::WalletFunded {
                wallet_id: mutation.wallet.id,
                owner_id: body.owner_id,
                amount: body.amount,
            });
    }

    let message = if mutation.replayed {
        "Funding already applied"
    } else {
        "Wallet funded successfully"
    };
    Ok(Json(ApiResponse::success(message, WalletResponseDto::from(mutation.wallet))))
}

pub async fn deactivate_wallet(
    Extension(app_state): Extension<Arc<AppState>>,
    Path(wallet_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let wallet = app_state.ledger_service.deactivate(wallet_id).await?;

    Ok(Json(ApiResponse::success(
        "Wallet deactivated",
        WalletResponseDto::from(wallet),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::testing::{send, TestApp};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn funding_is_admin_only_and_idempotent() {
        let app = TestApp::new();
        let owner = Uuid::new_v4();
        let admin_token = app.token(Uuid::new_v4(), UserRole::Admin);
        let owner_token = app.token(owner, UserRole::Employer);
        let body = json!({ "owner_id": owner, "amount": 25_000, "reference": "bank-42" });

        let (status, _) = send(&app.router, "POST", "/api/wallet/fund", Some(&owner_token), Some(body.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, first) = send(&app.router, "POST", "/api/wallet/fund", Some(&admin_token), Some(body.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["data"]["balance"], 25_000);

        let (status, second) = send(&app.router, "POST", "/api/wallet/fund", Some(&admin_token), Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["message"], "Funding already applied");
        assert_eq!(second["data"]["balance"], 25_000);

        let (_, wallet) = send(&app.router, "GET", "/api/wallet", Some(&owner_token), None).await;
        assert_eq!(wallet["data"]["available_balance"], 25_000);
    }

    #[tokio::test]
    async fn non_positive_funding_is_rejected() {
        let app = TestApp::new();
        let admin_token = app.token(Uuid::new_v4(), UserRole::Admin);

        let (status, body) = send(
            &app.router,
            "POST",
            "/api/wallet/fund",
            Some(&admin_token),
            Some(json!({ "owner_id": Uuid::new_v4(), "amount": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_kind"], "ValidationError");
    }

    #[tokio::test]
    async fn transactions_are_paginated() {
        let app = TestApp::new();
        let owner = Uuid::new_v4();
        let admin_token = app.token(Uuid::new_v4(), UserRole::Admin);
        let owner_token = app.token(owner, UserRole::Employee);

        for reference in ["a", "b", "c"] {
            send(
                &app.router,
                "POST",
                "/api/wallet/fund",
                Some(&admin_token),
                Some(json!({ "owner_id": owner, "amount": 1_000, "reference": reference })),
            )
            .await;
        }

        let (status, body) = send(
            &app.router,
            "GET",
            "/api/wallet/transactions?limit=2&offset=0",
            Some(&owner_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["entries"].as_array().unwrap().len(), 2);
        assert_eq!(body["data"]["entries"][0]["balance_after"], 3_000);

        let (status, _) = send(
            &app.router,
            "GET",
            "/api/wallet/transactions?limit=500",
            Some(&owner_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stats_cover_the_requested_period() {
        let app = TestApp::new();
        let owner = Uuid::new_v4();
        let admin_token = app.token(Uuid::new_v4(), UserRole::Admin);
        let owner_token = app.token(owner, UserRole::Employee);

        for (reference, amount) in [("s-1", 2_000), ("s-2", 3_000)] {
            send(
                &app.router,
                "POST",
                "/api/wallet/fund",
                Some(&admin_token),
                Some(json!({ "owner_id": owner, "amount": amount, "reference": reference })),
            )
            .await;
        }

        let (status, body) = send(&app.router, "GET", "/api/wallet/stats", Some(&owner_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["period_days"], 30);
        assert_eq!(body["data"]["wallet"]["balance"], 5_000);
        assert_eq!(body["data"]["totals"][0]["kind"], "credit");
        assert_eq!(body["data"]["totals"][0]["count"], 2);
        assert_eq!(body["data"]["totals"][0]["total_amount"], 5_000);
        assert_eq!(body["data"]["monthly_credits"][0]["total_amount"], 5_000);

        let (status, _) = send(
            &app.router,
            "GET",
            "/api/wallet/stats?period_days=400",
            Some(&owner_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn manual_payout_run_is_admin_only() {
        let app = TestApp::new();
        let admin_token = app.token(Uuid::new_v4(), UserRole::Admin);
        let employer_token = app.token(Uuid::new_v4(), UserRole::Employer);

        let (status, _) = send(&app.router, "POST", "/api/wallet/payouts/run", Some(&employer_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&app.router, "POST", "/api/wallet/payouts/run", Some(&admin_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Payout run completed");
        assert_eq!(body["data"]["settled"], 0);
        assert_eq!(body["data"]["failed"], 0);
    }

    #[tokio::test]
    async fn missing_wallet_is_not_found() {
        let app = TestApp::new();
        let token = app.token(Uuid::new_v4(), UserRole::Employee);

        let (status, body) = send(&app.router, "GET", "/api/wallet", Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_kind"], "NotFound");
    }

    #[tokio::test]
    async fn deactivation_needs_free_funds() {
        let app = TestApp::new();
        let owner = Uuid::new_v4();
        let admin_token = app.token(Uuid::new_v4(), UserRole::Admin);

        let (_, funded) = send(
            &app.router,
            "POST",
            "/api/wallet/fund",
            Some(&admin_token),
            Some(json!({ "owner_id": owner, "amount": 5_000 })),
        )
        .await;
        let wallet_id = funded["data"]["id"].as_str().unwrap().to_string();
        let wallet_uuid = Uuid::parse_str(&wallet_id).unwrap();
        app.state.ledger_service.reserve(wallet_uuid, 1_000, None, "test:reserve").await.unwrap();

        let uri = format!("/api/wallet/{}/deactivate", wallet_id);
        let (status, _) = send(&app.router, "POST", &uri, Some(&admin_token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        app.state.ledger_service.release(wallet_uuid, 1_000, None, "test:release").await.unwrap();
        let (status, body) = send(&app.router, "POST", &uri, Some(&admin_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["is_active"], false);
    }
}
