// handler/labour.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post, put, MethodRouter},
    Extension, Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::labordtos::*,
    error::HttpError,
    middleware::{role_check, JWTAuthMiddleware},
    models::{labourmodel::ApplicationStatus, usermodel::UserRole},
    AppState,
};

const EMPLOYER: &[UserRole] = &[UserRole::Employer];
const EMPLOYEE: &[UserRole] = &[UserRole::Employee];

fn restricted(route: MethodRouter, roles: &'static [UserRole]) -> MethodRouter {
    route.layer(middleware::from_fn(move |state, req, next| {
        role_check(state, req, next, roles.to_vec())
    }))
}

pub fn labour_handler() -> Router {
    Router::new()
        // Jobs
        .route("/jobs", restricted(post(create_job), EMPLOYER))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/status", restricted(put(update_job_status), EMPLOYER))
        .route("/jobs/:job_id/applications", restricted(post(apply_to_job), EMPLOYEE))
        .route("/jobs/:job_id/applications", restricted(get(get_job_applications), EMPLOYER))
        // Applications
        .route("/applications", get(get_my_applications))
        .route("/applications/:application_id", get(get_application))
        .route("/applications/:application_id/offer", restricted(post(make_offer), EMPLOYER))
        .route("/applications/:application_id/respond", restricted(post(respond_to_offer), EMPLOYEE))
        .route("/applications/:application_id/reject", restricted(post(reject_application), EMPLOYER))
        .route("/applications/:application_id/withdraw", restricted(post(withdraw_application), EMPLOYEE))
        .route("/applications/:application_id/status", restricted(put(update_application_status), EMPLOYER))
        // Contracts
        .route("/contracts", get(get_my_contracts))
        .route("/contracts/:contract_id", get(get_contract))
        .route("/contracts/:contract_id/terminate", post(terminate_contract))
        .route("/contracts/:contract_id/complete", restricted(post(complete_contract), EMPLOYER))
        .route("/contracts/:contract_id/timesheets", get(get_contract_timesheets))
        // Timesheets
        .route("/timesheets", restricted(post(submit_timesheet), EMPLOYEE))
        .route("/timesheets/pending", restricted(get(get_pending_timesheets), EMPLOYER))
        .route("/timesheets/mine", restricted(get(get_my_timesheets), EMPLOYEE))
        .route("/timesheets/:timesheet_id/approve", restricted(post(approve_timesheet), EMPLOYER))
        .route("/timesheets/:timesheet_id/reject", restricted(post(reject_timesheet), EMPLOYER))
}

// Job Handlers
pub async fn create_job(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Json(body): Json<CreateJobDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(|e| HttpError::bad_request(e.to_string()))?;

    let job = app_state.job_service.create_job(body.into_new_job(auth.user.id)).await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success("Job created successfully", job))))
}

pub async fn get_job(
    Extension(app_state): Extension<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let job = app_state.job_service.get_job(job_id).await?;

    Ok(Json(ApiResponse::success("Job retrieved successfully", job)))
}

pub async fn update_job_status(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Path(job_id): Path<Uuid>,
    Json(body): Json<UpdateJobStatusDto>,
) -> Result<impl IntoResponse, HttpError> {
    let job = app_state
        .job_service
        .set_job_status(job_id, auth.user.id, body.status)
        .await?;

    Ok(Json(ApiResponse::success("Job status updated successfully", job)))
}

// Application Handlers
pub async fn apply_to_job(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Path(job_id): Path<Uuid>,
    Json(body): Json<CreateJobApplicationDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(|e| HttpError::bad_request(e.to_string()))?;

    let application = app_state
        .application_service
        .submit(job_id, auth.user.id, body.cover_letter)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("Application submitted successfully", application)),
    ))
}

pub async fn get_job_applications(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let applications = app_state
        .application_service
        .job_applications(job_id, auth.user.id)
        .await?;

    Ok(Json(ApiResponse::success("Applications retrieved successfully", applications)))
}

pub async fn get_my_applications(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
) -> Result<impl IntoResponse, HttpError> {
    let applications = app_state.application_service.my_applications(auth.user.id).await?;

    Ok(Json(ApiResponse::success("Applications retrieved successfully", applications)))
}

pub async fn get_application(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Path(application_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let application = app_state
        .application_service
        .get(application_id, auth.user)
        .await?;

    Ok(Json(ApiResponse::success("Application retrieved successfully", application)))
}

pub async fn make_offer(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Path(application_id): Path<Uuid>,
    Json(body): Json<MakeOfferDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(|e| HttpError::bad_request(e.to_string()))?;

    let application = app_state
        .application_service
        .make_offer(application_id, auth.user.id, body.offer_amount)
        .await?;

    Ok(Json(ApiResponse::success("Offer sent successfully", application)))
}

pub async fn respond_to_offer(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Path(application_id): Path<Uuid>,
    Json(body): Json<RespondOfferDto>,
) -> Result<impl IntoResponse, HttpError> {
    let application = app_state
        .application_service
        .respond(application_id, auth.user.id, body.accept)
        .await?;

    let message = if body.accept { "Offer accepted" } else { "Offer declined" };
    Ok(Json(ApiResponse::success(message, application)))
}

pub async fn reject_application(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Path(application_id): Path<Uuid>,
    Json(body): Json<RejectApplicationDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(|e| HttpError::bad_request(e.to_string()))?;

    let application = app_state
        .application_service
        .reject(application_id, auth.user.id, body.reason)
        .await?;

    Ok(Json(ApiResponse::success("Application rejected", application)))
}

pub async fn withdraw_application(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Path(application_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let application = app_state
        .application_service
        .withdraw(application_id, auth.user.id)
        .await?;

    Ok(Json(ApiResponse::success("Application withdrawn", application)))
}

/// `accepted` confirms the hire and returns the new contract.
pub async fn update_application_status(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Path(application_id): Path<Uuid>,
    Json(body): Json<UpdateApplicationStatusDto>,
) -> Result<axum::response::Response, HttpError> {
    body.validate().map_err(|e| HttpError::bad_request(e.to_string()))?;

    match body.status {
        ApplicationStatus::Accepted => {
            let contract = app_state
                .contract_service
                .create_from_application(application_id, auth.user.id)
                .await?;

            Ok((
                StatusCode::CREATED,
                Json(ApiResponse::success("Contract created and budget reserved", contract)),
            )
                .into_response())
        }
        ApplicationStatus::Rejected => {
            let application = app_state
                .application_service
                .reject(application_id, auth.user.id, body.reason)
                .await?;

            Ok(Json(ApiResponse::success("Application rejected", application)).into_response())
        }
        other => Err(HttpError::bad_request(format!(
            "status {} cannot be set by the employer",
            other.to_str()
        ))),
    }
}

// Contract Handlers
pub async fn get_my_contracts(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Query(filter): Query<ContractFilterQuery>,
) -> Result<impl IntoResponse, HttpError> {
    let contracts = app_state
        .contract_service
        .list_for_user(auth.user.id, filter.status)
        .await?;

    Ok(Json(ApiResponse::success("Contracts retrieved successfully", contracts)))
}

pub async fn get_contract(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Path(contract_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let contract = app_state.contract_service.get(contract_id, auth.user.id).await?;

    Ok(Json(ApiResponse::success("Contract retrieved successfully", contract)))
}

pub async fn terminate_contract(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Path(contract_id): Path<Uuid>,
    Json(body): Json<TerminateContractDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(|e| HttpError::bad_request(e.to_string()))?;

    let contract = app_state
        .contract_service
        .terminate(contract_id, auth.user.id, body.reason)
        .await?;

    Ok(Json(ApiResponse::success("Contract terminated", contract)))
}

pub async fn complete_contract(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Path(contract_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let contract = app_state.contract_service.complete(contract_id, auth.user.id).await?;

    Ok(Json(ApiResponse::success("Contract completed", contract)))
}

pub async fn get_contract_timesheets(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Path(contract_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let timesheets = app_state
        .timesheet_service
        .contract_timesheets(contract_id, auth.user.id)
        .await?;

    Ok(Json(ApiResponse::success("Timesheets retrieved successfully", timesheets)))
}

// Timesheet Handlers
pub async fn submit_timesheet(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Json(body): Json<SubmitTimesheetDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(|e| HttpError::bad_request(e.to_string()))?;

    let timesheet = app_state
        .timesheet_service
        .submit(
            body.contract_id,
            auth.user.id,
            body.period_label,
            body.hours_worked,
            body.description,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("Timesheet submitted successfully", timesheet)),
    ))
}

pub async fn get_pending_timesheets(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
) -> Result<impl IntoResponse, HttpError> {
    let timesheets = app_state.timesheet_service.pending_for_employer(auth.user.id).await?;

    Ok(Json(ApiResponse::success("Pending timesheets retrieved successfully", timesheets)))
}

pub async fn get_my_timesheets(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
) -> Result<impl IntoResponse, HttpError> {
    let timesheets = app_state.timesheet_service.for_employee(auth.user.id).await?;

    Ok(Json(ApiResponse::success("Timesheets retrieved successfully", timesheets)))
}

pub async fn approve_timesheet(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Path(timesheet_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let timesheet = app_state
        .timesheet_service
        .approve(timesheet_id, auth.user.id)
        .await?;

    Ok(Json(ApiResponse::success("Timesheet approved and paid", timesheet)))
}

pub async fn reject_timesheet(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Path(timesheet_id): Path<Uuid>,
    Json(body): Json<RejectTimesheetDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(|e| HttpError::bad_request(e.to_string()))?;

    let timesheet = app_state
        .timesheet_service
        .reject(timesheet_id, auth.user.id, body.reason)
        .await?;

    Ok(Json(ApiResponse::success("Timesheet rejected", timesheet)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::testing::{send, TestApp};
    use serde_json::json;

    #[tokio::test]
    async fn application_is_visible_to_both_parties_only() {
        let app = TestApp::new();
        let (employer, employee) = (Uuid::new_v4(), Uuid::new_v4());
        let employer_token = app.token(employer, UserRole::Employer);
        let employee_token = app.token(employee, UserRole::Employee);
        let outsider_token = app.token(Uuid::new_v4(), UserRole::Employer);

        let (_, body) = send(
            &app.router,
            "POST",
            "/api/jobs",
            Some(&employer_token),
            Some(json!({ "title": "Courier", "hourly_rate": 800, "hours_per_week": 20 })),
        )
        .await;
        let job_id = body["data"]["id"].as_str().unwrap().to_string();

        let (_, body) = send(
            &app.router,
            "POST",
            &format!("/api/jobs/{}/applications", job_id),
            Some(&employee_token),
            Some(json!({ "cover_letter": "I have a bike" })),
        )
        .await;
        let uri = format!("/api/applications/{}", body["data"]["id"].as_str().unwrap());

        for token in [&employee_token, &employer_token] {
            let (status, body) = send(&app.router, "GET", &uri, Some(token), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["data"]["status"], "pending");
        }

        let (status, body) = send(&app.router, "GET", &uri, Some(&outsider_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error_kind"], "Forbidden");
    }

    #[tokio::test]
    async fn hire_and_pay_over_http() {
        let app = TestApp::new();
        let (employer, employee, admin) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let employer_token = app.token(employer, UserRole::Employer);
        let employee_token = app.token(employee, UserRole::Employee);
        let admin_token = app.token(admin, UserRole::Admin);

        let (status, _) = send(
            &app.router,
            "POST",
            "/api/wallet/fund",
            Some(&admin_token),
            Some(json!({ "owner_id": employer, "amount": 50_000, "reference": "bank-001" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app.router,
            "POST",
            "/api/jobs",
            Some(&employer_token),
            Some(json!({ "title": "Barista", "hourly_rate": 1_000, "hours_per_week": 10 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let job_id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app.router,
            "POST",
            &format!("/api/jobs/{}/applications", job_id),
            Some(&employee_token),
            Some(json!({ "cover_letter": "Three years behind the bar" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let application_id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, _) = send(
            &app.router,
            "POST",
            &format!("/api/applications/{}/offer", application_id),
            Some(&employer_token),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            &app.router,
            "POST",
            &format!("/api/applications/{}/respond", application_id),
            Some(&employee_token),
            Some(json!({ "accept": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app.router,
            "PUT",
            &format!("/api/applications/{}/status", application_id),
            Some(&employer_token),
            Some(json!({ "status": "accepted" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["locked_amount"], 10_000);
        let contract_id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app.router,
            "POST",
            "/api/timesheets",
            Some(&employee_token),
            Some(json!({ "contract_id": contract_id, "period_label": "2024-W01", "hours_worked": 10 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let timesheet_id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app.router,
            "POST",
            &format!("/api/timesheets/{}/approve", timesheet_id),
            Some(&employer_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "paid");
        assert_eq!(body["data"]["amount"], 10_000);

        let (_, body) = send(&app.router, "GET", "/api/wallet", Some(&employer_token), None).await;
        assert_eq!(body["data"]["balance"], 40_000);
        assert_eq!(body["data"]["locked_amount"], 0);

        let (_, body) = send(&app.router, "GET", "/api/wallet", Some(&employee_token), None).await;
        assert_eq!(body["data"]["balance"], 10_000);
    }

    #[tokio::test]
    async fn requests_without_a_token_are_unauthorized() {
        let app = TestApp::new();

        let (status, body) = send(&app.router, "GET", "/api/applications", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["status"], "error");
        assert_eq!(body["error_kind"], "Unauthorized");

        let (status, _) = send(&app.router, "GET", "/api/applications", Some("not-a-jwt"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn employees_cannot_post_jobs() {
        let app = TestApp::new();
        let token = app.token(Uuid::new_v4(), UserRole::Employee);

        let (status, body) = send(
            &app.router,
            "POST",
            "/api/jobs",
            Some(&token),
            Some(json!({ "title": "Barista", "hourly_rate": 1_000, "hours_per_week": 10 })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error_kind"], "Forbidden");
    }

    #[tokio::test]
    async fn service_errors_carry_their_kind() {
        let app = TestApp::new();
        let token = app.token(Uuid::new_v4(), UserRole::Employer);

        let (status, body) = send(
            &app.router,
            "GET",
            &format!("/api/jobs/{}", Uuid::new_v4()),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_kind"], "NotFound");

        let (status, body) = send(
            &app.router,
            "POST",
            "/api/jobs",
            Some(&token),
            Some(json!({ "title": "", "hourly_rate": 1_000, "hours_per_week": 10 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_kind"], "ValidationError");
    }

    #[tokio::test]
    async fn unfunded_confirmation_is_payment_required() {
        let app = TestApp::new();
        let (employer, employee) = (Uuid::new_v4(), Uuid::new_v4());
        let employer_token = app.token(employer, UserRole::Employer);
        let employee_token = app.token(employee, UserRole::Employee);

        let (_, body) = send(
            &app.router,
            "POST",
            "/api/jobs",
            Some(&employer_token),
            Some(json!({ "title": "Driver", "hourly_rate": 1_500, "hours_per_week": 20 })),
        )
        .await;
        let job_id = body["data"]["id"].as_str().unwrap().to_string();
        let (_, body) = send(
            &app.router,
            "POST",
            &format!("/api/jobs/{}/applications", job_id),
            Some(&employee_token),
            Some(json!({})),
        )
        .await;
        let application_id = body["data"]["id"].as_str().unwrap().to_string();
        send(
            &app.router,
            "POST",
            &format!("/api/applications/{}/offer", application_id),
            Some(&employer_token),
            Some(json!({})),
        )
        .await;
        send(
            &app.router,
            "POST",
            &format!("/api/applications/{}/respond", application_id),
            Some(&employee_token),
            Some(json!({ "accept": true })),
        )
        .await;

        let (status, body) = send(
            &app.router,
            "PUT",
            &format!("/api/applications/{}/status", application_id),
            Some(&employer_token),
            Some(json!({ "status": "accepted" })),
        )
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["error_kind"], "InsufficientFunds");
    }
}
