//! Loan endpoints: borrowing, returns and listings

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::loan::{
        BorrowItem, Loan, LoanDetails, LoanQuery, LoanStatusFilter, ReturnItem, ReturnResult,
    },
};

use super::AuthenticatedUser;

/// Borrow request for a single book
#[derive(Deserialize, Validate, ToSchema)]
pub struct BorrowRequest {
    pub book_id: i32,
    /// Number of copies
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

/// Borrow request for several books, lent all together or not at all
#[derive(Deserialize, Validate, ToSchema)]
pub struct BorrowBatchRequest {
    #[validate(length(min = 1, message = "At least one item is required"), nested)]
    pub items: Vec<BorrowItem>,
}

/// Return request for a single loan
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ReturnRequest {
    /// Copies to return; every remaining copy when omitted
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: Option<i32>,
}

impl ReturnRequest {
    /// Parse an optional JSON body. Only an empty body means "no quantity";
    /// anything unreadable is rejected before the loan is touched.
    pub fn from_body(body: &[u8]) -> AppResult<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let request: Self = serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("Invalid return request: {}", e)))?;
        request.validate()?;
        Ok(request)
    }
}

/// Batch return request
#[derive(Deserialize, Validate, ToSchema)]
pub struct ReturnBatchRequest {
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<ReturnItem>,
}

/// Borrow copies of a book
#[utoipa::path(
    post,
    path = "/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    request_body = BorrowRequest,
    responses(
        (status = 201, description = "Loan created", body = Loan),
        (status = 400, description = "Invalid quantity"),
        (status = 404, description = "Book not found"),
        (status = 409, description = "Not enough copies available")
    )
)]
pub async fn borrow(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<BorrowRequest>,
) -> AppResult<(StatusCode, Json<Loan>)> {
    request.validate()?;

    let loan = state
        .services
        .borrowing
        .borrow_one(claims.user_id, request.book_id, request.quantity)
        .await?;

    Ok((StatusCode::CREATED, Json(loan)))
}

/// Borrow several books in one all-or-nothing operation
#[utoipa::path(
    post,
    path = "/loans/batch",
    tag = "loans",
    security(("bearer_auth" = [])),
    request_body = BorrowBatchRequest,
    responses(
        (status = 201, description = "Loans created", body = Vec<Loan>),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "A book was not found"),
        (status = 409, description = "A book has not enough copies available")
    )
)]
pub async fn borrow_batch(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<BorrowBatchRequest>,
) -> AppResult<(StatusCode, Json<Vec<Loan>>)> {
    request.validate()?;

    let loans = state
        .services
        .borrowing
        .borrow_many(claims.user_id, &request.items)
        .await?;

    Ok((StatusCode::CREATED, Json(loans)))
}

/// Return some or all copies of a loan
#[utoipa::path(
    post,
    path = "/loans/{id}/return",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Loan ID")),
    request_body(content = ReturnRequest, description = "Optional quantity"),
    responses(
        (status = 200, description = "Return recorded", body = Loan),
        (status = 403, description = "Loan belongs to another user"),
        (status = 404, description = "Loan not found"),
        (status = 409, description = "Loan already returned")
    )
)]
pub async fn return_loan(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<i32>,
    body: Bytes,
) -> AppResult<Json<Loan>> {
    let request = ReturnRequest::from_body(&body)?;

    // Ownership check; the return itself re-reads the loan under lock
    state.services.reports.get_loan(&claims, loan_id).await?;

    let loan = state
        .services
        .returns
        .return_one(loan_id, request.quantity)
        .await?;

    Ok(Json(loan))
}

/// Return several of the caller's loans; failing items are skipped
#[utoipa::path(
    post,
    path = "/loans/returns",
    tag = "loans",
    security(("bearer_auth" = [])),
    request_body = ReturnBatchRequest,
    responses(
        (status = 200, description = "Per-item results", body = Vec<ReturnResult>),
        (status = 400, description = "Invalid request")
    )
)]
pub async fn return_batch(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<ReturnBatchRequest>,
) -> AppResult<Json<Vec<ReturnResult>>> {
    request.validate()?;

    let results = state
        .services
        .returns
        .return_many(claims.user_id, &request.items)
        .await?;

    Ok(Json(results))
}

/// List all, active or overdue loans (administrators)
#[utoipa::path(
    get,
    path = "/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(LoanQuery),
    responses(
        (status = 200, description = "Loans, newest first", body = Vec<LoanDetails>),
        (status = 403, description = "Administrator privileges required")
    )
)]
pub async fn list_loans(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(query): Query<LoanQuery>,
) -> AppResult<Json<Vec<LoanDetails>>> {
    let reports = &state.services.reports;
    let loans = match query.status.unwrap_or_default() {
        LoanStatusFilter::All => reports.list_all(&claims).await?,
        LoanStatusFilter::Active => reports.list_active(&claims).await?,
        LoanStatusFilter::Overdue => reports.list_overdue(&claims).await?,
    };
    Ok(Json(loans))
}

/// Get one loan
#[utoipa::path(
    get,
    path = "/loans/{id}",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Loan ID")),
    responses(
        (status = 200, description = "Loan details", body = LoanDetails),
        (status = 403, description = "Loan belongs to another user"),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn get_loan(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<LoanDetails>> {
    let loan = state.services.reports.get_loan(&claims, loan_id).await?;
    Ok(Json(loan))
}

/// Get every loan of a user
#[utoipa::path(
    get,
    path = "/users/{id}/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "User's loans, newest first", body = Vec<LoanDetails>),
        (status = 403, description = "Not allowed to read this user's loans")
    )
)]
pub async fn get_user_loans(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(user_id): Path<i32>,
) -> AppResult<Json<Vec<LoanDetails>>> {
    claims.require_self_or_admin(user_id)?;

    let loans = state.services.reports.list_for_user(user_id).await?;
    Ok(Json(loans))
}
