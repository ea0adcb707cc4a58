//! Loan model and related types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::book::BookShort;
use crate::error::{AppError, AppResult};

/// Loan row: one user borrowing some copies of one book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Loan {
    pub id: i32,
    pub user_id: i32,
    pub book_id: i32,
    pub borrowed_quantity: i32,
    pub returned_quantity: i32,
    pub loan_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    /// Set once every copy is back
    pub return_date: Option<DateTime<Utc>>,
    pub returned: bool,
    /// Frozen at full return
    pub late_days: Option<i32>,
}

impl Loan {
    /// Copies still out on this loan
    pub fn remaining(&self) -> i32 {
        self.borrowed_quantity - self.returned_quantity
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.returned && self.due_date < now
    }

    /// Record the return of `quantity` copies (all remaining copies when `None`).
    ///
    /// Requests above the remaining count are clamped. Returns the number of
    /// copies actually taken back, which is what the inventory must receive.
    pub fn apply_return(&mut self, quantity: Option<i32>, now: DateTime<Utc>) -> AppResult<i32> {
        if self.returned {
            return Err(AppError::AlreadyReturned(format!(
                "Loan {} is already returned",
                self.id
            )));
        }

        let remaining = self.remaining();
        let requested = match quantity {
            Some(q) if q <= 0 => {
                return Err(AppError::InvalidQuantity(format!(
                    "Return quantity must be positive, got {}",
                    q
                )))
            }
            Some(q) => q,
            None => remaining,
        };
        let accepted = requested.min(remaining);

        self.returned_quantity += accepted;
        if self.returned_quantity == self.borrowed_quantity {
            self.returned = true;
            self.return_date = Some(now);
            self.late_days = Some(late_days(self.due_date, now));
        }

        Ok(accepted)
    }
}

/// Parameters of a loan about to be inserted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLoan {
    pub user_id: i32,
    pub book_id: i32,
    pub quantity: i32,
    pub loan_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
}

impl NewLoan {
    pub fn new(user_id: i32, book_id: i32, quantity: i32, now: DateTime<Utc>, period_days: i64) -> Self {
        Self {
            user_id,
            book_id,
            quantity,
            loan_date: now,
            due_date: now + Duration::days(period_days),
        }
    }
}

/// Whole days elapsed past `due`, never negative
pub fn late_days(due: DateTime<Utc>, at: DateTime<Utc>) -> i32 {
    (at - due).num_days().max(0) as i32
}

/// Loan joined with its book, as listed to clients
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoanDetails {
    pub id: i32,
    pub user_id: i32,
    pub book: BookShort,
    pub borrowed_quantity: i32,
    pub returned_quantity: i32,
    pub loan_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
    pub returned: bool,
    /// Stored value for returned loans, computed on the fly in overdue listings
    pub late_days: Option<i32>,
    pub is_overdue: bool,
}

impl LoanDetails {
    pub fn new(loan: Loan, book: BookShort, now: DateTime<Utc>) -> Self {
        let is_overdue = loan.is_overdue(now);
        Self {
            id: loan.id,
            user_id: loan.user_id,
            book,
            borrowed_quantity: loan.borrowed_quantity,
            returned_quantity: loan.returned_quantity,
            loan_date: loan.loan_date,
            due_date: loan.due_date,
            return_date: loan.return_date,
            returned: loan.returned,
            late_days: loan.late_days,
            is_overdue,
        }
    }
}

/// Which loans a listing covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanScope {
    All,
    Active,
    /// Active and due before the given instant
    OverdueAt(DateTime<Utc>),
}

/// Loan listing filter handed to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoanFilter {
    pub user_id: Option<i32>,
    pub scope: LoanScope,
}

impl LoanFilter {
    pub fn for_user(user_id: i32) -> Self {
        Self {
            user_id: Some(user_id),
            scope: LoanScope::All,
        }
    }

    pub fn scope(scope: LoanScope) -> Self {
        Self { user_id: None, scope }
    }

    pub fn matches(&self, loan: &Loan) -> bool {
        if self.user_id.is_some_and(|id| id != loan.user_id) {
            return false;
        }
        match self.scope {
            LoanScope::All => true,
            LoanScope::Active => !loan.returned,
            LoanScope::OverdueAt(now) => loan.is_overdue(now),
        }
    }
}

/// One line of a borrow request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct BorrowItem {
    pub book_id: i32,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

/// One line of a batch return request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ReturnItem {
    pub loan_id: i32,
    /// Defaults to every remaining copy
    pub quantity: Option<i32>,
}

/// Per-item result of a batch return
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReturnResult {
    pub loan_id: i32,
    #[serde(flatten)]
    pub outcome: ReturnOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReturnOutcome {
    /// Copies were taken back
    Returned { returned_quantity: i32, loan: Loan },
    /// Item left untouched; `error` is the error kind
    Skipped { error: String, message: String },
}

impl ReturnResult {
    pub fn is_returned(&self) -> bool {
        matches!(self.outcome, ReturnOutcome::Returned { .. })
    }
}

/// Status filter of the admin loan listing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatusFilter {
    #[default]
    All,
    Active,
    Overdue,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LoanQuery {
    pub status: Option<LoanStatusFilter>,
}
