//! Loan record manager: creation and incremental return of loan rows

use chrono::{DateTime, Utc};

use crate::{
    error::{AppError, AppResult},
    models::loan::{Loan, NewLoan},
    repository::LendingTx,
};

pub struct LoanRecords;

impl LoanRecords {
    /// Insert a fresh loan due `period_days` after `now`
    pub async fn create_loan(
        tx: &mut dyn LendingTx,
        user_id: i32,
        book_id: i32,
        quantity: i32,
        now: DateTime<Utc>,
        period_days: i64,
    ) -> AppResult<Loan> {
        tx.insert_loan(&NewLoan::new(user_id, book_id, quantity, now, period_days))
            .await
    }

    /// Load a loan with its row locked for the rest of the transaction
    pub async fn load_for_update(tx: &mut dyn LendingTx, loan_id: i32) -> AppResult<Loan> {
        tx.lock_loan(loan_id)
            .await?
            .ok_or_else(|| loan_not_found(loan_id))
    }

    /// Take back up to `quantity` copies (all remaining when `None`) and
    /// persist the loan. Returns the updated loan and the accepted quantity.
    pub async fn apply_return(
        tx: &mut dyn LendingTx,
        mut loan: Loan,
        quantity: Option<i32>,
        now: DateTime<Utc>,
    ) -> AppResult<(Loan, i32)> {
        let accepted = loan.apply_return(quantity, now)?;
        tx.save_loan_return(&loan).await?;
        Ok((loan, accepted))
    }
}

pub(crate) fn loan_not_found(loan_id: i32) -> AppError {
    AppError::NotFound(format!("Loan with id {} not found", loan_id))
}
