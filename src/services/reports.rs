//! Read-only loan listings

use super::{loan_records::loan_not_found, LendingContext};
use crate::{
    error::AppResult,
    models::{
        book::BookShort,
        loan::{late_days, LoanDetails, LoanFilter, LoanScope},
        user::UserClaims,
    },
};

#[derive(Clone)]
pub struct ReportsService {
    ctx: LendingContext,
}

impl ReportsService {
    pub fn new(ctx: LendingContext) -> Self {
        Self { ctx }
    }

    /// Every loan of a user, newest first
    pub async fn list_for_user(&self, user_id: i32) -> AppResult<Vec<LoanDetails>> {
        self.list(LoanFilter::for_user(user_id)).await
    }

    pub async fn list_all(&self, caller: &UserClaims) -> AppResult<Vec<LoanDetails>> {
        caller.require_admin()?;
        self.list(LoanFilter::scope(LoanScope::All)).await
    }

    /// Loans with copies still out
    pub async fn list_active(&self, caller: &UserClaims) -> AppResult<Vec<LoanDetails>> {
        caller.require_admin()?;
        self.list(LoanFilter::scope(LoanScope::Active)).await
    }

    /// Open loans past their due date, with the days late as of now
    pub async fn list_overdue(&self, caller: &UserClaims) -> AppResult<Vec<LoanDetails>> {
        caller.require_admin()?;
        let now = self.ctx.now();
        let mut loans = self.list(LoanFilter::scope(LoanScope::OverdueAt(now))).await?;
        for loan in &mut loans {
            loan.late_days = Some(late_days(loan.due_date, now));
        }
        Ok(loans)
    }

    /// Single loan, visible to its owner and to admins
    pub async fn get_loan(&self, caller: &UserClaims, loan_id: i32) -> AppResult<LoanDetails> {
        let loan = self
            .ctx
            .repository
            .get_loan(loan_id)
            .await?
            .ok_or_else(|| loan_not_found(loan_id))?;
        caller.require_self_or_admin(loan.user_id)?;

        let book = self
            .ctx
            .repository
            .get_book(loan.book_id)
            .await?
            .map(|b| BookShort::from(&b))
            .unwrap_or_else(|| BookShort {
                id: loan.book_id,
                title: String::new(),
                author: String::new(),
            });

        Ok(LoanDetails::new(loan, book, self.ctx.now()))
    }

    async fn list(&self, filter: LoanFilter) -> AppResult<Vec<LoanDetails>> {
        let now = self.ctx.now();
        let rows = self.ctx.repository.list_loans(filter).await?;
        Ok(rows
            .into_iter()
            .map(|(loan, book)| LoanDetails::new(loan, book, now))
            .collect())
    }
}
