//! Return workflow: single and batch returns

use chrono::{DateTime, Utc};

use super::{inventory::InventoryLedger, loan_records::LoanRecords, LendingContext};
use crate::{
    error::{AppError, AppResult},
    models::{
        book::Book,
        loan::{Loan, ReturnItem, ReturnOutcome, ReturnResult},
    },
    repository::LendingTx,
};

#[derive(Clone)]
pub struct ReturnsService {
    ctx: LendingContext,
}

impl ReturnsService {
    pub fn new(ctx: LendingContext) -> Self {
        Self { ctx }
    }

    /// Return `quantity` copies of a loan, or everything still out when `None`
    pub async fn return_one(&self, loan_id: i32, quantity: Option<i32>) -> AppResult<Loan> {
        let now = self.ctx.now();

        let mut tx = self.ctx.repository.begin().await?;
        let loan = LoanRecords::load_for_update(tx.as_mut(), loan_id).await?;
        let (loan, accepted, book) = self.return_in(tx.as_mut(), loan, quantity, now).await?;
        tx.commit().await?;

        tracing::info!(
            loan_id,
            quantity = accepted,
            returned = loan.returned,
            available = book.available_copies,
            "Loan return recorded"
        );
        if loan.returned {
            self.ctx.notifications.publish(format!(
                "User {} returned \"{}\" (loan {}, {} cop{}), {} day(s) late",
                loan.user_id,
                book.title,
                loan.id,
                loan.borrowed_quantity,
                if loan.borrowed_quantity == 1 { "y" } else { "ies" },
                loan.late_days.unwrap_or(0)
            ));
        }

        Ok(loan)
    }

    /// Return several loans of one user. Each item commits on its own; items
    /// that cannot be processed are reported as skipped.
    pub async fn return_many(&self, user_id: i32, items: &[ReturnItem]) -> AppResult<Vec<ReturnResult>> {
        if items.is_empty() {
            return Err(AppError::Validation("At least one item is required".to_string()));
        }
        let now = self.ctx.now();

        let mut results = Vec::with_capacity(items.len());
        let mut processed = Vec::new();

        for item in items {
            let outcome = match self.return_owned(user_id, *item, now).await {
                Ok((loan, accepted, book)) => {
                    processed.push((loan.clone(), accepted, book));
                    ReturnOutcome::Returned {
                        returned_quantity: accepted,
                        loan,
                    }
                }
                Err(e) => {
                    tracing::info!(loan_id = item.loan_id, user_id, error = %e, "Return item skipped");
                    ReturnOutcome::Skipped {
                        error: e.kind(),
                        message: e.public_message(),
                    }
                }
            };
            results.push(ReturnResult {
                loan_id: item.loan_id,
                outcome,
            });
        }

        tracing::info!(
            user_id,
            processed = processed.len(),
            skipped = items.len() - processed.len(),
            "Batch return finished"
        );
        if !processed.is_empty() {
            self.ctx.notifications.publish(summary_message(user_id, &processed));
        }

        Ok(results)
    }

    async fn return_owned(
        &self,
        user_id: i32,
        item: ReturnItem,
        now: DateTime<Utc>,
    ) -> AppResult<(Loan, i32, Book)> {
        let mut tx = self.ctx.repository.begin().await?;
        let loan = LoanRecords::load_for_update(tx.as_mut(), item.loan_id).await?;
        if loan.user_id != user_id {
            return Err(AppError::Authorization(format!(
                "Loan {} does not belong to user {}",
                loan.id, user_id
            )));
        }
        let returned = self.return_in(tx.as_mut(), loan, item.quantity, now).await?;
        tx.commit().await?;
        Ok(returned)
    }

    async fn return_in(
        &self,
        tx: &mut dyn LendingTx,
        loan: Loan,
        quantity: Option<i32>,
        now: DateTime<Utc>,
    ) -> AppResult<(Loan, i32, Book)> {
        let (loan, accepted) = LoanRecords::apply_return(tx, loan, quantity, now).await?;
        let book = InventoryLedger::increment_available(tx, loan.book_id, accepted).await?;
        Ok((loan, accepted, book))
    }
}

fn summary_message(user_id: i32, processed: &[(Loan, i32, Book)]) -> String {
    let mut message = format!("User {} returned {} loan(s):", user_id, processed.len());
    for (loan, accepted, book) in processed {
        let state = if loan.returned {
            format!("complete, {} day(s) late", loan.late_days.unwrap_or(0))
        } else {
            format!("{} still out", loan.remaining())
        };
        message.push_str(&format!(
            "\n- {} × \"{}\" (loan {}, {})",
            accepted, book.title, loan.id, state
        ));
    }
    message
}
