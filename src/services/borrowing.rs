//! Borrowing workflow: single and multi-item borrows

use chrono::{DateTime, Utc};

use super::{
    inventory::{book_not_found, ensure_positive, InventoryLedger},
    loan_records::LoanRecords,
    LendingContext,
};
use crate::{
    error::{AppError, AppResult},
    models::{
        book::Book,
        loan::{BorrowItem, Loan},
    },
    repository::LendingTx,
};

#[derive(Clone)]
pub struct BorrowingService {
    ctx: LendingContext,
}

impl BorrowingService {
    pub fn new(ctx: LendingContext) -> Self {
        Self { ctx }
    }

    /// Borrow `quantity` copies of one book
    pub async fn borrow_one(&self, user_id: i32, book_id: i32, quantity: i32) -> AppResult<Loan> {
        ensure_positive(quantity)?;
        let now = self.ctx.now();

        let mut tx = self.ctx.repository.begin().await?;
        let (loan, book) = self
            .borrow_in(tx.as_mut(), user_id, BorrowItem { book_id, quantity }, now)
            .await?;
        tx.commit().await?;

        tracing::info!(
            loan_id = loan.id,
            user_id,
            book_id,
            quantity,
            available = book.available_copies,
            "Book borrowed"
        );
        self.ctx.notifications.publish(format!(
            "User {} borrowed {} × \"{}\" (loan {}, due {})",
            user_id,
            quantity,
            book.title,
            loan.id,
            loan.due_date.format("%Y-%m-%d")
        ));

        Ok(loan)
    }

    /// Borrow several books at once; either every item is lent or none is
    pub async fn borrow_many(&self, user_id: i32, items: &[BorrowItem]) -> AppResult<Vec<Loan>> {
        validate_items(items)?;
        let now = self.ctx.now();

        let mut tx = self.ctx.repository.begin().await?;
        let rows = self.borrow_all(tx.as_mut(), user_id, items, now).await?;
        tx.commit().await?;

        tracing::info!(user_id, items = rows.len(), "Batch borrowed");
        self.ctx.notifications.publish(batch_message(user_id, &rows));

        Ok(rows.into_iter().map(|(loan, _)| loan).collect())
    }

    /// Lend every item inside `tx`, stopping at the first failure.
    /// The caller drops the transaction on error, which undoes earlier items.
    pub(crate) async fn borrow_all(
        &self,
        tx: &mut dyn LendingTx,
        user_id: i32,
        items: &[BorrowItem],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<(Loan, Book)>> {
        tx.lock_books(&lock_order(items)).await?;

        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            rows.push(self.borrow_in(tx, user_id, *item, now).await?);
        }
        Ok(rows)
    }

    async fn borrow_in(
        &self,
        tx: &mut dyn LendingTx,
        user_id: i32,
        item: BorrowItem,
        now: DateTime<Utc>,
    ) -> AppResult<(Loan, Book)> {
        ensure_positive(item.quantity)?;

        let book = tx
            .lock_book(item.book_id)
            .await?
            .ok_or_else(|| book_not_found(item.book_id))?;

        if !book.can_lend(item.quantity) {
            return Err(AppError::InsufficientCopies(format!(
                "Not enough copies of \"{}\": requested {}, available {}",
                book.title, item.quantity, book.available_copies
            )));
        }

        let loan = LoanRecords::create_loan(
            tx,
            user_id,
            item.book_id,
            item.quantity,
            now,
            self.ctx.loan_period_days,
        )
        .await?;
        let book = InventoryLedger::decrement_available(tx, item.book_id, item.quantity).await?;

        Ok((loan, book))
    }
}

/// Distinct book ids of a batch in ascending order, the order rows are locked in
pub(crate) fn lock_order(items: &[BorrowItem]) -> Vec<i32> {
    let mut ids: Vec<i32> = items.iter().map(|item| item.book_id).collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Reject empty batches and non-positive quantities before touching the store
pub(crate) fn validate_items(items: &[BorrowItem]) -> AppResult<()> {
    if items.is_empty() {
        return Err(AppError::Validation("At least one item is required".to_string()));
    }
    for item in items {
        ensure_positive(item.quantity)?;
    }
    Ok(())
}

pub(crate) fn batch_message(user_id: i32, rows: &[(Loan, Book)]) -> String {
    let mut message = format!("User {} borrowed {} title(s):", user_id, rows.len());
    for (loan, book) in rows {
        message.push_str(&format!(
            "\n- {} × \"{}\" (loan {}, due {})",
            loan.borrowed_quantity,
            book.title,
            loan.id,
            loan.due_date.format("%Y-%m-%d")
        ));
    }
    message
}
