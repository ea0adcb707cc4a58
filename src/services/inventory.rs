//! Inventory ledger: the only writer of a book's available-copy counter

use crate::{
    error::{AppError, AppResult},
    models::book::Book,
    repository::LendingTx,
};

pub struct InventoryLedger;

impl InventoryLedger {
    /// Take `quantity` copies off the shelf within the caller's transaction
    pub async fn decrement_available(
        tx: &mut dyn LendingTx,
        book_id: i32,
        quantity: i32,
    ) -> AppResult<Book> {
        ensure_positive(quantity)?;

        if let Some(book) = tx.decrement_available(book_id, quantity).await? {
            return Ok(book);
        }

        match tx.lock_book(book_id).await? {
            None => Err(book_not_found(book_id)),
            Some(book) => Err(AppError::InsufficientCopies(format!(
                "Not enough copies of \"{}\": requested {}, available {}",
                book.title, quantity, book.available_copies
            ))),
        }
    }

    /// Put `quantity` copies back on the shelf within the caller's transaction.
    ///
    /// The counter never exceeds the book's total; an overflow means the loan
    /// records and the inventory disagree and the transaction must not commit.
    pub async fn increment_available(
        tx: &mut dyn LendingTx,
        book_id: i32,
        quantity: i32,
    ) -> AppResult<Book> {
        ensure_positive(quantity)?;

        if let Some(book) = tx.increment_available(book_id, quantity).await? {
            return Ok(book);
        }

        match tx.lock_book(book_id).await? {
            None => Err(book_not_found(book_id)),
            Some(book) => {
                tracing::error!(
                    book_id,
                    quantity,
                    available = book.available_copies,
                    total = book.total_copies,
                    "Return would push available copies above total"
                );
                Err(AppError::Conflict(format!(
                    "Returning {} copies of \"{}\" would exceed its {} total copies",
                    quantity, book.title, book.total_copies
                )))
            }
        }
    }
}

pub(crate) fn ensure_positive(quantity: i32) -> AppResult<()> {
    if quantity > 0 {
        Ok(())
    } else {
        Err(AppError::InvalidQuantity(format!(
            "Quantity must be positive, got {}",
            quantity
        )))
    }
}

pub(crate) fn book_not_found(book_id: i32) -> AppError {
    AppError::NotFound(format!("Book with id {} not found", book_id))
}
