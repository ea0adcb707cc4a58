//! Cart service: stage books, then borrow them together

use validator::Validate;

use super::{
    borrowing::{batch_message, validate_items, BorrowingService},
    inventory::book_not_found,
    LendingContext,
};
use crate::{
    error::{AppError, AppResult},
    models::{
        cart::{AddCartItem, CartItem, CartLine},
        loan::{BorrowItem, Loan},
    },
};

#[derive(Clone)]
pub struct CartService {
    ctx: LendingContext,
    borrowing: BorrowingService,
}

impl CartService {
    pub fn new(ctx: LendingContext, borrowing: BorrowingService) -> Self {
        Self { ctx, borrowing }
    }

    pub async fn list(&self, user_id: i32) -> AppResult<Vec<CartLine>> {
        self.ctx.repository.cart_lines(user_id).await
    }

    /// Put a book in the cart, replacing the quantity if it is already there
    pub async fn add_item(&self, user_id: i32, data: &AddCartItem) -> AppResult<CartItem> {
        data.validate()?;
        if self.ctx.repository.get_book(data.book_id).await?.is_none() {
            return Err(book_not_found(data.book_id));
        }
        self.ctx
            .repository
            .upsert_cart_item(user_id, data.book_id, data.quantity)
            .await
    }

    pub async fn remove_item(&self, user_id: i32, book_id: i32) -> AppResult<()> {
        if self.ctx.repository.remove_cart_item(user_id, book_id).await? {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Book {} is not in the cart", book_id)))
        }
    }

    /// Borrow everything in the cart and empty it, all in one transaction.
    /// A failed checkout leaves both the inventory and the cart untouched.
    pub async fn checkout(&self, user_id: i32) -> AppResult<Vec<Loan>> {
        let now = self.ctx.now();
        let mut tx = self.ctx.repository.begin().await?;

        let items: Vec<BorrowItem> = tx
            .take_cart(user_id)
            .await?
            .iter()
            .map(BorrowItem::from)
            .collect();
        if items.is_empty() {
            return Err(AppError::Validation("The cart is empty".to_string()));
        }
        validate_items(&items)?;

        let rows = self.borrowing.borrow_all(tx.as_mut(), user_id, &items, now).await?;
        tx.commit().await?;

        tracing::info!(user_id, items = rows.len(), "Cart checked out");
        self.ctx.notifications.publish(batch_message(user_id, &rows));

        Ok(rows.into_iter().map(|(loan, _)| loan).collect())
    }
}
