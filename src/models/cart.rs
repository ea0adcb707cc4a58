//! Cart model: a user's staging list of books to borrow together

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

use super::book::BookShort;
use super::loan::BorrowItem;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct CartItem {
    pub id: i32,
    pub user_id: i32,
    pub book_id: i32,
    pub quantity: i32,
    pub added_at: DateTime<Utc>,
}

impl From<&CartItem> for BorrowItem {
    fn from(item: &CartItem) -> Self {
        BorrowItem {
            book_id: item.book_id,
            quantity: item.quantity,
        }
    }
}

/// Cart line as shown to its owner
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartLine {
    pub book: BookShort,
    pub quantity: i32,
    pub available_copies: i32,
    pub added_at: DateTime<Utc>,
}

/// Add-to-cart request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AddCartItem {
    pub book_id: i32,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}
