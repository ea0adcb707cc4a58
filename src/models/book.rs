//! Book (title) model and catalog request types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// Book row with its inventory counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub id: i32,
    pub title: String,
    pub author: String,
    pub category: Option<String>,
    /// Copies owned by the library
    pub total_copies: i32,
    /// Copies not currently lent out
    pub available_copies: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Book {
    /// Copies currently out on loan
    pub fn lent_copies(&self) -> i32 {
        self.total_copies - self.available_copies
    }

    pub fn can_lend(&self, quantity: i32) -> bool {
        quantity > 0 && self.available_copies >= quantity
    }
}

/// Book summary embedded in loan and cart views
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BookShort {
    pub id: i32,
    pub title: String,
    pub author: String,
}

impl From<&Book> for BookShort {
    fn from(book: &Book) -> Self {
        Self {
            id: book.id,
            title: book.title.clone(),
            author: book.author.clone(),
        }
    }
}

/// Catalog search parameters
#[derive(Debug, Default, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BookQuery {
    /// Case-insensitive substring of the title
    pub title: Option<String>,
    /// Case-insensitive substring of the author
    pub author: Option<String>,
    /// Exact category
    pub category: Option<String>,
    /// Only books with at least one available copy
    pub available_only: Option<bool>,
}

impl BookQuery {
    /// In-process equivalent of the SQL filter
    pub fn matches(&self, book: &Book) -> bool {
        fn contains(haystack: &str, needle: &Option<String>) -> bool {
            needle
                .as_ref()
                .map(|n| haystack.to_lowercase().contains(&n.to_lowercase()))
                .unwrap_or(true)
        }

        contains(&book.title, &self.title)
            && contains(&book.author, &self.author)
            && self
                .category
                .as_ref()
                .map(|c| book.category.as_deref() == Some(c.as_str()))
                .unwrap_or(true)
            && (!self.available_only.unwrap_or(false) || book.available_copies > 0)
    }
}

/// Create book request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateBook {
    #[validate(length(min = 1, message = "Title is required"))]
    pub title: String,
    #[validate(length(min = 1, message = "Author is required"))]
    pub author: String,
    pub category: Option<String>,
    #[validate(range(min = 1, message = "A book needs at least one copy"))]
    pub total_copies: i32,
}

/// Metadata update; copy counters are owned by the inventory ledger
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateBook {
    #[validate(length(min = 1, message = "Title cannot be empty"))]
    pub title: Option<String>,
    #[validate(length(min = 1, message = "Author cannot be empty"))]
    pub author: Option<String>,
    pub category: Option<String>,
}

impl UpdateBook {
    pub fn apply_to(&self, book: &mut Book) {
        if let Some(ref title) = self.title {
            book.title = title.clone();
        }
        if let Some(ref author) = self.author {
            book.author = author.clone();
        }
        if let Some(ref category) = self.category {
            book.category = Some(category.clone());
        }
    }
}
