//! Repository layer for database operations
//!
//! Reads and catalog/cart maintenance go through [`LendingStore`]. Anything
//! that touches copy counters or loan quantities runs inside a [`LendingTx`],
//! which commits explicitly and rolls back when dropped.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::AppResult,
    models::{
        book::{Book, BookQuery, BookShort, CreateBook, UpdateBook},
        cart::{CartItem, CartLine},
        loan::{Loan, LoanFilter, NewLoan},
    },
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Shared handle to the configured store
pub type Repository = Arc<dyn LendingStore>;

/// One database transaction of the lending core
#[async_trait]
pub trait LendingTx: Send {
    /// Load a book and lock its row until commit or rollback
    async fn lock_book(&mut self, book_id: i32) -> AppResult<Option<Book>>;

    /// Lock several book rows in ascending id order; missing ids are skipped.
    /// Batches lock up front so concurrent batches cannot deadlock.
    async fn lock_books(&mut self, book_ids: &[i32]) -> AppResult<Vec<Book>>;

    /// `available -= quantity` if at least `quantity` copies are available.
    /// `None` when no row matched (missing book or not enough copies).
    async fn decrement_available(&mut self, book_id: i32, quantity: i32) -> AppResult<Option<Book>>;

    /// `available += quantity` if the result stays within `total`.
    /// `None` when no row matched (missing book or counter overflow).
    async fn increment_available(&mut self, book_id: i32, quantity: i32) -> AppResult<Option<Book>>;

    async fn insert_loan(&mut self, loan: &NewLoan) -> AppResult<Loan>;

    /// Load a loan and lock its row until commit or rollback
    async fn lock_loan(&mut self, loan_id: i32) -> AppResult<Option<Loan>>;

    /// Persist returned quantity, flag, return date and late days
    async fn save_loan_return(&mut self, loan: &Loan) -> AppResult<()>;

    async fn count_open_loans_for_book(&mut self, book_id: i32) -> AppResult<i64>;

    async fn delete_book(&mut self, book_id: i32) -> AppResult<bool>;

    /// Remove and return a user's cart lines, oldest first
    async fn take_cart(&mut self, user_id: i32) -> AppResult<Vec<CartItem>>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}

/// Persistence collaborator of the lending core
#[async_trait]
pub trait LendingStore: Send + Sync {
    async fn begin(&self) -> AppResult<Box<dyn LendingTx>>;

    /// Connectivity check used by the readiness endpoint
    async fn ping(&self) -> AppResult<()>;

    async fn get_book(&self, id: i32) -> AppResult<Option<Book>>;

    /// Books matching the query, ordered by title
    async fn list_books(&self, query: &BookQuery) -> AppResult<Vec<Book>>;

    /// Insert a book with every copy available
    async fn insert_book(&self, data: &CreateBook) -> AppResult<Book>;

    async fn update_book(&self, id: i32, data: &UpdateBook) -> AppResult<Option<Book>>;

    async fn get_loan(&self, id: i32) -> AppResult<Option<Loan>>;

    /// Loans with their book, newest loan date first
    async fn list_loans(&self, filter: LoanFilter) -> AppResult<Vec<(Loan, BookShort)>>;

    async fn cart_lines(&self, user_id: i32) -> AppResult<Vec<CartLine>>;

    /// Insert a cart line or replace the quantity of the existing one
    async fn upsert_cart_item(&self, user_id: i32, book_id: i32, quantity: i32) -> AppResult<CartItem>;

    async fn remove_cart_item(&self, user_id: i32, book_id: i32) -> AppResult<bool>;
}
