//! Catalog service: book administration

use validator::Validate;

use super::{inventory::book_not_found, LendingContext};
use crate::{
    error::{AppError, AppResult},
    models::book::{Book, BookQuery, CreateBook, UpdateBook},
};

#[derive(Clone)]
pub struct CatalogService {
    ctx: LendingContext,
}

impl CatalogService {
    pub fn new(ctx: LendingContext) -> Self {
        Self { ctx }
    }

    pub async fn list_books(&self, query: &BookQuery) -> AppResult<Vec<Book>> {
        self.ctx.repository.list_books(query).await
    }

    pub async fn get_book(&self, id: i32) -> AppResult<Book> {
        self.ctx
            .repository
            .get_book(id)
            .await?
            .ok_or_else(|| book_not_found(id))
    }

    /// Add a title with all its copies on the shelf
    pub async fn create_book(&self, data: &CreateBook) -> AppResult<Book> {
        data.validate()?;
        let book = self.ctx.repository.insert_book(data).await?;
        tracing::info!(book_id = book.id, copies = book.total_copies, "Book created");
        Ok(book)
    }

    /// Update title, author or category
    pub async fn update_book(&self, id: i32, data: &UpdateBook) -> AppResult<Book> {
        data.validate()?;
        self.ctx
            .repository
            .update_book(id, data)
            .await?
            .ok_or_else(|| book_not_found(id))
    }

    /// Remove a title; refused while any of its loans is still open
    pub async fn delete_book(&self, id: i32) -> AppResult<()> {
        let mut tx = self.ctx.repository.begin().await?;

        if tx.lock_book(id).await?.is_none() {
            return Err(book_not_found(id));
        }

        let open_loans = tx.count_open_loans_for_book(id).await?;
        if open_loans > 0 {
            return Err(AppError::Conflict(format!(
                "Book {} still has {} open loan(s)",
                id, open_loans
            )));
        }

        tx.delete_book(id).await?;
        tx.commit().await?;

        tracing::info!(book_id = id, "Book deleted");
        Ok(())
    }
}
