//! PostgreSQL store

use async_trait::async_trait;
use sqlx::{FromRow, Pool, Postgres, Row, Transaction};

use super::{LendingStore, LendingTx};
use crate::{
    error::AppResult,
    models::{
        book::{Book, BookQuery, BookShort, CreateBook, UpdateBook},
        cart::{CartItem, CartLine},
        loan::{Loan, LoanFilter, LoanScope, NewLoan},
    },
};

#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LendingTx for PgTx {
    async fn lock_book(&mut self, book_id: i32) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1 FOR UPDATE")
            .bind(book_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(book)
    }

    async fn lock_books(&mut self, book_ids: &[i32]) -> AppResult<Vec<Book>> {
        let books = sqlx::query_as::<_, Book>(
            "SELECT * FROM books WHERE id = ANY($1) ORDER BY id FOR UPDATE",
        )
        .bind(book_ids)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(books)
    }

    async fn decrement_available(&mut self, book_id: i32, quantity: i32) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>(
            r#"
            UPDATE books
            SET available_copies = available_copies - $2, updated_at = NOW()
            WHERE id = $1 AND available_copies >= $2
            RETURNING *
            "#,
        )
        .bind(book_id)
        .bind(quantity)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(book)
    }

    async fn increment_available(&mut self, book_id: i32, quantity: i32) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>(
            r#"
            UPDATE books
            SET available_copies = available_copies + $2, updated_at = NOW()
            WHERE id = $1 AND available_copies + $2 <= total_copies
            RETURNING *
            "#,
        )
        .bind(book_id)
        .bind(quantity)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(book)
    }

    async fn insert_loan(&mut self, loan: &NewLoan) -> AppResult<Loan> {
        let row = sqlx::query_as::<_, Loan>(
            r#"
            INSERT INTO loans (user_id, book_id, borrowed_quantity, returned_quantity,
                               loan_date, due_date, returned)
            VALUES ($1, $2, $3, 0, $4, $5, FALSE)
            RETURNING *
            "#,
        )
        .bind(loan.user_id)
        .bind(loan.book_id)
        .bind(loan.quantity)
        .bind(loan.loan_date)
        .bind(loan.due_date)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn lock_loan(&mut self, loan_id: i32) -> AppResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1 FOR UPDATE")
            .bind(loan_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(loan)
    }

    async fn save_loan_return(&mut self, loan: &Loan) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE loans
            SET returned_quantity = $2, returned = $3, return_date = $4, late_days = $5
            WHERE id = $1
            "#,
        )
        .bind(loan.id)
        .bind(loan.returned_quantity)
        .bind(loan.returned)
        .bind(loan.return_date)
        .bind(loan.late_days)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn count_open_loans_for_book(&mut self, book_id: i32) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM loans WHERE book_id = $1 AND returned = FALSE",
        )
        .bind(book_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn delete_book(&mut self, book_id: i32) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(book_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn take_cart(&mut self, user_id: i32) -> AppResult<Vec<CartItem>> {
        let mut items = sqlx::query_as::<_, CartItem>(
            "DELETE FROM cart_items WHERE user_id = $1 RETURNING *",
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?;
        items.sort_by_key(|item| item.id);
        Ok(items)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// `ILIKE` pattern matching `needle` literally anywhere in the column
fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl LendingStore for PgStore {
    async fn begin(&self) -> AppResult<Box<dyn LendingTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_book(&self, id: i32) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(book)
    }

    async fn list_books(&self, query: &BookQuery) -> AppResult<Vec<Book>> {
        let mut conditions = Vec::new();
        let mut idx = 1;

        if query.title.is_some() {
            conditions.push(format!("title ILIKE ${} ESCAPE '\\'", idx));
            idx += 1;
        }
        if query.author.is_some() {
            conditions.push(format!("author ILIKE ${} ESCAPE '\\'", idx));
            idx += 1;
        }
        if query.category.is_some() {
            conditions.push(format!("category = ${}", idx));
        }
        if query.available_only.unwrap_or(false) {
            conditions.push("available_copies > 0".to_string());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let select_q = format!("SELECT * FROM books {} ORDER BY title, id", where_clause);
        let mut builder = sqlx::query_as::<_, Book>(&select_q);
        if let Some(ref title) = query.title {
            builder = builder.bind(contains_pattern(title));
        }
        if let Some(ref author) = query.author {
            builder = builder.bind(contains_pattern(author));
        }
        if let Some(ref category) = query.category {
            builder = builder.bind(category);
        }

        let rows = builder.fetch_all(&self.pool).await?;
        Ok(rows)
    }

    async fn insert_book(&self, data: &CreateBook) -> AppResult<Book> {
        let row = sqlx::query_as::<_, Book>(
            r#"
            INSERT INTO books (title, author, category, total_copies, available_copies)
            VALUES ($1, $2, $3, $4, $4)
            RETURNING *
            "#,
        )
        .bind(&data.title)
        .bind(&data.author)
        .bind(&data.category)
        .bind(data.total_copies)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_book(&self, id: i32, data: &UpdateBook) -> AppResult<Option<Book>> {
        let row = sqlx::query_as::<_, Book>(
            r#"
            UPDATE books
            SET title = COALESCE($2, title),
                author = COALESCE($3, author),
                category = COALESCE($4, category),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&data.title)
        .bind(&data.author)
        .bind(&data.category)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_loan(&self, id: i32) -> AppResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(loan)
    }

    async fn list_loans(&self, filter: LoanFilter) -> AppResult<Vec<(Loan, BookShort)>> {
        let mut conditions = Vec::new();
        let mut idx = 1;

        if filter.user_id.is_some() {
            conditions.push(format!("l.user_id = ${}", idx));
            idx += 1;
        }
        let overdue_at = match filter.scope {
            LoanScope::All => None,
            LoanScope::Active => {
                conditions.push("l.returned = FALSE".to_string());
                None
            }
            LoanScope::OverdueAt(now) => {
                conditions.push(format!("l.returned = FALSE AND l.due_date < ${}", idx));
                Some(now)
            }
        };

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let select_q = format!(
            r#"
            SELECT l.*, b.title AS book_title, b.author AS book_author
            FROM loans l
            JOIN books b ON b.id = l.book_id
            {}
            ORDER BY l.loan_date DESC, l.id DESC
            "#,
            where_clause
        );

        let mut builder = sqlx::query(&select_q);
        if let Some(user_id) = filter.user_id {
            builder = builder.bind(user_id);
        }
        if let Some(now) = overdue_at {
            builder = builder.bind(now);
        }

        let rows = builder.fetch_all(&self.pool).await?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let loan = Loan::from_row(&row)?;
            let book = BookShort {
                id: loan.book_id,
                title: row.get("book_title"),
                author: row.get("book_author"),
            };
            result.push((loan, book));
        }

        Ok(result)
    }

    async fn cart_lines(&self, user_id: i32) -> AppResult<Vec<CartLine>> {
        let rows = sqlx::query(
            r#"
            SELECT c.quantity, c.added_at, b.id AS book_id, b.title, b.author, b.available_copies
            FROM cart_items c
            JOIN books b ON b.id = c.book_id
            WHERE c.user_id = $1
            ORDER BY c.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| CartLine {
                book: BookShort {
                    id: row.get("book_id"),
                    title: row.get("title"),
                    author: row.get("author"),
                },
                quantity: row.get("quantity"),
                available_copies: row.get("available_copies"),
                added_at: row.get("added_at"),
            })
            .collect())
    }

    async fn upsert_cart_item(&self, user_id: i32, book_id: i32, quantity: i32) -> AppResult<CartItem> {
        let row = sqlx::query_as::<_, CartItem>(
            r#"
            INSERT INTO cart_items (user_id, book_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, book_id) DO UPDATE SET quantity = EXCLUDED.quantity
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(book_id)
        .bind(quantity)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn remove_cart_item(&self, user_id: i32, book_id: i32) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND book_id = $2")
            .bind(user_id)
            .bind(book_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
