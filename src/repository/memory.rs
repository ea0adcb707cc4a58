//! In-process store used by tests and database-less local runs.
//!
//! A transaction holds the store lock for its whole lifetime and works on a
//! copy of the state; commit swaps the copy in, drop throws it away. This
//! serializes every transaction, which is stricter than the row locks of the
//! PostgreSQL store but gives the same observable guarantees.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{LendingStore, LendingTx};
use crate::{
    error::AppResult,
    models::{
        book::{Book, BookQuery, BookShort, CreateBook, UpdateBook},
        cart::{CartItem, CartLine},
        loan::{Loan, LoanFilter, NewLoan},
    },
};

#[derive(Debug, Clone, Default)]
struct State {
    books: BTreeMap<i32, Book>,
    loans: BTreeMap<i32, Loan>,
    cart: BTreeMap<i32, CartItem>,
    last_book_id: i32,
    last_loan_id: i32,
    last_cart_id: i32,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite a stored loan in place, bypassing the lending rules.
    /// Lets tests age loans without waiting for the clock.
    pub async fn edit_loan<F>(&self, loan_id: i32, edit: F) -> bool
    where
        F: FnOnce(&mut Loan),
    {
        let mut state = self.state.lock().await;
        match state.loans.get_mut(&loan_id) {
            Some(loan) => {
                edit(loan);
                true
            }
            None => false,
        }
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    working: State,
}

#[async_trait]
impl LendingTx for MemoryTx {
    async fn lock_book(&mut self, book_id: i32) -> AppResult<Option<Book>> {
        Ok(self.working.books.get(&book_id).cloned())
    }

    async fn lock_books(&mut self, book_ids: &[i32]) -> AppResult<Vec<Book>> {
        let mut ids = book_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids
            .into_iter()
            .filter_map(|id| self.working.books.get(&id).cloned())
            .collect())
    }

    async fn decrement_available(&mut self, book_id: i32, quantity: i32) -> AppResult<Option<Book>> {
        Ok(match self.working.books.get_mut(&book_id) {
            Some(book) if book.available_copies >= quantity => {
                book.available_copies -= quantity;
                book.updated_at = Utc::now();
                Some(book.clone())
            }
            _ => None,
        })
    }

    async fn increment_available(&mut self, book_id: i32, quantity: i32) -> AppResult<Option<Book>> {
        Ok(match self.working.books.get_mut(&book_id) {
            Some(book) if book.available_copies + quantity <= book.total_copies => {
                book.available_copies += quantity;
                book.updated_at = Utc::now();
                Some(book.clone())
            }
            _ => None,
        })
    }

    async fn insert_loan(&mut self, loan: &NewLoan) -> AppResult<Loan> {
        self.working.last_loan_id += 1;
        let row = Loan {
            id: self.working.last_loan_id,
            user_id: loan.user_id,
            book_id: loan.book_id,
            borrowed_quantity: loan.quantity,
            returned_quantity: 0,
            loan_date: loan.loan_date,
            due_date: loan.due_date,
            return_date: None,
            returned: false,
            late_days: None,
        };
        self.working.loans.insert(row.id, row.clone());
        Ok(row)
    }

    async fn lock_loan(&mut self, loan_id: i32) -> AppResult<Option<Loan>> {
        Ok(self.working.loans.get(&loan_id).cloned())
    }

    async fn save_loan_return(&mut self, loan: &Loan) -> AppResult<()> {
        if let Some(row) = self.working.loans.get_mut(&loan.id) {
            row.returned_quantity = loan.returned_quantity;
            row.returned = loan.returned;
            row.return_date = loan.return_date;
            row.late_days = loan.late_days;
        }
        Ok(())
    }

    async fn count_open_loans_for_book(&mut self, book_id: i32) -> AppResult<i64> {
        Ok(self
            .working
            .loans
            .values()
            .filter(|l| l.book_id == book_id && !l.returned)
            .count() as i64)
    }

    async fn delete_book(&mut self, book_id: i32) -> AppResult<bool> {
        let removed = self.working.books.remove(&book_id).is_some();
        if removed {
            self.working.loans.retain(|_, loan| loan.book_id != book_id);
            self.working.cart.retain(|_, item| item.book_id != book_id);
        }
        Ok(removed)
    }

    async fn take_cart(&mut self, user_id: i32) -> AppResult<Vec<CartItem>> {
        let ids: Vec<i32> = self
            .working
            .cart
            .values()
            .filter(|item| item.user_id == user_id)
            .map(|item| item.id)
            .collect();
        Ok(ids
            .into_iter()
            .filter_map(|id| self.working.cart.remove(&id))
            .collect())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[async_trait]
impl LendingStore for MemoryStore {
    async fn begin(&self) -> AppResult<Box<dyn LendingTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn get_book(&self, id: i32) -> AppResult<Option<Book>> {
        Ok(self.state.lock().await.books.get(&id).cloned())
    }

    async fn list_books(&self, query: &BookQuery) -> AppResult<Vec<Book>> {
        let state = self.state.lock().await;
        let mut books: Vec<Book> = state
            .books
            .values()
            .filter(|b| query.matches(b))
            .cloned()
            .collect();
        books.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        Ok(books)
    }

    async fn insert_book(&self, data: &CreateBook) -> AppResult<Book> {
        let mut state = self.state.lock().await;
        state.last_book_id += 1;
        let now = Utc::now();
        let book = Book {
            id: state.last_book_id,
            title: data.title.clone(),
            author: data.author.clone(),
            category: data.category.clone(),
            total_copies: data.total_copies,
            available_copies: data.total_copies,
            created_at: now,
            updated_at: now,
        };
        state.books.insert(book.id, book.clone());
        Ok(book)
    }

    async fn update_book(&self, id: i32, data: &UpdateBook) -> AppResult<Option<Book>> {
        let mut state = self.state.lock().await;
        Ok(state.books.get_mut(&id).map(|book| {
            data.apply_to(book);
            book.updated_at = Utc::now();
            book.clone()
        }))
    }

    async fn get_loan(&self, id: i32) -> AppResult<Option<Loan>> {
        Ok(self.state.lock().await.loans.get(&id).cloned())
    }

    async fn list_loans(&self, filter: LoanFilter) -> AppResult<Vec<(Loan, BookShort)>> {
        let state = self.state.lock().await;
        let mut rows: Vec<(Loan, BookShort)> = state
            .loans
            .values()
            .filter(|l| filter.matches(l))
            .filter_map(|l| {
                state
                    .books
                    .get(&l.book_id)
                    .map(|b| (l.clone(), BookShort::from(b)))
            })
            .collect();
        rows.sort_by(|(a, _), (b, _)| b.loan_date.cmp(&a.loan_date).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn cart_lines(&self, user_id: i32) -> AppResult<Vec<CartLine>> {
        let state = self.state.lock().await;
        Ok(state
            .cart
            .values()
            .filter(|item| item.user_id == user_id)
            .filter_map(|item| {
                state.books.get(&item.book_id).map(|book| CartLine {
                    book: BookShort::from(book),
                    quantity: item.quantity,
                    available_copies: book.available_copies,
                    added_at: item.added_at,
                })
            })
            .collect())
    }

    async fn upsert_cart_item(&self, user_id: i32, book_id: i32, quantity: i32) -> AppResult<CartItem> {
        let mut state = self.state.lock().await;
        if let Some(item) = state
            .cart
            .values_mut()
            .find(|item| item.user_id == user_id && item.book_id == book_id)
        {
            item.quantity = quantity;
            return Ok(item.clone());
        }

        state.last_cart_id += 1;
        let item = CartItem {
            id: state.last_cart_id,
            user_id,
            book_id,
            quantity,
            added_at: Utc::now(),
        };
        state.cart.insert(item.id, item.clone());
        Ok(item)
    }

    async fn remove_cart_item(&self, user_id: i32, book_id: i32) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        let before = state.cart.len();
        state
            .cart
            .retain(|_, item| !(item.user_id == user_id && item.book_id == book_id));
        Ok(state.cart.len() < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(title: &str, copies: i32) -> CreateBook {
        CreateBook {
            title: title.to_string(),
            author: "Octavia E. Butler".to_string(),
            category: None,
            total_copies: copies,
        }
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = MemoryStore::new();
        let book = store.insert_book(&create("Kindred", 2)).await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            assert!(tx.decrement_available(book.id, 2).await.unwrap().is_some());
        }

        let book = store.get_book(book.id).await.unwrap().unwrap();
        assert_eq!(book.available_copies, 2);
    }

    #[tokio::test]
    async fn test_commit_publishes_changes() {
        let store = MemoryStore::new();
        let book = store.insert_book(&create("Dawn", 2)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.decrement_available(book.id, 1).await.unwrap();
        tx.commit().await.unwrap();

        let book = store.get_book(book.id).await.unwrap().unwrap();
        assert_eq!(book.available_copies, 1);
    }

    #[tokio::test]
    async fn test_conditional_counters() {
        let store = MemoryStore::new();
        let book = store.insert_book(&create("Wild Seed", 1)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.increment_available(book.id, 1).await.unwrap().is_none());
        assert!(tx.decrement_available(book.id, 2).await.unwrap().is_none());
        assert!(tx.decrement_available(99, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_books_orders_by_id() {
        let store = MemoryStore::new();
        let first = store.insert_book(&create("Dawn", 1)).await.unwrap();
        let second = store.insert_book(&create("Adulthood Rites", 1)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let locked = tx
            .lock_books(&[second.id, 99, first.id, second.id])
            .await
            .unwrap();
        let ids: Vec<i32> = locked.iter().map(|b| b.id).collect();
        assert_eq!(ids, [first.id, second.id]);
    }

    #[tokio::test]
    async fn test_cart_upsert_replaces_quantity() {
        let store = MemoryStore::new();
        let book = store.insert_book(&create("Parable of the Sower", 3)).await.unwrap();

        let first = store.upsert_cart_item(5, book.id, 1).await.unwrap();
        let second = store.upsert_cart_item(5, book.id, 3).await.unwrap();
        assert_eq!(first.id, second.id);

        let lines = store.cart_lines(5).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 3);
        assert!(store.cart_lines(6).await.unwrap().is_empty());
    }
}
