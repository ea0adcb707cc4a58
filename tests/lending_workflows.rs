//! Borrow, return and reporting workflows against the in-memory store

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::mpsc::UnboundedReceiver;

use lendit_server::{
    config::LendingConfig,
    models::{
        book::{Book, CreateBook},
        cart::AddCartItem,
        loan::{BorrowItem, Loan, ReturnItem, ReturnOutcome},
        user::{Role, UserClaims},
    },
    repository::{LendingStore, MemoryStore},
    services::{notifications::NotificationDispatcher, Clock, LendingContext, Services},
    AppError,
};

struct Harness {
    store: MemoryStore,
    services: Services,
    notifications: UnboundedReceiver<String>,
}

impl Harness {
    fn new() -> Self {
        Self::with_clock(Utc::now)
    }

    fn with_clock(clock: Clock) -> Self {
        let store = MemoryStore::new();
        let (dispatcher, notifications) = NotificationDispatcher::channel();
        let ctx = LendingContext::new(Arc::new(store.clone()), dispatcher, &LendingConfig::default())
            .with_clock(clock);
        Self {
            store,
            services: Services::new(ctx),
            notifications,
        }
    }

    /// Services over the same store reading time from another clock
    fn later(&self, clock: Clock) -> Services {
        let (dispatcher, _) = NotificationDispatcher::channel();
        let ctx = LendingContext::new(Arc::new(self.store.clone()), dispatcher, &LendingConfig::default())
            .with_clock(clock);
        Services::new(ctx)
    }

    async fn book(&self, title: &str, copies: i32) -> Book {
        self.store
            .insert_book(&CreateBook {
                title: title.to_string(),
                author: "Test Author".to_string(),
                category: None,
                total_copies: copies,
            })
            .await
            .unwrap()
    }

    async fn available(&self, book_id: i32) -> i32 {
        self.store.get_book(book_id).await.unwrap().unwrap().available_copies
    }

    async fn loan(&self, loan_id: i32) -> Loan {
        self.store.get_loan(loan_id).await.unwrap().unwrap()
    }

    fn drain_notifications(&mut self) -> Vec<String> {
        let mut messages = Vec::new();
        while let Ok(message) = self.notifications.try_recv() {
            messages.push(message);
        }
        messages
    }
}

fn claims(user_id: i32, role: Role) -> UserClaims {
    let now = Utc::now().timestamp();
    UserClaims {
        sub: format!("user-{}", user_id),
        user_id,
        role,
        exp: now + 3600,
        iat: now,
    }
}

#[tokio::test]
async fn test_borrow_then_return_in_two_steps() {
    let mut h = Harness::new();
    let book = h.book("Dune", 5).await;

    let loan = h.services.borrowing.borrow_one(1, book.id, 3).await.unwrap();
    assert_eq!(loan.borrowed_quantity, 3);
    assert_eq!(loan.returned_quantity, 0);
    assert!(!loan.returned);
    assert_eq!(loan.due_date - loan.loan_date, Duration::days(7));
    assert_eq!(h.available(book.id).await, 2);

    let loan = h.services.returns.return_one(loan.id, Some(2)).await.unwrap();
    assert_eq!(loan.returned_quantity, 2);
    assert!(!loan.returned);
    assert_eq!(loan.late_days, None);
    assert_eq!(h.available(book.id).await, 4);

    let loan = h.services.returns.return_one(loan.id, Some(1)).await.unwrap();
    assert_eq!(loan.returned_quantity, 3);
    assert!(loan.returned);
    assert!(loan.return_date.is_some());
    assert_eq!(loan.late_days, Some(0));
    assert_eq!(h.available(book.id).await, 5);

    // Borrow and full return are announced, the partial return is not
    let messages = h.drain_notifications();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].contains("borrowed 3 × \"Dune\""));
    assert!(messages[1].contains("returned \"Dune\""));
    assert!(messages[1].contains("0 day(s) late"));
}

#[tokio::test]
async fn test_borrow_more_than_available_changes_nothing() {
    let mut h = Harness::new();
    let book = h.book("Neuromancer", 2).await;

    let err = h.services.borrowing.borrow_one(1, book.id, 3).await.unwrap_err();
    assert!(matches!(err, AppError::InsufficientCopies(_)));
    assert_eq!(h.available(book.id).await, 2);
    assert!(h.services.reports.list_for_user(1).await.unwrap().is_empty());
    assert!(h.drain_notifications().is_empty());
}

#[tokio::test]
async fn test_borrow_validation_errors() {
    let h = Harness::new();
    let book = h.book("Hyperion", 2).await;

    let err = h.services.borrowing.borrow_one(1, book.id, 0).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidQuantity(_)));

    let err = h.services.borrowing.borrow_one(1, 999, 1).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let err = h.services.borrowing.borrow_many(1, &[]).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_borrow_many_is_all_or_nothing() {
    let mut h = Harness::new();
    let first = h.book("Foundation", 5).await;
    let second = h.book("I, Robot", 5).await;

    let items = [
        BorrowItem { book_id: first.id, quantity: 2 },
        BorrowItem { book_id: second.id, quantity: 100 },
    ];
    let err = h.services.borrowing.borrow_many(1, &items).await.unwrap_err();

    assert!(matches!(err, AppError::InsufficientCopies(_)));
    assert!(err.to_string().contains("I, Robot"));
    assert_eq!(h.available(first.id).await, 5);
    assert_eq!(h.available(second.id).await, 5);
    assert!(h.services.reports.list_for_user(1).await.unwrap().is_empty());
    assert!(h.drain_notifications().is_empty());
}

#[tokio::test]
async fn test_borrow_many_success_sends_one_summary() {
    let mut h = Harness::new();
    let first = h.book("Foundation", 5).await;
    let second = h.book("I, Robot", 5).await;

    let items = [
        BorrowItem { book_id: first.id, quantity: 2 },
        BorrowItem { book_id: second.id, quantity: 1 },
        BorrowItem { book_id: first.id, quantity: 3 },
    ];
    let loans = h.services.borrowing.borrow_many(1, &items).await.unwrap();

    assert_eq!(loans.len(), 3);
    assert_eq!(h.available(first.id).await, 0);
    assert_eq!(h.available(second.id).await, 4);

    let messages = h.drain_notifications();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("3 title(s)"));
    assert!(messages[0].contains("\"I, Robot\""));
}

#[tokio::test]
async fn test_borrow_many_unknown_book_rolls_back() {
    let h = Harness::new();
    let book = h.book("Ubik", 3).await;

    let items = [
        BorrowItem { book_id: book.id, quantity: 1 },
        BorrowItem { book_id: 404, quantity: 1 },
    ];
    let err = h.services.borrowing.borrow_many(1, &items).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(h.available(book.id).await, 3);
}

#[tokio::test]
async fn test_concurrent_borrows_of_last_copy() {
    let h = Harness::new();
    let book = h.book("The Last Unicorn", 1).await;

    let (a, b) = tokio::join!(
        h.services.borrowing.borrow_one(1, book.id, 1),
        h.services.borrowing.borrow_one(2, book.id, 1),
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(AppError::InsufficientCopies(_)))));
    assert_eq!(h.available(book.id).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_borrowers_never_overdraw() {
    let h = Harness::new();
    let book_id = h.book("Snow Crash", 3).await.id;
    let services = Arc::new(h.services.clone());

    let mut handles = Vec::new();
    for user_id in 1..=10 {
        let services = services.clone();
        handles.push(tokio::spawn(async move {
            services.borrowing.borrow_one(user_id, book_id, 1).await
        }));
    }

    let mut granted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => granted += 1,
            Err(e) => assert!(matches!(e, AppError::InsufficientCopies(_))),
        }
    }

    assert_eq!(granted, 3);
    assert_eq!(h.available(book_id).await, 0);
}

#[tokio::test]
async fn test_return_of_returned_loan_is_rejected() {
    let h = Harness::new();
    let book = h.book("Gateway", 2).await;
    let loan = h.services.borrowing.borrow_one(1, book.id, 2).await.unwrap();
    let returned = h.services.returns.return_one(loan.id, None).await.unwrap();

    let err = h.services.returns.return_one(loan.id, Some(1)).await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyReturned(_)));
    assert_eq!(h.loan(loan.id).await, returned);
    assert_eq!(h.available(book.id).await, 2);

    let err = h.services.returns.return_one(12345, None).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_over_specified_return_is_clamped() {
    let h = Harness::new();
    let book = h.book("Ringworld", 4).await;
    let loan = h.services.borrowing.borrow_one(1, book.id, 2).await.unwrap();

    let loan = h.services.returns.return_one(loan.id, Some(10)).await.unwrap();
    assert_eq!(loan.returned_quantity, 2);
    assert!(loan.returned);
    assert_eq!(h.available(book.id).await, 4);
}

#[tokio::test]
async fn test_late_days_are_frozen_at_full_return() {
    let h = Harness::new();
    let book = h.book("Roadside Picnic", 1).await;
    let loan = h.services.borrowing.borrow_one(1, book.id, 1).await.unwrap();

    let now = Utc::now();
    h.store
        .edit_loan(loan.id, |l| {
            l.loan_date = now - Duration::days(10);
            l.due_date = now - Duration::days(3);
        })
        .await;

    let loan = h.services.returns.return_one(loan.id, None).await.unwrap();
    assert_eq!(loan.late_days, Some(3));
    assert_eq!(h.loan(loan.id).await.late_days, Some(3));
}

#[tokio::test]
async fn test_return_overflowing_total_is_refused() {
    let h = Harness::new();
    let book = h.book("Stand on Zanzibar", 1).await;
    let loan = h.services.borrowing.borrow_one(1, book.id, 1).await.unwrap();

    // A loan that claims more copies than the shelf can take back
    h.store.edit_loan(loan.id, |l| l.borrowed_quantity = 2).await;

    let err = h.services.returns.return_one(loan.id, None).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(h.loan(loan.id).await.returned_quantity, 0);
    assert_eq!(h.available(book.id).await, 0);
}

#[tokio::test]
async fn test_return_many_skips_items_it_cannot_process() {
    let mut h = Harness::new();
    let book = h.book("Blindsight", 6).await;

    let own = h.services.borrowing.borrow_one(1, book.id, 3).await.unwrap();
    let done = h.services.borrowing.borrow_one(1, book.id, 1).await.unwrap();
    h.services.returns.return_one(done.id, None).await.unwrap();
    let foreign = h.services.borrowing.borrow_one(2, book.id, 2).await.unwrap();
    h.drain_notifications();

    let items = [
        ReturnItem { loan_id: own.id, quantity: Some(1) },
        ReturnItem { loan_id: foreign.id, quantity: None },
        ReturnItem { loan_id: done.id, quantity: None },
        ReturnItem { loan_id: 999, quantity: None },
    ];
    let results = h.services.returns.return_many(1, &items).await.unwrap();

    assert_eq!(results.len(), 4);
    assert!(results[0].is_returned());
    match &results[0].outcome {
        ReturnOutcome::Returned { returned_quantity, loan } => {
            assert_eq!(*returned_quantity, 1);
            assert_eq!(loan.returned_quantity, 1);
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let skipped: Vec<&str> = results[1..]
        .iter()
        .map(|r| match &r.outcome {
            ReturnOutcome::Skipped { error, .. } => error.as_str(),
            other => panic!("unexpected outcome {:?}", other),
        })
        .collect();
    assert_eq!(skipped, ["Forbidden", "AlreadyReturned", "NotFound"]);

    assert_eq!(h.loan(foreign.id).await.returned_quantity, 0);
    assert_eq!(h.available(book.id).await, 6 - 3 - 2 + 1);

    let messages = h.drain_notifications();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("returned 1 loan(s)"));
    assert!(messages[0].contains("2 still out"));
}

#[tokio::test]
async fn test_return_many_without_processed_items_is_silent() {
    let mut h = Harness::new();
    let book = h.book("Solaris", 1).await;
    let foreign = h.services.borrowing.borrow_one(2, book.id, 1).await.unwrap();
    h.drain_notifications();

    let results = h
        .services
        .returns
        .return_many(1, &[ReturnItem { loan_id: foreign.id, quantity: None }])
        .await
        .unwrap();

    assert!(!results[0].is_returned());
    assert!(h.drain_notifications().is_empty());
}

#[tokio::test]
async fn test_counters_stay_consistent_over_mixed_operations() {
    let h = Harness::new();
    let books = [h.book("A", 4).await, h.book("B", 2).await, h.book("C", 7).await];
    let mut open: Vec<i32> = Vec::new();

    for round in 0..30 {
        let book = &books[round % books.len()];
        let quantity = (round % 3) as i32 + 1;
        if let Ok(loan) = h.services.borrowing.borrow_one(round as i32 % 4, book.id, quantity).await {
            open.push(loan.id);
        }
        if round % 2 == 1 {
            if let Some(loan_id) = open.first().copied() {
                let loan = h.services.returns.return_one(loan_id, Some(1)).await.unwrap();
                if loan.returned {
                    open.remove(0);
                }
            }
        }

        for book in &books {
            let current = h.store.get_book(book.id).await.unwrap().unwrap();
            assert!(current.available_copies >= 0);
            assert!(current.available_copies <= current.total_copies);
        }
    }

    let admin = claims(100, Role::Admin);
    let loans = h.services.reports.list_all(&admin).await.unwrap();
    for loan in &loans {
        assert!(loan.returned_quantity >= 0 && loan.returned_quantity <= loan.borrowed_quantity);
        assert_eq!(loan.returned, loan.returned_quantity == loan.borrowed_quantity);
    }

    for book in &books {
        let current = h.store.get_book(book.id).await.unwrap().unwrap();
        let out: i32 = loans
            .iter()
            .filter(|l| l.book.id == book.id)
            .map(|l| l.borrowed_quantity - l.returned_quantity)
            .sum();
        assert_eq!(current.available_copies, current.total_copies - out);
    }
}

#[tokio::test]
async fn test_reports_require_admin_and_filter_loans() {
    let h = Harness::new();
    let book = h.book("Kindred", 5).await;

    let first = h.services.borrowing.borrow_one(1, book.id, 1).await.unwrap();
    let second = h.services.borrowing.borrow_one(1, book.id, 1).await.unwrap();
    let other = h.services.borrowing.borrow_one(2, book.id, 2).await.unwrap();
    h.services.returns.return_one(first.id, None).await.unwrap();

    let user = claims(1, Role::User);
    for result in [
        h.services.reports.list_all(&user).await,
        h.services.reports.list_active(&user).await,
        h.services.reports.list_overdue(&user).await,
    ] {
        assert!(matches!(result, Err(AppError::Authorization(_))));
    }

    let mine = h.services.reports.list_for_user(1).await.unwrap();
    let ids: Vec<i32> = mine.iter().map(|l| l.id).collect();
    assert_eq!(ids, [second.id, first.id]);
    assert_eq!(mine[0].book.title, "Kindred");

    let admin = claims(9, Role::Admin);
    assert_eq!(h.services.reports.list_all(&admin).await.unwrap().len(), 3);

    let active: Vec<i32> = h
        .services
        .reports
        .list_active(&admin)
        .await
        .unwrap()
        .iter()
        .map(|l| l.id)
        .collect();
    assert_eq!(active, [other.id, second.id]);

    assert!(h.services.reports.list_overdue(&admin).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_overdue_listing_computes_transient_late_days() {
    let h = Harness::new();
    let book = h.book("Lilith's Brood", 3).await;
    let open = h.services.borrowing.borrow_one(1, book.id, 1).await.unwrap();
    let closed = h.services.borrowing.borrow_one(2, book.id, 1).await.unwrap();
    h.services.returns.return_one(closed.id, None).await.unwrap();

    let later = h.later(|| Utc::now() + Duration::days(10));
    let admin = claims(9, Role::Admin);
    let overdue = later.reports.list_overdue(&admin).await.unwrap();

    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0].id, open.id);
    assert!(overdue[0].is_overdue);
    assert_eq!(overdue[0].late_days, Some(3));

    // Nothing was written back
    assert_eq!(h.loan(open.id).await.late_days, None);
}

#[tokio::test]
async fn test_get_loan_is_limited_to_owner_and_admins() {
    let h = Harness::new();
    let book = h.book("Parable of the Talents", 1).await;
    let loan = h.services.borrowing.borrow_one(1, book.id, 1).await.unwrap();

    let details = h.services.reports.get_loan(&claims(1, Role::User), loan.id).await.unwrap();
    assert_eq!(details.book.id, book.id);

    let err = h.services.reports.get_loan(&claims(2, Role::User), loan.id).await.unwrap_err();
    assert!(matches!(err, AppError::Authorization(_)));

    assert!(h.services.reports.get_loan(&claims(2, Role::Admin), loan.id).await.is_ok());
}

#[tokio::test]
async fn test_cart_checkout_borrows_and_empties_cart() {
    let mut h = Harness::new();
    let first = h.book("The Word for World Is Forest", 3).await;
    let second = h.book("Always Coming Home", 2).await;

    h.services
        .cart
        .add_item(1, &AddCartItem { book_id: first.id, quantity: 2 })
        .await
        .unwrap();
    h.services
        .cart
        .add_item(1, &AddCartItem { book_id: second.id, quantity: 1 })
        .await
        .unwrap();
    assert_eq!(h.services.cart.list(1).await.unwrap().len(), 2);

    let loans = h.services.cart.checkout(1).await.unwrap();
    assert_eq!(loans.len(), 2);
    assert_eq!(loans[0].book_id, first.id);
    assert_eq!(h.available(first.id).await, 1);
    assert_eq!(h.available(second.id).await, 1);
    assert!(h.services.cart.list(1).await.unwrap().is_empty());
    assert_eq!(h.drain_notifications().len(), 1);

    let err = h.services.cart.checkout(1).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_failed_checkout_keeps_cart_and_inventory() {
    let h = Harness::new();
    let plenty = h.book("Lathe of Heaven", 5).await;
    let scarce = h.book("Rocannon's World", 1).await;

    h.services
        .cart
        .add_item(1, &AddCartItem { book_id: plenty.id, quantity: 1 })
        .await
        .unwrap();
    h.services
        .cart
        .add_item(1, &AddCartItem { book_id: scarce.id, quantity: 2 })
        .await
        .unwrap();

    let err = h.services.cart.checkout(1).await.unwrap_err();
    assert!(matches!(err, AppError::InsufficientCopies(_)));
    assert_eq!(h.services.cart.list(1).await.unwrap().len(), 2);
    assert_eq!(h.available(plenty.id).await, 5);
}

#[tokio::test]
async fn test_cart_item_validation() {
    let h = Harness::new();
    let book = h.book("Planet of Exile", 1).await;

    let err = h
        .services
        .cart
        .add_item(1, &AddCartItem { book_id: book.id, quantity: 0 })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = h
        .services
        .cart
        .add_item(1, &AddCartItem { book_id: 77, quantity: 1 })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let err = h.services.cart.remove_item(1, book.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_book_with_open_loans_cannot_be_deleted() {
    let h = Harness::new();
    let book = h.book("City of Illusions", 2).await;
    let loan = h.services.borrowing.borrow_one(1, book.id, 1).await.unwrap();

    let err = h.services.catalog.delete_book(book.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    h.services.returns.return_one(loan.id, None).await.unwrap();
    h.services.catalog.delete_book(book.id).await.unwrap();

    let err = h.services.catalog.get_book(book.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_returns_never_over_return() {
    let h = Harness::new();
    let book_id = h.book("The Dispossessed", 5).await.id;
    let loan_id = h.services.borrowing.borrow_one(1, book_id, 3).await.unwrap().id;
    let services = Arc::new(h.services.clone());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let services = services.clone();
        handles.push(tokio::spawn(async move {
            services.returns.return_one(loan_id, Some(1)).await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(e) => assert!(matches!(e, AppError::AlreadyReturned(_))),
        }
    }

    assert_eq!(accepted, 3);
    let loan = h.loan(loan_id).await;
    assert_eq!(loan.returned_quantity, 3);
    assert!(loan.returned);
    assert_eq!(h.available(book_id).await, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_batches_in_opposite_order_both_complete() {
    let h = Harness::new();
    let a = h.book("The Telling", 4).await.id;
    let b = h.book("Four Ways to Forgiveness", 4).await.id;
    let services = Arc::new(h.services.clone());

    let mut handles = Vec::new();
    for user_id in 1..=4 {
        let services = services.clone();
        let items = if user_id % 2 == 0 {
            [BorrowItem { book_id: a, quantity: 1 }, BorrowItem { book_id: b, quantity: 1 }]
        } else {
            [BorrowItem { book_id: b, quantity: 1 }, BorrowItem { book_id: a, quantity: 1 }]
        };
        handles.push(tokio::spawn(async move {
            services.borrowing.borrow_many(user_id, &items).await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().len(), 2);
    }
    assert_eq!(h.available(a).await, 0);
    assert_eq!(h.available(b).await, 0);
}
