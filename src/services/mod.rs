//! Business logic services

pub mod borrowing;
pub mod cart;
pub mod catalog;
pub mod inventory;
pub mod loan_records;
pub mod notifications;
pub mod reports;
pub mod returns;

use chrono::{DateTime, Utc};

use crate::{config::LendingConfig, error::AppResult, repository::Repository};

use notifications::NotificationDispatcher;

/// Source of the current time
pub type Clock = fn() -> DateTime<Utc>;

/// Collaborators shared by the lending services
#[derive(Clone)]
pub struct LendingContext {
    pub repository: Repository,
    pub notifications: NotificationDispatcher,
    pub loan_period_days: i64,
    pub clock: Clock,
}

impl LendingContext {
    pub fn new(repository: Repository, notifications: NotificationDispatcher, lending: &LendingConfig) -> Self {
        Self {
            repository,
            notifications,
            loan_period_days: lending.loan_period_days,
            clock: Utc::now,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub catalog: catalog::CatalogService,
    pub borrowing: borrowing::BorrowingService,
    pub returns: returns::ReturnsService,
    pub reports: reports::ReportsService,
    pub cart: cart::CartService,
    repository: Repository,
}

impl Services {
    /// Create all services sharing the given context
    pub fn new(ctx: LendingContext) -> Self {
        let borrowing = borrowing::BorrowingService::new(ctx.clone());
        Self {
            catalog: catalog::CatalogService::new(ctx.clone()),
            returns: returns::ReturnsService::new(ctx.clone()),
            reports: reports::ReportsService::new(ctx.clone()),
            cart: cart::CartService::new(ctx.clone(), borrowing.clone()),
            borrowing,
            repository: ctx.repository,
        }
    }

    /// Check that the store answers
    pub async fn ping(&self) -> AppResult<()> {
        self.repository.ping().await
    }
}
