//! Data models for Lendit

pub mod book;
pub mod cart;
pub mod loan;
pub mod user;

// Re-export commonly used types
pub use book::{Book, BookQuery, BookShort, CreateBook, UpdateBook};
pub use cart::{AddCartItem, CartItem, CartLine};
pub use loan::{
    BorrowItem, Loan, LoanDetails, LoanFilter, LoanScope, NewLoan, ReturnItem, ReturnOutcome,
    ReturnResult,
};
pub use user::{Role, UserClaims};
