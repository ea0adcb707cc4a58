//! OpenAPI documentation

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{books, cart, health, loans};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Lendit API",
        version = "0.3.0",
        description = "Book lending REST API",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Books
        books::list_books,
        books::get_book,
        books::create_book,
        books::update_book,
        books::delete_book,
        // Loans
        loans::borrow,
        loans::borrow_batch,
        loans::return_loan,
        loans::return_batch,
        loans::list_loans,
        loans::get_loan,
        loans::get_user_loans,
        // Cart
        cart::get_cart,
        cart::add_cart_item,
        cart::remove_cart_item,
        cart::checkout,
    ),
    components(
        schemas(
            // Books
            crate::models::book::Book,
            crate::models::book::BookShort,
            crate::models::book::CreateBook,
            crate::models::book::UpdateBook,
            // Loans
            loans::BorrowRequest,
            loans::BorrowBatchRequest,
            loans::ReturnRequest,
            loans::ReturnBatchRequest,
            crate::models::loan::Loan,
            crate::models::loan::LoanDetails,
            crate::models::loan::BorrowItem,
            crate::models::loan::ReturnItem,
            crate::models::loan::ReturnResult,
            crate::models::loan::ReturnOutcome,
            crate::models::loan::LoanStatusFilter,
            // Cart
            crate::models::cart::CartItem,
            crate::models::cart::CartLine,
            crate::models::cart::AddCartItem,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "books", description = "Catalog management"),
        (name = "loans", description = "Borrowing, returns and loan listings"),
        (name = "cart", description = "Borrowing cart")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
