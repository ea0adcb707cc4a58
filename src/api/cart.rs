//! Cart endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::{
    error::AppResult,
    models::{
        cart::{AddCartItem, CartItem, CartLine},
        loan::Loan,
    },
};

use super::AuthenticatedUser;

/// Get the caller's cart
#[utoipa::path(
    get,
    path = "/cart",
    tag = "cart",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Cart lines, oldest first", body = Vec<CartLine>)
    )
)]
pub async fn get_cart(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<CartLine>>> {
    let lines = state.services.cart.list(claims.user_id).await?;
    Ok(Json(lines))
}

/// Add a book to the cart or change its quantity
#[utoipa::path(
    post,
    path = "/cart/items",
    tag = "cart",
    security(("bearer_auth" = [])),
    request_body = AddCartItem,
    responses(
        (status = 201, description = "Cart line stored", body = CartItem),
        (status = 400, description = "Invalid quantity"),
        (status = 404, description = "Book not found")
    )
)]
pub async fn add_cart_item(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<AddCartItem>,
) -> AppResult<(StatusCode, Json<CartItem>)> {
    let item = state.services.cart.add_item(claims.user_id, &request).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// Remove a book from the cart
#[utoipa::path(
    delete,
    path = "/cart/items/{book_id}",
    tag = "cart",
    security(("bearer_auth" = [])),
    params(("book_id" = i32, Path, description = "Book ID")),
    responses(
        (status = 204, description = "Cart line removed"),
        (status = 404, description = "Book not in cart")
    )
)]
pub async fn remove_cart_item(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(book_id): Path<i32>,
) -> AppResult<StatusCode> {
    state.services.cart.remove_item(claims.user_id, book_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Borrow everything in the cart
#[utoipa::path(
    post,
    path = "/cart/checkout",
    tag = "cart",
    security(("bearer_auth" = [])),
    responses(
        (status = 201, description = "Loans created, cart emptied", body = Vec<Loan>),
        (status = 400, description = "Cart is empty"),
        (status = 409, description = "A book has not enough copies available")
    )
)]
pub async fn checkout(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<(StatusCode, Json<Vec<Loan>>)> {
    let loans = state.services.cart.checkout(claims.user_id).await?;
    Ok((StatusCode::CREATED, Json(loans)))
}
