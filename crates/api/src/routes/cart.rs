//! Cart endpoints.
//!
//! The caller is identified by the `x-user-id` header; authentication
//! happens upstream.

use std::sync::Arc;

use axum::Json;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use cart_store::CartStore;
use common::{BookId, UserId};
use domain::Cart;
use reconciler::{CartEngine, EngineError, ReconcileOutcome};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Header carrying the authenticated user's ID.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Shared application state accessible from all handlers.
pub struct AppState<S: CartStore> {
    pub engine: CartEngine<S>,
    /// Short name of the store backend, reported by `/health`.
    pub backend: &'static str,
}

/// The user a request acts on, taken from [`USER_ID_HEADER`].
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ApiError::BadRequest(format!("missing {USER_ID_HEADER} header")))?;

        raw.to_str()
            .ok()
            .and_then(|value| value.trim().parse::<i64>().ok())
            .map(|id| CurrentUser(UserId::new(id)))
            .ok_or_else(|| ApiError::BadRequest(format!("invalid {USER_ID_HEADER} header")))
    }
}

// -- Request types --

#[derive(Deserialize)]
pub struct UpdateCartRequest {
    pub book_ids: Vec<BookId>,
}

// -- Response types --

#[derive(Serialize)]
pub struct CartResponse {
    pub user_id: UserId,
    pub book_ids: Vec<BookId>,
}

impl From<Cart> for CartResponse {
    fn from(cart: Cart) -> Self {
        Self {
            user_id: cart.user_id(),
            book_ids: cart.to_vec(),
        }
    }
}

#[derive(Serialize)]
pub struct ReconcileResponse {
    pub user_id: UserId,
    pub book_ids: Vec<BookId>,
    pub reserved: Vec<BookId>,
    pub released: Vec<BookId>,
}

impl From<ReconcileOutcome> for ReconcileResponse {
    fn from(outcome: ReconcileOutcome) -> Self {
        Self {
            user_id: outcome.cart.user_id(),
            book_ids: outcome.cart.to_vec(),
            reserved: outcome.reserved,
            released: outcome.released,
        }
    }
}

// -- Handlers --

/// POST /cart: replaces the caller's cart with the requested books.
pub async fn update<S: CartStore>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<UpdateCartRequest>,
) -> Result<Json<ReconcileResponse>, ApiError> {
    let outcome = state.engine.reconcile_cart(user_id, req.book_ids).await?;
    Ok(Json(outcome.into()))
}

/// GET /cart: returns the caller's cart.
pub async fn get<S: CartStore>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state
        .engine
        .get_cart(user_id)
        .await?
        .ok_or(EngineError::CartNotFound(user_id))?;
    Ok(Json(cart.into()))
}

/// POST /checkout: consumes the caller's cart.
pub async fn checkout<S: CartStore>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state.engine.checkout(user_id).await?;
    Ok(Json(cart.into()))
}
