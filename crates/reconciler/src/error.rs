//! Engine error types.

use cart_store::StoreError;
use common::{BookId, UserId};
use domain::CartError;
use thiserror::Error;

/// Errors returned by cart operations.
///
/// `Cart` and `OutOfStock` are caller-facing rejections with no side effects.
/// `Storage` and `Interrupted` are system faults; the unit of work was rolled
/// back and the caller may retry.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The requested cart is malformed.
    #[error("Invalid cart: {0}")]
    Cart(#[from] CartError),

    /// Some requested books have no stock left.
    #[error("Books out of stock: {}", join_ids(.book_ids))]
    OutOfStock { book_ids: Vec<BookId> },

    /// The user has no cart.
    #[error("Cart not found for user {0}")]
    CartNotFound(UserId),

    /// The storage layer failed.
    #[error("Storage failure: {0}")]
    Storage(#[from] StoreError),

    /// The task running the unit of work panicked or was cancelled.
    #[error("Cart operation interrupted: {0}")]
    Interrupted(String),
}

fn join_ids(ids: &[BookId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience type alias for engine results.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_stock_lists_books() {
        let err = EngineError::OutOfStock {
            book_ids: vec![BookId::new(3), BookId::new(7)],
        };
        assert_eq!(err.to_string(), "Books out of stock: 3, 7");
    }

    #[test]
    fn cart_errors_convert() {
        let err: EngineError = CartError::EmptyCart.into();
        assert!(matches!(err, EngineError::Cart(CartError::EmptyCart)));
    }
}
