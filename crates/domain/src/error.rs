//! Domain error types.

use common::{BookId, UserId};
use thiserror::Error;

/// Reasons a cart cannot be constructed.
///
/// Variants are checked in declaration order, so the first violated rule is
/// the one reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    /// The owner is not a valid user.
    #[error("Invalid cart owner: {user_id}")]
    InvalidOwner { user_id: UserId },

    /// The cart would hold no books.
    #[error("Cart must contain at least one book")]
    EmptyCart,

    /// A book ID is not positive.
    #[error("Invalid book ID: {book_id}")]
    InvalidItem { book_id: BookId },
}
