//! Cart value type and set algebra.

mod delta;

pub use delta::CartDelta;

use std::collections::BTreeSet;

use common::{BookId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::CartError;

/// Unvalidated cart contents, as received from a caller or read from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartData {
    pub user_id: UserId,
    pub book_ids: Vec<BookId>,
}

/// A user's desired set of distinct books.
///
/// A constructed cart always has a valid owner and at least one valid book.
/// Books are kept in ascending ID order, which is also the order stock rows
/// are locked in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CartData", into = "CartData")]
pub struct Cart {
    user_id: UserId,
    book_ids: BTreeSet<BookId>,
}

impl Cart {
    /// Creates a cart, collapsing duplicate book IDs.
    ///
    /// Fails with `InvalidOwner`, `EmptyCart` or `InvalidItem`, checked in
    /// that order.
    pub fn new(
        user_id: UserId,
        book_ids: impl IntoIterator<Item = BookId>,
    ) -> Result<Self, CartError> {
        if !user_id.is_valid() {
            return Err(CartError::InvalidOwner { user_id });
        }

        let book_ids: Vec<BookId> = book_ids.into_iter().collect();
        if book_ids.is_empty() {
            return Err(CartError::EmptyCart);
        }

        if let Some(&book_id) = book_ids.iter().find(|id| !id.is_valid()) {
            return Err(CartError::InvalidItem { book_id });
        }

        Ok(Self {
            user_id,
            book_ids: book_ids.into_iter().collect(),
        })
    }

    /// Creates a cart from raw integer keys.
    pub fn from_raw(user_id: i64, book_ids: &[i64]) -> Result<Self, CartError> {
        Self::new(
            UserId::new(user_id),
            book_ids.iter().copied().map(BookId::new),
        )
    }

    /// Builds a cart from a set of valid IDs; `None` if the set is empty.
    fn from_set(user_id: UserId, book_ids: BTreeSet<BookId>) -> Option<Self> {
        if book_ids.is_empty() {
            None
        } else {
            Some(Self { user_id, book_ids })
        }
    }

    /// Returns the owner.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Returns the books in ascending ID order.
    pub fn book_ids(&self) -> impl ExactSizeIterator<Item = BookId> + '_ {
        self.book_ids.iter().copied()
    }

    /// Returns the books as a vector, in ascending ID order.
    pub fn to_vec(&self) -> Vec<BookId> {
        self.book_ids().collect()
    }

    /// Returns the number of distinct books.
    pub fn len(&self) -> usize {
        self.book_ids.len()
    }

    /// Returns true if the cart holds no books.
    pub fn is_empty(&self) -> bool {
        self.book_ids.is_empty()
    }

    /// Returns true if the book is in the cart.
    pub fn contains(&self, book_id: BookId) -> bool {
        self.book_ids.contains(&book_id)
    }

    /// Books in `self` that are not in `other`, owned by `self`'s owner.
    ///
    /// Returns `None` when nothing is left, so an empty delta can never be
    /// mistaken for a cart worth persisting.
    pub fn difference(&self, other: &Cart) -> Option<Cart> {
        let remaining = self
            .book_ids
            .difference(&other.book_ids)
            .copied()
            .collect();
        Self::from_set(self.user_id, remaining)
    }

    /// Books in either cart, owned by `self`'s owner.
    pub fn union(&self, other: &Cart) -> Cart {
        Cart {
            user_id: self.user_id,
            book_ids: self.book_ids.union(&other.book_ids).copied().collect(),
        }
    }
}

impl TryFrom<CartData> for Cart {
    type Error = CartError;

    fn try_from(data: CartData) -> Result<Self, Self::Error> {
        Cart::new(data.user_id, data.book_ids)
    }
}

impl From<Cart> for CartData {
    fn from(cart: Cart) -> Self {
        CartData {
            user_id: cart.user_id,
            book_ids: cart.book_ids.into_iter().collect(),
        }
    }
}
