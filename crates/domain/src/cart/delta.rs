//! Reservation deltas between two cart states.

use common::BookId;

use super::Cart;

/// Stock changes needed to move a user from a previous cart to a desired one.
///
/// `additions` and `removals` are disjoint. Either may be `None`; neither is
/// ever a zero-item cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartDelta {
    /// Books to reserve (decrement stock).
    pub additions: Option<Cart>,
    /// Books to release (increment stock).
    pub removals: Option<Cart>,
    /// Every book whose stock row must be locked.
    pub affected: Cart,
}

impl CartDelta {
    /// Computes the delta from `previous` (absent means no cart) to `desired`.
    pub fn between(desired: &Cart, previous: Option<&Cart>) -> Self {
        match previous {
            Some(previous) => Self {
                additions: desired.difference(previous),
                removals: previous.difference(desired),
                affected: desired.union(previous),
            },
            None => Self {
                additions: Some(desired.clone()),
                removals: None,
                affected: desired.clone(),
            },
        }
    }

    /// Books to reserve, ascending.
    pub fn books_to_reserve(&self) -> Vec<BookId> {
        self.additions.as_ref().map(Cart::to_vec).unwrap_or_default()
    }

    /// Books to release, ascending.
    pub fn books_to_release(&self) -> Vec<BookId> {
        self.removals.as_ref().map(Cart::to_vec).unwrap_or_default()
    }

    /// Returns true if no stock changes hands.
    pub fn is_noop(&self) -> bool {
        self.additions.is_none() && self.removals.is_none()
    }
}
