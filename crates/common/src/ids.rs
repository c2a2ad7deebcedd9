use serde::{Deserialize, Serialize};

/// Identifier of the user owning a cart.
///
/// Wraps the raw database key so user IDs cannot be mixed up with book IDs.
/// Positivity is not checked here; the cart constructor owns that rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Creates a user ID from a raw key.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw key.
    pub const fn get(&self) -> i64 {
        self.0
    }

    /// Returns true if the key can identify a real user.
    pub const fn is_valid(&self) -> bool {
        self.0 > 0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<UserId> for i64 {
    fn from(id: UserId) -> Self {
        id.0
    }
}

/// Identifier of a book (the stocked item).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookId(i64);

impl BookId {
    /// Creates a book ID from a raw key.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw key.
    pub const fn get(&self) -> i64 {
        self.0
    }

    /// Returns true if the key can identify a real book.
    pub const fn is_valid(&self) -> bool {
        self.0 > 0
    }
}

impl std::fmt::Display for BookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for BookId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<BookId> for i64 {
    fn from(id: BookId) -> Self {
        id.0
    }
}
