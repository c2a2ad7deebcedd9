//! Domain layer for the bookshop cart engine.
//!
//! This crate provides:
//! - `Cart`, a validated set of books owned by one user, with set algebra
//! - `CartDelta`, the reservations to take and release when a cart changes

pub mod cart;
pub mod error;

pub use cart::{Cart, CartData, CartDelta};
pub use error::CartError;
