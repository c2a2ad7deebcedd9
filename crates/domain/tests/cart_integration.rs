//! Integration tests for cart algebra.
//!
//! These tests walk a user through a sequence of cart states and check that
//! the deltas between them account for every reservation exactly once.

use std::collections::BTreeMap;

use common::{BookId, UserId};
use domain::{Cart, CartDelta, CartError};

fn cart(books: &[i64]) -> Cart {
    Cart::from_raw(42, books).unwrap()
}

/// Applies a delta to a per-book reservation count.
fn apply(held: &mut BTreeMap<BookId, i64>, delta: &CartDelta) {
    for book in delta.books_to_reserve() {
        *held.entry(book).or_default() += 1;
    }
    for book in delta.books_to_release() {
        *held.entry(book).or_default() -= 1;
    }
}

mod cart_lifecycle {
    use super::*;

    #[test]
    fn successive_deltas_hold_exactly_the_current_cart() {
        let states = [
            cart(&[1, 2, 3]),
            cart(&[2, 3, 4]),
            cart(&[4]),
            cart(&[4]),
            cart(&[5, 1, 4]),
        ];

        let mut held = BTreeMap::new();
        let mut previous: Option<Cart> = None;

        for desired in &states {
            let delta = CartDelta::between(desired, previous.as_ref());
            apply(&mut held, &delta);

            let expected: BTreeMap<BookId, i64> = desired.book_ids().map(|id| (id, 1)).collect();
            held.retain(|_, count| *count != 0);
            assert_eq!(held, expected);

            previous = Some(desired.clone());
        }
    }

    #[test]
    fn releasing_everything_but_one_book() {
        let previous = cart(&[1, 2, 3, 4]);
        let desired = cart(&[3]);

        let delta = CartDelta::between(&desired, Some(&previous));

        assert!(delta.additions.is_none());
        let released: Vec<i64> = delta.books_to_release().iter().map(BookId::get).collect();
        assert_eq!(released, vec![1, 2, 4]);
        assert_eq!(delta.affected, previous);
    }

    #[test]
    fn unchanged_cart_is_a_noop() {
        let current = cart(&[7, 8]);
        let delta = CartDelta::between(&cart(&[8, 7, 7]), Some(&current));
        assert!(delta.is_noop());
    }
}

mod validation {
    use super::*;

    #[test]
    fn owner_is_checked_before_contents() {
        let err = Cart::new(UserId::new(-1), Vec::<BookId>::new()).unwrap_err();
        assert_eq!(
            err,
            CartError::InvalidOwner {
                user_id: UserId::new(-1)
            }
        );
    }

    #[test]
    fn duplicates_collapse_without_error() {
        let cart = Cart::from_raw(3, &[9, 9, 9]).unwrap();
        assert_eq!(cart.len(), 1);
        assert!(cart.contains(BookId::new(9)));
    }

    #[test]
    fn json_input_is_validated() {
        let err = serde_json::from_str::<Cart>(r#"{"user_id":3,"book_ids":[1,0]}"#);
        assert!(err.is_err());
    }
}
