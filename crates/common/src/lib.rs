mod ids;

pub use ids::{BookId, UserId};
