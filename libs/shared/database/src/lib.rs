pub mod error;
pub mod sqlite;

pub use error::DatabaseError;
pub use sqlite::{parse_column, parse_optional_column, Database};
