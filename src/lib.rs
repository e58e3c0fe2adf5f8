//! A disk-resident, bucket-organized multi-attribute linear-hashed file:
//! `Relation` stores comma-separated tuples and answers partial-match
//! queries (`Query`) that may leave any subset of attributes as `?`.

pub mod bits;
pub mod chvec;
pub mod disk;
pub mod error;
pub mod hash;
pub mod page;
pub mod query;
pub mod relation;

pub use error::{RelnError, Result};
pub use query::Query;
pub use relation::{Mode, Relation, RelationConfig};
