//! Generic containers used as building blocks by the rest of the crate.
//!
//! Two structures live here:
//!
//! - [`Array`]: a growable array with bulk append, range erase and a
//!   stable merge sort that moves elements at most once each.
//! - [`ChainMap`]: an open-chaining hash map whose key handling (clone,
//!   compare, hash) is supplied by the caller through [`KeyOps`] rather
//!   than through `Hash`/`Eq` bounds, because entity equality differs per
//!   use site.

mod array;
mod chain_map;

pub use array::Array;
pub use chain_map::{ChainMap, KeyOps};
