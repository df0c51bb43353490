//! # Graph Data Model
//!
//! The plain types that cross every boundary: storage ↔ query ↔ user.
//!
//! Design rule: this module is pure data — no I/O, no state, no async.

pub mod data_map;
pub mod direction;
pub mod soul_id;
pub mod value;

pub use data_map::{merge, DataMap, MetaMap, CDATE, MDATE};
pub use direction::Direction;
pub use soul_id::{SoulId, SOUL_ID_MAX_HEX, SOUL_ID_MIN_HEX, SOUL_ID_PREFIX};
pub use value::Value;
