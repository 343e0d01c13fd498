//! Safe SQL builder: identifiers from table definitions only, values as parameters.

pub mod builder;
pub mod params;
pub use builder::{quoted, ColumnTypes, QueryBuf};
pub use params::*;
