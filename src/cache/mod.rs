pub mod cached_query;
pub mod orm_cache;
pub mod table_cache;

pub use cached_query::{CachedQuery, Producer};
pub use orm_cache::{OrmCache, RawCache};
pub use table_cache::{TableCache, NO_FILTER_KEY};
