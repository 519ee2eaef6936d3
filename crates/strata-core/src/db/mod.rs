pub mod cache;
pub mod query;
pub mod registry;
pub mod repo;

// re-exports
pub use cache::{CacheEntry, CacheSlot, CacheStats, QueryCache};
pub use query::{
    Operation, Query, Queryable,
    plan::{CacheKey, PreparedQuery, plan_query, prepare_query, prepare_query_in},
};
pub use registry::{Registry, RepoEntry, RepoId, RepoIdentity, StartedRepo, lookup, lookup_meta};
pub use repo::Repo;
