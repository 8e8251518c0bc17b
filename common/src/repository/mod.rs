pub mod memory_store;
pub mod mongo_store;
pub mod query_builder;
pub mod repository_util;
pub mod store;

pub use memory_store::MemoryStore;
pub use mongo_store::MongoStore;
pub use query_builder::QueryBuilder;
pub use repository_util::{BaseRepository, Entity, PageResult, TypedSubscription};
pub use store::*;
