pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use memory::MemoryStore;
pub use models::identity::{Identity, IdentityError, ProviderId, PublicKey};
pub use postgres::PostgresStore;
pub use store::{IdentityStore, SharedStore, StoreError};
