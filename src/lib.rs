pub mod config;
pub mod db;
pub mod error;
pub(crate) mod utils;

pub use agentdb_schema::{DescriptorBuilder, Entity, EntityDescriptor, Value};
pub use config::{Config, DatabaseConfig};
pub use db::{Database, Migrator, Queryable, Tx};
pub use error::{AgentDbError, IsRetryable};
