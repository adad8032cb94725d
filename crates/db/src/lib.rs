pub mod connection;
pub mod fixtures;
pub mod knowledge;
pub mod migrations;
pub mod store;

pub use connection::{connect, connect_with_settings, ping, DbPool};
pub use fixtures::{CmmsSeedDataset, FixtureError, KnowledgeFixtures, SeedResult, VerificationResult};
pub use knowledge::{Document, InMemoryKnowledgeStore, KnowledgeLoadError};
pub use store::{store_error, SqliteRelationalStore};
