//! Database layer for Rill

mod article_repository;
mod connection;
mod metadata_repository;
mod migrations;
mod queue_repository;

pub use article_repository::{ArticleRepository, LibSqlArticleRepository};
pub use connection::Database;
pub use metadata_repository::{LibSqlMetadataRepository, MetadataRepository, SyncMetadata};
pub use queue_repository::{LibSqlQueueRepository, QueueRepository};
