pub mod backoff;
pub mod config;
pub mod db;
pub mod distribute;
pub mod ingest;
pub mod mqtt;
pub mod repo;

pub use distribute::ConfigDistributor;
