pub mod archive;
pub mod audit;
pub mod batch;
pub mod changelog;
pub mod config;
pub mod download;
pub mod error;
pub mod fetch;
pub mod live;
pub mod output;
pub mod parser;
pub mod reconcile;
pub mod segments;
pub mod shutdown;
pub mod snapshot;
pub mod stats;
pub mod sweep;
