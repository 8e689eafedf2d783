pub mod aggregator;
pub mod config;
pub mod differ;
pub mod error;
pub mod fetcher;
pub mod governor;
pub mod pipeline;
pub mod report;
pub mod store;
pub mod summary;
pub mod twitter;
