pub mod anomaly;
pub mod calendar;
pub mod causal;
pub mod config;
pub mod error;
pub mod fetch;
pub mod forecast;
pub mod ingest;
pub mod output;
pub mod pipeline;
pub mod processing;
pub mod types;
