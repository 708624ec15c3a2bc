// Skybridge: mirror third-party social network content into the fediverse
//
// This is the library root. Each module corresponds to a layer of the
// acquisition stack, from the upstream backends up to the crawl pipeline.

pub mod bridge;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod random;
pub mod router;
pub mod settings;
pub mod sources;
pub mod status;
