//! Shared types, error model, and configuration for itinera.
//!
//! This crate is the foundation depended on by all other itinera crates.
//! It provides:
//! - [`ItineraError`] — the unified error type
//! - Domain types ([`TravelRequestParams`], [`ExtractedItinerary`], [`CountExpr`])
//! - Configuration ([`AppConfig`], config loading, credential resolution)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, Credentials, DefaultsConfig, StreamConfig, UpstreamConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, validate_credentials,
};
pub use error::{ItineraError, Result};
pub use types::{
    Activity, CountExpr, DEFAULT_DAY_COUNT, DailyPlan, ExtractedItinerary, MAX_DAY_COUNT,
    Recommendations, RequestId, TravelRequestParams,
};
