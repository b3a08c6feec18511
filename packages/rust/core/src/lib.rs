//! Trip planning for itinera.
//!
//! This crate ties the upstream client, stream ingestion, and itinerary
//! extraction into end-to-end workflows (e.g., [`plan_trip`]).

pub mod pipeline;
pub mod prompt;
pub mod upstream;

pub use pipeline::{
    ItinerarySource, PlannedTrip, ProgressReporter, SilentProgress, extract_from_stream,
    local_today, plan_trip, plan_trip_or_mock, plan_with_client,
};
pub use prompt::build_prompt;
pub use upstream::UpstreamClient;
