//! End-to-end planning: request → prompt → upstream stream → itinerary.

use std::time::{Duration, Instant};

use chrono::{Local, NaiveDate};
use futures::Stream;
use tracing::{info, instrument, warn};

use itinera_extract::{extract_itinerary, mock_itinerary};
use itinera_shared::{AppConfig, ExtractedItinerary, ItineraError, Result, TravelRequestParams};
use itinera_stream::{IngestOutcome, StreamObserver, StreamOptions, TextSource, ingest};

use crate::prompt::build_prompt;
use crate::upstream::UpstreamClient;

/// Where a planned itinerary came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItinerarySource {
    /// Extracted from the upstream answer.
    Remote { text: TextSource },
    /// Generated offline because the upstream call failed.
    Mock { reason: String },
}

/// Result of a planning run.
#[derive(Debug, Clone)]
pub struct PlannedTrip {
    pub itinerary: ExtractedItinerary,
    pub source: ItinerarySource,
    /// Total elapsed time.
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
///
/// Stream-level events arrive through the [`StreamObserver`] supertrait.
pub trait ProgressReporter: StreamObserver {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when the pipeline completes.
    fn done(&self, trip: &PlannedTrip);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl StreamObserver for SilentProgress {
    fn frame_received(&self, _event_type: &str) {}
    fn text_progress(&self, _chars: usize) {}
    fn frame_skipped(&self, _reason: &str) {}
}

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn done(&self, _trip: &PlannedTrip) {}
}

/// Today's date in the local time zone; trips start today.
pub fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

/// Turn an upstream byte stream into an itinerary for `params`.
///
/// The stream is consumed and dropped before this returns, whatever the
/// outcome. Dropping the returned future cancels the read.
pub async fn extract_from_stream<S, B, E, O>(
    params: &TravelRequestParams,
    stream: S,
    options: &StreamOptions,
    today: NaiveDate,
    observer: &O,
) -> Result<ExtractedItinerary>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
    O: StreamObserver + ?Sized,
{
    let (itinerary, _) = ingest_and_extract(params, stream, options, today, observer).await?;
    Ok(itinerary)
}

async fn ingest_and_extract<S, B, E, O>(
    params: &TravelRequestParams,
    stream: S,
    options: &StreamOptions,
    today: NaiveDate,
    observer: &O,
) -> Result<(ExtractedItinerary, IngestOutcome)>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
    O: StreamObserver + ?Sized,
{
    params.validate()?;
    let outcome = ingest(stream, options, observer).await?;
    let itinerary = extract_itinerary(params, &outcome.text, today);
    Ok((itinerary, outcome))
}

/// Plan a trip against the configured upstream service.
///
/// 1. Resolve credentials
/// 2. Build the prompt and open the stream
/// 3. Ingest the stream and extract the itinerary
#[instrument(skip_all, fields(location = %params.location))]
pub async fn plan_trip(
    params: &TravelRequestParams,
    config: &AppConfig,
    progress: &dyn ProgressReporter,
) -> Result<PlannedTrip> {
    params.validate()?;
    progress.phase("Resolving credentials");
    let client = UpstreamClient::from_config(&config.upstream)?;
    plan_with_client(params, &client, &StreamOptions::from(&config.stream), progress).await
}

/// [`plan_trip`] with an already-built client.
pub async fn plan_with_client(
    params: &TravelRequestParams,
    client: &UpstreamClient,
    options: &StreamOptions,
    progress: &dyn ProgressReporter,
) -> Result<PlannedTrip> {
    let start = Instant::now();

    progress.phase("Contacting planner");
    let prompt = build_prompt(params);
    let stream = client.open_stream(&prompt).await?;

    progress.phase("Receiving itinerary");
    let (itinerary, outcome) =
        ingest_and_extract(params, stream, options, local_today(), progress).await?;

    let trip = PlannedTrip {
        itinerary,
        source: ItinerarySource::Remote {
            text: outcome.source,
        },
        elapsed: start.elapsed(),
    };
    progress.done(&trip);

    info!(
        destination = %trip.itinerary.destination,
        days = trip.itinerary.daily_plans.len(),
        source = ?outcome.source,
        elapsed_ms = trip.elapsed.as_millis(),
        "trip planned"
    );

    Ok(trip)
}

/// Plan a trip, substituting the offline itinerary when the upstream fails.
///
/// Invalid requests are still errors. With `defaults.fallback_to_mock`
/// turned off this is [`plan_trip`].
pub async fn plan_trip_or_mock(
    params: &TravelRequestParams,
    config: &AppConfig,
    progress: &dyn ProgressReporter,
) -> Result<PlannedTrip> {
    if !config.defaults.fallback_to_mock {
        return plan_trip(params, config, progress).await;
    }

    let start = Instant::now();
    match plan_trip(params, config, progress).await {
        Ok(trip) => Ok(trip),
        Err(e @ ItineraError::Validation { .. }) => Err(e),
        Err(e) => {
            warn!(error = %e, "upstream planning failed, using offline itinerary");
            progress.phase("Using offline itinerary");
            let trip = PlannedTrip {
                itinerary: mock_itinerary(params, local_today()),
                source: ItinerarySource::Mock {
                    reason: e.to_string(),
                },
                elapsed: start.elapsed(),
            };
            progress.done(&trip);
            Ok(trip)
        }
    }
}
