mod api;
mod config;
mod error;
mod geo;
mod gtfs;
mod matcher;
mod realtime;
mod secrets;
mod store;

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::Args;
use crate::error::StartupError;
use crate::gtfs::ReferenceData;
use crate::matcher::SampleLog;
use crate::realtime::{GtfsRealtimeDecoder, HttpFeedSource, PositionPipeline};
use crate::store::MemoryStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run(Args::parse()).await {
        error!(error = %e, "drift-realtime exited");
        std::process::exit(1);
    }
}

fn load_reference(args: &Args) -> Result<ReferenceData, StartupError> {
    let stops = match &args.gtfs_static {
        Some(path) => gtfs::loader::load_stops(path)?,
        None => {
            warn!("no GTFS static zip configured, stop lookup will be empty");
            Vec::new()
        }
    };
    let routes = match &args.route_catalog {
        Some(path) => gtfs::loader::load_route_catalog(path)?,
        None => Vec::new(),
    };

    let reference = ReferenceData::new(stops, routes);
    info!(
        stops = reference.stop_count(),
        routes = reference.route_count(),
        "loaded reference data"
    );
    Ok(reference)
}

fn load_history(args: &Args) -> Result<SampleLog, StartupError> {
    let samples = match &args.vehicle_history {
        Some(path) => gtfs::loader::load_vehicle_history(path)?,
        None => {
            warn!("no vehicle history configured, trip detection will never match");
            Vec::new()
        }
    };
    let history = SampleLog::new(samples);
    info!(samples = history.len(), "loaded vehicle history");
    Ok(history)
}

async fn run(args: Args) -> Result<(), StartupError> {
    info!("starting drift-realtime");

    let reference = Arc::new(load_reference(&args)?);
    let history = Arc::new(load_history(&args)?);
    let store = Arc::new(MemoryStore::new(args.topic_capacity, args.latest_depth));

    let api_key = match &args.feed_api_key_name {
        Some(name) => Some(args.secret_source().get(name)?),
        None => None,
    };

    let pipeline_config = args.pipeline();
    let pipeline = PositionPipeline::new(
        Arc::new(HttpFeedSource::new(args.feed_url.clone(), api_key)),
        Arc::new(GtfsRealtimeDecoder),
        store.clone(),
        &pipeline_config,
    );
    let pipeline_handle = tokio::spawn(realtime::run_pipeline(pipeline, pipeline_config.interval));

    let state = AppState {
        store,
        reference,
        history,
        proximity: args.proximity(),
        detection: args.detection(),
    };
    let api_handle = tokio::spawn(api::server::run_server(state, args.port));

    tokio::select! {
        _ = pipeline_handle => error!("position pipeline exited"),
        result = api_handle => match result {
            Ok(Ok(())) => error!("API server exited"),
            Ok(Err(e)) => return Err(e.into()),
            Err(e) => error!(error = %e, "API server task failed"),
        },
    }
    Ok(())
}
