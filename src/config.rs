use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::matcher::{DetectionConfig, ProximityConfig};
use crate::realtime::{BearingPairing, PipelineConfig};
use crate::secrets::{EnvSecrets, FileSecrets, SecretSource};
use crate::store::{DEFAULT_LATEST_DEPTH, DEFAULT_TOPIC_CAPACITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SecretProvider {
    Env,
    File,
}

#[derive(Debug, Parser)]
#[command(name = "drift-realtime")]
#[command(about = "Vehicle position enrichment and rider trip detection service")]
pub struct Args {
    /// Port to run the HTTP server on
    #[arg(short, long, env = "SERVER_PORT", default_value = "8080")]
    pub port: u16,

    /// GTFS-Realtime vehicle positions endpoint
    #[arg(long, env = "FEED_URL")]
    pub feed_url: String,

    /// Name of the secret holding the feed API key; no key is sent when unset
    #[arg(long, env = "FEED_API_KEY_NAME")]
    pub feed_api_key_name: Option<String>,

    #[arg(long, env = "SECRET_PROVIDER", value_enum, default_value = "env")]
    pub secret_provider: SecretProvider,

    /// Directory read by the `file` secret provider
    #[arg(long, env = "SECRETS_DIR", default_value = "/run/secrets")]
    pub secrets_dir: PathBuf,

    #[arg(long, env = "FETCH_INTERVAL_SECS", default_value = "10")]
    pub fetch_interval_secs: u64,

    /// Recorded vehicle trajectories used by trip detection and replay
    #[arg(long, env = "VEHICLE_HISTORY_CSV")]
    pub vehicle_history: Option<PathBuf>,

    /// GTFS static zip providing stops.txt
    #[arg(long, env = "GTFS_STATIC_ZIP")]
    pub gtfs_static: Option<PathBuf>,

    #[arg(long, env = "ROUTE_CATALOG_CSV")]
    pub route_catalog: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_TOPIC_CAPACITY)]
    pub topic_capacity: usize,

    #[arg(long, default_value_t = DEFAULT_LATEST_DEPTH)]
    pub latest_depth: usize,

    /// Coarse-cell rings around a subscriber
    #[arg(long, default_value = "4")]
    pub ring_radius: u32,

    #[arg(long, default_value = "2000")]
    pub read_timeout_ms: u64,

    #[arg(long, value_enum, default_value = "index")]
    pub bearing_pairing: BearingPairing,

    /// Skip the stationary check in trip detection
    #[arg(long)]
    pub no_stationary_prefilter: bool,
}

impl Args {
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            interval: Duration::from_secs(self.fetch_interval_secs.max(1)),
            bearing_pairing: self.bearing_pairing,
        }
    }

    pub fn proximity(&self) -> ProximityConfig {
        ProximityConfig {
            ring_radius: self.ring_radius,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }

    pub fn detection(&self) -> DetectionConfig {
        DetectionConfig {
            stationary_prefilter: !self.no_stationary_prefilter,
            ..DetectionConfig::default()
        }
    }

    pub fn secret_source(&self) -> Box<dyn SecretSource> {
        match self.secret_provider {
            SecretProvider::Env => Box::new(EnvSecrets),
            SecretProvider::File => Box::new(FileSecrets::new(self.secrets_dir.clone())),
        }
    }
}
