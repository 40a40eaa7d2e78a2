use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use tracing::{info, warn};

use crate::geo::{cell_of, CellResolution};
use crate::gtfs::{RouteInfo, Stop};
use crate::matcher::history::HistoricalSample;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing column {0:?}")]
    MissingColumn(&'static str),
}

fn open(path: &Path) -> Result<File, LoadError> {
    File::open(path).map_err(|source| LoadError::Open {
        path: path.display().to_string(),
        source,
    })
}

/// Reads `stops.txt` out of a GTFS static zip.
pub fn load_stops(path: &Path) -> Result<Vec<Stop>, LoadError> {
    info!(path = %path.display(), "loading stops from GTFS archive");
    let archive = zip::ZipArchive::new(BufReader::new(open(path)?))?;
    let stops = parse_stops(archive)?;
    info!(count = stops.len(), "loaded stops");
    Ok(stops)
}

fn parse_stops<R: Read + Seek>(mut archive: zip::ZipArchive<R>) -> Result<Vec<Stop>, LoadError> {
    let file = archive.by_name("stops.txt")?;
    let mut reader = csv::Reader::from_reader(file);

    let headers = reader.headers()?.clone();
    let column = |name: &'static str| {
        headers
            .iter()
            .position(|h| h.trim_start_matches('\u{feff}') == name)
            .ok_or(LoadError::MissingColumn(name))
    };
    let id_col = column("stop_id")?;
    let name_col = column("stop_name")?;
    let lat_col = column("stop_lat")?;
    let lon_col = column("stop_lon")?;

    let mut stops = Vec::new();
    for result in reader.records() {
        let record = result?;
        let stop_id = record.get(id_col).unwrap_or("").to_string();
        let lat: Option<f64> = record.get(lat_col).and_then(|v| v.trim().parse().ok());
        let lon: Option<f64> = record.get(lon_col).and_then(|v| v.trim().parse().ok());

        let Some((stop_lat, stop_lon)) = lat.zip(lon) else {
            warn!(stop_id = %stop_id, "skipping stop without coordinates");
            continue;
        };
        let Ok(cell) = cell_of(stop_lat, stop_lon, CellResolution::Medium) else {
            warn!(stop_id = %stop_id, stop_lat, stop_lon, "skipping stop with invalid coordinates");
            continue;
        };

        stops.push(Stop {
            stop_id,
            stop_name: record.get(name_col).unwrap_or("").to_string(),
            stop_lat,
            stop_lon,
            cell,
        });
    }

    Ok(stops)
}

pub fn load_route_catalog(path: &Path) -> Result<Vec<RouteInfo>, LoadError> {
    info!(path = %path.display(), "loading route catalog");
    let routes = parse_route_catalog(open(path)?)?;
    info!(count = routes.len(), "loaded routes");
    Ok(routes)
}

pub fn parse_route_catalog<R: Read>(source: R) -> Result<Vec<RouteInfo>, LoadError> {
    let mut reader = csv::Reader::from_reader(source);
    let mut routes = Vec::new();
    for result in reader.deserialize() {
        routes.push(result?);
    }
    Ok(routes)
}

pub fn load_vehicle_history(path: &Path) -> Result<Vec<HistoricalSample>, LoadError> {
    info!(path = %path.display(), "loading historical vehicle log");
    let samples = parse_vehicle_history(open(path)?)?;
    info!(count = samples.len(), "loaded historical samples");
    Ok(samples)
}

/// Parses a vehicle log with at least `manual_timediff`, `latitude` and
/// `longitude` columns. Rows with unusable coordinates are dropped.
pub fn parse_vehicle_history<R: Read>(source: R) -> Result<Vec<HistoricalSample>, LoadError> {
    let mut reader = csv::Reader::from_reader(source);
    let mut samples = Vec::new();
    let mut skipped = 0usize;

    for result in reader.deserialize::<HistoricalSample>() {
        let sample = result?;
        if cell_of(sample.latitude, sample.longitude, CellResolution::Fine).is_err()
            || !sample.elapsed_seconds.is_finite()
        {
            skipped += 1;
            continue;
        }
        samples.push(sample);
    }

    if skipped > 0 {
        warn!(skipped, "dropped historical samples with invalid values");
    }
    Ok(samples)
}
