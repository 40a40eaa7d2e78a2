pub mod cell;
pub mod great_circle;

pub use cell::{cell_of, ring, CellId, CellResolution, GeoError};
pub use great_circle::{haversine_distance, initial_bearing};
