pub mod crs;
pub mod join;

use geo::{MultiPolygon, Polygon};
use solar_client::AnnualIrradianceRecord;

use crate::transform::SolarEstimate;

pub use crs::{Crs, CrsError};
pub use join::{IrradianceIndex, JoinOutcome, SpatialJoinEngine};

/// One building footprint as read from the state-wide source.
#[derive(Debug, Clone, PartialEq)]
pub struct Footprint {
    /// Zero-based position of the feature in the source; the building's identity.
    pub row_index: u64,
    pub geometry: Polygon<f64>,
}

/// A bounded slice of the footprint source, all in one coordinate reference.
#[derive(Debug, Clone)]
pub struct FootprintChunk {
    pub first_row: u64,
    pub crs: Crs,
    pub footprints: Vec<Footprint>,
}

/// A named city boundary in the working reference (EPSG:4326).
#[derive(Debug, Clone)]
pub struct CityBoundary {
    pub name: String,
    pub geometry: MultiPolygon<f64>,
    pub crs: Crs,
}

/// A building inside a city, joined to its nearest irradiance record.
///
/// `roof_area_sqm` and `estimate` are filled in by the annotation transforms.
#[derive(Debug, Clone)]
pub struct CityBuilding {
    pub row_index: u64,
    pub geometry: Polygon<f64>,
    pub irradiance: AnnualIrradianceRecord,
    pub irradiance_distance: f64,
    pub roof_area_sqm: Option<f64>,
    pub estimate: Option<SolarEstimate>,
}
