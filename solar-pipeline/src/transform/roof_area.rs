use geo::{Area, Polygon};

use crate::{
    pipeline::{Envelope, PipelineError, Transform},
    spatial::{
        crs::{reproject, Crs, CrsError},
        CityBuilding,
    },
};

/// Planar area of a building footprint, in square metres.
///
/// The footprint is measured in UTM zone 12N, which covers Arizona.
pub fn roof_area_sqm(geometry: &Polygon<f64>, crs: Crs) -> Result<f64, CrsError> {
    let projected = reproject(geometry, crs, Crs::Utm12N)?;
    Ok(projected.unsigned_area())
}

/// Fills in `roof_area_sqm` from the (unsimplified) footprint.
#[derive(Clone)]
pub struct RoofAreaMeasurement {
    crs: Crs,
}

impl RoofAreaMeasurement {
    /// `crs` is the reference the building geometries are in.
    pub fn new(crs: Crs) -> Self {
        Self { crs }
    }
}

#[async_trait::async_trait]
impl Transform<CityBuilding, CityBuilding> for RoofAreaMeasurement {
    async fn apply(&self, mut input: Envelope<CityBuilding>) -> Result<Envelope<CityBuilding>, PipelineError> {
        let area = roof_area_sqm(&input.payload.geometry, self.crs)?;
        input.payload.roof_area_sqm = Some(area);
        Ok(input)
    }
}
