use std::path::PathBuf;

use geo::{Geometry, MultiPolygon};
use shapefile::dbase::FieldValue;

use crate::{
    pipeline::PipelineError,
    spatial::{
        crs::{reproject, Crs, CrsError},
        CityBoundary,
    },
};

/// Named place polygons from an ESRI shapefile, e.g. the Census TIGER/Line places.
///
/// The reference comes from the `.prj` sidecar unless overridden.
pub struct CityBoundarySource {
    path: PathBuf,
    name_field: String,
    crs_override: Option<Crs>,
}

impl CityBoundarySource {
    pub fn new<P: Into<PathBuf>>(path: P, name_field: &str, crs_override: Option<Crs>) -> Self {
        Self {
            path: path.into(),
            name_field: name_field.to_string(),
            crs_override,
        }
    }

    fn resolve_crs(&self) -> Result<Crs, PipelineError> {
        if let Some(crs) = self.crs_override {
            return Ok(crs);
        }
        let prj = self.path.with_extension("prj");
        match std::fs::read_to_string(&prj) {
            Ok(wkt) => Ok(Crs::from_wkt(&wkt)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CrsError::Undetermined(format!("{} (no .prj sidecar)", self.path.display())).into())
            }
            Err(e) => Err(PipelineError::Source(format!("failed to read {}: {e}", prj.display()))),
        }
    }

    /// Read every polygon row and its name. Unreadable input is an error; rows
    /// without a name or a polygon shape are skipped.
    pub fn load(&self) -> Result<CityBoundaries, PipelineError> {
        let crs = self.resolve_crs()?;
        let display = self.path.display();
        let mut reader = shapefile::Reader::from_path(&self.path)
            .map_err(|e| PipelineError::Source(format!("failed to open boundary file {display}: {e}")))?;

        let mut entries = Vec::new();
        let mut skipped = 0usize;
        for item in reader.iter_shapes_and_records() {
            let (shape, record) =
                item.map_err(|e| PipelineError::Source(format!("failed to read boundary row in {display}: {e}")))?;

            let name = match record.get(&self.name_field) {
                Some(FieldValue::Character(Some(name))) => name.trim().to_string(),
                Some(FieldValue::Numeric(Some(name))) => name.to_string(),
                _ => {
                    skipped += 1;
                    continue;
                }
            };
            let geometry = match Geometry::<f64>::try_from(shape) {
                Ok(Geometry::MultiPolygon(mp)) => mp,
                Ok(Geometry::Polygon(p)) => MultiPolygon(vec![p]),
                _ => {
                    skipped += 1;
                    continue;
                }
            };
            entries.push((name, geometry));
        }

        tracing::info!(path = %self.path.display(), %crs, rows = entries.len(), skipped, "city boundaries loaded");
        Ok(CityBoundaries::new(crs, entries))
    }
}

/// All boundary rows of one source, in the source's reference.
#[derive(Debug, Clone)]
pub struct CityBoundaries {
    crs: Crs,
    entries: Vec<(String, MultiPolygon<f64>)>,
}

impl CityBoundaries {
    pub fn new(crs: Crs, entries: Vec<(String, MultiPolygon<f64>)>) -> Self {
        Self { crs, entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Boundary of `name` (exact match) in the working reference. Rows sharing
    /// the name are merged. `None` when no row carries the name.
    pub fn find(&self, name: &str) -> Option<Result<CityBoundary, CrsError>> {
        let polygons: Vec<_> = self
            .entries
            .iter()
            .filter(|(n, _)| n == name)
            .flat_map(|(_, mp)| mp.0.iter().cloned())
            .collect();
        if polygons.is_empty() {
            return None;
        }

        let merged = MultiPolygon(polygons);
        Some(reproject(&merged, self.crs, Crs::Wgs84).map(|geometry| CityBoundary {
            name: name.to_string(),
            geometry,
            crs: Crs::Wgs84,
        }))
    }
}
