use std::{
    fs::File,
    path::{Path, PathBuf},
};

use futures::StreamExt;
use geo::{Polygon, Simplify};
use polars::prelude::*;
use solar_client::{
    city_file_name,
    domain::{columns, wkb},
    BuildingSolarRecord,
};

use crate::{
    pipeline::{Envelope, PipelineError, Sink},
    spatial::CityBuilding,
};

fn hash_str(hasher: &mut blake3::Hasher, s: &str) {
    let len = s.len() as u32;
    hasher.update(&len.to_le_bytes());
    hasher.update(s.as_bytes());
}

/// Identifier of a building: first 16 hex digits of BLAKE3 over the
/// lowercased city name and the footprint's source row.
pub fn stable_building_id(city: &str, row_index: u64) -> String {
    let mut hasher = blake3::Hasher::new();
    hash_str(&mut hasher, &city.to_lowercase());
    hasher.update(&row_index.to_le_bytes());
    hasher.finalize().to_hex()[..16].to_string()
}

/// Round half to even at `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round_ties_even() / scale
}

/// Douglas-Peucker simplification that never returns a degenerate polygon.
///
/// A collapsed exterior falls back to the original geometry; collapsed holes
/// are dropped.
pub fn simplify_footprint(geometry: &Polygon<f64>, tolerance: f64) -> Polygon<f64> {
    if tolerance <= 0.0 {
        return geometry.clone();
    }
    let simplified = geometry.simplify(&tolerance);
    if simplified.exterior().0.len() < 4 {
        return geometry.clone();
    }
    let (exterior, interiors) = simplified.into_inner();
    let interiors = interiors.into_iter().filter(|ring| ring.0.len() >= 4).collect();
    Polygon::new(exterior, interiors)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CityWriteSummary {
    pub path: PathBuf,
    pub buildings: usize,
    pub total_kwh: f64,
    pub total_usd: f64,
    pub dropped: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CityWriteOutcome {
    Written(CityWriteSummary),
    /// Nothing survived to be written; any earlier file for the city is removed.
    Empty { dropped: usize },
}

/// Writes one city's annotated buildings as a Snappy-compressed parquet file,
/// replacing any earlier file for the city.
pub struct CityParquetSink {
    output_dir: PathBuf,
    city: String,
    simplify_tolerance: f64,
}

impl CityParquetSink {
    pub fn new<P: Into<PathBuf>>(output_dir: P, city: &str, simplify_tolerance: f64) -> Self {
        Self {
            output_dir: output_dir.into(),
            city: city.to_string(),
            simplify_tolerance,
        }
    }

    pub fn target_path(&self) -> PathBuf {
        self.output_dir.join(city_file_name(&self.city))
    }

    fn to_record(&self, b: &CityBuilding) -> Option<BuildingSolarRecord> {
        let roof_area = b.roof_area_sqm?;
        let estimate = b.estimate?;
        Some(BuildingSolarRecord {
            building_id: stable_building_id(&self.city, b.row_index),
            geometry: simplify_footprint(&b.geometry, self.simplify_tolerance),
            roof_area_sqm: round_to(roof_area, 1),
            annual_solar_potential_kwh: round_to(estimate.annual_kwh, 0),
            annual_estimated_savings_usd: round_to(estimate.annual_savings_usd, 2),
        })
    }

    /// Delete the city's file from an earlier run, if there is one.
    pub fn remove_stale(&self) -> Result<(), PipelineError> {
        let path = self.target_path();
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(city = %self.city, path = %path.display(), "stale city file removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::Sink(format!("failed to remove {}: {e}", path.display()))),
        }
    }
}

fn records_frame(records: &[BuildingSolarRecord]) -> PolarsResult<DataFrame> {
    let ids: Vec<&str> = records.iter().map(|r| r.building_id.as_str()).collect();
    let geometries: Vec<Vec<u8>> = records.iter().map(|r| wkb::encode_polygon(&r.geometry)).collect();
    let geometries: Vec<&[u8]> = geometries.iter().map(Vec::as_slice).collect();
    let column = |name: &str, f: fn(&BuildingSolarRecord) -> f64| Series::new(name, records.iter().map(f).collect::<Vec<f64>>());

    DataFrame::new(vec![
        Series::new(columns::BUILDING_ID, ids),
        BinaryChunked::from_slice(columns::GEOMETRY, &geometries).into_series(),
        column(columns::ROOF_AREA_SQM, |r| r.roof_area_sqm),
        column(columns::ANNUAL_SOLAR_POTENTIAL_KWH, |r| r.annual_solar_potential_kwh),
        column(columns::ANNUAL_ESTIMATED_SAVINGS_USD, |r| r.annual_estimated_savings_usd),
    ])
}

/// Write to a sibling temp file, then rename over `path`.
fn write_replacing(mut df: DataFrame, path: &Path) -> Result<(), PipelineError> {
    let sink_err = |e: &dyn std::fmt::Display| PipelineError::Sink(format!("{}: {e}", path.display()));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PipelineError::Sink(format!("invalid output path {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    let file = File::create(&tmp).map_err(|e| sink_err(&e))?;
    let written = ParquetWriter::new(file)
        .with_compression(ParquetCompression::Snappy)
        .finish(&mut df);
    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(sink_err(&e));
    }
    std::fs::rename(&tmp, path).map_err(|e| sink_err(&e))
}

#[async_trait::async_trait]
impl Sink<CityBuilding> for CityParquetSink {
    type Report = CityWriteOutcome;

    async fn run<S>(&self, mut input: S) -> Result<CityWriteOutcome, PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<CityBuilding>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut buildings = Vec::new();
        let mut dropped = 0usize;

        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(city = %self.city, error = %e, "building dropped before write");
                    dropped += 1;
                    continue;
                }
            };
            match self.to_record(&env.payload) {
                Some(record) => buildings.push((env.payload.row_index, record)),
                None => {
                    tracing::warn!(city = %self.city, row = env.payload.row_index, "building reached the writer unannotated");
                    dropped += 1;
                }
            }
        }

        let path = self.target_path();
        if buildings.is_empty() {
            self.remove_stale()?;
            return Ok(CityWriteOutcome::Empty { dropped });
        }

        buildings.sort_by_key(|(row, _)| *row);
        let records: Vec<BuildingSolarRecord> = buildings.into_iter().map(|(_, r)| r).collect();
        let total_kwh = records.iter().map(|r| r.annual_solar_potential_kwh).sum();
        let total_usd = records.iter().map(|r| r.annual_estimated_savings_usd).sum();
        let df = records_frame(&records).map_err(|e| PipelineError::Sink(e.to_string()))?;

        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| PipelineError::Sink(format!("failed to create {}: {e}", self.output_dir.display())))?;
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_replacing(df, &target))
            .await
            .map_err(|e| PipelineError::Sink(format!("city writer task failed: {e}")))??;

        metrics::counter!("city_files_written_total").increment(1);
        Ok(CityWriteOutcome::Written(CityWriteSummary {
            path,
            buildings: records.len(),
            total_kwh,
            total_usd,
            dropped,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pipeline::{Pipeline, VecSource},
        spatial::CrsError,
        test_support::scratch_dir,
        transform::SolarEstimate,
    };
    use geo::{polygon, LineString};
    use solar_client::{store::read_city_file, AnnualIrradianceRecord};
    use std::sync::Arc;

    const RATE: f64 = 0.1375;

    fn building(row_index: u64, kwh: f64) -> CityBuilding {
        let x = -112.0 + row_index as f64 * 0.001;
        CityBuilding {
            row_index,
            geometry: polygon![
                (x: x, y: 33.4),
                (x: x + 0.0002, y: 33.4),
                (x: x + 0.0002, y: 33.4002),
                (x: x, y: 33.4002),
            ],
            irradiance: AnnualIrradianceRecord {
                latitude: 33.4,
                longitude: -112.0,
                mean_daily_ghi: 700.0,
                mean_daily_dni: 800.0,
                mean_daily_dhi: 100.0,
            },
            irradiance_distance: 0.0,
            roof_area_sqm: Some(412.345),
            estimate: Some(SolarEstimate {
                annual_kwh: kwh,
                annual_savings_usd: kwh * RATE * (6.0 / 24.0),
            }),
        }
    }

    async fn write(dir: &Path, buildings: Vec<CityBuilding>) -> CityWriteOutcome {
        let pipeline: Pipeline<_, CityBuilding, _> = Pipeline {
            source: VecSource::new(buildings),
            transforms: vec![],
            sink: CityParquetSink::new(dir, "Tempe", 0.0001),
        };
        pipeline.run().await.unwrap()
    }

    #[test]
    fn ids_are_stable_and_city_scoped() {
        let id = stable_building_id("Phoenix", 42);
        assert_eq!(id.len(), 16);
        assert_eq!(id, stable_building_id("phoenix", 42));
        assert_ne!(id, stable_building_id("Phoenix", 43));
        assert_ne!(id, stable_building_id("Tucson", 42));
    }

    #[test]
    fn rounding_is_half_even() {
        assert_eq!(round_to(2.5, 0), 2.0);
        assert_eq!(round_to(3.5, 0), 4.0);
        assert_eq!(round_to(5354.884, 0), 5355.0);
        assert_eq!(round_to(412.345, 1), 412.3);
        assert_eq!(round_to(-0.125, 2), -0.12);
    }

    #[test]
    fn collapsed_simplification_keeps_original() {
        // A footprint smaller than the tolerance would collapse to a line.
        let tiny = polygon![
            (x: -112.0, y: 33.4),
            (x: -111.99999, y: 33.4),
            (x: -111.99999, y: 33.40001),
            (x: -112.0, y: 33.40001),
        ];
        assert_eq!(simplify_footprint(&tiny, 0.0001), tiny);

        // Collinear vertices on a large footprint are removed.
        let large = Polygon::new(
            LineString::from(vec![
                (-112.0, 33.4),
                (-111.999, 33.4),
                (-111.998, 33.4),
                (-111.998, 33.402),
                (-112.0, 33.402),
                (-112.0, 33.4),
            ]),
            vec![],
        );
        assert_eq!(simplify_footprint(&large, 0.0001).exterior().0.len(), 5);
    }

    #[tokio::test]
    async fn savings_follow_potential_and_rate() {
        let dir = scratch_dir("sink-savings");
        let outcome = write(&dir, (0..5).map(|i| building(i, 4_000.0 + i as f64 * 1_733.3)).collect()).await;

        let CityWriteOutcome::Written(summary) = outcome else {
            panic!("nothing written");
        };
        assert_eq!(summary.buildings, 5);
        assert_eq!(summary.path, dir.join("tempe_solar_potential.parquet"));

        let records = read_city_file(&summary.path).unwrap();
        for r in &records {
            let expected = r.annual_solar_potential_kwh * RATE * (6.0 / 24.0);
            // kwh is rounded to the unit before the comparison, savings to the cent
            assert!((r.annual_estimated_savings_usd - expected).abs() <= 0.5 * RATE * 0.25 + 0.005);
            assert_eq!(r.roof_area_sqm, 412.3);
        }
    }

    #[tokio::test]
    async fn rewrite_is_byte_identical_and_order_independent() {
        let dir = scratch_dir("sink-idempotent");
        let forward: Vec<_> = (0..20).map(|i| building(i * 3, 6_000.0)).collect();
        let mut backward = forward.clone();
        backward.reverse();

        write(&dir, forward).await;
        let path = dir.join("tempe_solar_potential.parquet");
        let first = std::fs::read(&path).unwrap();
        write(&dir, backward).await;
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);

        let records = read_city_file(&path).unwrap();
        assert_eq!(records[0].building_id, stable_building_id("Tempe", 0));
        assert_eq!(records[19].building_id, stable_building_id("Tempe", 57));
    }

    #[tokio::test]
    async fn empty_city_replaces_previous_output() {
        let dir = scratch_dir("sink-empty");
        write(&dir, vec![building(0, 1_000.0)]).await;
        let path = dir.join("tempe_solar_potential.parquet");
        assert!(path.exists());

        let mut unannotated = building(1, 1_000.0);
        unannotated.estimate = None;
        let outcome = write(&dir, vec![unannotated]).await;
        assert_eq!(outcome, CityWriteOutcome::Empty { dropped: 1 });
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn reference_errors_abort_the_write() {
        struct Failing;

        #[async_trait::async_trait]
        impl crate::pipeline::Transform<CityBuilding, CityBuilding> for Failing {
            async fn apply(&self, _: Envelope<CityBuilding>) -> Result<Envelope<CityBuilding>, PipelineError> {
                Err(CrsError::Unsupported("EPSG:2223".into()).into())
            }
        }

        let dir = scratch_dir("sink-fatal");
        let pipeline: Pipeline<_, CityBuilding, _> = Pipeline {
            source: VecSource::new(vec![building(0, 1_000.0)]),
            transforms: vec![Arc::new(Failing)],
            sink: CityParquetSink::new(&dir, "Tempe", 0.0001),
        };
        assert!(matches!(pipeline.run().await, Err(PipelineError::Crs(_))));
        assert!(!dir.join("tempe_solar_potential.parquet").exists());
    }
}
