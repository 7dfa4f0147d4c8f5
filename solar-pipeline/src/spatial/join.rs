use futures::StreamExt;
use geo::{BoundingRect, EuclideanDistance, Intersects, Point, Polygon, Rect};
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use solar_client::AnnualIrradianceRecord;

use crate::pipeline::{PipelineError, Source};

use super::{
    crs::{reproject, CrsError},
    CityBoundary, CityBuilding, Footprint, FootprintChunk,
};

/// An irradiance sample location inside the R-tree, pointing back at its record.
#[derive(Debug, Clone, Copy)]
struct IrradianceSite {
    lon_lat: [f64; 2],
    index: usize,
}

impl RTreeObject for IrradianceSite {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.lon_lat)
    }
}

impl PointDistance for IrradianceSite {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.lon_lat[0] - point[0];
        let dy = self.lon_lat[1] - point[1];
        dx * dx + dy * dy
    }
}

/// Annual irradiance records indexed for nearest-location lookups in EPSG:4326.
pub struct IrradianceIndex {
    records: Vec<AnnualIrradianceRecord>,
    tree: RTree<IrradianceSite>,
}

impl IrradianceIndex {
    pub fn new(mut records: Vec<AnnualIrradianceRecord>) -> Self {
        // Record order doubles as the tie-break between equidistant sites.
        records.sort_by(|a, b| {
            a.latitude
                .total_cmp(&b.latitude)
                .then(a.longitude.total_cmp(&b.longitude))
        });
        let sites = records
            .iter()
            .enumerate()
            .map(|(index, r)| IrradianceSite {
                lon_lat: [r.longitude, r.latitude],
                index,
            })
            .collect();

        Self {
            records,
            tree: RTree::bulk_load(sites),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Closest record to `polygon` (zero when the site lies inside it), if one
    /// lies within `max_distance`. A site exactly at the threshold qualifies.
    pub fn nearest_within(
        &self,
        polygon: &Polygon<f64>,
        max_distance: f64,
    ) -> Option<(&AnnualIrradianceRecord, f64)> {
        let rect = polygon.bounding_rect()?;
        let search = AABB::from_corners(
            [rect.min().x - max_distance, rect.min().y - max_distance],
            [rect.max().x + max_distance, rect.max().y + max_distance],
        );

        let mut best: Option<(usize, f64)> = None;
        for site in self.tree.locate_in_envelope(&search) {
            let d = Point::new(site.lon_lat[0], site.lon_lat[1]).euclidean_distance(polygon);
            if d > max_distance {
                continue;
            }
            best = match best {
                Some((bi, bd)) if bd < d || (bd == d && bi < site.index) => Some((bi, bd)),
                _ => Some((site.index, d)),
            };
        }

        best.map(|(i, d)| (&self.records[i], d))
    }
}

/// Result of joining one city's footprints.
#[derive(Debug)]
pub enum JoinOutcome {
    /// No footprint intersects the boundary.
    NoBuildings,
    /// Footprints intersect the boundary but none has irradiance data in range.
    NoneWithinDistance { candidates: usize },
    Joined {
        buildings: Vec<CityBuilding>,
        beyond_distance: usize,
    },
}

/// Reduces the footprint source to one city's buildings, each with its
/// nearest irradiance record.
///
/// Only the current chunk and the buildings already found inside the city are
/// held in memory.
pub struct SpatialJoinEngine<'a> {
    boundary: &'a CityBoundary,
    irradiance: &'a IrradianceIndex,
    max_distance: f64,
    boundary_rect: Option<Rect<f64>>,
}

impl<'a> SpatialJoinEngine<'a> {
    pub fn new(boundary: &'a CityBoundary, irradiance: &'a IrradianceIndex, max_distance: f64) -> Self {
        Self {
            boundary,
            irradiance,
            max_distance,
            boundary_rect: boundary.geometry.bounding_rect(),
        }
    }

    fn intersects_boundary(&self, geometry: &Polygon<f64>) -> bool {
        let Some(boundary_rect) = self.boundary_rect else {
            return false;
        };
        match geometry.bounding_rect() {
            Some(rect) if boundary_rect.intersects(&rect) => self.boundary.geometry.intersects(geometry),
            _ => false,
        }
    }

    /// Footprints of `chunk` that intersect the boundary, in the boundary's reference.
    pub fn filter_chunk(&self, chunk: FootprintChunk) -> Result<Vec<Footprint>, CrsError> {
        let FootprintChunk { crs, footprints, .. } = chunk;
        let target = self.boundary.crs;

        let mut kept = Vec::new();
        for fp in footprints {
            let geometry = if crs == target {
                fp.geometry
            } else {
                reproject(&fp.geometry, crs, target)?
            };
            if self.intersects_boundary(&geometry) {
                kept.push(Footprint {
                    row_index: fp.row_index,
                    geometry,
                });
            }
        }
        Ok(kept)
    }

    pub async fn buildings_in_city<S>(&self, source: &S) -> Result<Vec<Footprint>, PipelineError>
    where
        S: Source<FootprintChunk> + ?Sized,
    {
        let mut stream = source.stream().await;
        let mut inside = Vec::new();
        let mut chunks = 0usize;

        while let Some(item) = stream.next().await {
            let chunk = item?.payload;
            let first_row = chunk.first_row;
            let kept = self.filter_chunk(chunk)?;
            chunks += 1;
            tracing::debug!(
                city = %self.boundary.name,
                chunk = chunks,
                first_row,
                kept = kept.len(),
                "footprint chunk filtered"
            );
            inside.extend(kept);
        }

        metrics::counter!("buildings_in_city_total").increment(inside.len() as u64);
        tracing::info!(city = %self.boundary.name, chunks, buildings = inside.len(), "city footprints collected");
        Ok(inside)
    }

    /// Attach each building's nearest irradiance record; buildings with none in
    /// range are dropped.
    pub fn attach_nearest(&self, buildings: Vec<Footprint>) -> JoinOutcome {
        if buildings.is_empty() {
            return JoinOutcome::NoBuildings;
        }

        let candidates = buildings.len();
        let mut joined = Vec::with_capacity(candidates);
        for fp in buildings {
            if let Some((record, distance)) = self.irradiance.nearest_within(&fp.geometry, self.max_distance) {
                joined.push(CityBuilding {
                    row_index: fp.row_index,
                    geometry: fp.geometry,
                    irradiance: record.clone(),
                    irradiance_distance: distance,
                    roof_area_sqm: None,
                    estimate: None,
                });
            }
        }
        joined.sort_by_key(|b| b.row_index);

        let beyond_distance = candidates - joined.len();
        metrics::counter!("buildings_beyond_distance_total").increment(beyond_distance as u64);
        if beyond_distance > 0 {
            tracing::info!(
                city = %self.boundary.name,
                dropped = beyond_distance,
                max_distance = self.max_distance,
                "buildings without irradiance data in range dropped"
            );
        }

        if joined.is_empty() {
            JoinOutcome::NoneWithinDistance { candidates }
        } else {
            JoinOutcome::Joined {
                buildings: joined,
                beyond_distance,
            }
        }
    }

    pub async fn run<S>(&self, source: &S) -> Result<JoinOutcome, PipelineError>
    where
        S: Source<FootprintChunk> + ?Sized,
    {
        let inside = self.buildings_in_city(source).await?;
        Ok(self.attach_nearest(inside))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{pipeline::VecSource, spatial::Crs};
    use geo::{polygon, MultiPolygon};
    use std::collections::BTreeSet;

    fn record(lat: f64, lon: f64, ghi: f64) -> AnnualIrradianceRecord {
        AnnualIrradianceRecord {
            latitude: lat,
            longitude: lon,
            mean_daily_ghi: ghi,
            mean_daily_dni: ghi + 1000.0,
            mean_daily_dhi: 500.0,
        }
    }

    fn square(x0: f64, y0: f64, size: f64) -> Polygon<f64> {
        polygon![(x: x0, y: y0), (x: x0 + size, y: y0), (x: x0 + size, y: y0 + size), (x: x0, y: y0 + size)]
    }

    fn boundary() -> CityBoundary {
        CityBoundary {
            name: "Tempe".to_string(),
            geometry: MultiPolygon::new(vec![square(-112.0, 33.3, 0.2)]),
            crs: Crs::Wgs84,
        }
    }

    fn footprints() -> Vec<Footprint> {
        // 0..6 inside, 6 straddles the west edge, 7 and 8 outside.
        let mut fps: Vec<Footprint> = (0..6)
            .map(|i| Footprint {
                row_index: i,
                geometry: square(-111.99 + 0.03 * i as f64, 33.35, 0.0005),
            })
            .collect();
        fps.push(Footprint {
            row_index: 6,
            geometry: square(-112.0002, 33.4, 0.0005),
        });
        fps.push(Footprint {
            row_index: 7,
            geometry: square(-112.5, 33.4, 0.0005),
        });
        fps.push(Footprint {
            row_index: 8,
            geometry: square(-111.9, 34.0, 0.0005),
        });
        fps
    }

    fn chunked(fps: &[Footprint], size: usize, crs: Crs) -> VecSource<FootprintChunk> {
        let chunks = fps
            .chunks(size)
            .map(|c| FootprintChunk {
                first_row: c[0].row_index,
                crs,
                footprints: c.to_vec(),
            })
            .collect();
        VecSource::new(chunks)
    }

    fn index() -> IrradianceIndex {
        IrradianceIndex::new(vec![
            record(33.36, -111.98, 6000.0),
            record(33.36, -111.85, 6500.0),
            // Far from every building.
            record(35.2, -111.6, 7000.0),
        ])
    }

    #[test]
    fn nearest_prefers_closest_site_and_inside_is_zero() {
        let idx = index();
        let poly = square(-111.981, 33.359, 0.002);
        let (rec, d) = idx.nearest_within(&poly, 0.045).unwrap();
        assert_eq!(rec.mean_daily_ghi, 6000.0);
        assert_eq!(d, 0.0);

        let poly = square(-111.87, 33.35, 0.001);
        let (rec, d) = idx.nearest_within(&poly, 0.045).unwrap();
        assert_eq!(rec.mean_daily_ghi, 6500.0);
        assert!(d > 0.0 && d <= 0.045);
    }

    #[test]
    fn nothing_within_threshold_yields_none() {
        let idx = index();
        assert!(idx.nearest_within(&square(-113.0, 33.0, 0.001), 0.045).is_none());
    }

    #[tokio::test]
    async fn intersects_filter_keeps_inside_and_edge_buildings() {
        let b = boundary();
        let idx = index();
        let engine = SpatialJoinEngine::new(&b, &idx, 10.0);

        let inside = engine.buildings_in_city(&chunked(&footprints(), 4, Crs::Wgs84)).await.unwrap();
        let rows: Vec<u64> = inside.iter().map(|f| f.row_index).collect();
        assert_eq!(rows, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn chunk_size_does_not_change_joined_set() {
        let b = boundary();
        let idx = index();
        let engine = SpatialJoinEngine::new(&b, &idx, 0.045);

        let mut sets = Vec::new();
        for size in [1, 3, 100_000] {
            let outcome = engine.run(&chunked(&footprints(), size, Crs::Wgs84)).await.unwrap();
            let JoinOutcome::Joined { buildings, .. } = outcome else {
                panic!("expected joined buildings");
            };
            let set: BTreeSet<(u64, u64)> = buildings
                .iter()
                .map(|b| (b.row_index, b.irradiance.mean_daily_ghi as u64))
                .collect();
            sets.push(set);
        }
        assert_eq!(sets[0], sets[1]);
        assert_eq!(sets[1], sets[2]);
    }

    #[tokio::test]
    async fn joined_buildings_respect_distance_bound() {
        let b = boundary();
        let idx = index();
        let max_distance = 0.045;
        let engine = SpatialJoinEngine::new(&b, &idx, max_distance);

        let outcome = engine.run(&chunked(&footprints(), 2, Crs::Wgs84)).await.unwrap();
        let JoinOutcome::Joined {
            buildings,
            beyond_distance,
        } = outcome
        else {
            panic!("expected joined buildings");
        };

        // Footprint 3 at -111.90 is farther than 0.045 from both nearby sites.
        let rows: Vec<u64> = buildings.iter().map(|b| b.row_index).collect();
        assert!(!rows.contains(&3));
        assert!(beyond_distance >= 1);
        for b in &buildings {
            assert!(b.irradiance_distance <= max_distance);
            let direct = b.irradiance.point().euclidean_distance(&b.geometry);
            assert!((direct - b.irradiance_distance).abs() < 1e-12);
        }
        assert!(rows.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn projected_chunks_are_reprojected_before_filtering() {
        let b = boundary();
        let idx = index();
        let engine = SpatialJoinEngine::new(&b, &idx, 0.045);

        let mercator: Vec<Footprint> = footprints()
            .into_iter()
            .map(|f| Footprint {
                row_index: f.row_index,
                geometry: reproject(&f.geometry, Crs::Wgs84, Crs::WebMercator).unwrap(),
            })
            .collect();

        let from_mercator = engine
            .buildings_in_city(&chunked(&mercator, 5, Crs::WebMercator))
            .await
            .unwrap();
        let from_wgs84 = engine.buildings_in_city(&chunked(&footprints(), 5, Crs::Wgs84)).await.unwrap();

        let a: Vec<u64> = from_mercator.iter().map(|f| f.row_index).collect();
        let b: Vec<u64> = from_wgs84.iter().map(|f| f.row_index).collect();
        assert_eq!(a, b);
        // Geometry comes back in the boundary's reference.
        let c = from_mercator[0].geometry.exterior().0[0];
        assert!((c.x - -111.99).abs() < 1e-9);
    }

    #[tokio::test]
    async fn city_without_footprints_is_no_buildings() {
        let b = boundary();
        let idx = index();
        let engine = SpatialJoinEngine::new(&b, &idx, 0.045);

        let outside = vec![Footprint {
            row_index: 0,
            geometry: square(-114.0, 32.0, 0.001),
        }];
        let outcome = engine.run(&chunked(&outside, 10, Crs::Wgs84)).await.unwrap();
        assert!(matches!(outcome, JoinOutcome::NoBuildings));
    }

    #[tokio::test]
    async fn city_without_irradiance_in_range_is_reported() {
        let b = boundary();
        let idx = IrradianceIndex::new(vec![record(35.2, -111.6, 7000.0)]);
        let engine = SpatialJoinEngine::new(&b, &idx, 0.045);

        let outcome = engine.run(&chunked(&footprints(), 10, Crs::Wgs84)).await.unwrap();
        assert!(matches!(outcome, JoinOutcome::NoneWithinDistance { candidates: 7 }));
    }
}
