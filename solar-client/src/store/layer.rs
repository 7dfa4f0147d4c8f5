use geo::{BoundingRect, Centroid, Intersects, MultiPolygon, Point};
use rstar::{
    primitives::{GeomWithData, Rectangle},
    RTree,
};

use crate::domain::{BuildingSolarRecord, PotentialTier};

type IndexedEnvelope = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// All of a city's buildings as one renderable geometry, with attribute
/// lookup by position.
///
/// `geometry().0[i]`, `tiers()[i]` and `record(i)` refer to the same building.
pub struct CityLayer {
    records: Vec<BuildingSolarRecord>,
    geometry: MultiPolygon<f64>,
    tiers: Vec<PotentialTier>,
    index: RTree<IndexedEnvelope>,
}

impl CityLayer {
    pub fn from_records(records: Vec<BuildingSolarRecord>) -> Self {
        let geometry = MultiPolygon::new(records.iter().map(|r| r.geometry.clone()).collect());
        let tiers = records.iter().map(BuildingSolarRecord::tier).collect();
        let envelopes = records
            .iter()
            .enumerate()
            .filter_map(|(i, r)| {
                let rect = r.geometry.bounding_rect()?;
                Some(GeomWithData::new(
                    Rectangle::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
                    i,
                ))
            })
            .collect();

        Self {
            records,
            geometry,
            tiers,
            index: RTree::bulk_load(envelopes),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    pub fn tiers(&self) -> &[PotentialTier] {
        &self.tiers
    }

    pub fn record(&self, i: usize) -> Option<&BuildingSolarRecord> {
        self.records.get(i)
    }

    /// Building whose footprint covers the given lon/lat, if any.
    pub fn building_at(&self, lon: f64, lat: f64) -> Option<&BuildingSolarRecord> {
        let p = Point::new(lon, lat);
        self.index
            .locate_all_at_point(&[lon, lat])
            .map(|hit| hit.data)
            .filter(|&i| self.records[i].geometry.intersects(&p))
            .min()
            .map(|i| &self.records[i])
    }

    /// Mean of the building centroids; a reasonable initial map view.
    pub fn center(&self) -> Option<Point<f64>> {
        let centroids: Vec<Point<f64>> = self.records.iter().filter_map(|r| r.geometry.centroid()).collect();
        if centroids.is_empty() {
            return None;
        }
        let n = centroids.len() as f64;
        let (sx, sy) = centroids.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x(), sy + p.y()));
        Some(Point::new(sx / n, sy / n))
    }
}
