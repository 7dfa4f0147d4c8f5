use std::path::PathBuf;

use geo::{Coord, LineString, Polygon};
use serde::Deserialize;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
};

use crate::{
    pipeline::{Envelope, EnvelopeStream, PipelineError, Source},
    spatial::{Crs, Footprint, FootprintChunk},
};

type Ring = Vec<Vec<f64>>;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum GeoJsonGeometry {
    Polygon { coordinates: Vec<Ring> },
    MultiPolygon { coordinates: Vec<Vec<Ring>> },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct GeoJsonFeature {
    geometry: Option<GeoJsonGeometry>,
}

#[derive(Debug, Deserialize)]
struct GeoJsonCollection {
    features: Vec<GeoJsonFeature>,
    crs: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum GeoJsonLine {
    Feature(GeoJsonFeature),
    FeatureCollection(GeoJsonCollection),
}

fn ring(positions: &Ring) -> Option<LineString<f64>> {
    let coords = positions
        .iter()
        .map(|p| match p.as_slice() {
            [x, y, ..] if x.is_finite() && y.is_finite() => Some(Coord { x: *x, y: *y }),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    (coords.len() >= 4).then(|| LineString::from(coords))
}

fn polygon(rings: &[Ring]) -> Option<Polygon<f64>> {
    let (exterior, interiors) = rings.split_first()?;
    let interiors = interiors.iter().map(ring).collect::<Option<Vec<_>>>()?;
    Some(Polygon::new(ring(exterior)?, interiors))
}

impl GeoJsonFeature {
    fn is_multipart(&self) -> bool {
        matches!(&self.geometry, Some(GeoJsonGeometry::MultiPolygon { coordinates }) if coordinates.len() > 1)
    }

    fn footprint_geometry(&self) -> Option<Polygon<f64>> {
        match self.geometry.as_ref()? {
            GeoJsonGeometry::Polygon { coordinates } => polygon(coordinates),
            GeoJsonGeometry::MultiPolygon { coordinates } if coordinates.len() == 1 => polygon(&coordinates[0]),
            _ => None,
        }
    }
}

/// Line-oriented GeoJSON reader that cuts the feature sequence into chunks of
/// `chunk_size` rows.
///
/// Every feature consumes a row index, including the ones skipped because
/// their geometry is not a single polygon.
struct ChunkBuilder {
    chunk_size: usize,
    crs: Crs,
    next_row: u64,
    pending: FootprintChunk,
    rows_in_pending: usize,
    skipped: u64,
    multipart: u64,
}

/// Result of draining a [`ChunkBuilder`].
struct Drained {
    last: Option<FootprintChunk>,
    rows: u64,
    skipped: u64,
    multipart: u64,
}

/// A line of the collection wrapper ahead of the first feature: a member such
/// as `"type": "FeatureCollection",` or `"crs": {`, or the collection's own
/// opening `{"type":"FeatureCollection","features":[`. Anything carrying a
/// `"Feature"` tag is a feature and must parse.
fn is_collection_member(line: &str) -> bool {
    (line.starts_with('"') || line.starts_with('{')) && !line.contains("\"Feature\"")
}

impl ChunkBuilder {
    fn new(chunk_size: usize, crs: Crs) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            crs,
            next_row: 0,
            pending: FootprintChunk {
                first_row: 0,
                crs,
                footprints: Vec::new(),
            },
            rows_in_pending: 0,
            skipped: 0,
            multipart: 0,
        }
    }

    fn push_feature(&mut self, feature: &GeoJsonFeature, out: &mut Vec<FootprintChunk>) {
        if self.rows_in_pending == 0 {
            self.pending.first_row = self.next_row;
            self.pending.crs = self.crs;
        }
        match feature.footprint_geometry() {
            Some(geometry) => self.pending.footprints.push(Footprint {
                row_index: self.next_row,
                geometry,
            }),
            None => {
                self.skipped += 1;
                if feature.is_multipart() {
                    self.multipart += 1;
                }
            }
        }
        self.next_row += 1;
        self.rows_in_pending += 1;

        if self.rows_in_pending == self.chunk_size {
            out.push(self.take_pending());
        }
    }

    fn take_pending(&mut self) -> FootprintChunk {
        self.rows_in_pending = 0;
        let empty = FootprintChunk {
            first_row: self.next_row,
            crs: self.crs,
            footprints: Vec::new(),
        };
        std::mem::replace(&mut self.pending, empty)
    }

    /// Feed one physical line; returns the chunks it completed.
    fn feed(&mut self, line_no: usize, raw: &str) -> Result<Vec<FootprintChunk>, PipelineError> {
        let line = raw.trim();
        let line = line.strip_suffix(',').unwrap_or(line).trim_end();
        let mut done = Vec::new();
        if matches!(line, "" | "{" | "[" | "]" | "}" | "]}") {
            return Ok(done);
        }

        match serde_json::from_str::<GeoJsonLine>(line) {
            Ok(GeoJsonLine::Feature(feature)) => self.push_feature(&feature, &mut done),
            Ok(GeoJsonLine::FeatureCollection(collection)) => {
                if let Some(crs) = collection.crs.as_ref().and_then(|c| Crs::find_in_text(&c.to_string())) {
                    self.set_crs(crs?);
                }
                for feature in &collection.features {
                    self.push_feature(feature, &mut done);
                }
            }
            // Members of a FeatureCollection ahead of its first feature.
            Err(_) if self.next_row == 0 && is_collection_member(line) => {
                if let Some(crs) = Crs::find_in_text(line) {
                    self.set_crs(crs?);
                }
            }
            Err(e) => {
                return Err(PipelineError::Source(format!("footprint line {line_no}: {e}")));
            }
        }
        Ok(done)
    }

    fn set_crs(&mut self, crs: Crs) {
        if self.rows_in_pending == 0 {
            self.pending.crs = crs;
        }
        self.crs = crs;
    }

    fn finish(mut self) -> Drained {
        let last = (self.rows_in_pending > 0).then(|| self.take_pending());
        Drained {
            last,
            rows: self.next_row,
            skipped: self.skipped,
            multipart: self.multipart,
        }
    }
}

/// The state-wide building footprint collection, streamed in row-range chunks.
///
/// Only one chunk is held at a time.
pub struct BuildingFootprintSource {
    path: PathBuf,
    chunk_size: usize,
    default_crs: Crs,
}

impl BuildingFootprintSource {
    pub fn new<P: Into<PathBuf>>(path: P, chunk_size: usize, default_crs: Crs) -> Self {
        Self {
            path: path.into(),
            chunk_size,
            default_crs,
        }
    }
}

#[async_trait::async_trait]
impl Source<FootprintChunk> for BuildingFootprintSource {
    async fn stream(&self) -> EnvelopeStream<FootprintChunk> {
        let path = self.path.clone();
        let mut builder = ChunkBuilder::new(self.chunk_size, self.default_crs);

        let s = async_stream::try_stream! {
            let file = File::open(&path)
                .await
                .map_err(|e| PipelineError::Source(format!("failed to open footprint file {}: {e}", path.display())))?;
            let mut lines = BufReader::new(file).lines();
            let mut line_no = 0usize;

            while let Some(line) = lines
                .next_line()
                .await
                .map_err(|e| PipelineError::Source(format!("failed to read footprint file {}: {e}", path.display())))?
            {
                line_no += 1;
                for chunk in builder.feed(line_no, &line)? {
                    metrics::counter!("footprints_read_total").increment(chunk.footprints.len() as u64);
                    yield Envelope::new(chunk);
                }
            }

            let Drained { last, rows, skipped, multipart } = builder.finish();
            if let Some(chunk) = last {
                metrics::counter!("footprints_read_total").increment(chunk.footprints.len() as u64);
                yield Envelope::new(chunk);
            }
            metrics::counter!("footprints_skipped_total").increment(skipped);
            if multipart > 0 {
                tracing::warn!(path = %path.display(), multipart, "multi-part footprints skipped");
            }
            tracing::debug!(path = %path.display(), rows, skipped, "footprint source drained");
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scratch_dir;
    use futures::StreamExt;

    const SQUARE: &str = r#"{"type":"Feature","properties":{"release":1},"geometry":{"type":"Polygon","coordinates":[[[-112.0,33.4],[-111.9999,33.4],[-111.9999,33.4001],[-112.0,33.4001],[-112.0,33.4]]]}}"#;
    const POINT: &str = r#"{"type":"Feature","properties":{},"geometry":{"type":"Point","coordinates":[-112.0,33.4]}}"#;

    async fn drain(source: &BuildingFootprintSource) -> Vec<FootprintChunk> {
        let mut out = Vec::new();
        let mut stream = source.stream().await;
        while let Some(item) = stream.next().await {
            out.push(item.unwrap().payload);
        }
        out
    }

    #[tokio::test]
    async fn feature_per_line_collection_is_chunked_by_rows() {
        let dir = scratch_dir("footprints-lines");
        let path = dir.join("Arizona.geojson");
        let body = format!(
            "{{\n\"type\": \"FeatureCollection\",\n\"features\": [\n{SQUARE},\n{POINT},\n{SQUARE},\n{SQUARE},\n{SQUARE}\n]}}\n"
        );
        std::fs::write(&path, body).unwrap();

        let chunks = drain(&BuildingFootprintSource::new(&path, 2, Crs::Wgs84)).await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.iter().map(|c| c.first_row).collect::<Vec<_>>(), vec![0, 2, 4]);

        let rows: Vec<u64> = chunks.iter().flat_map(|c| c.footprints.iter().map(|f| f.row_index)).collect();
        // row 1 is a point: skipped, but it still holds its index
        assert_eq!(rows, vec![0, 2, 3, 4]);
    }

    #[tokio::test]
    async fn single_line_collection_with_crs() {
        let dir = scratch_dir("footprints-single");
        let path = dir.join("tiles.geojson");
        let body = format!(
            r#"{{"type":"FeatureCollection","crs":{{"type":"name","properties":{{"name":"urn:ogc:def:crs:EPSG::3857"}}}},"features":[{SQUARE},{SQUARE}]}}"#
        );
        std::fs::write(&path, body).unwrap();

        let chunks = drain(&BuildingFootprintSource::new(&path, 100_000, Crs::Wgs84)).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].crs, Crs::WebMercator);
        assert_eq!(chunks[0].footprints.len(), 2);
    }

    #[tokio::test]
    async fn garbage_line_is_a_source_error() {
        let dir = scratch_dir("footprints-garbage");
        let path = dir.join("broken.geojson");
        std::fs::write(&path, format!("{SQUARE}\nnot json\n")).unwrap();

        let mut stream = BuildingFootprintSource::new(&path, 10, Crs::Wgs84).stream().await;
        let mut failure = None;
        while let Some(item) = stream.next().await {
            if let Err(e) = item {
                failure = Some(e);
            }
        }
        let err = failure.unwrap();
        assert!(err.to_string().contains("footprint line 2"), "{err}");
    }

    #[test]
    fn multipart_and_degenerate_geometries_are_skipped() {
        let mut builder = ChunkBuilder::new(10, Crs::Wgs84);
        let multi = r#"{"type":"Feature","geometry":{"type":"MultiPolygon","coordinates":[[[[0,0],[1,0],[1,1],[0,0]]],[[[2,2],[3,2],[3,3],[2,2]]]]}}"#;
        let single = r#"{"type":"Feature","geometry":{"type":"MultiPolygon","coordinates":[[[[0,0],[1,0],[1,1],[0,0]]]]}}"#;
        let sliver = r#"{"type":"Feature","geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[0,0]]]}}"#;
        let null = r#"{"type":"Feature","geometry":null}"#;
        for (n, line) in [multi, single, sliver, null].into_iter().enumerate() {
            assert!(builder.feed(n + 1, line).unwrap().is_empty());
        }

        let drained = builder.finish();
        let last = drained.last.unwrap();
        assert_eq!((drained.rows, drained.skipped, drained.multipart), (4, 3, 1));
        assert_eq!(last.footprints.len(), 1);
        assert_eq!(last.footprints[0].row_index, 1);
    }

    #[test]
    fn collection_members_before_first_feature_are_skipped() {
        let mut builder = ChunkBuilder::new(10, Crs::Wgs84);
        let header = [
            r#"{"type":"FeatureCollection","features":["#,
            r#""type": "FeatureCollection","#,
            r#""name": "Arizona","#,
            r#""crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:OGC:1.3:CRS84" } },"#,
            r#""features": ["#,
        ];
        for (n, line) in header.into_iter().enumerate() {
            assert!(builder.feed(n + 1, line).unwrap().is_empty());
        }
        builder.feed(6, SQUARE).unwrap();

        let drained = builder.finish();
        assert_eq!(drained.rows, 1);
        assert_eq!(drained.last.unwrap().footprints[0].row_index, 0);
    }

    #[test]
    fn truncated_first_feature_is_a_source_error() {
        let mut builder = ChunkBuilder::new(10, Crs::Wgs84);
        builder.feed(1, r#""features": ["#).unwrap();
        let truncated = r#"{"type":"Feature","properties":{},"geometry":{"type":"Polygon","coordinates":[[[-112.0,33.4],[-111.9999,33.4]"#;

        let err = builder.feed(2, truncated).unwrap_err();
        assert!(err.to_string().contains("footprint line 2"), "{err}");
    }
}
