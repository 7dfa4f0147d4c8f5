use std::{
    fs::File,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use polars::prelude::*;

use crate::domain::{columns, wkb, BuildingSolarRecord};

/// File name of a city's output, e.g. `phoenix_solar_potential.parquet`.
pub fn city_file_name(city: &str) -> String {
    format!("{}_solar_potential.parquet", city.to_lowercase())
}

/// Result of looking up a city's output file.
#[derive(Debug)]
pub enum CityData {
    /// No output exists for the city (never processed, or skipped by the pipeline).
    NoDataAvailable { city: String, path: PathBuf },
    Loaded {
        city: String,
        records: Vec<BuildingSolarRecord>,
    },
}

impl CityData {
    pub fn records(&self) -> &[BuildingSolarRecord] {
        match self {
            Self::NoDataAvailable { .. } => &[],
            Self::Loaded { records, .. } => records,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Loaded { .. })
    }
}

/// Fully materialize the output file of `city` under `dir`.
pub fn load_city(dir: &Path, city: &str) -> Result<CityData> {
    let path = dir.join(city_file_name(city));
    if !path.exists() {
        return Ok(CityData::NoDataAvailable {
            city: city.to_string(),
            path,
        });
    }

    let records = read_city_file(&path)?;
    Ok(CityData::Loaded {
        city: city.to_string(),
        records,
    })
}

pub fn read_city_file(path: &Path) -> Result<Vec<BuildingSolarRecord>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let df = ParquetReader::new(file)
        .finish()
        .with_context(|| format!("failed to read parquet {}", path.display()))?;
    frame_to_records(&df)
}

fn frame_to_records(df: &DataFrame) -> Result<Vec<BuildingSolarRecord>> {
    let ids = df.column(columns::BUILDING_ID)?.str()?;
    let geometries = df.column(columns::GEOMETRY)?.binary()?;
    let roof = df.column(columns::ROOF_AREA_SQM)?.f64()?;
    let potential = df.column(columns::ANNUAL_SOLAR_POTENTIAL_KWH)?.f64()?;
    let savings = df.column(columns::ANNUAL_ESTIMATED_SAVINGS_USD)?.f64()?;

    let null = |row: usize, col: &str| anyhow!("row {row}: null value in column '{col}'");

    let mut out = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        let building_id = ids.get(row).ok_or_else(|| null(row, columns::BUILDING_ID))?;
        let wkb_bytes = geometries.get(row).ok_or_else(|| null(row, columns::GEOMETRY))?;
        let geometry = wkb::decode_polygon(wkb_bytes)
            .with_context(|| format!("row {row}: invalid geometry for building {building_id}"))?;

        out.push(BuildingSolarRecord {
            building_id: building_id.to_string(),
            geometry,
            roof_area_sqm: roof.get(row).ok_or_else(|| null(row, columns::ROOF_AREA_SQM))?,
            annual_solar_potential_kwh: potential
                .get(row)
                .ok_or_else(|| null(row, columns::ANNUAL_SOLAR_POTENTIAL_KWH))?,
            annual_estimated_savings_usd: savings
                .get(row)
                .ok_or_else(|| null(row, columns::ANNUAL_ESTIMATED_SAVINGS_USD))?,
        });
    }

    Ok(out)
}

/// Reads a city file in bounded-size batches instead of all at once.
pub struct CityBatchReader {
    path: PathBuf,
    batch_size: usize,
    offset: usize,
    total_rows: usize,
}

impl CityBatchReader {
    pub fn open<P: Into<PathBuf>>(path: P, batch_size: usize) -> Result<Self> {
        let path = path.into();
        if batch_size == 0 {
            return Err(anyhow!("batch_size must be greater than zero"));
        }
        let file = File::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
        let total_rows = ParquetReader::new(file).num_rows()?;
        Ok(Self {
            path,
            batch_size,
            offset: 0,
            total_rows,
        })
    }

    pub fn total_rows(&self) -> usize {
        self.total_rows
    }

    /// Next batch of at most `batch_size` records, or `None` once exhausted.
    pub fn next_batch(&mut self) -> Result<Option<Vec<BuildingSolarRecord>>> {
        if self.offset >= self.total_rows {
            return Ok(None);
        }

        let df = LazyFrame::scan_parquet(&self.path, ScanArgsParquet::default())?
            .slice(self.offset as i64, self.batch_size as IdxSize)
            .collect()?;
        self.offset += df.height();

        if df.height() == 0 {
            // File shrank underneath us; treat as exhausted.
            self.offset = self.total_rows;
            return Ok(None);
        }
        frame_to_records(&df).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("solar-client-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_fixture(path: &Path, n: usize) {
        let ids: Vec<String> = (0..n).map(|i| format!("b{i}")).collect();
        let geoms: Vec<Vec<u8>> = (0..n)
            .map(|i| {
                let x = i as f64;
                wkb::encode_polygon(&polygon![
                    (x: x, y: 0.0), (x: x + 0.5, y: 0.0), (x: x + 0.5, y: 0.5), (x: x, y: 0.0)
                ])
            })
            .collect();
        let roof: Vec<f64> = (0..n).map(|i| 10.0 + i as f64).collect();
        let kwh: Vec<f64> = (0..n).map(|i| 1000.0 * i as f64).collect();
        let usd: Vec<f64> = (0..n).map(|i| 25.5 * i as f64).collect();

        let mut df = DataFrame::new(vec![
            Series::new(columns::BUILDING_ID, ids),
            BinaryChunked::from_slice(columns::GEOMETRY, &geoms).into_series(),
            Series::new(columns::ROOF_AREA_SQM, roof),
            Series::new(columns::ANNUAL_SOLAR_POTENTIAL_KWH, kwh),
            Series::new(columns::ANNUAL_ESTIMATED_SAVINGS_USD, usd),
        ])
        .unwrap();
        ParquetWriter::new(File::create(path).unwrap()).finish(&mut df).unwrap();
    }

    #[test]
    fn city_file_name_is_lowercased() {
        assert_eq!(city_file_name("Flagstaff"), "flagstaff_solar_potential.parquet");
    }

    #[test]
    fn missing_city_file_is_no_data_available() {
        let dir = scratch_dir("missing");
        let data = load_city(&dir, "Tempe").unwrap();
        assert!(!data.is_available());
        assert!(data.records().is_empty());
        match data {
            CityData::NoDataAvailable { city, path } => {
                assert_eq!(city, "Tempe");
                assert!(path.ends_with("tempe_solar_potential.parquet"));
            }
            CityData::Loaded { .. } => panic!("expected no data"),
        }
    }

    #[test]
    fn loads_full_file_and_in_batches() {
        let dir = scratch_dir("batches");
        write_fixture(&dir.join(city_file_name("Mesa")), 5);

        let data = load_city(&dir, "Mesa").unwrap();
        assert_eq!(data.records().len(), 5);
        assert_eq!(data.records()[3].building_id, "b3");
        assert_eq!(data.records()[3].annual_estimated_savings_usd, 76.5);

        let mut reader = CityBatchReader::open(dir.join(city_file_name("Mesa")), 2).unwrap();
        assert_eq!(reader.total_rows(), 5);
        let mut sizes = Vec::new();
        let mut ids = Vec::new();
        while let Some(batch) = reader.next_batch().unwrap() {
            sizes.push(batch.len());
            ids.extend(batch.into_iter().map(|r| r.building_id));
        }
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(ids, vec!["b0", "b1", "b2", "b3", "b4"]);
    }
}
