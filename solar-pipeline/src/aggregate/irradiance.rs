use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fs::File,
    path::{Path, PathBuf},
};

use futures::StreamExt;
use polars::prelude::*;
use solar_client::AnnualIrradianceRecord;
use time::{macros::format_description, Date};

use crate::{
    pipeline::PipelineError,
    sources::{IrradianceCsvFileSource, IrradianceSample},
};

/// Parses every irradiance file of a directory on a bounded worker pool and
/// reduces the samples to one annual record per location.
pub struct IrradianceAggregator {
    input_dir: PathBuf,
    workers: usize,
}

impl IrradianceAggregator {
    pub fn new<P: Into<PathBuf>>(input_dir: P, workers: usize) -> Self {
        Self {
            input_dir: input_dir.into(),
            workers: workers.max(1),
        }
    }

    /// `*.csv` files of the input directory in path order.
    pub fn source_files(&self) -> Result<Vec<PathBuf>, PipelineError> {
        let display = self.input_dir.display();
        let entries = std::fs::read_dir(&self.input_dir)
            .map_err(|e| PipelineError::Source(format!("failed to list irradiance directory {display}: {e}")))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| PipelineError::Source(format!("failed to list irradiance directory {display}: {e}")))?
                .path();
            let is_csv = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
            if is_csv && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Every sample of every file, sorted by (timestamp, latitude, longitude).
    ///
    /// One blocking task per file, at most `workers` in flight. All files must
    /// finish before anything is returned; the first failing file fails the step.
    pub async fn collect_samples(&self) -> Result<Vec<IrradianceSample>, PipelineError> {
        let files = self.source_files()?;
        if files.is_empty() {
            return Err(PipelineError::Source(format!(
                "no irradiance files found in {}",
                self.input_dir.display()
            )));
        }
        tracing::info!(files = files.len(), workers = self.workers, "parsing irradiance files");

        let parsed: Vec<_> = futures::stream::iter(files)
            .map(|path| tokio::task::spawn_blocking(move || IrradianceCsvFileSource::new(path).read_all()))
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let mut samples = Vec::new();
        for joined in parsed {
            let file_samples =
                joined.map_err(|e| PipelineError::Source(format!("irradiance worker failed: {e}")))??;
            samples.extend(file_samples);
        }

        samples.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then(a.latitude.total_cmp(&b.latitude))
                .then(a.longitude.total_cmp(&b.longitude))
        });
        Ok(samples)
    }

    pub async fn run(&self) -> Result<Vec<AnnualIrradianceRecord>, PipelineError> {
        let samples = self.collect_samples().await?;
        let records = aggregate_annual(&samples);
        tracing::info!(samples = samples.len(), locations = records.len(), "irradiance aggregated");
        Ok(records)
    }
}

/// A sample location usable as an ordered map key.
#[derive(Debug, Clone, Copy)]
struct LocKey {
    latitude: f64,
    longitude: f64,
}

impl LocKey {
    fn of(s: &IrradianceSample) -> Self {
        Self {
            latitude: s.latitude,
            longitude: s.longitude,
        }
    }
}

impl Ord for LocKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.latitude
            .total_cmp(&other.latitude)
            .then(self.longitude.total_cmp(&other.longitude))
    }
}

impl PartialOrd for LocKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for LocKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for LocKey {}

#[derive(Debug, Default, Clone, Copy)]
struct Channels {
    ghi: f64,
    dni: f64,
    dhi: f64,
}

/// Sum each channel per (location, calendar day), then average the daily sums
/// per location. Multi-year input is pooled into one average day.
///
/// Output has one record per distinct location, ordered by (latitude, longitude).
pub fn aggregate_annual(samples: &[IrradianceSample]) -> Vec<AnnualIrradianceRecord> {
    let mut daily: BTreeMap<(LocKey, Date), Channels> = BTreeMap::new();
    for s in samples {
        let day = daily.entry((LocKey::of(s), s.timestamp.date())).or_default();
        day.ghi += s.ghi;
        day.dni += s.dni;
        day.dhi += s.dhi;
    }

    let mut per_location: BTreeMap<LocKey, (Channels, u32)> = BTreeMap::new();
    for ((loc, _), sums) in daily {
        let (acc, days) = per_location.entry(loc).or_default();
        acc.ghi += sums.ghi;
        acc.dni += sums.dni;
        acc.dhi += sums.dhi;
        *days += 1;
    }

    per_location
        .into_iter()
        .map(|(loc, (acc, days))| {
            let n = f64::from(days);
            AnnualIrradianceRecord {
                latitude: loc.latitude,
                longitude: loc.longitude,
                mean_daily_ghi: acc.ghi / n,
                mean_daily_dni: acc.dni / n,
                mean_daily_dhi: acc.dhi / n,
            }
        })
        .collect()
}

/// Persist the combined sample table as Snappy-compressed parquet.
pub fn write_samples_parquet(samples: &[IrradianceSample], path: &Path) -> Result<(), PipelineError> {
    let sink_err = |e: &dyn std::fmt::Display| PipelineError::Sink(format!("{}: {e}", path.display()));
    let stamp = format_description!("[year]-[month]-[day] [hour]:[minute]");

    let mut timestamps = Vec::with_capacity(samples.len());
    for s in samples {
        timestamps.push(s.timestamp.format(&stamp).map_err(|e| sink_err(&e))?);
    }
    let column = |name: &str, f: fn(&IrradianceSample) -> f64| {
        Series::new(name, samples.iter().map(f).collect::<Vec<f64>>())
    };

    let mut df = DataFrame::new(vec![
        column("latitude", |s| s.latitude),
        column("longitude", |s| s.longitude),
        Series::new("timestamp", timestamps),
        column("DHI", |s| s.dhi),
        column("DNI", |s| s.dni),
        column("GHI", |s| s.ghi),
    ])
    .map_err(|e| sink_err(&e))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| sink_err(&e))?;
    }
    let file = File::create(path).map_err(|e| sink_err(&e))?;
    ParquetWriter::new(file)
        .with_compression(ParquetCompression::Snappy)
        .finish(&mut df)
        .map_err(|e| sink_err(&e))?;

    tracing::info!(path = %path.display(), rows = samples.len(), "irradiance samples written");
    Ok(())
}
