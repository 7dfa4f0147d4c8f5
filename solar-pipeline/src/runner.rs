//! One pipeline run: the global reductions, then every target city in turn.

use std::{fmt, sync::Arc};

use tracing::Instrument;

use crate::{
    aggregate::{aggregate_annual, estimate_average_rate, write_samples_parquet, AverageRate, IrradianceAggregator},
    config::{AppConfig, ConfigError},
    pipeline::{Pipeline, PipelineError, Transform, VecSource},
    sinks::{CityParquetSink, CityWriteOutcome, CityWriteSummary},
    sources::{BuildingFootprintSource, CityBoundaries, CityBoundarySource, TariffCsvFileSource},
    spatial::{CityBuilding, IrradianceIndex, JoinOutcome, SpatialJoinEngine},
    transform::{RoofAreaMeasurement, SolarPotentialAnnotation},
};

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("irradiance aggregation failed: {0}")]
    Irradiance(#[source] PipelineError),
    #[error("rate estimation failed: {0}")]
    Rates(#[source] PipelineError),
    #[error("city boundaries unavailable: {0}")]
    Boundaries(#[source] PipelineError),
    #[error(transparent)]
    City(#[from] CityError),
}

/// A failure while processing one city.
#[derive(thiserror::Error, Debug)]
#[error("city {city}: {source}")]
pub struct CityError {
    pub city: String,
    #[source]
    pub source: PipelineError,
}

impl CityError {
    fn new(city: &str, source: PipelineError) -> Self {
        Self {
            city: city.to_string(),
            source,
        }
    }

    /// Reference transform failures abort the run; anything else only the city.
    pub fn is_fatal(&self) -> bool {
        self.source.is_fatal()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    BoundaryNotFound,
    NoBuildings,
    NoneWithinDistance { candidates: usize },
    NothingAnnotated { dropped: usize },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BoundaryNotFound => write!(f, "boundary not found"),
            Self::NoBuildings => write!(f, "no buildings intersect the boundary"),
            Self::NoneWithinDistance { candidates } => {
                write!(f, "none of {candidates} buildings has irradiance data in range")
            }
            Self::NothingAnnotated { dropped } => write!(f, "all {dropped} buildings dropped during annotation"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CityStatus {
    Written(CityWriteSummary),
    Skipped(SkipReason),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct CityReport {
    pub city: String,
    pub status: CityStatus,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub rate: AverageRate,
    pub irradiance_locations: usize,
    pub cities: Vec<CityReport>,
}

impl RunReport {
    pub fn written(&self) -> usize {
        self.cities
            .iter()
            .filter(|c| matches!(c.status, CityStatus::Written(_)))
            .count()
    }
}

/// Results of the run-once steps, shared by every city.
pub struct GlobalInputs {
    pub irradiance: IrradianceIndex,
    pub rate: AverageRate,
    pub boundaries: CityBoundaries,
}

/// Aggregate irradiance, estimate the rate and load the boundaries. Any
/// failure here is fatal to the run.
pub async fn prepare(cfg: &AppConfig) -> Result<GlobalInputs, RunError> {
    let irr = &cfg.irradiance;
    let aggregator = IrradianceAggregator::new(cfg.resolve(&irr.input_dir), irr.workers);
    let samples = aggregator.collect_samples().await.map_err(RunError::Irradiance)?;
    if let Some(out) = &irr.samples_output {
        write_samples_parquet(&samples, &cfg.resolve(out)).map_err(RunError::Irradiance)?;
    }
    let records = aggregate_annual(&samples);
    drop(samples);
    tracing::info!(locations = records.len(), "irradiance aggregated");

    let rates = &cfg.rates;
    let tariffs = TariffCsvFileSource::new(cfg.resolve(&rates.path), &rates.month_column, &rates.rate_column, rates.skip_rows)
        .read_all()
        .map_err(RunError::Rates)?;
    let rate = estimate_average_rate(&tariffs, rates.window_months).map_err(RunError::Rates)?;

    let b = &cfg.boundaries;
    let boundaries = CityBoundarySource::new(cfg.resolve(&b.path), &b.name_field, b.crs)
        .load()
        .map_err(RunError::Boundaries)?;
    if boundaries.is_empty() {
        return Err(RunError::Boundaries(PipelineError::Source(format!(
            "no named place polygons in {}",
            b.path.display()
        ))));
    }

    Ok(GlobalInputs {
        irradiance: IrradianceIndex::new(records),
        rate,
        boundaries,
    })
}

/// A skipped city keeps no output from an earlier run.
fn skip(sink: &CityParquetSink, city: &str, reason: SkipReason) -> Result<CityStatus, CityError> {
    sink.remove_stale().map_err(|e| CityError::new(city, e))?;
    Ok(CityStatus::Skipped(reason))
}

/// Join, annotate and write one city.
pub async fn process_city(cfg: &AppConfig, inputs: &GlobalInputs, city: &str) -> Result<CityStatus, CityError> {
    let sink = CityParquetSink::new(cfg.resolve(&cfg.output.dir), city, cfg.output.simplify_tolerance);
    let Some(boundary) = inputs.boundaries.find(city) else {
        return skip(&sink, city, SkipReason::BoundaryNotFound);
    };
    let boundary = boundary.map_err(|e| CityError::new(city, e.into()))?;

    let source = BuildingFootprintSource::new(
        cfg.resolve(&cfg.footprints.path),
        cfg.footprints.chunk_size,
        cfg.footprints.crs,
    );
    let engine = SpatialJoinEngine::new(&boundary, &inputs.irradiance, cfg.join.max_distance);
    let buildings = match engine.run(&source).await.map_err(|e| CityError::new(city, e))? {
        JoinOutcome::NoBuildings => return skip(&sink, city, SkipReason::NoBuildings),
        JoinOutcome::NoneWithinDistance { candidates } => {
            return skip(&sink, city, SkipReason::NoneWithinDistance { candidates })
        }
        JoinOutcome::Joined { buildings, .. } => buildings,
    };

    let transforms: Vec<Arc<dyn Transform<CityBuilding, CityBuilding> + Send + Sync>> = vec![
        Arc::new(RoofAreaMeasurement::new(boundary.crs)),
        Arc::new(SolarPotentialAnnotation::new(inputs.rate.usd_per_kwh, cfg.panel.clone())),
    ];
    let pipeline: Pipeline<_, CityBuilding, _> = Pipeline {
        source: VecSource::new(buildings),
        transforms,
        sink,
    };

    match pipeline.run().await.map_err(|e| CityError::new(city, e))? {
        CityWriteOutcome::Written(summary) => Ok(CityStatus::Written(summary)),
        CityWriteOutcome::Empty { dropped } => Ok(CityStatus::Skipped(SkipReason::NothingAnnotated { dropped })),
    }
}

/// Process every target city. A city that fails is reported and the run
/// moves on, unless the failure is fatal.
pub async fn run_cities(cfg: &AppConfig, inputs: &GlobalInputs) -> Result<Vec<CityReport>, RunError> {
    let mut reports = Vec::with_capacity(cfg.target_cities.len());

    for city in &cfg.target_cities {
        tracing::info!(city = %city, "processing city");
        let span = tracing::info_span!("city", city = %city);
        let status = match process_city(cfg, inputs, city).instrument(span).await {
            Ok(status) => status,
            Err(e) if e.is_fatal() => {
                tracing::error!(city = %city, error = %e, "fatal error, aborting run");
                return Err(e.into());
            }
            Err(e) => {
                metrics::counter!("city_failures_total").increment(1);
                CityStatus::Failed(e.source.to_string())
            }
        };

        match &status {
            CityStatus::Written(s) => tracing::info!(
                city = %city,
                buildings = s.buildings,
                total_kwh = s.total_kwh,
                total_usd = s.total_usd,
                dropped = s.dropped,
                path = %s.path.display(),
                "city written"
            ),
            CityStatus::Skipped(reason) => tracing::warn!(city = %city, %reason, "city skipped"),
            CityStatus::Failed(error) => tracing::error!(city = %city, %error, "city failed"),
        }

        reports.push(CityReport {
            city: city.clone(),
            status,
        });
    }

    Ok(reports)
}

pub async fn run(cfg: &AppConfig) -> Result<RunReport, RunError> {
    let inputs = prepare(cfg).await?;
    let cities = run_cities(cfg, &inputs).await?;
    Ok(RunReport {
        rate: inputs.rate,
        irradiance_locations: inputs.irradiance.len(),
        cities,
    })
}
