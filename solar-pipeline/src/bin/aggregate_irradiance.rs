use anyhow::{Context, Result};
use solar_pipeline::{
    aggregate::{aggregate_annual, write_samples_parquet, IrradianceAggregator},
    config::AppConfig,
    observability,
};

/// Combine the raw irradiance files into one sorted sample table and report
/// the per-location annual averages, without running the city stages.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;
    let irr = &cfg.irradiance;
    let input_dir = cfg.resolve(&irr.input_dir);

    let samples = IrradianceAggregator::new(&input_dir, irr.workers)
        .collect_samples()
        .await
        .with_context(|| format!("failed to aggregate {}", input_dir.display()))?;

    let output = match &irr.samples_output {
        Some(path) => cfg.resolve(path),
        None => cfg.resolve(&cfg.output.dir).join("nsrdb_combined.parquet"),
    };
    write_samples_parquet(&samples, &output)?;

    let records = aggregate_annual(&samples);
    tracing::info!(
        samples = samples.len(),
        locations = records.len(),
        output = %output.display(),
        "irradiance combined"
    );

    Ok(())
}
