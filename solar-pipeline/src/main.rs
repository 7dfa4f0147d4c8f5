use anyhow::Result;
use solar_pipeline::{
    config::AppConfig,
    metrics_server, observability,
    runner::{self, CityStatus},
};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let report = runner::run(&cfg).await?;

    for city in &report.cities {
        match &city.status {
            CityStatus::Written(s) => println!(
                "{:<12} {:>8} buildings  {:>10.1} MWh/yr  ${:>12.2}/yr",
                city.city,
                s.buildings,
                s.total_kwh / 1000.0,
                s.total_usd
            ),
            CityStatus::Skipped(reason) => println!("{:<12} skipped: {reason}", city.city),
            CityStatus::Failed(error) => println!("{:<12} failed: {error}", city.city),
        }
    }
    tracing::info!(
        cities = report.cities.len(),
        written = report.written(),
        usd_per_kwh = report.rate.usd_per_kwh,
        irradiance_locations = report.irradiance_locations,
        "run complete"
    );

    Ok(())
}
