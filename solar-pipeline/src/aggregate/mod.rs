//! The two global reductions that run once before any city is processed.

pub mod irradiance;
pub mod rate;

pub use irradiance::{aggregate_annual, write_samples_parquet, IrradianceAggregator};
pub use rate::{estimate_average_rate, AverageRate, DEFAULT_WINDOW_MONTHS};
