pub mod city_parquet;

pub use city_parquet::{stable_building_id, CityParquetSink, CityWriteOutcome, CityWriteSummary};
