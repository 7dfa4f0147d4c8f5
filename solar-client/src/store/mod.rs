pub mod city_file;
pub mod layer;
pub mod stats;

pub use city_file::{city_file_name, load_city, read_city_file, CityBatchReader, CityData};
pub use layer::CityLayer;
pub use stats::CityStats;
