pub mod domain;
pub mod store;

pub use domain::{AnnualIrradianceRecord, BuildingSolarRecord, PotentialTier};
pub use store::{city_file_name, load_city, CityBatchReader, CityData, CityLayer, CityStats};
