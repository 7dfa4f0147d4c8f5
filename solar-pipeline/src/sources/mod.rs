pub mod building_footprint_geojson;
pub mod city_boundary_shapefile;
pub mod irradiance_csv_file;
pub mod tariff_csv_file;

pub use building_footprint_geojson::BuildingFootprintSource;
pub use city_boundary_shapefile::{CityBoundaries, CityBoundarySource};
pub use irradiance_csv_file::{IrradianceCsvFileSource, IrradianceSample};
pub use tariff_csv_file::{TariffCsvFileSource, TariffRecord};
