pub mod building_solar;
pub mod irradiance;
pub mod wkb;

pub use building_solar::{columns, BuildingSolarRecord, PotentialTier};
pub use irradiance::AnnualIrradianceRecord;
pub use wkb::WkbError;
