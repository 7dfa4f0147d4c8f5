use geo::Polygon;

/// Column names of a per-city output file, in storage order.
pub mod columns {
    pub const BUILDING_ID: &str = "building_id";
    pub const GEOMETRY: &str = "geometry";
    pub const ROOF_AREA_SQM: &str = "roof_area_sqm";
    pub const ANNUAL_SOLAR_POTENTIAL_KWH: &str = "annual_solar_potential_kwh";
    pub const ANNUAL_ESTIMATED_SAVINGS_USD: &str = "annual_estimated_savings_usd";

    pub const ALL: [&str; 5] = [
        BUILDING_ID,
        GEOMETRY,
        ROOF_AREA_SQM,
        ANNUAL_SOLAR_POTENTIAL_KWH,
        ANNUAL_ESTIMATED_SAVINGS_USD,
    ];
}

/// One building of a city output file.
///
/// Geometry is in EPSG:4326 (lon/lat) and already simplified; numeric fields
/// are already rounded (1, 0 and 2 decimals respectively).
#[derive(Debug, Clone, PartialEq)]
pub struct BuildingSolarRecord {
    pub building_id: String,
    pub geometry: Polygon<f64>,
    pub roof_area_sqm: f64,
    pub annual_solar_potential_kwh: f64,
    pub annual_estimated_savings_usd: f64,
}

impl BuildingSolarRecord {
    pub fn tier(&self) -> PotentialTier {
        PotentialTier::classify(self.annual_solar_potential_kwh)
    }
}

/// Three-way classification used when colouring buildings by potential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PotentialTier {
    Low,
    Medium,
    High,
}

impl PotentialTier {
    pub const HIGH_ABOVE_KWH: f64 = 10_000.0;
    pub const MEDIUM_ABOVE_KWH: f64 = 5_000.0;

    pub fn classify(annual_kwh: f64) -> Self {
        if annual_kwh > Self::HIGH_ABOVE_KWH {
            Self::High
        } else if annual_kwh > Self::MEDIUM_ABOVE_KWH {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_thresholds_are_exclusive() {
        assert_eq!(PotentialTier::classify(10_000.0), PotentialTier::Medium);
        assert_eq!(PotentialTier::classify(10_000.5), PotentialTier::High);
        assert_eq!(PotentialTier::classify(5_000.0), PotentialTier::Low);
        assert_eq!(PotentialTier::classify(5_001.0), PotentialTier::Medium);
        assert_eq!(PotentialTier::classify(0.0), PotentialTier::Low);
    }
}
