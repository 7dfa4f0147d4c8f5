use crate::domain::{BuildingSolarRecord, PotentialTier};

/// Aggregate figures over one city's buildings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CityStats {
    pub building_count: usize,
    pub total_potential_kwh: f64,
    pub mean_potential_kwh: f64,
    pub total_savings_usd: f64,
    pub mean_savings_usd: f64,
    pub max_savings_usd: f64,
    pub min_savings_usd: f64,
    pub mean_roof_area_sqm: f64,
    pub high_tier_count: usize,
    pub medium_tier_count: usize,
    pub low_tier_count: usize,
}

impl CityStats {
    /// `None` for an empty city; means over zero buildings are undefined.
    pub fn from_records(records: &[BuildingSolarRecord]) -> Option<Self> {
        if records.is_empty() {
            return None;
        }

        let n = records.len() as f64;
        let mut stats = CityStats {
            building_count: records.len(),
            total_potential_kwh: 0.0,
            mean_potential_kwh: 0.0,
            total_savings_usd: 0.0,
            mean_savings_usd: 0.0,
            max_savings_usd: f64::NEG_INFINITY,
            min_savings_usd: f64::INFINITY,
            mean_roof_area_sqm: 0.0,
            high_tier_count: 0,
            medium_tier_count: 0,
            low_tier_count: 0,
        };

        let mut roof_total = 0.0;
        for r in records {
            stats.total_potential_kwh += r.annual_solar_potential_kwh;
            stats.total_savings_usd += r.annual_estimated_savings_usd;
            stats.max_savings_usd = stats.max_savings_usd.max(r.annual_estimated_savings_usd);
            stats.min_savings_usd = stats.min_savings_usd.min(r.annual_estimated_savings_usd);
            roof_total += r.roof_area_sqm;
            match r.tier() {
                PotentialTier::High => stats.high_tier_count += 1,
                PotentialTier::Medium => stats.medium_tier_count += 1,
                PotentialTier::Low => stats.low_tier_count += 1,
            }
        }

        stats.mean_potential_kwh = stats.total_potential_kwh / n;
        stats.mean_savings_usd = stats.total_savings_usd / n;
        stats.mean_roof_area_sqm = roof_total / n;
        Some(stats)
    }

    pub fn total_potential_mwh(&self) -> f64 {
        self.total_potential_kwh / 1_000.0
    }

    pub fn total_savings_million_usd(&self) -> f64 {
        self.total_savings_usd / 1_000_000.0
    }
}
