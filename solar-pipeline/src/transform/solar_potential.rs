use serde::Deserialize;
use solar_client::AnnualIrradianceRecord;

use crate::{
    pipeline::{Envelope, PipelineError, Transform},
    spatial::CityBuilding,
};

/// Fixed panel and site assumptions of the simplified yield model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PanelAssumptions {
    pub efficiency: f64,
    pub system_losses: f64,
    pub tilt_deg: f64,
    /// South-facing. The isotropic transposition below does not depend on it.
    pub azimuth_deg: f64,
    pub peak_sun_hours_per_day: f64,
    pub ground_reflectance: f64,
}

impl Default for PanelAssumptions {
    fn default() -> Self {
        Self {
            efficiency: 0.20,
            system_losses: 0.14,
            tilt_deg: 20.0,
            azimuth_deg: 180.0,
            peak_sun_hours_per_day: 6.0,
            ground_reflectance: 0.2,
        }
    }
}

/// Irradiance on the tilted panel plane, split by component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneOfArray {
    pub direct: f64,
    pub diffuse: f64,
    pub reflected: f64,
}

impl PlaneOfArray {
    pub fn total(&self) -> f64 {
        self.direct + self.diffuse + self.reflected
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarEstimate {
    pub annual_kwh: f64,
    pub annual_savings_usd: f64,
}

pub fn plane_of_array(irradiance: &AnnualIrradianceRecord, panel: &PanelAssumptions) -> PlaneOfArray {
    let cos_tilt = panel.tilt_deg.to_radians().cos();
    PlaneOfArray {
        direct: irradiance.mean_daily_dni * cos_tilt,
        diffuse: irradiance.mean_daily_dhi * (1.0 + cos_tilt) / 2.0,
        reflected: irradiance.mean_daily_ghi * panel.ground_reflectance * (1.0 - cos_tilt) / 2.0,
    }
}

/// Annual yield and savings of a roof. Pure; nothing is rounded here.
pub fn estimate_solar_potential(
    roof_area_sqm: f64,
    irradiance: &AnnualIrradianceRecord,
    avg_rate_usd_per_kwh: f64,
    panel: &PanelAssumptions,
) -> SolarEstimate {
    let poa = plane_of_array(irradiance, panel).total();
    let annual_kwh = roof_area_sqm * poa * panel.efficiency * (1.0 - panel.system_losses) * 365.0 / 1000.0;
    let annual_savings_usd = annual_kwh * avg_rate_usd_per_kwh * (panel.peak_sun_hours_per_day / 24.0);

    SolarEstimate {
        annual_kwh,
        annual_savings_usd,
    }
}

/// Fills in `estimate` for buildings whose roof area is known.
#[derive(Clone)]
pub struct SolarPotentialAnnotation {
    avg_rate_usd_per_kwh: f64,
    panel: PanelAssumptions,
}

impl SolarPotentialAnnotation {
    pub fn new(avg_rate_usd_per_kwh: f64, panel: PanelAssumptions) -> Self {
        Self {
            avg_rate_usd_per_kwh,
            panel,
        }
    }
}

#[async_trait::async_trait]
impl Transform<CityBuilding, CityBuilding> for SolarPotentialAnnotation {
    async fn apply(&self, mut input: Envelope<CityBuilding>) -> Result<Envelope<CityBuilding>, PipelineError> {
        let b = &mut input.payload;
        let roof_area = b.roof_area_sqm.ok_or_else(|| {
            PipelineError::Transform(format!("building row {} has no roof area", b.row_index))
        })?;

        let estimate = estimate_solar_potential(roof_area, &b.irradiance, self.avg_rate_usd_per_kwh, &self.panel);
        if !estimate.annual_kwh.is_finite() || !estimate.annual_savings_usd.is_finite() {
            metrics::counter!("solar_estimate_rejected_total").increment(1);
            return Err(PipelineError::Transform(format!(
                "building row {} produced a non-finite estimate",
                b.row_index
            )));
        }

        b.estimate = Some(estimate);
        Ok(input)
    }
}
