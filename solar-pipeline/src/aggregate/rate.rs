use time::Date;

use crate::{pipeline::PipelineError, sources::TariffRecord};

/// Months averaged when the table is long enough.
pub const DEFAULT_WINDOW_MONTHS: usize = 12;

/// Trailing-window average residential rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AverageRate {
    pub usd_per_kwh: f64,
    /// Months in the window that carried a rate.
    pub months_used: usize,
    pub latest_month: Date,
}

/// Average of the `window` most recent monthly rates, converted from cents to dollars.
///
/// The window is taken over months, blank or not; blank months inside it are
/// left out of the mean rather than replaced by older ones. A shorter table is
/// averaged over whatever it has. A window with no rates at all is an error.
pub fn estimate_average_rate(records: &[TariffRecord], window: usize) -> Result<AverageRate, PipelineError> {
    let mut recent: Vec<&TariffRecord> = records.iter().collect();
    recent.sort_by(|a, b| b.month.cmp(&a.month));
    recent.truncate(window.max(1));

    let rates: Vec<f64> = recent.iter().filter_map(|r| r.residential_cents_per_kwh).collect();
    let latest_month = match recent.first() {
        Some(latest) if !rates.is_empty() => latest.month,
        _ => return Err(PipelineError::Source("tariff table has no usable monthly rates".into())),
    };

    if recent.len() < window {
        tracing::warn!(
            months = recent.len(),
            window,
            "fewer monthly rates than the averaging window; using all of them"
        );
    }

    let blank = recent.len() - rates.len();
    if blank > 0 {
        tracing::warn!(blank, "blank monthly rates inside the averaging window");
    }

    let mean_cents = rates.iter().sum::<f64>() / rates.len() as f64;
    let rate = AverageRate {
        usd_per_kwh: mean_cents / 100.0,
        months_used: rates.len(),
        latest_month,
    };
    tracing::info!(
        usd_per_kwh = rate.usd_per_kwh,
        months = rate.months_used,
        latest = %rate.latest_month,
        "average residential rate estimated"
    );
    Ok(rate)
}
