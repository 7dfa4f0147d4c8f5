use geo::Point;

/// Annual solar resource at one sample location.
///
/// The three channels are the mean over all days of the per-day sum of the
/// instantaneous samples at that location.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnualIrradianceRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub mean_daily_ghi: f64,
    pub mean_daily_dni: f64,
    pub mean_daily_dhi: f64,
}

impl AnnualIrradianceRecord {
    /// Location as an EPSG:4326 point (x = longitude, y = latitude).
    pub fn point(&self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }
}
