use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::PathBuf,
};

use time::{Date, Month};

use crate::pipeline::PipelineError;

/// Residential electricity price for one month.
#[derive(Debug, Clone, PartialEq)]
pub struct TariffRecord {
    /// First day of the month.
    pub month: Date,
    /// `None` when the export left the cell blank.
    pub residential_cents_per_kwh: Option<f64>,
}

/// Monthly tariff table, e.g. the EIA electricity data browser export.
///
/// Rows whose rate cell is blank are kept with no rate so they still occupy
/// their month; any other unparseable month or rate is an error.
pub struct TariffCsvFileSource {
    path: PathBuf,
    month_column: String,
    rate_column: String,
    skip_rows: usize,
}

impl TariffCsvFileSource {
    pub fn new<P: Into<PathBuf>>(path: P, month_column: &str, rate_column: &str, skip_rows: usize) -> Self {
        Self {
            path: path.into(),
            month_column: month_column.to_string(),
            rate_column: rate_column.to_string(),
            skip_rows,
        }
    }

    pub fn read_all(&self) -> Result<Vec<TariffRecord>, PipelineError> {
        let display = self.path.display();
        let file = File::open(&self.path)
            .map_err(|e| PipelineError::Source(format!("failed to open tariff file {display}: {e}")))?;
        let mut reader = BufReader::new(file);
        let mut skipped = String::new();
        for _ in 0..self.skip_rows {
            skipped.clear();
            reader
                .read_line(&mut skipped)
                .map_err(|e| PipelineError::Source(format!("failed to skip tariff preamble in {display}: {e}")))?;
        }

        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);
        let headers = rdr
            .headers()
            .map_err(|e| PipelineError::Source(format!("failed to read tariff headers in {display}: {e}")))?
            .clone();
        let get_idx = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| PipelineError::Source(format!("missing column '{name}' in tariff file {display}")))
        };
        let month_idx = get_idx(&self.month_column)?;
        let rate_idx = get_idx(&self.rate_column)?;

        let mut out = Vec::new();
        for result in rdr.records() {
            let record = result
                .map_err(|e| PipelineError::Source(format!("failed to read tariff record in {display}: {e}")))?;
            let rate_str = record.get(rate_idx).unwrap_or("");
            let month_str = record.get(month_idx).unwrap_or("");
            let month = parse_month(month_str)
                .ok_or_else(|| PipelineError::Source(format!("invalid month '{month_str}' in tariff file {display}")))?;
            let residential_cents_per_kwh = if rate_str.is_empty() {
                None
            } else {
                Some(rate_str.parse::<f64>().map_err(|e| {
                    PipelineError::Source(format!("invalid rate '{rate_str}' in tariff file {display}: {e}"))
                })?)
            };

            out.push(TariffRecord {
                month,
                residential_cents_per_kwh,
            });
        }

        Ok(out)
    }
}

/// First day of the month named by `Dec 2023`, `December 2023`, `2023-12` or `2023-12-01`.
pub fn parse_month(s: &str) -> Option<Date> {
    let s = s.trim();

    if let Some((name, year)) = s.split_once(char::is_whitespace) {
        let month = month_from_name(name)?;
        let year: i32 = year.trim().parse().ok()?;
        return Date::from_calendar_date(year, month, 1).ok();
    }

    let mut parts = s.split('-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u8 = parts.next()?.parse().ok()?;
    if let Some(day) = parts.next() {
        day.parse::<u8>().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Date::from_calendar_date(year, Month::try_from(month).ok()?, 1).ok()
}

fn month_from_name(name: &str) -> Option<Month> {
    const MONTHS: [Month; 12] = [
        Month::January,
        Month::February,
        Month::March,
        Month::April,
        Month::May,
        Month::June,
        Month::July,
        Month::August,
        Month::September,
        Month::October,
        Month::November,
        Month::December,
    ];
    let lower = name.trim_end_matches('.').to_ascii_lowercase();
    if lower.len() < 3 {
        return None;
    }
    MONTHS
        .into_iter()
        .find(|m| m.to_string().to_ascii_lowercase().starts_with(&lower))
}
