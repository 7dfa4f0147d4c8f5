use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use csv::StringRecord;
use time::{Date, Month, PrimitiveDateTime, Time};

use crate::pipeline::PipelineError;

/// Preamble lines (site metadata header and values) before the column header.
const PREAMBLE_LINES: usize = 2;

/// One instantaneous irradiance measurement at a sample location.
#[derive(Debug, Clone, PartialEq)]
pub struct IrradianceSample {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: PrimitiveDateTime,
    pub dhi: f64,
    pub dni: f64,
    pub ghi: f64,
}

/// One per-location irradiance time-series file.
///
/// The file name carries the location: its second and third
/// underscore-delimited tokens are latitude and longitude, e.g.
/// `123456_33.45_-112.07_2020.csv`. After two preamble lines the table has
/// (at least) the columns Year, Month, Day, Hour, Minute, DHI, DNI, GHI.
pub struct IrradianceCsvFileSource {
    path: PathBuf,
}

impl IrradianceCsvFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Parse the whole file. Any malformed name, row or date fails the file.
    pub fn read_all(&self) -> Result<Vec<IrradianceSample>, PipelineError> {
        let (latitude, longitude) = location_from_file_name(&self.path)?;
        let display = self.path.display();

        let file = File::open(&self.path)
            .map_err(|e| PipelineError::Source(format!("failed to open irradiance file {display}: {e}")))?;
        let mut reader = BufReader::new(file);
        let mut skipped = String::new();
        for _ in 0..PREAMBLE_LINES {
            skipped.clear();
            reader
                .read_line(&mut skipped)
                .map_err(|e| PipelineError::Source(format!("failed to read preamble of {display}: {e}")))?;
        }

        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = rdr
            .headers()
            .map_err(|e| PipelineError::Source(format!("failed to read irradiance headers in {display}: {e}")))?
            .clone();
        let columns = Columns::locate(&headers)
            .map_err(|missing| PipelineError::Source(format!("{display}: missing column '{missing}'")))?;

        let mut samples = Vec::new();
        for (n, result) in rdr.records().enumerate() {
            let record = result
                .map_err(|e| PipelineError::Source(format!("failed to read irradiance record in {display}: {e}")))?;
            let sample = columns
                .sample(&record, latitude, longitude)
                .map_err(|e| PipelineError::Source(format!("{display}: data row {}: {e}", n + 1)))?;
            samples.push(sample);
        }

        metrics::counter!("irradiance_files_parsed_total").increment(1);
        Ok(samples)
    }
}

/// Latitude and longitude from the second and third `_`-separated tokens of the file stem.
pub fn location_from_file_name(path: &Path) -> Result<(f64, f64), PipelineError> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| PipelineError::Source(format!("malformed irradiance file name {}", path.display())))?;

    let mut tokens = stem.split('_').skip(1);
    let (Some(lat), Some(lon)) = (tokens.next(), tokens.next()) else {
        return Err(PipelineError::Source(format!(
            "malformed irradiance file name '{stem}': expected <id>_<lat>_<lon>[_...]"
        )));
    };

    let parse = |label: &str, s: &str| {
        s.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| PipelineError::Source(format!("malformed irradiance file name '{stem}': bad {label} '{s}'")))
    };
    Ok((parse("latitude", lat)?, parse("longitude", lon)?))
}

struct Columns {
    year: usize,
    month: usize,
    day: usize,
    hour: usize,
    minute: usize,
    dhi: usize,
    dni: usize,
    ghi: usize,
}

impl Columns {
    fn locate(headers: &StringRecord) -> Result<Self, &'static str> {
        let find = |name: &'static str| headers.iter().position(|h| h == name).ok_or(name);
        Ok(Self {
            year: find("Year")?,
            month: find("Month")?,
            day: find("Day")?,
            hour: find("Hour")?,
            minute: find("Minute")?,
            dhi: find("DHI")?,
            dni: find("DNI")?,
            ghi: find("GHI")?,
        })
    }

    fn sample(&self, record: &StringRecord, latitude: f64, longitude: f64) -> Result<IrradianceSample, String> {
        let field = |idx: usize, name: &str| record.get(idx).ok_or_else(|| format!("missing field '{name}'"));
        let int = |idx: usize, name: &str| -> Result<i32, String> {
            let s = field(idx, name)?;
            s.parse::<i32>().map_err(|e| format!("invalid {name} '{s}': {e}"))
        };
        let float = |idx: usize, name: &str| -> Result<f64, String> {
            let s = field(idx, name)?;
            s.parse::<f64>().map_err(|e| format!("invalid {name} '{s}': {e}"))
        };

        let (year, month, day) = (int(self.year, "Year")?, int(self.month, "Month")?, int(self.day, "Day")?);
        let (hour, minute) = (int(self.hour, "Hour")?, int(self.minute, "Minute")?);
        let timestamp = timestamp(year, month, day, hour, minute)
            .map_err(|e| format!("invalid date {year}-{month}-{day} {hour}:{minute}: {e}"))?;

        Ok(IrradianceSample {
            latitude,
            longitude,
            timestamp,
            dhi: float(self.dhi, "DHI")?,
            dni: float(self.dni, "DNI")?,
            ghi: float(self.ghi, "GHI")?,
        })
    }
}

fn timestamp(year: i32, month: i32, day: i32, hour: i32, minute: i32) -> Result<PrimitiveDateTime, String> {
    let to_u8 = |v: i32| u8::try_from(v).map_err(|e| e.to_string());
    let month = Month::try_from(to_u8(month)?).map_err(|e| e.to_string())?;
    let date = Date::from_calendar_date(year, month, to_u8(day)?).map_err(|e| e.to_string())?;
    let time = Time::from_hms(to_u8(hour)?, to_u8(minute)?, 0).map_err(|e| e.to_string())?;
    Ok(PrimitiveDateTime::new(date, time))
}
