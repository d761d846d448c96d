use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How an acquisition samples the earth surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionKind {
    /// Continuous swath with 2D latitude/longitude (scatterometers, altimeters)
    Swath,
    /// Short image acquisition with a known footprint (SAR)
    TruncatedSwath,
    /// Regular lat/lon grid with per-cell times (SMOS, WindSat, SMAP)
    DailyRegularGrid,
    /// Regular lat/lon grid produced by a model (ERA5)
    ModelRegularGrid,
}

impl AcquisitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionKind::Swath => "swath",
            AcquisitionKind::TruncatedSwath => "truncated_swath",
            AcquisitionKind::DailyRegularGrid => "daily_regular_grid",
            AcquisitionKind::ModelRegularGrid => "model_regular_grid",
        }
    }

    /// Regular grids expose 1D latitude/longitude coordinates
    pub fn is_regular_grid(&self) -> bool {
        matches!(
            self,
            AcquisitionKind::DailyRegularGrid | AcquisitionKind::ModelRegularGrid
        )
    }
}

impl std::fmt::Display for AcquisitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AcquisitionKind {
    type Err = ColocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "swath" => Ok(AcquisitionKind::Swath),
            "truncated_swath" => Ok(AcquisitionKind::TruncatedSwath),
            "daily_regular_grid" => Ok(AcquisitionKind::DailyRegularGrid),
            "model_regular_grid" => Ok(AcquisitionKind::ModelRegularGrid),
            other => Err(ColocError::Config(format!("unknown acquisition type '{}'", other))),
        }
    }
}

/// Position of an acquisition inside a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    First,
    Second,
}

impl Slot {
    pub fn index(&self) -> usize {
        match self {
            Slot::First => 0,
            Slot::Second => 1,
        }
    }

    pub fn other(&self) -> Slot {
        match self {
            Slot::First => Slot::Second,
            Slot::Second => Slot::First,
        }
    }

    /// Suffix appended to variables and attributes in merged products
    pub fn suffix(&self) -> &'static str {
        match self {
            Slot::First => "_1",
            Slot::Second => "_2",
        }
    }
}

/// Closed time interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, stop: DateTime<Utc>) -> ColocResult<Self> {
        if start > stop {
            return Err(ColocError::InvalidAcquisition(format!(
                "start {} is after stop {}",
                start, stop
            )));
        }
        Ok(Self { start, stop })
    }

    /// Window grown by `delta` on both sides
    pub fn widened(&self, delta: Duration) -> Self {
        Self {
            start: self.start - delta,
            stop: self.stop + delta,
        }
    }

    /// Intersection of two windows, `None` when they are disjoint
    pub fn overlap(&self, other: &TimeWindow) -> Option<TimeWindow> {
        let start = self.start.max(other.start);
        let stop = self.stop.min(other.stop);
        if start <= stop {
            Some(TimeWindow { start, stop })
        } else {
            None
        }
    }

    pub fn midpoint(&self) -> DateTime<Utc> {
        self.start + (self.stop - self.start) / 2
    }

    pub fn start_seconds(&self) -> f64 {
        epoch_seconds(&self.start)
    }

    pub fn stop_seconds(&self) -> f64 {
        epoch_seconds(&self.stop)
    }

    /// Inclusive test on an epoch-seconds sample; NaN (not-a-time) is never contained
    pub fn contains_seconds(&self, seconds: f64) -> bool {
        seconds >= self.start_seconds() && seconds <= self.stop_seconds()
    }
}

/// Seconds since the Unix epoch, including sub-second precision
pub fn epoch_seconds(date: &DateTime<Utc>) -> f64 {
    date.timestamp() as f64 + f64::from(date.timestamp_subsec_nanos()) * 1e-9
}

/// Inverse of [`epoch_seconds`]; non-finite samples are not-a-time
pub fn datetime_from_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::<Utc>::from_timestamp(whole as i64, nanos)
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Bounds rounded to `decimals` places, used to avoid float noise when cropping
    pub fn rounded(&self, decimals: i32) -> Self {
        Self {
            min_lon: round_to(self.min_lon, decimals),
            max_lon: round_to(self.max_lon, decimals),
            min_lat: round_to(self.min_lat, decimals),
            max_lat: round_to(self.max_lat, decimals),
        }
    }

    pub fn contains_lon(&self, lon: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon
    }

    pub fn contains_lat(&self, lat: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Error types for co-location processing
#[derive(Debug, thiserror::Error)]
pub enum ColocError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Product not found: {0}")]
    NotFound(String),

    #[error("Invalid acquisition: {0}")]
    InvalidAcquisition(String),

    #[error("Intersection between {first} and {second} products hasn't been implemented")]
    UnsupportedCombination {
        first: AcquisitionKind,
        second: AcquisitionKind,
    },

    #[error("There are not enough common points between the two products")]
    NotEnoughCommonPoints,

    #[error("Unsupported geometry: {0}")]
    GeometryType(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Missing variable: {0}")]
    MissingVariable(String),

    #[error("Missing dataset for product {0}")]
    MissingDataset(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for co-location operations
pub type ColocResult<T> = Result<T, ColocError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_overlap_is_max_start_min_stop() {
        let a = TimeWindow::new(
            Utc.with_ymd_and_hms(2020, 1, 1, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 1, 12, 0, 0).unwrap(),
        )
        .unwrap();
        let b = TimeWindow::new(
            Utc.with_ymd_and_hms(2020, 1, 1, 11, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 1, 13, 0, 0).unwrap(),
        )
        .unwrap();
        let overlap = a.overlap(&b).unwrap();
        assert_eq!(overlap.start, b.start);
        assert_eq!(overlap.stop, a.stop);
    }

    #[test]
    fn test_disjoint_windows_touch_after_widening() {
        let a = TimeWindow::new(
            Utc.with_ymd_and_hms(2020, 1, 1, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 1, 10, 30, 0).unwrap(),
        )
        .unwrap();
        let b = TimeWindow::new(
            Utc.with_ymd_and_hms(2020, 1, 1, 12, 30, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 1, 13, 0, 0).unwrap(),
        )
        .unwrap();
        assert!(a.overlap(&b).is_none());
        let delta = Duration::minutes(60);
        let overlap = a.widened(delta).overlap(&b.widened(delta)).unwrap();
        assert_eq!(overlap.start, overlap.stop);
    }

    #[test]
    fn test_seconds_round_trip() {
        let date = Utc.with_ymd_and_hms(2021, 6, 3, 4, 5, 6).unwrap();
        let seconds = epoch_seconds(&date);
        assert_eq!(datetime_from_seconds(seconds), Some(date));
        assert_eq!(datetime_from_seconds(f64::NAN), None);
    }

    #[test]
    fn test_inverted_window_rejected() {
        let start = Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap();
        let stop = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert!(TimeWindow::new(start, stop).is_err());
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!(
            "daily_regular_grid".parse::<AcquisitionKind>().unwrap(),
            AcquisitionKind::DailyRegularGrid
        );
        assert!("grid".parse::<AcquisitionKind>().is_err());
    }
}
