//! Altitude profile aggregation: samples in, per-interval means out.

use std::collections::BTreeMap;
use std::io::Write;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "render")]
pub mod chart;
pub mod workbook;

pub use workbook::{
    build_workbook, data_url, download_link, SheetChart, WorkbookOptions, DEFAULT_EXPORT_NAME,
    DEFAULT_LINK_LABEL, XLSX_MIME,
};

#[derive(Error, Debug)]
pub enum ApError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to read CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to parse GPX file: {0}")]
    GpxParse(String),
    #[error("missing column '{0}'")]
    MissingColumn(String),
    #[error("invalid value '{value}' in column '{column}' at row {row}")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },
    #[error("insufficient data for profile computation")]
    InsufficientData,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("chart rendering failed: {0}")]
    Chart(String),
    #[error("spreadsheet export failed: {0}")]
    Spreadsheet(#[from] rust_xlsxwriter::XlsxError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnit {
    Meters,
    Kilometers,
}

impl Default for DistanceUnit {
    fn default() -> Self {
        DistanceUnit::Meters
    }
}

impl DistanceUnit {
    pub fn meters_per_unit(self) -> f64 {
        match self {
            DistanceUnit::Meters => 1.0,
            DistanceUnit::Kilometers => 1000.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    Auto,
    Csv,
    Gpx,
}

impl Default for InputFormat {
    fn default() -> Self {
        InputFormat::Auto
    }
}

impl InputFormat {
    /// Resolve `Auto` from a file name or extension; explicit formats win.
    pub fn resolve(self, hint: &str) -> Result<InputFormat, ApError> {
        if self != InputFormat::Auto {
            return Ok(self);
        }
        let hint_lc = hint.trim().to_ascii_lowercase();
        if hint_lc.is_empty() || hint_lc.ends_with(".csv") || hint_lc == "csv" {
            Ok(InputFormat::Csv)
        } else if hint_lc.ends_with(".gpx") || hint_lc == "gpx" {
            Ok(InputFormat::Gpx)
        } else {
            Err(ApError::UnsupportedFormat(hint.to_string()))
        }
    }
}

/// Upper bound on altitude axis ticks; finer steps yield no ticks.
pub const MAX_ALTITUDE_TICKS: usize = 1000;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    pub distance_column: String,
    pub altitude_column: String,
    pub distance_unit: DistanceUnit,
    pub interval_km: f64,
    pub decimals: u32,
    pub delimiter: char,
    pub tick_step_m: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            distance_column: "Distance".to_string(),
            altitude_column: "Altitude".to_string(),
            distance_unit: DistanceUnit::Meters,
            interval_km: 1.0,
            decimals: 2,
            delimiter: ',',
            tick_step_m: 100.0,
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<(), ApError> {
        if !self.interval_km.is_finite() || self.interval_km <= 0.0 {
            return Err(ApError::InvalidParameter(format!(
                "interval_km must be a positive number, got {}",
                self.interval_km
            )));
        }
        if self.decimals > 10 {
            return Err(ApError::InvalidParameter(format!(
                "decimals must be at most 10, got {}",
                self.decimals
            )));
        }
        if !self.tick_step_m.is_finite() || self.tick_step_m <= 0.0 {
            return Err(ApError::InvalidParameter(format!(
                "tick_step_m must be a positive number, got {}",
                self.tick_step_m
            )));
        }
        self.delimiter_byte()?;
        Ok(())
    }

    pub fn delimiter_byte(&self) -> Result<u8, ApError> {
        if self.delimiter.is_ascii() && self.delimiter != '"' && self.delimiter != '\n' {
            Ok(self.delimiter as u8)
        } else {
            Err(ApError::InvalidParameter(format!(
                "unusable delimiter {:?}",
                self.delimiter
            )))
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub distance_m: f64,
    pub altitude_m: Option<f64>,
}

/// A headered CSV as loaded, before any typing.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let wanted = name.trim();
        self.headers.iter().position(|h| h == wanted)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Tabulate typed samples (used for GPX inputs, which have no table of
    /// their own).
    pub fn from_samples(samples: &[Sample]) -> Self {
        RawTable {
            headers: vec!["distance_m".to_string(), "altitude_m".to_string()],
            rows: samples
                .iter()
                .map(|s| {
                    vec![
                        format!("{:.2}", s.distance_m),
                        s.altitude_m.map(|a| format!("{:.2}", a)).unwrap_or_default(),
                    ]
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProfileRow {
    pub interval: i64,
    pub distance_km: f64,
    pub altitude_m: Option<f64>,
    pub samples: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Profile {
    pub interval_km: f64,
    pub decimals: u32,
    pub rows: Vec<ProfileRow>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProfileSummary {
    pub buckets: usize,
    pub samples: usize,
    pub distance_min_km: f64,
    pub distance_max_km: f64,
    pub altitude_min_m: Option<f64>,
    pub altitude_max_m: Option<f64>,
    pub total_ascent_m: f64,
}

impl Profile {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `(distance_km, altitude_m)` pairs for buckets that have an altitude.
    pub fn points(&self) -> Vec<(f64, f64)> {
        self.rows
            .iter()
            .filter_map(|r| Some((r.distance_km, r.altitude_m?)))
            .collect()
    }

    pub fn max_altitude(&self) -> Option<f64> {
        self.rows
            .iter()
            .filter_map(|r| r.altitude_m)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))))
    }

    pub fn min_altitude(&self) -> Option<f64> {
        self.rows
            .iter()
            .filter_map(|r| r.altitude_m)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.min(v))))
    }

    /// Tick positions `0, step, 2*step, ...` up to the truncated maximum altitude.
    /// Empty when more than [`MAX_ALTITUDE_TICKS`] would be needed.
    pub fn altitude_ticks(&self, step: f64) -> Vec<f64> {
        let max = match self.max_altitude() {
            Some(max) if max >= 0.0 => max.trunc(),
            _ => return Vec::new(),
        };
        if !step.is_finite() || step <= 0.0 || max / step >= MAX_ALTITUDE_TICKS as f64 {
            return Vec::new();
        }
        let mut ticks = Vec::new();
        let mut k = 0u64;
        loop {
            let tick = k as f64 * step;
            if tick > max {
                break;
            }
            ticks.push(tick);
            k += 1;
        }
        ticks
    }

    pub fn summary(&self) -> ProfileSummary {
        let altitudes: Vec<f64> = self.rows.iter().filter_map(|r| r.altitude_m).collect();
        let gain = cumulative_gain(&altitudes, 0.0);
        ProfileSummary {
            buckets: self.rows.len(),
            samples: self.rows.iter().map(|r| r.samples).sum(),
            distance_min_km: self.rows.first().map_or(0.0, |r| r.distance_km),
            distance_max_km: self.rows.last().map_or(0.0, |r| r.distance_km),
            altitude_min_m: self.min_altitude(),
            altitude_max_m: self.max_altitude(),
            total_ascent_m: round_to(gain.last().copied().unwrap_or(0.0), self.decimals),
        }
    }
}

/// Read a headered CSV into a [`RawTable`]. Fields are trimmed.
pub fn read_table(input: &[u8], delimiter: u8) -> Result<RawTable, ApError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(input);
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(ApError::InsufficientData);
    }
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(RawTable { headers, rows })
}

/// Type the distance and altitude columns of a loaded table.
pub fn samples_from_table(table: &RawTable, params: &Params) -> Result<Vec<Sample>, ApError> {
    let dist_idx = table
        .column_index(&params.distance_column)
        .ok_or_else(|| ApError::MissingColumn(params.distance_column.clone()))?;
    let alt_idx = table
        .column_index(&params.altitude_column)
        .ok_or_else(|| ApError::MissingColumn(params.altitude_column.clone()))?;
    let scale = params.distance_unit.meters_per_unit();

    let mut out = Vec::with_capacity(table.rows.len());
    for (idx, row) in table.rows.iter().enumerate() {
        let row_no = idx + 1;
        let dist_text = row.get(dist_idx).map(String::as_str).unwrap_or("");
        let distance = dist_text
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ApError::InvalidValue {
                row: row_no,
                column: params.distance_column.clone(),
                value: dist_text.to_string(),
            })?;

        let alt_text = row.get(alt_idx).map(String::as_str).unwrap_or("");
        let altitude = if alt_text.is_empty() {
            None
        } else {
            let value = alt_text
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| ApError::InvalidValue {
                    row: row_no,
                    column: params.altitude_column.clone(),
                    value: alt_text.to_string(),
                })?;
            Some(value)
        };

        out.push(Sample {
            distance_m: distance * scale,
            altitude_m: altitude,
        });
    }
    Ok(out)
}

/// Parse CSV or GPX bytes into samples.
pub fn parse_samples(
    input: &[u8],
    format: InputFormat,
    params: &Params,
) -> Result<Vec<Sample>, ApError> {
    match format {
        InputFormat::Gpx => parse_gpx_samples(input),
        InputFormat::Csv | InputFormat::Auto => {
            let table = read_table(input, params.delimiter_byte()?)?;
            samples_from_table(&table, params)
        }
    }
}

/// Load an input for display and processing: the table as read plus its
/// typed samples.
pub fn load_input(
    input: &[u8],
    format: InputFormat,
    params: &Params,
) -> Result<(RawTable, Vec<Sample>), ApError> {
    match format {
        InputFormat::Gpx => {
            let samples = parse_gpx_samples(input)?;
            Ok((RawTable::from_samples(&samples), samples))
        }
        InputFormat::Csv | InputFormat::Auto => {
            let table = read_table(input, params.delimiter_byte()?)?;
            let samples = samples_from_table(&table, params)?;
            Ok((table, samples))
        }
    }
}

/// Track points (or route points when the file has no tracks) with cumulative
/// great-circle distance from the first point.
pub fn parse_gpx_samples(input: &[u8]) -> Result<Vec<Sample>, ApError> {
    use gpx::read;
    use std::io::Cursor;

    let gpx = read(Cursor::new(input)).map_err(|e| ApError::GpxParse(e.to_string()))?;
    let mut waypoints: Vec<gpx::Waypoint> = gpx
        .tracks
        .into_iter()
        .flat_map(|track| track.segments)
        .flat_map(|segment| segment.points)
        .collect();
    if waypoints.is_empty() {
        waypoints = gpx.routes.into_iter().flat_map(|route| route.points).collect();
    }

    let mut out = Vec::with_capacity(waypoints.len());
    let mut cumulative_dist = 0.0;
    let mut last_lat_lon: Option<(f64, f64)> = None;
    for point in waypoints {
        let point_geo = point.point();
        let lat = point_geo.y();
        let lon = point_geo.x();
        if let Some((last_lat, last_lon)) = last_lat_lon {
            cumulative_dist += haversine_distance(last_lat, last_lon, lat, lon);
        }
        last_lat_lon = Some((lat, lon));
        out.push(Sample {
            distance_m: cumulative_dist,
            altitude_m: point.elevation.filter(|v| v.is_finite()),
        });
    }
    Ok(out)
}

fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let r = 6_371_000.0_f64;
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    r * c
}

/// Round half to even on the scaled value, the way NumPy's `round` does.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(decimals as i32);
    let scaled = value * factor;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round_ties_even() / factor
}

#[derive(Default)]
struct Bucket {
    samples: usize,
    distance_sum: f64,
    altitude_sum: f64,
    altitude_count: usize,
}

/// Bucket samples into `interval_km` wide intervals and average each bucket.
pub fn aggregate_profile(samples: &[Sample], params: &Params) -> Result<Profile, ApError> {
    params.validate()?;
    if samples.is_empty() {
        return Err(ApError::InsufficientData);
    }

    let mut buckets: BTreeMap<i64, Bucket> = BTreeMap::new();
    for (idx, sample) in samples.iter().enumerate() {
        let distance_km = round_to(sample.distance_m / 1000.0, params.decimals);
        if !distance_km.is_finite() {
            return Err(ApError::InvalidValue {
                row: idx + 1,
                column: params.distance_column.clone(),
                value: sample.distance_m.to_string(),
            });
        }
        let interval = (distance_km / params.interval_km).floor() as i64;
        let bucket = buckets.entry(interval).or_default();
        bucket.samples += 1;
        bucket.distance_sum += distance_km;
        if let Some(alt) = sample.altitude_m.filter(|a| a.is_finite()) {
            bucket.altitude_sum += alt;
            bucket.altitude_count += 1;
        }
    }

    let rows = buckets
        .into_iter()
        .map(|(interval, b)| ProfileRow {
            interval,
            distance_km: round_to(b.distance_sum / b.samples as f64, params.decimals),
            altitude_m: (b.altitude_count > 0).then(|| {
                round_to(b.altitude_sum / b.altitude_count as f64, params.decimals)
            }),
            samples: b.samples,
        })
        .collect();

    Ok(Profile {
        interval_km: params.interval_km,
        decimals: params.decimals,
        rows,
    })
}

fn cumulative_gain(altitude: &[f64], eps: f64) -> Vec<f64> {
    let mut gain = Vec::with_capacity(altitude.len());
    let mut total = 0.0;
    if altitude.is_empty() {
        return gain;
    }
    gain.push(0.0);
    for w in altitude.windows(2) {
        let delta = w[1] - w[0];
        if delta > eps {
            total += delta;
        }
        gain.push(total);
    }
    gain
}

/// Write the aggregated table as CSV; a missing altitude is an empty field.
pub fn write_profile_csv<W: Write>(profile: &Profile, writer: W) -> Result<(), ApError> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(["interval", "distance_km", "altitude_m", "samples"])?;
    let prec = profile.decimals as usize;
    for row in &profile.rows {
        writer.write_record([
            row.interval.to_string(),
            format!("{:.*}", prec, row.distance_km),
            row.altitude_m
                .map(|v| format!("{:.*}", prec, v))
                .unwrap_or_default(),
            row.samples.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACK_CSV: &str = "Distance,Altitude,HeartRate\n\
        0,100,120\n\
        400,110,121\n\
        999,120,122\n\
        1000,200,130\n\
        1500,220,131\n\
        2600,300,140\n";

    fn profile_from(csv: &str, params: &Params) -> Profile {
        let samples = parse_samples(csv.as_bytes(), InputFormat::Csv, params).unwrap();
        aggregate_profile(&samples, params).unwrap()
    }

    #[test]
    fn test_haversine_distance() {
        let dist = haversine_distance(0.0, 0.0, 0.0, 1.0);
        assert!((dist - 111_195.0).abs() < 200.0);
    }

    #[test]
    fn test_round_to_matches_half_even() {
        assert_eq!(round_to(0.125, 2), 0.12);
        assert_eq!(round_to(0.135, 2), 0.14);
        assert_eq!(round_to(2.5, 0), 2.0);
        assert_eq!(round_to(3.5, 0), 4.0);
        assert_eq!(round_to(1.23456, 3), 1.235);
        assert!(round_to(f64::NAN, 2).is_nan());
    }

    #[test]
    fn test_aggregate_buckets_by_kilometer() {
        let profile = profile_from(TRACK_CSV, &Params::default());
        let intervals: Vec<i64> = profile.rows.iter().map(|r| r.interval).collect();
        assert_eq!(intervals, vec![0, 1, 2]);

        let first = &profile.rows[0];
        // 999 m rounds to 1.00 km before bucketing
        assert_eq!(first.samples, 2);
        assert_eq!(first.distance_km, 0.2);
        assert_eq!(first.altitude_m, Some(105.0));

        let second = &profile.rows[1];
        assert_eq!(second.samples, 3);
        assert_eq!(second.distance_km, round_to((1.0 + 1.0 + 1.5) / 3.0, 2));
        assert_eq!(second.altitude_m, Some(round_to((120.0 + 200.0 + 220.0) / 3.0, 2)));

        let third = &profile.rows[2];
        assert_eq!(third.distance_km, 2.6);
        assert_eq!(third.altitude_m, Some(300.0));
    }

    #[test]
    fn test_custom_interval_and_columns() {
        let csv = "km;elev\n0.1;10\n0.6;20\n1.1;30\n";
        let params = Params {
            distance_column: "km".into(),
            altitude_column: "elev".into(),
            distance_unit: DistanceUnit::Kilometers,
            interval_km: 0.5,
            delimiter: ';',
            ..Params::default()
        };
        let profile = profile_from(csv, &params);
        let intervals: Vec<i64> = profile.rows.iter().map(|r| r.interval).collect();
        assert_eq!(intervals, vec![0, 1, 2]);
        assert_eq!(profile.rows[1].distance_km, 0.6);
        assert_eq!(profile.rows[2].altitude_m, Some(30.0));
    }

    #[test]
    fn test_negative_distance_floors_down() {
        let csv = "Distance,Altitude\n-500,10\n500,20\n";
        let profile = profile_from(csv, &Params::default());
        assert_eq!(profile.rows[0].interval, -1);
        assert_eq!(profile.rows[1].interval, 0);
    }

    #[test]
    fn test_missing_altitude_is_skipped_by_mean() {
        let csv = "Distance,Altitude\n0,100\n100,\n200,200\n1200,\n";
        let profile = profile_from(csv, &Params::default());
        assert_eq!(profile.rows[0].samples, 3);
        assert_eq!(profile.rows[0].altitude_m, Some(150.0));
        assert_eq!(profile.rows[1].altitude_m, None);
        assert_eq!(profile.points(), vec![(0.1, 150.0)]);
    }

    #[test]
    fn test_missing_column_reported() {
        let csv = "Dist,Altitude\n0,1\n";
        let err = parse_samples(csv.as_bytes(), InputFormat::Csv, &Params::default()).unwrap_err();
        assert!(matches!(err, ApError::MissingColumn(ref c) if c == "Distance"));
    }

    #[test]
    fn test_invalid_distance_reports_row() {
        let csv = "Distance,Altitude\n0,1\nabc,2\n";
        let err = parse_samples(csv.as_bytes(), InputFormat::Csv, &Params::default()).unwrap_err();
        match err {
            ApError::InvalidValue { row, column, value } => {
                assert_eq!(row, 2);
                assert_eq!(column, "Distance");
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_inputs() {
        assert!(matches!(
            read_table(b"", b','),
            Err(ApError::InsufficientData)
        ));
        let samples =
            parse_samples(b"Distance,Altitude\n", InputFormat::Csv, &Params::default()).unwrap();
        assert!(matches!(
            aggregate_profile(&samples, &Params::default()),
            Err(ApError::InsufficientData)
        ));
    }

    #[test]
    fn test_invalid_interval_rejected() {
        let params = Params {
            interval_km: 0.0,
            ..Params::default()
        };
        let samples = [Sample {
            distance_m: 0.0,
            altitude_m: Some(1.0),
        }];
        assert!(matches!(
            aggregate_profile(&samples, &params),
            Err(ApError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_params_validation() {
        let cases = [
            Params {
                tick_step_m: 0.0,
                ..Params::default()
            },
            Params {
                tick_step_m: f64::INFINITY,
                ..Params::default()
            },
            Params {
                decimals: 11,
                ..Params::default()
            },
            Params {
                delimiter: '"',
                ..Params::default()
            },
            Params {
                delimiter: 'é',
                ..Params::default()
            },
        ];
        for params in cases {
            assert!(
                matches!(params.validate(), Err(ApError::InvalidParameter(_))),
                "{params:?}"
            );
        }
        let limits = Params {
            decimals: 10,
            delimiter: ';',
            tick_step_m: 0.5,
            ..Params::default()
        };
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn test_non_finite_altitude_reports_row() {
        for bad in ["inf", "NaN", "-infinity"] {
            let csv = format!("Distance,Altitude\n0,1\n100,{bad}\n");
            let err =
                parse_samples(csv.as_bytes(), InputFormat::Csv, &Params::default()).unwrap_err();
            match err {
                ApError::InvalidValue { row, column, value } => {
                    assert_eq!(row, 2);
                    assert_eq!(column, "Altitude");
                    assert_eq!(value, bad);
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn test_format_resolution() {
        assert_eq!(InputFormat::Auto.resolve("track.GPX").unwrap(), InputFormat::Gpx);
        assert_eq!(InputFormat::Auto.resolve("data.csv").unwrap(), InputFormat::Csv);
        assert_eq!(InputFormat::Auto.resolve("").unwrap(), InputFormat::Csv);
        assert_eq!(InputFormat::Gpx.resolve("data.csv").unwrap(), InputFormat::Gpx);
        assert!(matches!(
            InputFormat::Auto.resolve("ride.fit"),
            Err(ApError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_gpx_cumulative_distance() {
        let gpx = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
  <trk><trkseg>
    <trkpt lat="0.0" lon="0.0"><ele>10</ele></trkpt>
    <trkpt lat="0.0" lon="0.01"><ele>20</ele></trkpt>
    <trkpt lat="0.0" lon="0.02"></trkpt>
  </trkseg></trk>
</gpx>"#;
        let samples = parse_samples(gpx.as_bytes(), InputFormat::Gpx, &Params::default()).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].distance_m, 0.0);
        assert!((samples[1].distance_m - 1112.0).abs() < 5.0);
        assert!((samples[2].distance_m - 2224.0).abs() < 10.0);
        assert_eq!(samples[1].altitude_m, Some(20.0));
        assert_eq!(samples[2].altitude_m, None);
    }

    #[test]
    fn test_load_input_tabulates_gpx() {
        let gpx = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
  <rte>
    <rtept lat="45.0" lon="6.0"><ele>1200.5</ele></rtept>
    <rtept lat="45.0" lon="6.0"></rtept>
  </rte>
</gpx>"#;
        let (table, samples) =
            load_input(gpx.as_bytes(), InputFormat::Gpx, &Params::default()).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(table.headers, vec!["distance_m", "altitude_m"]);
        assert_eq!(table.rows[0], vec!["0.00", "1200.50"]);
        assert_eq!(table.rows[1], vec!["0.00", ""]);

        let (table, samples) =
            load_input(TRACK_CSV.as_bytes(), InputFormat::Csv, &Params::default()).unwrap();
        assert_eq!(table.headers, vec!["Distance", "Altitude", "HeartRate"]);
        assert_eq!(table.len(), samples.len());
    }

    #[test]
    fn test_ticks_and_summary() {
        let profile = profile_from(TRACK_CSV, &Params::default());
        assert_eq!(profile.altitude_ticks(100.0), vec![0.0, 100.0, 200.0, 300.0]);
        assert!(profile.altitude_ticks(0.0).is_empty());
        assert!(profile.altitude_ticks(1e-3).is_empty());
        assert_eq!(profile.altitude_ticks(0.5).len(), 601);
        assert!(profile.altitude_ticks(0.25).is_empty());

        let summary = profile.summary();
        assert_eq!(summary.buckets, 3);
        assert_eq!(summary.samples, 6);
        assert_eq!(summary.altitude_min_m, Some(105.0));
        assert_eq!(summary.altitude_max_m, Some(300.0));
        assert_eq!(summary.total_ascent_m, 195.0);
    }

    #[test]
    fn test_write_profile_csv() {
        let csv = "Distance,Altitude\n0,100\n1200,\n";
        let profile = profile_from(csv, &Params::default());
        let mut out = Vec::new();
        write_profile_csv(&profile, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "interval,distance_km,altitude_m,samples\n0,0.00,100.00,1\n1,1.20,,1\n"
        );
    }
}
