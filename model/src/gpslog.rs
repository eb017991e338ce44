use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{NaiveDateTime, Timelike};
use geom::{Duration, GPSBounds, LonLat, Pt2D, Time};
use serde::Deserialize;

use crate::DeviceName;

/// Parses a CSV export of GPS fixes. Returns the bounds covering every fix, and each device's
/// fixes projected and sorted by time.
pub fn load<R: std::io::Read>(
    reader: R,
) -> Result<(GPSBounds, BTreeMap<DeviceName, Vec<(Pt2D, Time)>>)> {
    let mut gps_bounds = GPSBounds::new();
    let mut records = Vec::new();
    for rec in csv::Reader::from_reader(reader).deserialize() {
        let rec: Record = rec?;
        gps_bounds.update(LonLat::new(rec.longitude, rec.latitude));
        records.push(rec);
    }

    let mut fixes_per_device: BTreeMap<DeviceName, Vec<(Pt2D, Time)>> = BTreeMap::new();
    for rec in records {
        let datetime = NaiveDateTime::parse_from_str(&rec.time_log, "%Y-%m-%d %H:%M:%S")?;
        // Ignore the date
        // TODO Logs spanning midnight wrap around; split them per day instead
        let time = datetime.time();
        let time = Time::START_OF_DAY
            + Duration::hours(time.hour() as usize)
            + Duration::minutes(time.minute() as usize)
            + Duration::seconds(time.second() as f64);

        let pos = LonLat::new(rec.longitude, rec.latitude).to_pt(&gps_bounds);
        fixes_per_device
            .entry(rec.device)
            .or_insert_with(Vec::new)
            .push((pos, time));
    }

    // Sort by time, in case the file isn't in order
    for fixes in fixes_per_device.values_mut() {
        fixes.sort_by_key(|(_, time)| *time);
    }
    Ok((gps_bounds, fixes_per_device))
}

#[derive(Deserialize)]
struct Record {
    #[serde(rename = "deviceid")]
    device: DeviceName,
    time_log: String,
    latitude: f64,
    longitude: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_sort() {
        let input = "\
deviceid,time_log,latitude,longitude
abc,2024-05-01 10:00:02,47.010,-122.010
abc,2024-05-01 10:00:00,47.000,-122.000
xyz,2024-05-01 09:59:59,47.020,-122.020
";
        let (_, fixes) = load(input.as_bytes()).unwrap();
        assert_eq!(fixes.len(), 2);

        // The out-of-order rows for abc come back sorted
        let abc = &fixes[&DeviceName("abc".to_string())];
        assert_eq!(abc.len(), 2);
        assert!(abc[0].1 < abc[1].1);
        assert_eq!(
            abc[1].1 - abc[0].1,
            Duration::seconds(2.0),
            "sorted by the recorded time, not file order"
        );

        assert_eq!(fixes[&DeviceName("xyz".to_string())].len(), 1);
    }

    #[test]
    fn bad_timestamp() {
        let input = "\
deviceid,time_log,latitude,longitude
abc,not a time,47.0,-122.0
";
        assert!(load(input.as_bytes()).is_err());
    }

    #[test]
    fn missing_column() {
        let input = "\
deviceid,time_log,latitude
abc,2024-05-01 10:00:00,47.0
";
        assert!(load(input.as_bytes()).is_err());
    }
}
