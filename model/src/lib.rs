#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

mod devices;
mod gpslog;
mod playback;
mod route;

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use abstutil::Timer;
use anyhow::Result;
use geom::{Bounds, GPSBounds, Pt2D, Time};
use serde::{Deserialize, Serialize};
use zip::ZipArchive;

pub use self::devices::{load_registry, DeviceInfo};
pub use self::playback::{trace_to_geojson, Frame, Playback, PlaybackState};
pub use self::route::{PathMetrics, Route};

/// The tracker backend's own ID for a device, usually a UUID.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceName(String);

impl DeviceName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceID(pub usize);

#[derive(Serialize, Deserialize)]
pub struct Model {
    pub bounds: Bounds,
    pub gps_bounds: GPSBounds,
    pub devices: Vec<Device>,
}

#[derive(Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceID,
    pub original_id: DeviceName,
    /// The registry entry, when the import had one for this device
    pub info: Option<DeviceInfo>,
    pub route: Route,
    pub first_fix: Time,
    pub last_fix: Time,
    pub num_fixes: usize,
}

impl Device {
    pub fn name(&self) -> &str {
        match &self.info {
            Some(info) => &info.name,
            None => self.original_id.as_str(),
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "{}: {} fixes from {} to {}",
            self.name(),
            self.num_fixes,
            self.first_fix,
            self.last_fix
        )
    }

    /// Writes the device's route as GeoJSON, with start and end markers.
    pub fn export_to_geojson(&self, path: String, gps_bounds: &GPSBounds) -> Result<()> {
        use geojson::{Feature, FeatureCollection, GeoJson};

        let mut features = Vec::new();

        if let Ok(pl) = self.route.as_polyline() {
            let mut feature = Feature {
                bbox: None,
                geometry: Some(pl.to_geojson(Some(gps_bounds))),
                id: None,
                properties: None,
                foreign_members: None,
            };
            feature.set_property("type", "route");
            feature.set_property("device", self.name());
            features.push(feature);
        }

        for (pt, kind) in [(self.route.first_pt(), "start"), (self.route.last_pt(), "end")] {
            let pos = pt.to_gps(gps_bounds);
            let mut feature = Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new(geojson::Value::Point(vec![
                    pos.x(),
                    pos.y(),
                ]))),
                id: None,
                properties: None,
                foreign_members: None,
            };
            feature.set_property("type", kind);
            features.push(feature);
        }

        let gj = GeoJson::FeatureCollection(FeatureCollection {
            features,
            bbox: None,
            foreign_members: None,
        });
        std::fs::write(path, serde_json::to_string_pretty(&gj)?)?;
        Ok(())
    }
}

impl Model {
    pub fn empty() -> Self {
        Self {
            bounds: Bounds::from(&[Pt2D::zero(), Pt2D::new(1.0, 1.0)]),
            gps_bounds: GPSBounds::new(),
            devices: Vec::new(),
        }
    }

    /// Builds a model from a CSV of GPS fixes and an already-parsed device registry. A device
    /// needs at least 2 fixes to replay; ones that fall short are skipped, not fatal.
    pub fn import_log<R: Read>(
        log_reader: R,
        mut registry: BTreeMap<DeviceName, DeviceInfo>,
    ) -> Result<Self> {
        let (gps_bounds, fixes_per_device) = gpslog::load(log_reader)?;

        let mut devices = Vec::new();
        for (original_id, fixes) in fixes_per_device {
            let first_fix = fixes[0].1;
            let last_fix = fixes.last().unwrap().1;
            let num_fixes = fixes.len();
            let points: Vec<Pt2D> = fixes.into_iter().map(|(pt, _)| pt).collect();
            match Route::new(points) {
                Ok(route) => {
                    devices.push(Device {
                        id: DeviceID(devices.len()),
                        info: registry.remove(&original_id),
                        original_id,
                        route,
                        first_fix,
                        last_fix,
                        num_fixes,
                    });
                }
                Err(err) => {
                    warn!("Skipping {:?}: {}", original_id, err);
                }
            }
        }
        if !registry.is_empty() {
            warn!(
                "Registry devices with no fixes logged: {:?}",
                registry.keys()
            );
        }

        Ok(Self {
            bounds: gps_bounds.to_bounds(),
            gps_bounds,
            devices,
        })
    }

    /// Imports a bundle: gps_log.csv, plus an optional devices.json registry.
    pub fn import_zip_bytes(bytes: Vec<u8>, timer: &mut Timer) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;

        let registry = match get_zip_file(&mut archive, "devices.json") {
            Ok(file) => devices::load_registry(file)?,
            Err(_) => BTreeMap::new(),
        };

        timer.start("parse gps_log.csv");
        let model = Self::import_log(get_zip_file(&mut archive, "gps_log.csv")?, registry)?;
        timer.stop("parse gps_log.csv");

        info!("Imported {} devices", model.devices.len());
        Ok(model)
    }
}

// Adds the path in the error message
fn get_zip_file<'a, R: Read + std::io::Seek>(
    archive: &'a mut ZipArchive<R>,
    path: &str,
) -> Result<zip::read::ZipFile<'a>> {
    archive
        .by_name(path)
        .map_err(|err| anyhow!("{path}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_skips_underlogged_devices() {
        let log = "\
deviceid,time_log,latitude,longitude
lonely,2024-05-01 10:00:00,47.5,-122.5
busy,2024-05-01 10:00:00,47.000,-122.000
busy,2024-05-01 10:00:10,47.010,-122.010
busy,2024-05-01 10:00:20,47.020,-122.020
";
        let model = Model::import_log(log.as_bytes(), BTreeMap::new()).unwrap();
        assert_eq!(model.devices.len(), 1);

        let device = &model.devices[0];
        assert_eq!(device.id, DeviceID(0));
        assert_eq!(device.name(), "busy");
        assert_eq!(device.num_fixes, 3);
        assert_eq!(
            device.last_fix - device.first_fix,
            geom::Duration::seconds(20.0)
        );
        assert_eq!(device.route.points().len(), 3);
    }

    #[test]
    fn import_merges_registry() {
        let log = "\
deviceid,time_log,latitude,longitude
abc,2024-05-01 10:00:00,47.000,-122.000
abc,2024-05-01 10:00:10,47.010,-122.010
";
        let registry_json = r#"[{"deviceid": "abc", "name": "Delivery van"}]"#;
        let registry = load_registry(registry_json.as_bytes()).unwrap();
        let model = Model::import_log(log.as_bytes(), registry).unwrap();
        assert_eq!(model.devices[0].name(), "Delivery van");
        assert_eq!(model.devices[0].original_id, DeviceName("abc".to_string()));
    }

    #[test]
    fn empty_model() {
        let model = Model::empty();
        assert!(model.devices.is_empty());
    }
}
