use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::DeviceName;

/// One entry of the device registry, mirroring the tracker's device table. Everything but the ID
/// and display name is optional; old exports carry only those two.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub deviceid: DeviceName,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub address: Option<String>,
}

/// Parses a JSON array of registry entries.
pub fn load_registry<R: std::io::Read>(reader: R) -> Result<BTreeMap<DeviceName, DeviceInfo>> {
    let mut devices = BTreeMap::new();
    for info in serde_json::from_reader::<_, Vec<DeviceInfo>>(reader)? {
        if devices.contains_key(&info.deviceid) {
            bail!("Duplicate {:?}", info.deviceid);
        }
        devices.insert(info.deviceid.clone(), info);
    }
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_registry() {
        let input = r#"[
            {"deviceid": "abc", "name": "Delivery van", "description": "north route",
             "lat": 47.0, "lon": -122.0, "address": "1 Main St", "data": {"battery": 80}},
            {"deviceid": "xyz", "name": "Scooter"}
        ]"#;
        let registry = load_registry(input.as_bytes()).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry[&DeviceName("abc".to_string())].name, "Delivery van");
        assert_eq!(registry[&DeviceName("xyz".to_string())].description, None);
    }

    #[test]
    fn duplicate_device() {
        let input = r#"[
            {"deviceid": "abc", "name": "one"},
            {"deviceid": "abc", "name": "two"}
        ]"#;
        assert!(load_registry(input.as_bytes()).is_err());
    }
}
