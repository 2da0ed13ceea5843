//! The user's battery descriptor and the battery-group notification built
//! from it.
//!
//! The descriptor is loaded once from YAML at start-up and is immutable
//! afterwards; the session engine reads charge rates and limits from it and
//! serializes it into the app's `BATTERY_GROUP` notification.

use std::fs::File;
use std::path::Path;

use serde::Deserialize;

use crate::controller::constants::{ChargerOperation, Chemistry};
use crate::controller::serialize::{append_str, append_u16};
use crate::error::{Error, Result};

const NFCID_COUNT: usize = 8;
const NFCID_LENGTH: usize = 7;
const MAX_BRAND_NAME_LEN: usize = 16;

fn default_version() -> u8 {
    2
}

fn default_settings_version() -> u8 {
    1
}

fn default_fuel_table() -> Vec<f64> {
    vec![0.0; 11]
}

/// One battery specification. Field names match the YAML schema.
#[derive(Debug, Clone, Deserialize)]
pub struct Battery {
    #[serde(default = "default_version")]
    pub version: u8,
    #[serde(deserialize_with = "operation_from_name")]
    pub pref_operation: ChargerOperation,
    pub pref_charge_c_normal: f64,
    pub pref_charge_c_fastest: f64,
    pub pref_charge_c_accurate: f64,
    pub pref_charge_c_discharge: f64,
    pub pref_charge_c_storage: f64,
    pub pref_charge_c_analyze: f64,
    pub pref_charge_c_monitor: f64,
    pub pref_discharge_c: f64,
    #[serde(default)]
    pub pref_fast_charge_delta: u8,
    #[serde(default)]
    pub pref_discharge_delta: u8,
    /// Measured fuel-curve voltages, 11 points.
    #[serde(default = "default_fuel_table")]
    pub measured_fuel_table: Vec<f64>,
    #[serde(default)]
    pub measured_internal_resistance: f64,
    #[serde(default)]
    pub measured_capacity: u16,
    pub cycle_count: u16,
    #[serde(default)]
    pub pref_accu_charge_delta: u8,
    #[serde(default)]
    pub pref_norm_charge_delta: u8,
    #[serde(default)]
    pub pref_store_charge_delta: u8,
    #[serde(default)]
    pub pref_flags: u8,
    #[serde(default)]
    pub battery_id: u16,
    #[serde(default)]
    pub checksum: u16,
    #[serde(default = "default_settings_version")]
    pub settings_version: u8,
    pub internal_resistance: f64,
    pub discharge_c_max: f64,
    pub charge_c_max: f64,
    /// Capacity of one pack in mAh.
    pub capacity: u16,
    #[serde(deserialize_with = "chemistry_from_name")]
    pub chemistry: Chemistry,
    pub cell_count: u8,
    pub brand_name: String,
    pub max_cell_volts: f64,
    pub min_cell_volts: f64,
    pub pack_count: u8,
    pub storage_charge_volts: f64,
    pub storage_discharge_volts: f64,
}

fn operation_from_name<'de, D>(deserializer: D) -> std::result::Result<ChargerOperation, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    ChargerOperation::from_name(&name).map_err(serde::de::Error::custom)
}

fn chemistry_from_name<'de, D>(deserializer: D) -> std::result::Result<Chemistry, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    Chemistry::from_name(&name).map_err(serde::de::Error::custom)
}

impl Battery {
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let battery: Battery = serde_yaml::from_reader(file)
            .map_err(|err| Error::invalid(format!("bad battery file: {err}")))?;
        battery.validate()?;
        Ok(battery)
    }

    fn validate(&self) -> Result<()> {
        if self.brand_name.is_empty() {
            return Err(Error::invalid("\"brand_name\" minimum length is 1"));
        }
        if self.brand_name.len() > MAX_BRAND_NAME_LEN {
            return Err(Error::invalid("\"brand_name\" maximum length is 16"));
        }
        if self.cell_count == 0 {
            return Err(Error::invalid("\"cell_count\" must be >= 1"));
        }
        if self.pack_count == 0 {
            return Err(Error::invalid("\"pack_count\" must be >= 1"));
        }
        Ok(())
    }

    /// The preferred charge C rate for an operation.
    pub fn pref_charge_c(&self, operation: ChargerOperation) -> f64 {
        match operation {
            ChargerOperation::Accurate => self.pref_charge_c_accurate,
            ChargerOperation::Normal => self.pref_charge_c_normal,
            ChargerOperation::Fastest => self.pref_charge_c_fastest,
            ChargerOperation::Storage => self.pref_charge_c_storage,
            ChargerOperation::Discharge => self.pref_charge_c_discharge,
            ChargerOperation::Analyze => self.pref_charge_c_analyze,
            ChargerOperation::Monitor => self.pref_charge_c_monitor,
            ChargerOperation::Trickle | ChargerOperation::None => 0.0,
        }
    }

    pub fn serialize(&self, buf: &mut Vec<u8>) {
        buf.push(self.version);
        buf.push(self.pref_operation as u8);
        append_u16(buf, (self.pref_charge_c_normal * 10.0).round() as u16);
        append_u16(buf, (self.pref_charge_c_fastest * 10.0).round() as u16);
        append_u16(buf, (self.pref_charge_c_accurate * 10.0).round() as u16);
        append_u16(buf, (self.pref_discharge_c * 10.0).round() as u16);
        buf.push(self.pref_fast_charge_delta);
        buf.push(self.pref_discharge_delta);
        for val in &self.measured_fuel_table {
            append_u16(buf, *val as u16);
        }
        append_u16(buf, (self.measured_internal_resistance * 100.0).round() as u16);
        append_u16(buf, self.measured_capacity);
        append_u16(buf, self.cycle_count);
        buf.push(self.pref_accu_charge_delta);
        buf.push(self.pref_norm_charge_delta);
        buf.push(self.pref_store_charge_delta);
        buf.push(self.pref_flags);
        append_u16(buf, self.battery_id);
        buf.extend_from_slice(&[0; 4]);
        append_u16(buf, self.checksum);
        buf.push(self.settings_version);
        append_u16(buf, (self.internal_resistance * 100.0).round() as u16);
        append_u16(buf, self.discharge_c_max.round() as u16);
        append_u16(buf, (self.charge_c_max * 10.0).round() as u16);
        append_u16(buf, self.capacity);
        buf.push(self.chemistry as u8);
        buf.push(self.cell_count);
        append_str(buf, &self.brand_name, MAX_BRAND_NAME_LEN);
        append_u16(buf, (self.max_cell_volts * 1000.0).round() as u16);
        append_u16(buf, (self.min_cell_volts * 1000.0).round() as u16);
        buf.push(self.pack_count);
        buf.extend_from_slice(&[0; 13]);
    }
}

/// The app's view of a group of identical packs charged together.
#[derive(Debug, Clone)]
pub struct BatteryGroup {
    pub group_index: u8,
    pub battery_count: u8,
    nfc_ids: [[u8; NFCID_LENGTH]; NFCID_COUNT],
}

impl BatteryGroup {
    pub fn new(battery: &Battery) -> Self {
        let mut nfc_ids = [[0u8; NFCID_LENGTH]; NFCID_COUNT];
        nfc_ids[0] = [1, 2, 3, 4, 5, 6, 7];
        Self {
            group_index: 0,
            battery_count: battery.pack_count,
            nfc_ids,
        }
    }

    pub fn serialize(&self, battery: &Battery, buf: &mut Vec<u8>) {
        buf.push(self.group_index);
        buf.push(self.battery_count);
        battery.serialize(buf);
        for nfc_id in &self.nfc_ids {
            buf.extend_from_slice(nfc_id);
        }
    }

    /// The `BATTERY_GROUP` notification payload: a port number followed by
    /// the group.
    pub fn serialize_notify(&self, battery: &Battery) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(0); // charger port number
        self.serialize(battery, &mut buf);
        buf
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_battery() -> Battery {
        Battery {
            version: 2,
            pref_operation: ChargerOperation::Normal,
            pref_charge_c_normal: 1.0,
            pref_charge_c_fastest: 2.0,
            pref_charge_c_accurate: 0.5,
            pref_charge_c_discharge: 1.0,
            pref_charge_c_storage: 1.0,
            pref_charge_c_analyze: 1.0,
            pref_charge_c_monitor: 1.0,
            pref_discharge_c: 1.0,
            pref_fast_charge_delta: 0,
            pref_discharge_delta: 0,
            measured_fuel_table: vec![0.0; 11],
            measured_internal_resistance: 0.0,
            measured_capacity: 0,
            cycle_count: 1,
            pref_accu_charge_delta: 0,
            pref_norm_charge_delta: 0,
            pref_store_charge_delta: 0,
            pref_flags: 0,
            battery_id: 0,
            checksum: 0,
            settings_version: 1,
            internal_resistance: 3.5,
            discharge_c_max: 2.0,
            charge_c_max: 3.0,
            capacity: 2200,
            chemistry: Chemistry::LiPo,
            cell_count: 3,
            brand_name: "Turnigy".into(),
            max_cell_volts: 4.2,
            min_cell_volts: 3.3,
            pack_count: 2,
            storage_charge_volts: 3.85,
            storage_discharge_volts: 3.85,
        }
    }

    #[test]
    fn from_yaml_parses_schema() {
        let yaml = r#"
pref_operation: normal
pref_charge_c_normal: 1.0
pref_charge_c_fastest: 2.0
pref_charge_c_accurate: 0.5
pref_charge_c_discharge: 1.0
pref_charge_c_storage: 1.0
pref_charge_c_analyze: 1.0
pref_charge_c_monitor: 1.0
pref_discharge_c: 1.0
cycle_count: 1
internal_resistance: 3.5
discharge_c_max: 2.0
charge_c_max: 3.0
capacity: 2200
chemistry: lipo
cell_count: 3
brand_name: Turnigy
max_cell_volts: 4.2
min_cell_volts: 3.3
pack_count: 2
storage_charge_volts: 3.85
storage_discharge_volts: 3.85
"#;
        let battery: Battery = serde_yaml::from_str(yaml).unwrap();
        battery.validate().unwrap();
        assert_eq!(battery.chemistry, Chemistry::LiPo);
        assert_eq!(battery.pref_operation, ChargerOperation::Normal);
        assert_eq!(battery.version, 2);
        assert_eq!(battery.measured_fuel_table.len(), 11);
    }

    #[test]
    fn from_yaml_rejects_missing_keys() {
        let result: std::result::Result<Battery, _> = serde_yaml::from_str("chemistry: lipo");
        assert!(result.is_err());
    }

    #[test]
    fn validate_checks_brand_name() {
        let mut battery = test_battery();
        battery.brand_name = String::new();
        assert!(battery.validate().is_err());
        battery.brand_name = "much too long for the field!!".into();
        assert!(battery.validate().is_err());
    }

    #[test]
    fn serialized_layout() {
        let battery = test_battery();
        let mut buf = Vec::new();
        battery.serialize(&mut buf);
        assert_eq!(buf[0], 2); // version
        assert_eq!(buf[1], ChargerOperation::Normal as u8);
        assert_eq!(u16::from_le_bytes([buf[2], buf[3]]), 10); // normal C * 10
        // chemistry and cell count follow the scalar block.
        let chem_idx = 2 + 2 * 4 + 2 + 22 + 2 * 3 + 4 + 2 + 4 + 2 + 1 + 2 * 4;
        assert_eq!(buf[chem_idx], Chemistry::LiPo as u8);
        assert_eq!(buf[chem_idx + 1], 3);
    }

    #[test]
    fn group_notify_layout() {
        let battery = test_battery();
        let group = BatteryGroup::new(&battery);
        assert_eq!(group.battery_count, 2);
        let buf = group.serialize_notify(&battery);
        assert_eq!(buf[0], 0); // port
        assert_eq!(buf[1], 0); // group index
        assert_eq!(buf[2], 2); // battery count
        // NFC ids trail the battery blob: 8 slots of 7 bytes.
        let nfc = &buf[buf.len() - NFCID_COUNT * NFCID_LENGTH..];
        assert_eq!(&nfc[..7], &[1, 2, 3, 4, 5, 6, 7]);
        assert!(nfc[7..].iter().all(|bb| *bb == 0));
    }
}
