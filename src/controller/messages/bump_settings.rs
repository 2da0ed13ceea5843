//! The controller-settings blob the app reads right after connecting.
//!
//! Most of it is cosmetic state a real controller would persist (touch
//! calibration, color themes); the emulator only fills in the power-source
//! table and the device name.

use crate::controller::serialize::{append_bool, append_str, append_u16};

const MAX_NAME_LEN: usize = 16;
const NUM_PORTS: usize = 4;
const NUM_POWER_SOURCES: usize = 4;

pub struct BumpSettings {
    pub volume_level: u8,
    pub touch_cal_dx: u16,
    pub touch_cal_dy: u16,
    pub touch_cal_cx: u16,
    pub touch_cal_cy: u16,
    pub custom_color_idle: u16,
    pub custom_color_active: u16,
    pub custom_color_complete: u16,
    pub custom_color_safety: u16,
    pub custom_color_setup: u16,
    pub selected_color_theme: u8,
    pub screen_layout: u8,
    pub last_bluetooth_uuid: [u8; 6],
    pub cell_ir_warning_threshold: u8,
    pub capacity_warning_threshold: u8,
    pub presets_enabled: bool,
    pub cycle_graph_caching_enabled: bool,
    charger_ports_disabled: [bool; NUM_PORTS],
    pub touch_calibration_redone: bool,
    power_sources: [u8; NUM_PORTS],
    wiring_modes: [u8; NUM_PORTS],
    pub charger_upgrade_states: [u8; NUM_PORTS],
    pub charger_upgrade_models: [u8; NUM_PORTS],
    pub power_source_defaults_created: bool,
    power_source_names: [Option<String>; NUM_POWER_SOURCES],
    power_source_types: [u8; NUM_POWER_SOURCES],
    power_source_warn_dod: [bool; NUM_POWER_SOURCES],
    power_source_low_volts: [f64; NUM_POWER_SOURCES],
    power_source_max_amps: [f64; NUM_POWER_SOURCES],
    power_source_max_regen_amps: [f64; NUM_POWER_SOURCES],
    power_source_max_regen_volts: [f64; NUM_POWER_SOURCES],
    power_source_regen_dchg_enabled: [bool; NUM_POWER_SOURCES],
    pub power_source_initial_setup_complete: bool,
    pub device_name: String,
    pub checksum: u16,
}

impl Default for BumpSettings {
    fn default() -> Self {
        Self {
            volume_level: 0,
            touch_cal_dx: 0,
            touch_cal_dy: 0,
            touch_cal_cx: 0,
            touch_cal_cy: 0,
            custom_color_idle: 0,
            custom_color_active: 0,
            custom_color_complete: 0,
            custom_color_safety: 0,
            custom_color_setup: 0,
            selected_color_theme: 0,
            screen_layout: 0,
            last_bluetooth_uuid: [0; 6],
            cell_ir_warning_threshold: 0,
            capacity_warning_threshold: 0,
            presets_enabled: false,
            cycle_graph_caching_enabled: false,
            charger_ports_disabled: [true; NUM_PORTS],
            touch_calibration_redone: false,
            power_sources: [0; NUM_PORTS],
            wiring_modes: [0; NUM_PORTS],
            charger_upgrade_states: [0; NUM_PORTS],
            charger_upgrade_models: [0; NUM_PORTS],
            power_source_defaults_created: false,
            power_source_names: [None, None, None, None],
            power_source_types: [0; NUM_POWER_SOURCES],
            power_source_warn_dod: [true; NUM_POWER_SOURCES],
            power_source_low_volts: [0.0; NUM_POWER_SOURCES],
            power_source_max_amps: [0.0; NUM_POWER_SOURCES],
            power_source_max_regen_amps: [0.0; NUM_POWER_SOURCES],
            power_source_max_regen_volts: [0.0; NUM_POWER_SOURCES],
            power_source_regen_dchg_enabled: [true; NUM_POWER_SOURCES],
            power_source_initial_setup_complete: true,
            device_name: "foobar".into(),
            checksum: 0,
        }
    }
}

pub struct PowerSourceParams<'a> {
    pub name: &'a str,
    pub typ: u8,
    pub low_volts: f64,
    pub max_amps: f64,
    pub warn_dod: bool,
    pub max_regen_amps: f64,
    pub max_regen_volts: f64,
    pub regen_dchg_enabled: bool,
}

impl BumpSettings {
    pub fn set_power_source_params(&mut self, index: usize, params: PowerSourceParams<'_>) {
        self.power_source_names[index] = Some(params.name.to_string());
        self.power_source_types[index] = params.typ;
        self.power_source_warn_dod[index] = params.warn_dod;
        self.power_source_low_volts[index] = params.low_volts;
        self.power_source_max_amps[index] = params.max_amps;
        self.power_source_max_regen_amps[index] = params.max_regen_amps;
        self.power_source_max_regen_volts[index] = params.max_regen_volts;
        self.power_source_regen_dchg_enabled[index] = params.regen_dchg_enabled;
    }

    pub fn set_power_source(&mut self, port: usize, index: u8) {
        self.power_sources[port] = index;
    }

    pub fn set_xh_wiring_mode(&mut self, port: usize) {
        self.wiring_modes[port] = 1;
    }

    pub fn enable_charger_port(&mut self, port: usize) {
        self.charger_ports_disabled[port] = false;
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(self.volume_level);
        append_u16(&mut buf, self.touch_cal_dx);
        append_u16(&mut buf, self.touch_cal_dy);
        append_u16(&mut buf, self.touch_cal_cx);
        append_u16(&mut buf, self.touch_cal_cy);
        append_u16(&mut buf, self.custom_color_idle);
        append_u16(&mut buf, self.custom_color_active);
        append_u16(&mut buf, self.custom_color_complete);
        append_u16(&mut buf, self.custom_color_safety);
        append_u16(&mut buf, self.custom_color_setup);
        buf.push(self.selected_color_theme);
        buf.push(self.screen_layout);
        buf.extend_from_slice(&self.last_bluetooth_uuid);
        buf.push(self.cell_ir_warning_threshold);
        buf.push(self.capacity_warning_threshold);
        append_bool(&mut buf, self.presets_enabled);
        append_bool(&mut buf, self.cycle_graph_caching_enabled);
        for disabled in self.charger_ports_disabled {
            append_bool(&mut buf, disabled);
        }
        buf.push(0);
        append_bool(&mut buf, self.touch_calibration_redone);
        buf.push(0);
        buf.extend_from_slice(&self.power_sources);
        buf.extend_from_slice(&[0; 4]);
        buf.extend_from_slice(&self.wiring_modes);
        buf.extend_from_slice(&self.charger_upgrade_states);
        buf.extend_from_slice(&self.charger_upgrade_models);
        append_bool(&mut buf, self.power_source_defaults_created);
        for name in &self.power_source_names {
            append_str(&mut buf, name.as_deref().unwrap_or(""), MAX_NAME_LEN);
        }
        buf.extend_from_slice(&self.power_source_types);
        for warn in self.power_source_warn_dod {
            append_bool(&mut buf, warn);
        }
        for volts in self.power_source_low_volts {
            append_u16(&mut buf, volts as u16);
        }
        for amps in self.power_source_max_amps {
            append_u16(&mut buf, amps as u16);
        }
        for amps in self.power_source_max_regen_amps {
            append_u16(&mut buf, amps as u16);
        }
        for volts in self.power_source_max_regen_volts {
            append_u16(&mut buf, volts as u16);
        }
        for enabled in self.power_source_regen_dchg_enabled {
            append_bool(&mut buf, enabled);
        }
        append_bool(&mut buf, self.power_source_initial_setup_complete);
        append_str(&mut buf, &self.device_name, MAX_NAME_LEN);
        buf.extend_from_slice(&[0; 70]);
        append_u16(&mut buf, self.checksum);
        buf
    }
}
