//! The charger's options image.
//!
//! The charger answers `PrsI` with a 256-byte payload; only the first 192
//! bytes carry data, and only bytes 128..192 persist back with `WrtC`. Flag
//! words and scalars sit at fixed offsets, voltages encode as
//! `(raw + 100) / 10` and currents as `raw / 2`. The trailing 16-bit
//! checksum at bytes 190..192 is the plain sum of the big-endian words in
//! `[128, 186)`.

use std::fmt;

use crate::error::{Error, Result};
use crate::util::str_from_data;

/// Minimum meaningful image length.
pub const OPTIONS_LEN: usize = 192;

const CHECKSUM_OFFSET: usize = 190;

pub struct Options {
    data: Vec<u8>,
}

impl Options {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.len() < OPTIONS_LEN {
            return Err(Error::invalid(format!(
                "options image must be at least {OPTIONS_LEN} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self { data })
    }

    /// Refresh the trailing checksum and return the image.
    pub fn raw_bytes(&mut self) -> &[u8] {
        let cksum = self.calc_checksum();
        self.set_checksum(cksum);
        &self.data
    }

    pub fn greeting_line1(&self) -> String {
        str_from_data(&self.data, 132, 144)
    }

    pub fn greeting_line2(&self) -> String {
        str_from_data(&self.data, 148, 156)
    }

    fn flags128(&self) -> u16 {
        u16::from_be_bytes([self.data[128], self.data[129]])
    }

    fn set_flags128(&mut self, val: u16) {
        self.data[128] = (val >> 8) as u8;
        self.data[129] = (val & 0xff) as u8;
    }

    pub fn is_european_decimal(&self) -> bool {
        self.flags128() & (1 << 0) != 0
    }

    pub fn is_button_click_enabled(&self) -> bool {
        self.flags128() & (1 << 1) != 0
    }

    pub fn is_save_changes_enabled(&self) -> bool {
        self.flags128() & (1 << 2) != 0
    }

    pub fn speaker_volume(&self) -> u16 {
        (self.flags128() >> 4) & 0x7
    }

    pub fn cells_scroll_seconds(&self) -> u16 {
        (self.flags128() >> 7) & 0x7
    }

    pub fn is_quick_start_enabled(&self) -> bool {
        self.flags128() & (1 << 10) != 0
    }

    pub fn set_quick_start_enabled(&mut self, val: bool) {
        let flags = set_bit(self.flags128(), 10, val);
        self.set_flags128(flags);
    }

    pub fn regen_charge_voltage_in_to_pb(&self) -> f64 {
        (self.data[130] as f64 + 100.0) / 10.0
    }

    pub fn regen_amps_in_to_pb(&self) -> f64 {
        self.data[131] as f64 / 2.0
    }

    pub fn scroll_delay1(&self) -> u8 {
        self.data[164]
    }

    pub fn preset_name_scroll_speed(&self) -> u8 {
        self.data[165]
    }

    pub fn name_line2_secs(&self) -> u8 {
        self.data[166]
    }

    pub fn scroll_delay2(&self) -> u8 {
        self.data[167]
    }

    pub fn supply_cutoff_volts(&self) -> f64 {
        (self.data[168] as f64 + 100.0) / 10.0
    }

    pub fn supply_amps_limit(&self) -> f64 {
        self.data[169] as f64 / 2.0
    }

    fn flags170(&self) -> u16 {
        u16::from_be_bytes([self.data[170], self.data[171]])
    }

    fn set_flags170(&mut self, val: u16) {
        self.data[170] = (val >> 8) as u8;
        self.data[171] = (val & 0xff) as u8;
    }

    pub fn is_cells_3_decimals_enabled(&self) -> bool {
        self.flags170() & (1 << 0) != 0
    }

    pub fn is_quiet_charging(&self) -> bool {
        self.flags170() & (1 << 1) != 0
    }

    pub fn set_quiet_charging(&mut self, val: bool) {
        let flags = set_bit(self.flags170(), 1, val);
        self.set_flags170(flags);
    }

    pub fn is_battery_enabled(&self) -> bool {
        self.flags170() & (1 << 4) != 0
    }

    pub fn is_warn_50_dod_enabled(&self) -> bool {
        self.flags170() & (1 << 6) != 0
    }

    pub fn is_regen_enabled(&self) -> bool {
        self.flags170() & (1 << 7) != 0
    }

    pub fn is_choose_source_enabled(&self) -> bool {
        self.flags170() & (1 << 8) != 0
    }

    pub fn set_choose_source_enabled(&mut self, val: bool) {
        let flags = set_bit(self.flags170(), 8, val);
        self.set_flags170(flags);
    }

    pub fn is_suppress_use_bananas_enabled(&self) -> bool {
        self.flags170() & (1 << 9) != 0
    }

    pub fn set_suppress_use_bananas_enabled(&mut self, val: bool) {
        let flags = set_bit(self.flags170(), 9, val);
        self.set_flags170(flags);
    }

    pub fn is_xh_node_wiring(&self) -> bool {
        self.flags170() & (1 << 10) != 0
    }

    pub fn set_xh_node_wiring(&mut self, val: bool) {
        let flags = set_bit(self.flags170(), 10, val);
        self.set_flags170(flags);
    }

    pub fn is_network_disabled(&self) -> bool {
        self.flags170() & (1 << 11) != 0
    }

    pub fn charge_done_beeps(&self) -> u8 {
        self.data[173]
    }

    pub fn battery_cutoff_volts(&self) -> f64 {
        (self.data[174] as f64 + 100.0) / 10.0
    }

    pub fn set_battery_cutoff_volts(&mut self, val: f64) {
        self.data[174] = (val * 10.0 - 100.0) as u8;
    }

    pub fn battery_amps_limit(&self) -> f64 {
        self.data[175] as f64 / 2.0
    }

    pub fn set_battery_amps_limit(&mut self, val: f64) {
        self.data[175] = (val * 2.0) as u8;
    }

    pub fn battery_type(&self) -> u8 {
        self.data[177]
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.data[CHECKSUM_OFFSET], self.data[CHECKSUM_OFFSET + 1]])
    }

    fn set_checksum(&mut self, val: u16) {
        self.data[CHECKSUM_OFFSET] = (val >> 8) as u8;
        self.data[CHECKSUM_OFFSET + 1] = (val & 0xff) as u8;
    }

    pub fn calc_checksum(&self) -> u16 {
        let mut cksum = 0u16;
        let mut ii = 128;
        while ii < 186 {
            cksum = cksum.wrapping_add(u16::from_be_bytes([self.data[ii], self.data[ii + 1]]));
            ii += 2;
        }
        cksum
    }
}

fn set_bit(word: u16, bit: u32, val: bool) -> u16 {
    if val {
        word | (1 << bit)
    } else {
        word & !(1 << bit)
    }
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "battery_amps_limit: {}", self.battery_amps_limit())?;
        writeln!(f, "battery_cutoff_volts: {}", self.battery_cutoff_volts())?;
        writeln!(f, "battery_type: {}", self.battery_type())?;
        writeln!(f, "charge_done_beeps: {}", self.charge_done_beeps())?;
        writeln!(f, "cells_scroll_seconds: {}", self.cells_scroll_seconds())?;
        writeln!(f, "checksum: {}", self.checksum())?;
        writeln!(f, "greeting_line1: {}", self.greeting_line1())?;
        writeln!(f, "greeting_line2: {}", self.greeting_line2())?;
        writeln!(f, "is_battery_enabled: {}", self.is_battery_enabled())?;
        writeln!(f, "is_button_click_enabled: {}", self.is_button_click_enabled())?;
        writeln!(f, "is_cells_3_decimals_enabled: {}", self.is_cells_3_decimals_enabled())?;
        writeln!(f, "is_choose_source_enabled: {}", self.is_choose_source_enabled())?;
        writeln!(f, "is_european_decimal: {}", self.is_european_decimal())?;
        writeln!(f, "is_network_disabled: {}", self.is_network_disabled())?;
        writeln!(f, "is_quick_start_enabled: {}", self.is_quick_start_enabled())?;
        writeln!(f, "is_quiet_charging: {}", self.is_quiet_charging())?;
        writeln!(f, "is_regen_enabled: {}", self.is_regen_enabled())?;
        writeln!(f, "is_save_changes_enabled: {}", self.is_save_changes_enabled())?;
        writeln!(
            f,
            "is_suppress_use_bananas_enabled: {}",
            self.is_suppress_use_bananas_enabled()
        )?;
        writeln!(f, "is_warn_50_dod_enabled: {}", self.is_warn_50_dod_enabled())?;
        writeln!(f, "is_xh_node_wiring: {}", self.is_xh_node_wiring())?;
        writeln!(f, "name_line2_secs: {}", self.name_line2_secs())?;
        writeln!(f, "preset_name_scroll_speed: {}", self.preset_name_scroll_speed())?;
        writeln!(f, "regen_amps_in_to_pb: {}", self.regen_amps_in_to_pb())?;
        writeln!(
            f,
            "regen_charge_voltage_in_to_pb: {}",
            self.regen_charge_voltage_in_to_pb()
        )?;
        writeln!(f, "scroll_delay1: {}", self.scroll_delay1())?;
        writeln!(f, "scroll_delay2: {}", self.scroll_delay2())?;
        writeln!(f, "speaker_volume: {}", self.speaker_volume())?;
        writeln!(f, "supply_amps_limit: {}", self.supply_amps_limit())?;
        write!(f, "supply_cutoff_volts: {}", self.supply_cutoff_volts())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank() -> Options {
        Options::new(vec![0; OPTIONS_LEN]).unwrap()
    }

    #[test]
    fn rejects_short_image() {
        assert!(Options::new(vec![0; 64]).is_err());
    }

    #[test]
    fn flag_bits() {
        let mut opts = blank();
        assert!(!opts.is_quick_start_enabled());
        opts.set_quick_start_enabled(true);
        assert!(opts.is_quick_start_enabled());
        // Bit 10 of the word at 128.
        assert_eq!(opts.flags128(), 1 << 10);
        opts.set_quick_start_enabled(false);
        assert_eq!(opts.flags128(), 0);

        opts.set_xh_node_wiring(true);
        opts.set_quiet_charging(true);
        assert_eq!(opts.flags170(), (1 << 10) | (1 << 1));
    }

    #[test]
    fn scalar_encodings() {
        let mut opts = blank();
        opts.set_battery_cutoff_volts(12.5);
        assert_eq!(opts.battery_cutoff_volts(), 12.5);
        opts.set_battery_amps_limit(20.0);
        assert_eq!(opts.battery_amps_limit(), 20.0);
        // Raw zero decodes to the 10.0 V floor.
        assert_eq!(opts.supply_cutoff_volts(), 10.0);
    }

    #[test]
    fn checksum_covers_persisted_words() {
        let mut opts = blank();
        opts.set_battery_amps_limit(15.0);
        let raw = opts.raw_bytes();
        let stored = u16::from_be_bytes([raw[190], raw[191]]);
        assert_eq!(stored, opts.calc_checksum());
        assert_ne!(stored, 0);
        // Bytes outside [128, 186) do not contribute.
        let before = opts.calc_checksum();
        opts.data[50] = 0xff;
        opts.data[188] = 0xff;
        assert_eq!(opts.calc_checksum(), before);
    }

    #[test]
    fn greeting_lines_unswap() {
        let mut data = vec![0; OPTIONS_LEN];
        // "HI" stored swapped in the first greeting word.
        data[132] = b'I';
        data[133] = b'H';
        let opts = Options::new(data).unwrap();
        let line = opts.greeting_line1();
        assert!(line.starts_with("HI"));
        assert_eq!(line.len(), 14);
    }
}
