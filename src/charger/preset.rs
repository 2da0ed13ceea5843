//! One of the charger's 75 preset slots.
//!
//! A preset is a 102-byte image of big-endian 16-bit words. Fields are bit
//! ranges inside those words, several with piecewise encodings that trade
//! resolution for range (charge current steps by 5 mA below 1 A and by
//! 50 mA above it, discharge by 10 mA then 250 mA). The name is 28 ASCII
//! characters stored byte-swapped per word, and the last two bytes hold a
//! rotating checksum of everything before them, seeded with 0x2D.

use std::fmt;

use crate::error::{Error, Result};
use crate::util::{bits_from_word, bits_to_word, byte_to_char, checksum};

/// Image size in bytes.
pub const PRESET_LEN: usize = 102;

/// Number of preset slots on the charger.
pub const NUM_PRESETS: usize = 75;

/// Sentinel for "cycle forever".
pub const NUM_CYCLES_UNLIMITED: u64 = 1 << 32;

pub const CHEMISTRY_NAMES: [&str; 14] = [
    "Empty",
    "LiPo",
    "Lith Ion",
    "A123",
    "LiMn",
    "LiCo",
    "NiCd",
    "NiMH",
    "Pb",
    "LiFe (Chinese A123)",
    "Primary (Dsch Only)",
    "Supply (Low Voltage)",
    "NiZn",
    "LiHV",
];

#[derive(Clone)]
pub struct Preset {
    data: [u8; PRESET_LEN],
    preset_num: u8,
}

impl Preset {
    pub fn new(data: &[u8], preset_num: u8) -> Result<Self> {
        let data: [u8; PRESET_LEN] = data
            .try_into()
            .map_err(|_| Error::invalid(format!("preset image must be {PRESET_LEN} bytes")))?;
        Ok(Self { data, preset_num })
    }

    pub fn preset_num(&self) -> u8 {
        self.preset_num
    }

    /// Refresh the trailing checksum and return the image.
    pub fn raw_bytes(&mut self) -> &[u8] {
        let cksum = self.calc_checksum();
        self.set_checksum(cksum);
        &self.data
    }

    fn bits(&self, index: usize, start_bit: u32, end_bit: u32) -> u16 {
        bits_from_word(&self.data, index, start_bit, end_bit)
    }

    fn set_bits(&mut self, index: usize, start_bit: u32, end_bit: u32, value: u16) {
        bits_to_word(&mut self.data, index, start_bit, end_bit, value);
    }

    pub fn is_require_balance_done_enabled(&self) -> bool {
        self.bits(0, 0, 0) != 0
    }

    pub fn set_require_balance_done_enabled(&mut self, value: bool) {
        self.set_bits(0, 0, 0, value as u16);
    }

    pub fn is_require_all_charge_volts_enabled(&self) -> bool {
        self.bits(0, 11, 11) != 0
    }

    pub fn set_require_all_charge_volts_enabled(&mut self, value: bool) {
        self.set_bits(0, 11, 11, value as u16);
    }

    pub fn name(&self) -> String {
        let mut chars = String::with_capacity(28);
        let mut ii = 4;
        while ii < 32 {
            chars.push(byte_to_char(self.data[ii + 1]));
            chars.push(byte_to_char(self.data[ii]));
            ii += 2;
        }
        chars
    }

    pub fn set_name(&mut self, value: &str) -> Result<()> {
        if value.len() > 28 || !value.is_ascii() {
            return Err(Error::invalid("preset name must be at most 28 ASCII chars"));
        }
        let padded = format!("{value:<28}");
        let bytes = padded.as_bytes();
        let mut ii = 4;
        while ii < 32 {
            self.data[ii + 1] = bytes[ii - 4];
            self.data[ii] = bytes[ii - 3];
            ii += 2;
        }
        Ok(())
    }

    /// Charge current in mA. Raw values below 200 step by 5 mA; everything
    /// above encodes 1 A upward in 50 mA steps.
    pub fn charge_mamps(&self) -> u32 {
        let val = self.bits(32, 4, 14) as u32;
        if val < 200 {
            val * 5
        } else {
            1000 + (val - 200) * 50
        }
    }

    pub fn set_charge_mamps(&mut self, value: u32) {
        let val = value.min(40_000);
        let raw = if val < 1000 {
            // Round to the nearest 5 mA step.
            ((val * 2 + 5) / 10 * 5) / 5
        } else {
            // Round to the nearest 50 mA step.
            ((val + 25) / 50 * 50 - 1000) / 50 + 200
        };
        self.set_bits(32, 4, 14, raw as u16);
    }

    pub fn charge_volts(&self) -> f64 {
        self.bits(34, 0, 9) as f64 / 200.0
    }

    pub fn set_charge_volts(&mut self, value: f64) {
        self.set_bits(34, 0, 9, ((value * 200.0).round() as u16).min(0x3ff));
    }

    pub fn discharge_mode(&self) -> u16 {
        self.bits(84, 9, 11)
    }

    pub fn set_discharge_mode(&mut self, value: u16) {
        self.set_bits(84, 9, 11, value);
    }

    /// Discharge current in mA: 10 mA steps up to 1 A, 250 mA steps above.
    pub fn discharge_mamps(&self) -> u32 {
        let val = self.bits(48, 0, 8) as u32;
        if val <= 100 {
            val * 10
        } else {
            1000 + (val - 100) * 250
        }
    }

    pub fn set_discharge_mamps(&mut self, value: u32) {
        let raw = if value <= 1000 {
            (value + 5) / 10
        } else {
            ((value + 125) / 250 * 250 - 1000) / 250 + 100
        };
        self.set_bits(48, 0, 8, (raw as u16).min(0x1ff));
    }

    pub fn discharge_volts(&self) -> f64 {
        self.bits(98, 6, 14) as f64 / 100.0
    }

    pub fn set_discharge_volts(&mut self, value: f64) {
        self.set_bits(98, 6, 14, ((value * 100.0).round() as u16).min(0x1ff));
    }

    pub fn is_store_charge_discharge(&self) -> bool {
        self.bits(46, 12, 12) != 0
    }

    pub fn set_store_charge_discharge(&mut self, value: bool) {
        self.set_bits(46, 12, 12, value as u16);
    }

    pub fn is_end_cycling_with_discharge_enabled(&self) -> bool {
        self.bits(46, 14, 14) != 0
    }

    pub fn set_end_cycling_with_discharge_enabled(&mut self, value: bool) {
        self.set_bits(46, 14, 14, value as u16);
    }

    pub fn cool_down_time(&self) -> u16 {
        self.bits(48, 10, 13)
    }

    pub fn set_cool_down_time(&mut self, value: u16) {
        self.set_bits(48, 10, 13, value);
    }

    pub fn cv_termination(&self) -> u16 {
        self.bits(48, 14, 15)
    }

    pub fn set_cv_termination(&mut self, value: u16) {
        self.set_bits(48, 14, 15, value);
    }

    pub fn is_balance_entire_charge_enabled(&self) -> bool {
        self.bits(54, 15, 15) != 0
    }

    pub fn set_balance_entire_charge_enabled(&mut self, value: bool) {
        self.set_bits(54, 15, 15, value as u16);
    }

    pub fn beep_at_percent(&self) -> u16 {
        self.bits(58, 11, 15) * 2 + 38
    }

    pub fn set_beep_at_percent(&mut self, value: u16) {
        self.set_bits(58, 11, 15, (value.saturating_sub(38) / 2).min(0x1f));
    }

    pub fn is_trickle_only(&self) -> bool {
        self.bits(0, 5, 5) != 0
    }

    pub fn set_trickle_only(&mut self, value: bool) {
        self.set_bits(0, 5, 5, value as u16);
    }

    pub fn is_balance_discharge_enabled(&self) -> bool {
        self.bits(96, 8, 8) != 0
    }

    pub fn set_balance_discharge_enabled(&mut self, value: bool) {
        self.set_bits(96, 8, 8, value as u16);
    }

    pub fn chemistry_idx(&self) -> u8 {
        self.bits(58, 6, 10) as u8
    }

    pub fn set_chemistry_idx(&mut self, value: u8) -> Result<()> {
        if value as usize >= CHEMISTRY_NAMES.len() {
            return Err(Error::invalid(format!("invalid chemistry index: {value}")));
        }
        self.set_bits(58, 6, 10, value as u16);
        Ok(())
    }

    pub fn chemistry(&self) -> Result<&'static str> {
        CHEMISTRY_NAMES
            .get(self.chemistry_idx() as usize)
            .copied()
            .ok_or_else(|| Error::invalid(format!("unknown battery type index: {}", self.chemistry_idx())))
    }

    pub fn set_chemistry(&mut self, name: &str) -> Result<()> {
        let idx = CHEMISTRY_NAMES
            .iter()
            .position(|cc| *cc == name)
            .ok_or_else(|| Error::invalid(format!("invalid chemistry: {name}")))?;
        self.set_chemistry_idx(idx as u8)
    }

    /// 0: off, 1: constant current then constant voltage, 2: constant current.
    pub fn power_mode(&self) -> u16 {
        self.bits(32, 0, 3)
    }

    pub fn set_power_mode(&mut self, value: u16) {
        self.set_bits(32, 0, 3, value);
    }

    pub fn is_requires_nodes_enabled(&self) -> bool {
        self.bits(86, 13, 13) != 0
    }

    pub fn set_requires_nodes_enabled(&mut self, value: bool) {
        self.set_bits(86, 13, 13, value as u16);
    }

    pub fn auto_charge_rate(&self) -> u16 {
        self.bits(0, 12, 15)
    }

    pub fn set_auto_charge_rate(&mut self, value: u16) {
        self.set_bits(0, 12, 15, value);
    }

    pub fn max_auto_charge_rate(&self) -> u16 {
        self.bits(2, 10, 13)
    }

    pub fn set_max_auto_charge_rate(&mut self, value: u16) {
        self.set_bits(2, 10, 13, value);
    }

    pub fn is_use_fuel_enabled(&self) -> bool {
        self.bits(0, 10, 10) != 0
    }

    pub fn set_use_fuel_enabled(&mut self, value: bool) {
        self.set_bits(0, 10, 10, value as u16);
    }

    /// Cycle count: raw 0..=3 literal, then 5, 10, 20, and the unlimited
    /// sentinel.
    pub fn num_cycles(&self) -> u64 {
        match self.bits(88, 10, 12) {
            val @ 0..=3 => val as u64,
            4 => 5,
            5 => 10,
            6 => 20,
            _ => NUM_CYCLES_UNLIMITED,
        }
    }

    pub fn set_num_cycles(&mut self, value: u64) -> Result<()> {
        let raw = match value {
            0..=3 => value as u16,
            5 => 4,
            10 => 5,
            20 => 6,
            NUM_CYCLES_UNLIMITED => 7,
            _ => return Err(Error::invalid(format!("unknown num cycles: {value}"))),
        };
        self.set_bits(88, 10, 12, raw);
        Ok(())
    }

    pub fn trickle_current_mamps(&self) -> u32 {
        match self.bits(56, 9, 15) {
            125 => 1000,
            126 => 2000,
            127 => 3000,
            val => val as u32 * 5,
        }
    }

    pub fn set_trickle_current_mamps(&mut self, value: u32) -> Result<()> {
        let raw = match value {
            1000 => 125,
            2000 => 126,
            3000 => 127,
            0..=620 => (value / 5) as u16,
            _ => return Err(Error::invalid(format!("invalid trickle current: {value}"))),
        };
        self.set_bits(56, 9, 15, raw);
        Ok(())
    }

    pub fn is_visible(&self) -> bool {
        self.bits(32, 15, 15) != 0
    }

    pub fn set_visible(&mut self, value: bool) {
        self.set_bits(32, 15, 15, value as u16);
    }

    pub fn is_hide_empty_enabled(&self) -> bool {
        self.bits(94, 15, 15) != 0
    }

    pub fn set_hide_empty_enabled(&mut self, value: bool) {
        self.set_bits(94, 15, 15, value as u16);
    }

    pub fn is_locked(&self) -> bool {
        self.bits(98, 15, 15) != 0
    }

    pub fn set_locked(&mut self, value: bool) {
        self.set_bits(98, 15, 15, value as u16);
    }

    pub fn num_parallel(&self) -> u8 {
        self.bits(52, 8, 10) as u8 + 1
    }

    pub fn set_num_parallel(&mut self, value: u8) -> Result<()> {
        if value == 0 || value > 8 {
            return Err(Error::invalid(format!("invalid num_parallel: {value}")));
        }
        self.set_bits(52, 8, 10, (value - 1) as u16);
        Ok(())
    }

    pub fn cv_timeout(&self) -> u16 {
        self.bits(92, 5, 7)
    }

    pub fn set_cv_timeout(&mut self, value: u16) {
        self.set_bits(92, 5, 7, value);
    }

    pub fn charge_timeout(&self) -> u16 {
        self.bits(52, 13, 15)
    }

    pub fn set_charge_timeout(&mut self, value: u16) {
        self.set_bits(52, 13, 15, value);
    }

    pub fn discharge_timeout(&self) -> u16 {
        self.bits(54, 4, 6)
    }

    pub fn set_discharge_timeout(&mut self, value: u16) {
        self.set_bits(54, 4, 6, value);
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.data[100], self.data[101]])
    }

    pub fn set_checksum(&mut self, value: u16) {
        self.data[100] = (value >> 8) as u8;
        self.data[101] = (value & 0xff) as u8;
    }

    pub fn is_validated(&self) -> bool {
        self.bits(36, 14, 15) != 0
    }

    pub fn set_validated(&mut self, value: bool) {
        self.set_bits(36, 14, 15, value as u16);
    }

    pub fn balance_mode(&self) -> u16 {
        self.bits(82, 10, 13)
    }

    /// Fuel-curve voltages, 11 points.
    pub fn fuel_curve(&self) -> Vec<f64> {
        (60..82)
            .step_by(2)
            .map(|ii| u16::from_be_bytes([self.data[ii], self.data[ii + 1]]) as f64 * 0.001111111)
            .collect()
    }

    pub fn set_fuel_curve(&mut self, values: &[u16]) {
        let mut ii = 60;
        for vv in values {
            if ii == 82 {
                break;
            }
            self.data[ii] = (vv >> 8) as u8;
            self.data[ii + 1] = (vv & 0xff) as u8;
            ii += 2;
        }
    }

    /// Max charge rate in amps. Raw 0 and 1 mean the fractional 0.25 A and
    /// 0.5 A settings; above that the raw value is amps plus one.
    pub fn max_charge_amps(&self) -> f64 {
        match self.bits(34, 10, 15) {
            0 => 0.25,
            1 => 0.5,
            val => (val - 1) as f64,
        }
    }

    pub fn set_max_charge_amps(&mut self, value: f64) {
        let raw = if value < 1.0 {
            // Quantize the fractional range to quarter amps.
            let quarters = (((value * 100.0 + 12.5) / 25.0).floor() * 25.0).round() as u32;
            match quarters {
                0..=25 => 0,
                26..=50 => 1,
                _ => 2,
            }
        } else {
            (value.round() as u32 + 1).min(41)
        };
        self.set_bits(34, 10, 15, raw as u16);
    }

    /// A slot is empty when its bytes sum to nothing once the hide-empty
    /// flag byte is excluded.
    pub fn is_empty(&self) -> bool {
        let sum: u32 = self.data[..PRESET_LEN - 2].iter().map(|bb| *bb as u32).sum();
        sum - self.data[94] as u32 == 0
    }

    pub fn calc_checksum(&self) -> u16 {
        checksum(&self.data[..PRESET_LEN - 2], 0x2d)
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "auto_charge_rate: {}", self.auto_charge_rate())?;
        writeln!(f, "balance_mode: {}", self.balance_mode())?;
        writeln!(f, "beep_at_percent: {}", self.beep_at_percent())?;
        writeln!(f, "charge_mamps: {}", self.charge_mamps())?;
        writeln!(f, "charge_timeout: {}", self.charge_timeout())?;
        writeln!(f, "charge_volts: {}", self.charge_volts())?;
        writeln!(f, "chemistry: {}", self.chemistry().unwrap_or("unknown"))?;
        writeln!(f, "chemistry_idx: {}", self.chemistry_idx())?;
        writeln!(f, "checksum: {}", self.checksum())?;
        writeln!(f, "cool_down_time: {}", self.cool_down_time())?;
        writeln!(f, "cv_termination: {}", self.cv_termination())?;
        writeln!(f, "cv_timeout: {}", self.cv_timeout())?;
        writeln!(f, "discharge_mamps: {}", self.discharge_mamps())?;
        writeln!(f, "discharge_mode: {}", self.discharge_mode())?;
        writeln!(f, "discharge_timeout: {}", self.discharge_timeout())?;
        writeln!(f, "discharge_volts: {}", self.discharge_volts())?;
        writeln!(f, "is_empty: {}", self.is_empty())?;
        writeln!(f, "is_locked: {}", self.is_locked())?;
        writeln!(f, "is_visible: {}", self.is_visible())?;
        writeln!(f, "max_auto_charge_rate: {}", self.max_auto_charge_rate())?;
        writeln!(f, "max_charge_amps: {}", self.max_charge_amps())?;
        writeln!(f, "name: {}", self.name())?;
        writeln!(f, "num_cycles: {}", self.num_cycles())?;
        writeln!(f, "num_parallel: {}", self.num_parallel())?;
        writeln!(f, "power_mode: {}", self.power_mode())?;
        writeln!(f, "preset_num: {}", self.preset_num())?;
        write!(f, "trickle_current_mamps: {}", self.trickle_current_mamps())
    }
}
