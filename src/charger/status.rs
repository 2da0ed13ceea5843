//! A snapshot of the charger's sensors and mode.
//!
//! The `Ram\0` response carries 147 payload bytes. Scalars live at fixed
//! offsets; most are raw ADC counts that convert to engineering units here.
//! Supply-side voltages scale by 46.96/4095, per-cell averages by
//! 5.12/65536 (the averaging accumulator is 16-bit), and currents by
//! 1/600 A per count.
//!
//! The mode byte at offset 133 and the flag words at 44 and 46 drive the
//! session state machine. `set_mode`/`set_error_code` exist so the session
//! can stitch a forced error into a frame before serializing it.

use std::fmt;

use crate::error::{Error, Result};

/// Payload length of a status response.
pub const STATUS_LEN: usize = 147;

fn to_volts(val: u16) -> f64 {
    (val as f64 * 46.96) / 4095.0
}

fn start_mode_to_str(mode: u8) -> String {
    match mode {
        0 => "Charge Only".to_string(),
        1 => "Discharge Only".to_string(),
        2 => "Monitor".to_string(),
        3 => "Cycle".to_string(),
        other => format!("Unknown: {other}"),
    }
}

pub struct Status {
    data: Vec<u8>,
}

impl Status {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.len() < STATUS_LEN {
            return Err(Error::invalid(format!(
                "status image must be at least {STATUS_LEN} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self { data })
    }

    fn be16(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.data[offset], self.data[offset + 1]])
    }

    fn be16s(&self, offset: usize) -> i16 {
        i16::from_be_bytes([self.data[offset], self.data[offset + 1]])
    }

    fn be32(&self, offset: usize) -> u32 {
        u32::from_be_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ])
    }

    pub fn firmware_version(&self) -> u16 {
        self.be16(0)
    }

    /// Raw per-cell averaging accumulators, eight channels.
    pub fn b_avg_adc(&self) -> [u16; 8] {
        let mut vals = [0u16; 8];
        for (ii, val) in vals.iter_mut().enumerate() {
            *val = self.be16(2 + ii * 2);
        }
        vals
    }

    pub fn b_volts(&self) -> [f64; 8] {
        self.b_avg_adc().map(|val| (val as f64 * 5.12) / 65536.0)
    }

    pub fn charge_set(&self) -> u16 {
        self.be16(20)
    }

    pub fn l_supply_volts(&self) -> f64 {
        to_volts(self.be16(22)) / 16.0
    }

    pub fn supply_volts(&self) -> f64 {
        to_volts(self.be16(24))
    }

    pub fn cpu_temp(&self) -> f64 {
        let val = self.be16(26);
        (((2.5 * val as f64) / 4095.0) - 0.986) / 0.00355
    }

    pub fn avg_amps(&self) -> f64 {
        self.be16s(42) as f64 / 600.0
    }

    pub fn status_flags(&self) -> u16 {
        self.be16(44)
    }

    pub fn safety_charge(&self) -> bool {
        self.status_flags() & (1 << 0) != 0
    }

    pub fn generate_fuel(&self) -> bool {
        self.status_flags() & (1 << 5) != 0
    }

    pub fn is_charge_discharge_complete(&self) -> bool {
        self.status_flags() & (1 << 8) != 0
    }

    pub fn is_reduce_amps(&self) -> bool {
        self.status_flags() & (1 << 11) != 0
    }

    pub fn show_vr(&self) -> bool {
        self.status_flags() & (1 << 12) != 0
    }

    pub fn node_current(&self) -> bool {
        self.status_flags() & (1 << 14) != 0
    }

    pub fn cold_weather(&self) -> bool {
        self.status_flags() & (1 << 15) != 0
    }

    pub fn rx_status_flags(&self) -> u16 {
        self.be16(46)
    }

    pub fn shunt_switch(&self) -> bool {
        self.rx_status_flags() & (1 << 0) != 0
    }

    pub fn dsch_enable(&self) -> bool {
        self.rx_status_flags() & (1 << 1) != 0
    }

    pub fn cd_pre_complete(&self) -> bool {
        self.rx_status_flags() & (1 << 2) != 0
    }

    pub fn regen_enable(&self) -> bool {
        self.rx_status_flags() & (1 << 4) != 0
    }

    pub fn fast_cell_avg(&self) -> bool {
        self.rx_status_flags() & (1 << 5) != 0
    }

    pub fn chg_enable(&self) -> bool {
        self.rx_status_flags() & (1 << 6) != 0
    }

    pub fn bp_enable(&self) -> bool {
        self.rx_status_flags() & (1 << 7) != 0
    }

    pub fn use_nodes(&self) -> bool {
        self.rx_status_flags() & (1 << 8) != 0
    }

    pub fn use_fuel(&self) -> bool {
        self.rx_status_flags() & (1 << 9) != 0
    }

    pub fn amps_low_range(&self) -> bool {
        self.rx_status_flags() & (1 << 10) != 0
    }

    pub fn amps_dsch_range(&self) -> bool {
        self.rx_status_flags() & (1 << 11) != 0
    }

    pub fn debug1(&self) -> i16 {
        self.be16s(48)
    }

    fn flags50(&self) -> u16 {
        self.be16(50)
    }

    pub fn high_temp(&self) -> bool {
        self.flags50() & (1 << 2) != 0
    }

    pub fn cell_count_verified(&self) -> bool {
        self.flags50() & (1 << 12) != 0
    }

    /// Per-cell voltage-rise readings in mV.
    pub fn cell_vr(&self) -> [f64; 8] {
        let mut vals = [0f64; 8];
        for (ii, val) in vals.iter_mut().enumerate() {
            *val = (((self.be16(52 + ii * 2) as f64 * 5.12) / 4095.0) / 8.0) * 1000.0;
        }
        vals
    }

    pub fn vr_amps(&self) -> f64 {
        self.be16(68) as f64 / 600.0
    }

    pub fn vr_offset(&self) -> f64 {
        (((self.be16(114) as f64 * 5.12) / 4095.0) / 8.0) * 1000.0
    }

    pub fn ch1_cells(&self) -> u8 {
        self.data[132]
    }

    /// Per-cell internal-resistance estimate in milliohms. The channel that
    /// carries the whole pack return loses an eighth of its reading.
    pub fn mohm(&self) -> [f64; 8] {
        let mut vals = [0f64; 8];
        let vr_amps = self.vr_amps();
        if vr_amps > 0.0 {
            let cell_vr = self.cell_vr();
            vals[0] = (cell_vr[0] - self.vr_offset()) / vr_amps;
            for ii in 1..vals.len() {
                let ohms = cell_vr[ii] / vr_amps;
                if self.ch1_cells() as usize == ii {
                    vals[ii] = ohms - ohms / 8.0;
                } else {
                    vals[ii] = ohms;
                }
            }
        }
        vals
    }

    fn flags76(&self) -> u16 {
        self.be16(76)
    }

    pub fn checking_peak(&self) -> bool {
        self.flags76() & (1 << 0) != 0
    }

    pub fn battery_24v_visible(&self) -> bool {
        self.flags76() & (1 << 3) != 0
    }

    pub fn cv_started(&self) -> bool {
        self.flags76() & (1 << 4) != 0
    }

    pub fn preset_good(&self) -> bool {
        self.flags76() & (1 << 5) != 0
    }

    pub fn preset_flash_changed(&self) -> bool {
        self.flags76() & (1 << 6) != 0
    }

    pub fn regen_possible(&self) -> bool {
        self.flags76() & (1 << 7) != 0
    }

    pub fn regen_dsch_failed(&self) -> bool {
        self.flags76() & (1 << 8) != 0
    }

    pub fn options_flash_changed(&self) -> bool {
        self.flags76() & (1 << 10) != 0
    }

    pub fn supply_amps(&self) -> f64 {
        self.be16s(80) as f64 / 150.0
    }

    pub fn batt_pos_avg_volts(&self) -> f64 {
        to_volts(self.be16(82)) / 16.0
    }

    pub fn mode(&self) -> u8 {
        self.data[133]
    }

    pub fn set_mode(&mut self, val: u8) {
        self.data[133] = val;
    }

    pub fn mode_to_str(&self) -> String {
        match self.mode() {
            0 => "idle".to_string(),
            1 => "detecting cells".to_string(),
            2 => "ch1 startup".to_string(),
            3 => "ch1/2 startup".to_string(),
            6 => {
                if self.is_charge_discharge_complete() {
                    "charge complete".to_string()
                } else if self.is_reduce_amps() {
                    "low voltage restore".to_string()
                } else {
                    "charging".to_string()
                }
            }
            7 => {
                if self.is_charge_discharge_complete() {
                    "charge complete".to_string()
                } else {
                    "trickle charging".to_string()
                }
            }
            8 => {
                if self.is_charge_discharge_complete() {
                    "discharge complete".to_string()
                } else if self.regen_enable() {
                    "regenerative discharge".to_string()
                } else {
                    "internal discharge".to_string()
                }
            }
            9 => "monitoring cells".to_string(),
            10 => "wait for button press".to_string(),
            30 => "slave mode".to_string(),
            0x63 => format!("safety code {}", self.error_code()),
            _ => "unknown".to_string(),
        }
    }

    pub fn discharge_set(&self) -> u16 {
        self.be16(92)
    }

    pub fn set_amps(&self) -> f64 {
        if self.mode() == 8 {
            self.discharge_set() as f64 / 600.0
        } else {
            self.charge_set() as f64 / 600.0
        }
    }

    pub fn max_cell_volts(&self) -> f64 {
        ((self.be16(74) as f64 * 5.12) / 4095.0) / 16.0
    }

    pub fn avg_cell_volts(&self) -> f64 {
        if self.use_nodes() && self.ch1_cells() > 0 {
            self.b_volts().iter().sum::<f64>() / self.ch1_cells() as f64
        } else {
            self.max_cell_volts()
        }
    }

    pub fn avg_ir(&self) -> f64 {
        if self.use_nodes() && self.show_vr() && self.ch1_cells() > 0 {
            self.mohm().iter().sum::<f64>() / self.ch1_cells() as f64
        } else {
            0.0
        }
    }

    pub fn slow_avg_amps(&self) -> f64 {
        self.be16(116) as f64 / 600.0
    }

    pub fn bypass_pwm(&self) -> [u8; 8] {
        let mut vals = [0u8; 8];
        vals.copy_from_slice(&self.data[124..132]);
        vals
    }

    pub fn bypass_percent(&self) -> [f64; 8] {
        self.bypass_pwm().map(|bp| bp as f64 * 3.09375)
    }

    pub fn bypass_current(&self) -> [f64; 8] {
        self.bypass_pwm().map(|bp| bp as f64 * 31.25)
    }

    pub fn error_code(&self) -> u8 {
        self.data[134]
    }

    pub fn set_error_code(&mut self, val: u8) {
        self.data[134] = val;
    }

    pub fn chem8(&self) -> u8 {
        self.data[135]
    }

    pub fn packs(&self) -> u8 {
        self.data[136]
    }

    /// Active preset slot; out-of-range values read as slot 0.
    pub fn active_preset(&self) -> u8 {
        let num = self.data[137];
        if num > 74 {
            0
        } else {
            num
        }
    }

    pub fn screen_number(&self) -> u8 {
        self.data[139]
    }

    pub fn check_pack1_volts(&self) -> f64 {
        ((self.data[140] as i8) as f64 * 46.96) / 4095.0
    }

    pub fn fuel_offset(&self) -> i32 {
        ((self.data[141] as f64 * 5.12) / 4.095).round() as i32
    }

    pub fn cycle_cnt(&self) -> u8 {
        self.data[142]
    }

    pub fn lower_pwm_reason(&self) -> u8 {
        self.data[143]
    }

    /// 0 charge only, 1 discharge only, 2 monitor, 3 cycle.
    pub fn start_mode(&self) -> u8 {
        self.data[144]
    }

    pub fn start_mode_str(&self) -> String {
        start_mode_to_str(self.start_mode())
    }

    pub fn r_fail_reason(&self) -> u8 {
        self.data[145]
    }

    /// Elapsed charge time. Once the seconds counter saturates the charger
    /// folds minutes in at 0xFD1F.
    pub fn charge_seconds(&self) -> u32 {
        let secs = self.be16(28) as i64;
        let mins = self.be16(78) as i64;
        if secs >= 0xfd1f {
            (secs - 64800 + mins * 60).max(0) as u32
        } else {
            secs as u32
        }
    }

    pub fn mah_in(&self) -> f64 {
        self.mah(34)
    }

    pub fn mah_out(&self) -> f64 {
        self.mah(84)
    }

    fn mah(&self, offset: usize) -> f64 {
        let raw = self.be32(offset);
        let mut val = if raw > 0x7fff_ffff { 0.0 } else { raw as f64 };
        if self.packs() > 1 {
            val /= self.packs() as f64;
        }
        val / 2160.0
    }

    /// Fuel gauge in tenths of a percent, clamped to 0..=1000.
    pub fn fuel_level(&self) -> u16 {
        self.be16s(38).clamp(0, 1000) as u16
    }

    /// How many missed polls to tolerate before declaring the link dead;
    /// the charger stops answering for long stretches while balancing.
    pub fn no_data_max(&self) -> u32 {
        if (6..=11).contains(&self.mode()) {
            30
        } else {
            3
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "active_preset: {}", self.active_preset())?;
        writeln!(f, "avg_amps: {}", self.avg_amps())?;
        writeln!(f, "avg_cell_volts: {}", self.avg_cell_volts())?;
        writeln!(f, "avg_ir: {}", self.avg_ir())?;
        writeln!(f, "b_volts: {:?}", self.b_volts())?;
        writeln!(f, "charge_seconds: {}", self.charge_seconds())?;
        writeln!(f, "chem8: {}", self.chem8())?;
        writeln!(f, "ch1_cells: {}", self.ch1_cells())?;
        writeln!(f, "cpu_temp: {}", self.cpu_temp())?;
        writeln!(f, "error_code: {}", self.error_code())?;
        writeln!(f, "firmware_version: {}", self.firmware_version())?;
        writeln!(f, "fuel_level: {}", self.fuel_level())?;
        writeln!(f, "mah_in: {}", self.mah_in())?;
        writeln!(f, "mah_out: {}", self.mah_out())?;
        writeln!(f, "max_cell_volts: {}", self.max_cell_volts())?;
        writeln!(f, "mode: {} ({})", self.mode(), self.mode_to_str())?;
        writeln!(f, "mohm: {:?}", self.mohm())?;
        writeln!(f, "packs: {}", self.packs())?;
        writeln!(f, "set_amps: {}", self.set_amps())?;
        writeln!(f, "start_mode: {}", self.start_mode_str())?;
        writeln!(f, "status_flags: {:#06x}", self.status_flags())?;
        writeln!(f, "rx_status_flags: {:#06x}", self.rx_status_flags())?;
        writeln!(f, "supply_amps: {}", self.supply_amps())?;
        write!(f, "supply_volts: {}", self.supply_volts())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> Vec<u8> {
        vec![0u8; STATUS_LEN]
    }

    #[test]
    fn rejects_short_image() {
        assert!(Status::new(vec![0; 100]).is_err());
    }

    #[test]
    fn cell_volts_use_16_bit_divisor() {
        let mut data = image();
        // Channel 0 at full scale reads 5.12 V.
        data[2] = 0xff;
        data[3] = 0xff;
        let status = Status::new(data).unwrap();
        let volts = status.b_volts();
        assert!((volts[0] - 5.12 * 65535.0 / 65536.0).abs() < 1e-9);
        assert_eq!(volts[1], 0.0);
    }

    #[test]
    fn supply_volts_use_adc_divisor() {
        let mut data = image();
        data[24] = 0x0f;
        data[25] = 0xff;
        let status = Status::new(data).unwrap();
        assert!((status.supply_volts() - (4095.0 * 46.96) / 4095.0).abs() < 1e-9);
    }

    #[test]
    fn amps_are_signed() {
        let mut data = image();
        let raw = (-600i16).to_be_bytes();
        data[42] = raw[0];
        data[43] = raw[1];
        let status = Status::new(data).unwrap();
        assert_eq!(status.avg_amps(), -1.0);
    }

    #[test]
    fn mah_scales_by_packs() {
        let mut data = image();
        data[34..38].copy_from_slice(&21600u32.to_be_bytes());
        data[136] = 2;
        let status = Status::new(data).unwrap();
        assert_eq!(status.mah_in(), 5.0);
        // Garbage (sign bit set) reads as zero.
        let mut data = image();
        data[34..38].copy_from_slice(&0x8000_0000u32.to_be_bytes());
        let status = Status::new(data).unwrap();
        assert_eq!(status.mah_in(), 0.0);
    }

    #[test]
    fn charge_seconds_folds_minutes() {
        let mut data = image();
        data[28..30].copy_from_slice(&1234u16.to_be_bytes());
        let status = Status::new(data).unwrap();
        assert_eq!(status.charge_seconds(), 1234);

        let mut data = image();
        data[28..30].copy_from_slice(&0xfd20u16.to_be_bytes());
        data[78..80].copy_from_slice(&20u16.to_be_bytes());
        let status = Status::new(data).unwrap();
        assert_eq!(status.charge_seconds(), (0xfd20 - 64800) + 20 * 60);
    }

    #[test]
    fn fuel_level_clamps() {
        let mut data = image();
        data[38..40].copy_from_slice(&(-5i16).to_be_bytes());
        assert_eq!(Status::new(data).unwrap().fuel_level(), 0);
        let mut data = image();
        data[38..40].copy_from_slice(&2000u16.to_be_bytes());
        assert_eq!(Status::new(data).unwrap().fuel_level(), 1000);
    }

    #[test]
    fn active_preset_out_of_range_is_zero() {
        let mut data = image();
        data[137] = 74;
        assert_eq!(Status::new(data).unwrap().active_preset(), 74);
        let mut data = image();
        data[137] = 75;
        assert_eq!(Status::new(data).unwrap().active_preset(), 0);
    }

    #[test]
    fn flag_words_decode() {
        let mut data = image();
        data[44..46].copy_from_slice(&(1u16 << 8).to_be_bytes());
        data[46..48].copy_from_slice(&(1u16 << 8).to_be_bytes());
        let status = Status::new(data).unwrap();
        assert!(status.is_charge_discharge_complete());
        assert!(status.use_nodes());
        assert!(!status.safety_charge());
    }

    #[test]
    fn forced_overrides_stick() {
        let mut status = Status::new(image()).unwrap();
        status.set_mode(0x63);
        status.set_error_code(122);
        assert_eq!(status.mode(), 0x63);
        assert_eq!(status.error_code(), 122);
        assert_eq!(status.mode_to_str(), "safety code 122");
    }

    #[test]
    fn mohm_discounts_pack_return_channel() {
        let mut data = image();
        data[68..70].copy_from_slice(&600u16.to_be_bytes()); // 1 A of VR current
        for ii in 0..8 {
            data[52 + ii * 2..54 + ii * 2].copy_from_slice(&4095u16.to_be_bytes());
        }
        data[132] = 3;
        let status = Status::new(data).unwrap();
        let mohm = status.mohm();
        let full = ((4095.0 * 5.12) / 4095.0) / 8.0 * 1000.0;
        assert!((mohm[1] - full).abs() < 1e-9);
        assert!((mohm[3] - (full - full / 8.0)).abs() < 1e-9);
    }
}
