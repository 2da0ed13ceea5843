//! What the user asked the charger to do, echoed back to the app.

use crate::controller::constants::{Chemistry, ChargerOperation, PowerSupplyMode};
use crate::controller::serialize::{append_bool, append_u16};

pub struct ChargerSettings {
    pub port_number: u8,
    pub requested_operation: ChargerOperation,
    pub requested_chemistry: Chemistry,
    pub requested_cell_count: u8,
    pub requested_ir: f64,
    pub requested_capacity: u16,
    pub requested_charge_c: f64,
    pub requested_discharge_c: f64,
    pub requested_charge_rate: u16,
    pub requested_discharge_rate: u16,
    pub requested_charge_cutoff_cell_volts: f64,
    pub requested_discharge_cutoff_cell_volts: f64,
    pub requested_fuel_curve: Vec<f64>,
    pub multi_charger_mode: u8,
    pub power_supply_mode: PowerSupplyMode,
    pub use_balance_leads: bool,
}

impl Default for ChargerSettings {
    fn default() -> Self {
        Self {
            port_number: 0,
            requested_operation: ChargerOperation::None,
            requested_chemistry: Chemistry::None,
            requested_cell_count: 0,
            requested_ir: 0.0,
            requested_capacity: 0,
            requested_charge_c: 0.0,
            requested_discharge_c: 0.0,
            requested_charge_rate: 0,
            requested_discharge_rate: 0,
            requested_charge_cutoff_cell_volts: 0.0,
            requested_discharge_cutoff_cell_volts: 0.0,
            requested_fuel_curve: vec![0.0; 11],
            multi_charger_mode: 0,
            power_supply_mode: PowerSupplyMode::Dc,
            use_balance_leads: true,
        }
    }
}

impl ChargerSettings {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(self.port_number);
        buf.push(self.requested_operation as u8);
        buf.push(self.requested_chemistry as u8);
        buf.push(self.requested_cell_count);
        append_u16(&mut buf, (self.requested_ir * 100.0).round() as u16);
        append_u16(&mut buf, self.requested_capacity);
        append_u16(&mut buf, (self.requested_charge_c * 10.0).round() as u16);
        append_u16(&mut buf, (self.requested_discharge_c * 10.0).round() as u16);
        append_u16(&mut buf, self.requested_charge_rate);
        append_u16(&mut buf, self.requested_discharge_rate);
        append_u16(&mut buf, (self.requested_charge_cutoff_cell_volts * 1000.0).round() as u16);
        append_u16(
            &mut buf,
            (self.requested_discharge_cutoff_cell_volts * 1000.0).round() as u16,
        );
        for val in &self.requested_fuel_curve {
            append_u16(&mut buf, (val * 1000.0).round() as u16);
        }
        buf.push(self.multi_charger_mode);
        buf.push(self.power_supply_mode as u8);
        append_bool(&mut buf, self.use_balance_leads);
        buf
    }
}

#[test]
fn test_settings_frame_layout() {
    let mut settings = ChargerSettings::default();
    settings.requested_operation = ChargerOperation::Normal;
    settings.requested_chemistry = Chemistry::LiPo;
    settings.requested_cell_count = 3;
    settings.requested_capacity = 4400;
    settings.requested_charge_c = 1.0;
    settings.requested_charge_rate = 4400;
    settings.requested_charge_cutoff_cell_volts = 4.2;
    let buf = settings.serialize();
    assert_eq!(buf.len(), 4 + 2 * 8 + 22 + 3);
    assert_eq!(buf[1], 1);
    assert_eq!(buf[2], 1);
    assert_eq!(buf[3], 3);
    assert_eq!(u16::from_le_bytes([buf[6], buf[7]]), 4400);
    assert_eq!(u16::from_le_bytes([buf[8], buf[9]]), 10);
    assert_eq!(u16::from_le_bytes([buf[16], buf[17]]), 4200);
}
