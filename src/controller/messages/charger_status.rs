//! The full status frame sent while an operation is running.

use crate::controller::constants::{
    ChargerMode, ChargerModel, ChargerPowerReducedReason, Chemistry, CommState,
};
use crate::controller::serialize::{append_i32, append_u16, append_u32};

pub struct ChargerStatus {
    pub port_number: u8,
    pub schema_version: u8,
    pub model_id: ChargerModel,
    pub comm_state: CommState,
    pub mode_running: ChargerMode,
    pub error_code: u8,
    pub chemistry: Chemistry,
    cell_count: u8,
    pub estimated_fuel_level: u8,
    pub estimated_minutes: u16,
    pub amps: i32,
    pub pack_volts: u32,
    pub capacity_added: u32,
    pub capacity_removed: u32,
    pub cycle_timer: u32,
    pub status_flags: u16,
    pub rx_status_flags: u16,
    pub operation_flags: u8,
    pub power_reduced_reason: ChargerPowerReducedReason,
    pub supply_volts: u32,
    pub supply_amps: i32,
    pub cpu_temp: u16,
    pub cell_volts: Vec<u16>,
    pub cell_ir: Vec<u16>,
    pub cell_bypass: Vec<u8>,
}

impl Default for ChargerStatus {
    fn default() -> Self {
        Self {
            port_number: 0,
            schema_version: 6,
            model_id: ChargerModel::None,
            comm_state: CommState::Disconnected,
            mode_running: ChargerMode::ReadyToStart,
            error_code: 0,
            chemistry: Chemistry::None,
            cell_count: 0,
            estimated_fuel_level: 0,
            estimated_minutes: 0,
            amps: 0,
            pack_volts: 0,
            capacity_added: 0,
            capacity_removed: 0,
            cycle_timer: 0,
            status_flags: 0,
            rx_status_flags: 0,
            operation_flags: 0,
            power_reduced_reason: ChargerPowerReducedReason::None,
            supply_volts: 0,
            supply_amps: 0,
            cpu_temp: 0,
            cell_volts: Vec::new(),
            cell_ir: Vec::new(),
            cell_bypass: Vec::new(),
        }
    }
}

impl ChargerStatus {
    pub fn cell_count(&self) -> u8 {
        self.cell_count
    }

    /// Setting the cell count sizes the per-cell columns.
    pub fn set_cell_count(&mut self, val: u8) {
        self.cell_count = val;
        self.cell_volts = vec![0; val as usize];
        self.cell_ir = vec![0; val as usize];
        self.cell_bypass = vec![0; val as usize];
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(self.port_number);
        buf.push(self.schema_version);
        buf.push(self.model_id as u8);
        buf.push(self.comm_state as u8);
        buf.push(self.mode_running as u8);
        buf.push(self.error_code);
        buf.push(self.chemistry as u8);
        buf.push(self.cell_count);
        buf.push(self.estimated_fuel_level);
        append_u16(&mut buf, self.estimated_minutes);
        append_i32(&mut buf, self.amps);
        append_u32(&mut buf, self.pack_volts);
        append_u32(&mut buf, self.capacity_added);
        append_u32(&mut buf, self.capacity_removed);
        append_u32(&mut buf, self.cycle_timer);
        append_u16(&mut buf, self.status_flags);
        append_u16(&mut buf, self.rx_status_flags);
        buf.push(self.operation_flags);
        buf.push(self.power_reduced_reason as u8);
        append_u32(&mut buf, self.supply_volts);
        append_i32(&mut buf, self.supply_amps);
        append_u16(&mut buf, self.cpu_temp);
        for ii in 0..self.cell_count as usize {
            append_u16(&mut buf, self.cell_volts[ii]);
            append_u16(&mut buf, self.cell_ir[ii]);
            buf.push(self.cell_bypass[ii]);
        }
        buf
    }
}
