//! The short status frame sent while nothing is running.

use crate::controller::constants::{ChargerModel, CommState};
use crate::controller::serialize::{append_i32, append_u16, append_u32};

pub struct ChargerIdle {
    pub port_number: u8,
    pub model_id: ChargerModel,
    pub comm_state: CommState,
    pub supply_volts: u32,
    pub supply_amps: i32,
    pub cpu_temp: u16,
    pub operation_flags: u8,
    pub firmware_version: u16,
}

impl Default for ChargerIdle {
    fn default() -> Self {
        Self {
            port_number: 0,
            model_id: ChargerModel::None,
            comm_state: CommState::Disconnected,
            supply_volts: 0,
            supply_amps: 0,
            cpu_temp: 0,
            operation_flags: 0,
            firmware_version: 0,
        }
    }
}

impl ChargerIdle {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(self.port_number);
        buf.push(self.model_id as u8);
        buf.push(self.comm_state as u8);
        append_u32(&mut buf, self.supply_volts);
        append_i32(&mut buf, self.supply_amps);
        append_u16(&mut buf, self.cpu_temp);
        buf.push(self.operation_flags);
        append_u16(&mut buf, self.firmware_version);
        buf
    }
}

#[test]
fn test_idle_frame_layout() {
    let mut status = ChargerIdle::default();
    status.model_id = ChargerModel::Pl8;
    status.comm_state = CommState::Connected;
    status.firmware_version = 408;
    let buf = status.serialize();
    assert_eq!(buf.len(), 16);
    assert_eq!(buf[1], 0x38);
    assert_eq!(buf[2], 0x7);
    assert_eq!(u16::from_le_bytes([buf[14], buf[15]]), 408);
}
