//! The app's manual-operation request (chemistry, cells, rate picked by
//! hand instead of from a preset).

use std::fmt;

use crate::controller::constants::{ChargerOperation, Chemistry};
use crate::controller::serialize::{append_bool, append_u16, read_u16};
use crate::error::{Error, Result};

const PAYLOAD_LEN: usize = 9;

#[derive(Debug, Clone)]
pub struct ManualStart {
    pub charger_port_number: u8,
    pub chemistry: Chemistry,
    pub cells: u8,
    pub operation: ChargerOperation,
    pub cell_term_v: f64,
    pub rate: u16,
    pub balanced: bool,
}

impl ManualStart {
    pub fn deserialize(buf: &[u8]) -> Result<Self> {
        if buf.len() < PAYLOAD_LEN {
            return Err(Error::invalid(format!(
                "manual start payload too short: {}",
                buf.len()
            )));
        }
        Ok(Self {
            charger_port_number: buf[0],
            chemistry: Chemistry::from_raw(buf[1])?,
            cells: buf[2],
            operation: ChargerOperation::from_raw(buf[3])?,
            cell_term_v: read_u16(&buf[4..6]) as f64 / 1000.0,
            rate: read_u16(&buf[6..8]),
            balanced: buf[8] != 0,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(self.charger_port_number);
        buf.push(self.chemistry as u8);
        buf.push(self.cells);
        buf.push(self.operation as u8);
        append_u16(&mut buf, (self.cell_term_v * 1000.0).round() as u16);
        append_u16(&mut buf, self.rate);
        append_bool(&mut buf, self.balanced);
        buf
    }
}

impl fmt::Display for ManualStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "port: {} chemistry: {:?} cells: {} operation: {:?} cell_term_v: {} rate: {} balanced: {}",
            self.charger_port_number,
            self.chemistry,
            self.cells,
            self.operation,
            self.cell_term_v,
            self.rate,
            self.balanced
        )
    }
}

#[test]
fn test_manual_start_round_trip() {
    let msg = ManualStart {
        charger_port_number: 0,
        chemistry: Chemistry::LiPo,
        cells: 3,
        operation: ChargerOperation::Normal,
        cell_term_v: 4.2,
        rate: 2200,
        balanced: true,
    };
    let parsed = ManualStart::deserialize(&msg.serialize()).unwrap();
    assert_eq!(parsed.chemistry, Chemistry::LiPo);
    assert_eq!(parsed.cells, 3);
    assert_eq!(parsed.operation, ChargerOperation::Normal);
    assert_eq!(parsed.cell_term_v, 4.2);
    assert_eq!(parsed.rate, 2200);
    assert!(parsed.balanced);
}

#[test]
fn test_manual_start_rejects_short_and_bad_enums() {
    assert!(ManualStart::deserialize(&[0; 5]).is_err());
    let mut buf = [0u8; 9];
    buf[1] = 99;
    assert!(ManualStart::deserialize(&buf).is_err());
}
