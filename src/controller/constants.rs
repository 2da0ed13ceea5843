//! Wire constants shared by the app-protocol codec and the session engine.

use crate::error::Error;

/// Frame layout of the app protocol. Little-endian throughout:
///
/// ```text
/// preamble(1) | model_id(1) | message_id(1) | payload_len(u16) | payload | crc16(u16)
/// ```
pub mod frame {
    pub const PREAMBLE_BYTE: u8 = 0x17;
    pub const MESSAGE_ID_OFFSET: usize = 2;
    pub const PAYLOAD_LEN_OFFSET: usize = 3;
    pub const HEADER_BYTES: usize = 5;
    pub const PAYLOAD_OFFSET: usize = HEADER_BYTES;
    pub const CRC_BYTES: usize = 2;
    pub const CRC_SEED: u16 = 0x5ada;
    pub const OVERHEAD: usize = HEADER_BYTES + CRC_BYTES;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    BatteryGroupNot = 0x06,
    SelectedOperationNot = 0x08,
    OperationStartCmd = 0x09,
    OperationStopCmd = 0x0a,
    MonitorCmd = 0x0b,
    ChargerSettings = 0x0c,
    OperationClearErrorCmd = 0x0d,
    ConnectRequest = 0x0e,
    CycleGraphGet = 0x15,
    ConnectAck = 0x16,
    GetDeviceInfoCmd = 0x19,
    DeviceInfo = 0x1a,
    SelectChargerCmd = 0x1d,
    DismissCmd = 0x1e,
    ManualOperationCmd = 0x20,
    SetBatteryGroupCountCmd = 0x21,
    CycleGraphGetComplete = 0x23,
    StatusUpdateNot = 0x2d,
    StatusIdleUpdateNot = 0x2e,
    BumpSettings = 0x2f,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChargerModel {
    None = 0x0,
    Pl6 = 0x36,
    Pl8 = 0x38,
}

/// The charger's native mode byte as the app understands it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChargerMode {
    ReadyToStart = 0,
    DetectingPack = 1,
    Charging = 6,
    TrickleCharging = 7,
    Discharging = 8,
    Monitoring = 9,
    HaltForSafety = 10,
    PackCoolDown = 11,
    Error = 99,
}

impl ChargerMode {
    /// Collapse the charger's raw mode byte into the app-visible mode.
    pub fn from_raw(mode: u8) -> Result<Self, Error> {
        match mode {
            0 => Ok(ChargerMode::ReadyToStart),
            1 => Ok(ChargerMode::DetectingPack),
            2..=6 => Ok(ChargerMode::Charging),
            7 => Ok(ChargerMode::TrickleCharging),
            8 => Ok(ChargerMode::Discharging),
            9 => Ok(ChargerMode::Monitoring),
            10 => Ok(ChargerMode::HaltForSafety),
            11 => Ok(ChargerMode::PackCoolDown),
            0x63 => Ok(ChargerMode::Error),
            other => Err(Error::InvalidArgument(format!("unknown mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ChargerOperation {
    Accurate = 0,
    Normal = 1,
    Fastest = 2,
    Storage = 3,
    Discharge = 4,
    Analyze = 5,
    Monitor = 6,
    Trickle = 7,
    None = 8,
}

impl ChargerOperation {
    pub fn from_raw(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(Self::Accurate),
            1 => Ok(Self::Normal),
            2 => Ok(Self::Fastest),
            3 => Ok(Self::Storage),
            4 => Ok(Self::Discharge),
            5 => Ok(Self::Analyze),
            6 => Ok(Self::Monitor),
            7 => Ok(Self::Trickle),
            8 => Ok(Self::None),
            other => Err(Error::InvalidArgument(format!("unknown operation: {other}"))),
        }
    }

    pub fn from_name(name: &str) -> Result<Self, Error> {
        match name.to_ascii_lowercase().as_str() {
            "accurate" => Ok(Self::Accurate),
            "normal" => Ok(Self::Normal),
            "fastest" => Ok(Self::Fastest),
            "storage" => Ok(Self::Storage),
            "discharge" => Ok(Self::Discharge),
            "analyze" => Ok(Self::Analyze),
            "monitor" => Ok(Self::Monitor),
            "trickle" => Ok(Self::Trickle),
            "none" => Ok(Self::None),
            other => Err(Error::InvalidArgument(format!("unknown operation: {other}"))),
        }
    }
}

/// Flags the app renders on a finished or interrupted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChargerOperationFlag {
    None = 0,
    CellIrWarning = 15,
    CapacityWarning = 16,
    Complete = 32,
    Stopped = 64,
    Dismissed = 128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChargerPowerReducedReason {
    None = 0,
    InputCurrentLimit = 1,
    InputCurrentMax = 2,
    CellSumError = 3,
    SupplyNoise = 4,
    HighTemp = 5,
    InputVoltageLow = 6,
    OutputCv = 7,
    InternalDischargeMaxWatts = 8,
    HighTempDischarge = 9,
    RegenMaxAmps = 10,
    HighTempDischarge2 = 11,
    CellSumErrorDischarge = 12,
    RegenVoltLimit = 13,
    BelowAveCharger = 14,
    AboveAveCharger = 15,
    SupplyLowForHighPower = 16,
}

impl ChargerPowerReducedReason {
    pub fn from_raw(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::InputCurrentLimit),
            2 => Ok(Self::InputCurrentMax),
            3 => Ok(Self::CellSumError),
            4 => Ok(Self::SupplyNoise),
            5 => Ok(Self::HighTemp),
            6 => Ok(Self::InputVoltageLow),
            7 => Ok(Self::OutputCv),
            8 => Ok(Self::InternalDischargeMaxWatts),
            9 => Ok(Self::HighTempDischarge),
            10 => Ok(Self::RegenMaxAmps),
            11 => Ok(Self::HighTempDischarge2),
            12 => Ok(Self::CellSumErrorDischarge),
            13 => Ok(Self::RegenVoltLimit),
            14 => Ok(Self::BelowAveCharger),
            15 => Ok(Self::AboveAveCharger),
            16 => Ok(Self::SupplyLowForHighPower),
            other => Err(Error::InvalidArgument(format!(
                "unknown power reduced reason: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommState {
    Disconnected = 0x0,
    OptionsWrong = 0x1,
    OptionsBadChecksum = 0x2,
    OptionsVerified = 0x3,
    OptionsWaitForDisconnect = 0x4,
    OptionsErased = 0x5,
    OptionsUpdated = 0x6,
    Connected = 0x7,
    Disabled = 0x8,
    FirmwareUpdateCmdSent = 0xa,
    FirmwareUpdating = 0xb,
    FirmwareSuccess = 0xc,
    FirmwareFailed = 0xd,
    FirmwareReadyForDownload = 0xe,
    InternalDisconnected = 0xf,
    FirmwareWaitForDisconnect = 0x10,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Chemistry {
    None = 0,
    LiPo = 1,
    LiIon = 2,
    A123 = 3,
    LiMn = 4,
    LiCo = 5,
    NiCd = 6,
    NiMh = 7,
    Pb = 8,
    LiFe = 9,
    Primary = 10,
    Supply = 11,
    NiZn = 12,
    LiHv = 13,
}

impl Chemistry {
    pub fn from_raw(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::LiPo),
            2 => Ok(Self::LiIon),
            3 => Ok(Self::A123),
            4 => Ok(Self::LiMn),
            5 => Ok(Self::LiCo),
            6 => Ok(Self::NiCd),
            7 => Ok(Self::NiMh),
            8 => Ok(Self::Pb),
            9 => Ok(Self::LiFe),
            10 => Ok(Self::Primary),
            11 => Ok(Self::Supply),
            12 => Ok(Self::NiZn),
            13 => Ok(Self::LiHv),
            other => Err(Error::InvalidArgument(format!("unknown chemistry: {other}"))),
        }
    }

    pub fn from_name(name: &str) -> Result<Self, Error> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "lipo" => Ok(Self::LiPo),
            "lion" | "liion" => Ok(Self::LiIon),
            "a123" => Ok(Self::A123),
            "limn" => Ok(Self::LiMn),
            "lico" => Ok(Self::LiCo),
            "nicd" => Ok(Self::NiCd),
            "nimh" => Ok(Self::NiMh),
            "pb" => Ok(Self::Pb),
            "life" => Ok(Self::LiFe),
            "prim" | "primary" => Ok(Self::Primary),
            "sply" | "supply" => Ok(Self::Supply),
            "nizn" => Ok(Self::NiZn),
            "lihv" => Ok(Self::LiHv),
            other => Err(Error::InvalidArgument(format!("unknown chemistry: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PowerSupplyMode {
    Dc = 0,
    Battery = 1,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_collapses_charge_phases() {
        for raw in 2..=6 {
            assert_eq!(ChargerMode::from_raw(raw).unwrap(), ChargerMode::Charging);
        }
        assert_eq!(ChargerMode::from_raw(0x63).unwrap(), ChargerMode::Error);
        assert!(ChargerMode::from_raw(42).is_err());
    }

    #[test]
    fn chemistry_names_match_indices() {
        assert_eq!(Chemistry::from_name("LiPo").unwrap() as u8, 1);
        assert_eq!(Chemistry::from_name("nicd").unwrap() as u8, 6);
        assert!(Chemistry::from_name("unobtainium").is_err());
        for raw in 0..=13u8 {
            assert_eq!(Chemistry::from_raw(raw).unwrap() as u8, raw);
        }
    }

    #[test]
    fn operation_names_round_trip() {
        for raw in 0..=8u8 {
            let op = ChargerOperation::from_raw(raw).unwrap();
            assert_eq!(op as u8, raw);
        }
        assert_eq!(
            ChargerOperation::from_name("storage").unwrap(),
            ChargerOperation::Storage
        );
    }
}
