pub mod battery;
pub mod bump_settings;
pub mod charger_idle;
pub mod charger_settings;
pub mod charger_status;
pub mod manual_start;

pub use battery::{Battery, BatteryGroup};
pub use bump_settings::BumpSettings;
pub use charger_idle::ChargerIdle;
pub use charger_settings::ChargerSettings;
pub use charger_status::ChargerStatus;
pub use manual_start::ManualStart;
