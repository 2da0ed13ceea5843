//! The session engine.
//!
//! One emulator owns one charger link and one notify sink. All session
//! state lives behind a single mutex which is held for the entire duration
//! of any serial transaction, so commands and the status poll are totally
//! ordered on the wire.
//!
//! The status poller is a thread spawned on each app connect request; it
//! re-runs the status tick every `status_interval` until it observes that
//! notifications were turned off. A fresh connect request waits for the old
//! poller to exit before reinitializing, bounded by twice the interval.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, trace, warn};

use crate::charger::options::Options;
use crate::charger::powerlab::ChargerLink;
use crate::charger::preset::Preset;
use crate::charger::status::Status;
use crate::controller::constants::{
    ChargerMode, ChargerModel, ChargerOperation, ChargerOperationFlag, ChargerPowerReducedReason,
    Chemistry, CommState, MessageId, PowerSupplyMode,
};
use crate::controller::message_handler::{build_frame, InboundHandler};
use crate::controller::messages::bump_settings::PowerSourceParams;
use crate::controller::messages::{
    Battery, BatteryGroup, BumpSettings, ChargerIdle, ChargerSettings, ChargerStatus, ManualStart,
};
use crate::controller::state_machine::{Effect, Event, State};
use crate::error::{Error, Result};

pub const MODEL_ID: u8 = 0x64;
pub const FIRMWARE_VERSION: u16 = 408;
pub const DEVICE_ID: [u8; 6] = [0, 1, 2, 3, 4, 5];
pub const DEVICE_NAME: &str = "BumpEmulator";

const NOTIFY_FRAGMENT_LEN: usize = 40;
const SERIAL_RETRIES: u32 = 2;
const MAX_NO_STATUS: u32 = 5;

const BAD_CHEMISTRY_ERROR: u8 = 122; // unknown chemistry
const NOT_ALLOWED_ERROR: u8 = 49; // charge not allowed
const NOT_IDLE_ERROR: u8 = 108; // preset loaded while charging
const OP_NOT_SET_ERROR: u8 = 13; // preset is empty

/// Downstream notification sink; the BLE notify characteristic in
/// production, a capture buffer in tests. Payloads are already fragmented
/// to the transport's size.
pub trait NotifySink: Send + Sync {
    fn notify(&self, payload: &[u8]);
}

struct Session {
    charger: Box<dyn ChargerLink>,
    state: State,
    options: Option<Options>,
    presets: Option<Vec<Preset>>,
    /// Slot number of the preset the charger has active.
    active_preset: Option<u8>,
    selected_operation: Option<ChargerOperation>,
    forced_error_code: Option<u8>,
    disallow_operations: bool,
    no_status_count: u32,
    battery_group: Option<BatteryGroup>,
}

impl Session {
    fn reset(&mut self) {
        self.charger.close();
        self.state = State::Disconnected;
        self.options = None;
        self.presets = None;
        self.active_preset = None;
        self.forced_error_code = None;
        self.disallow_operations = true;
        self.no_status_count = 0;
    }
}

struct Shared {
    session: Mutex<Session>,
    sink: Box<dyn NotifySink>,
    battery: Option<Battery>,
    operation_presets: BTreeMap<ChargerOperation, usize>,
    status_interval: Duration,
    notifying: AtomicBool,
    running: Mutex<bool>,
    running_cv: Condvar,
}

#[derive(Clone)]
pub struct Emulator {
    shared: Arc<Shared>,
}

impl Emulator {
    pub fn new(
        charger: Box<dyn ChargerLink>,
        battery: Option<Battery>,
        operation_presets: BTreeMap<ChargerOperation, usize>,
        status_interval: Duration,
        sink: Box<dyn NotifySink>,
    ) -> Result<Self> {
        let selected_operation = battery.as_ref().map(|batt| batt.pref_operation);
        if selected_operation == Some(ChargerOperation::Analyze) {
            return Err(Error::invalid("analyze is not currently supported"));
        }
        let battery_group = battery.as_ref().map(BatteryGroup::new);
        let mut session = Session {
            charger,
            state: State::Disconnected,
            options: None,
            presets: None,
            active_preset: None,
            selected_operation,
            forced_error_code: None,
            disallow_operations: true,
            no_status_count: 0,
            battery_group,
        };
        session.reset();
        Ok(Self {
            shared: Arc::new(Shared {
                session: Mutex::new(session),
                sink,
                battery,
                operation_presets,
                status_interval,
                notifying: AtomicBool::new(false),
                running: Mutex::new(false),
                running_cv: Condvar::new(),
            }),
        })
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.shared.session.lock().unwrap()
    }

    fn notifying(&self) -> bool {
        self.shared.notifying.load(Ordering::SeqCst)
    }

    /// The app subscribed to notifications.
    pub fn start_notify(&self) {
        debug!("start_notify");
        self.shared.notifying.store(true, Ordering::SeqCst);
    }

    /// The app unsubscribed; the status poller will notice and exit.
    pub fn stop_notify(&self) {
        debug!("stop_notify");
        self.shared.notifying.store(false, Ordering::SeqCst);
        info!("ble disconnected");
    }

    fn write_message(&self, message_id: MessageId, payload: &[u8]) {
        if !self.notifying() {
            return;
        }
        let frame = build_frame(MODEL_ID, message_id as u8, payload);
        trace!("app w: {}", hex::encode(&frame));
        for chunk in frame.chunks(NOTIFY_FRAGMENT_LEN) {
            self.shared.sink.notify(chunk);
        }
    }

    fn connect_ack(&self) {
        debug!("connect_ack");
        let mut buf = FIRMWARE_VERSION.to_le_bytes().to_vec();
        buf.push(0);
        self.write_message(MessageId::ConnectAck, &buf);
    }

    fn device_info(&self) {
        debug!("device_info");
        let mut buf = DEVICE_ID.to_vec();
        buf.extend_from_slice(&DEVICE_NAME.as_bytes()[..DEVICE_NAME.len().min(16)]);
        buf.resize(22, 0);
        self.write_message(MessageId::DeviceInfo, &buf);
    }

    fn select_charger(&self) {
        debug!("select_charger");
        self.write_message(MessageId::SelectChargerCmd, &[0]);
    }

    fn cycle_graph_complete(&self) {
        debug!("cycle_graph_complete");
        self.write_message(MessageId::CycleGraphGetComplete, &[0]);
    }

    fn bump_settings(&self, session: &Session) {
        let Some(options) = &session.options else {
            return;
        };
        debug!("bump_settings");
        let mut settings = BumpSettings::default();
        settings.device_name = "Bump Emulator".into();
        settings.presets_enabled = true;
        let battery_powered = options.is_battery_enabled();
        let name = format!(
            "{} @{:.1}A",
            if battery_powered { "Battery" } else { "DC Supply" },
            options.supply_amps_limit()
        );
        settings.set_power_source_params(
            0,
            PowerSourceParams {
                name: &name,
                typ: if battery_powered { 1 } else { 0 },
                low_volts: options.supply_cutoff_volts(),
                max_amps: options.supply_amps_limit(),
                warn_dod: true,
                max_regen_amps: 0.0,
                max_regen_volts: 0.0,
                regen_dchg_enabled: false,
            },
        );
        settings.set_power_source(0, 0);
        settings.enable_charger_port(0);
        self.write_message(MessageId::BumpSettings, &settings.serialize());
    }

    fn battery_group(&self, session: &Session) {
        if let (Some(battery), Some(group)) = (&self.shared.battery, &session.battery_group) {
            debug!("battery_group");
            self.write_message(MessageId::BatteryGroupNot, &group.serialize_notify(battery));
        }
    }

    fn charger_settings(&self, session: &Session) {
        let Some(operation) = session.selected_operation else {
            return;
        };
        let (Some(battery), Some(group)) = (&self.shared.battery, &session.battery_group) else {
            return;
        };
        let Some(options) = &session.options else {
            return;
        };
        debug!("charger_settings");
        let mut settings = ChargerSettings::default();
        settings.requested_operation = operation;
        settings.requested_chemistry = battery.chemistry;
        settings.requested_cell_count = battery.cell_count;
        settings.requested_ir = battery.internal_resistance;
        settings.requested_capacity = battery.capacity.saturating_mul(group.battery_count as u16);
        settings.requested_charge_c = battery.pref_charge_c(operation);
        settings.requested_discharge_c = match operation {
            ChargerOperation::Storage | ChargerOperation::Discharge | ChargerOperation::Analyze => {
                battery.pref_discharge_c
            }
            _ => 0.0,
        };
        settings.requested_charge_rate =
            (settings.requested_charge_c * settings.requested_capacity as f64) as u16;
        settings.requested_discharge_rate =
            (settings.requested_discharge_c * settings.requested_capacity as f64) as u16;
        settings.requested_charge_cutoff_cell_volts = battery.max_cell_volts;
        settings.requested_discharge_cutoff_cell_volts = battery.min_cell_volts;
        settings.requested_fuel_curve = battery.measured_fuel_table.clone();
        settings.multi_charger_mode = 0;
        settings.power_supply_mode = if options.is_battery_enabled() {
            PowerSupplyMode::Battery
        } else {
            PowerSupplyMode::Dc
        };
        settings.use_balance_leads = true;
        self.write_message(MessageId::ChargerSettings, &settings.serialize());
    }

    /// Apply an event and run its entry effect.
    fn transition(&self, session: &mut Session, event: Event) {
        let (next, effect) = session.state.on_event(event);
        if next != session.state {
            debug!("state: {:?} -> {next:?} on {event:?}", session.state);
        }
        session.state = next;
        if effect == Effect::ClearHalt {
            debug!("clear_halt_for_safety");
            if let Err(err) = session.charger.command_enter(SERIAL_RETRIES) {
                error!("failed to clear halt: {err}");
            }
        }
    }

    /// Apply an explicit session event and refresh the app immediately.
    fn set_event(&self, session: &mut Session, event: Event) {
        self.transition(session, event);
        self.status_tick(session, false);
    }

    fn set_forced_error(&self, session: &mut Session, code: u8) {
        session.forced_error_code = Some(code);
        self.status_tick(session, false);
    }

    fn check_preset_chemistries(&self, session: &mut Session) {
        let Some(battery) = &self.shared.battery else {
            return;
        };
        let Some(presets) = &session.presets else {
            return;
        };
        let mut mismatch = false;
        for (operation, &preset_num) in &self.shared.operation_presets {
            let preset = &presets[preset_num];
            if preset.chemistry_idx() != battery.chemistry as u8 {
                mismatch = true;
                error!(
                    "preset {} \"{}\" is not the correct chemistry ({:?} != {})",
                    preset_num + 1,
                    preset.name().trim(),
                    battery.chemistry,
                    preset.chemistry().unwrap_or("unknown"),
                );
                debug!("operation {operation:?} is misconfigured");
            }
        }
        if mismatch {
            session.forced_error_code = Some(BAD_CHEMISTRY_ERROR);
        }
    }

    fn can_change_preset(&self, session: &Session) -> bool {
        session.state == State::Idle
    }

    /// Bring the mapped presets in line with the battery specification.
    /// Returns true while the charger's copy still needs an update.
    fn update_presets(&self, session: &mut Session) -> Result<bool> {
        debug!("update_presets");
        let can_change = self.can_change_preset(session);
        let Some(battery) = &self.shared.battery else {
            return Ok(true);
        };
        let Some(group) = &session.battery_group else {
            return Ok(true);
        };
        if self.shared.operation_presets.is_empty() || session.state != State::Idle {
            return Ok(true);
        }
        let battery_count = group.battery_count;
        let Session {
            charger, presets, ..
        } = session;
        let Some(presets) = presets.as_mut() else {
            return Ok(true);
        };

        let mut needing_update = Vec::new();
        let mut seen = BTreeSet::new();
        for (&operation, &preset_num) in &self.shared.operation_presets {
            if !seen.insert(preset_num) {
                continue;
            }
            let preset = &mut presets[preset_num];
            let charge_c = battery.pref_charge_c(operation);
            let mut changed = false;

            if preset.auto_charge_rate() != 0 {
                preset.set_auto_charge_rate(0);
                changed = true;
            }
            let charge_mamps = (charge_c * battery.capacity as f64).round() as u32;
            if preset.charge_mamps() != charge_mamps {
                preset.set_charge_mamps(charge_mamps);
                changed = true;
            }
            let discharge_mamps = (battery.pref_discharge_c * battery.capacity as f64).round() as u32;
            if preset.discharge_mamps() != discharge_mamps {
                preset.set_discharge_mamps(discharge_mamps);
                changed = true;
            }
            if preset.num_parallel() != battery_count {
                preset.set_num_parallel(battery_count)?;
                changed = true;
            }
            let (charge_volts, discharge_volts) = if operation == ChargerOperation::Storage {
                (battery.storage_charge_volts, battery.storage_discharge_volts)
            } else {
                (battery.max_cell_volts, battery.min_cell_volts)
            };
            if preset.charge_volts() != charge_volts {
                preset.set_charge_volts(charge_volts);
                changed = true;
            }
            if preset.discharge_volts() != discharge_volts {
                preset.set_discharge_volts(discharge_volts);
                changed = true;
            }
            if operation != ChargerOperation::Storage && preset.num_cycles() != battery.cycle_count as u64
            {
                preset.set_num_cycles(battery.cycle_count as u64)?;
                changed = true;
            }
            if preset.max_charge_amps() != 40.0 {
                preset.set_max_charge_amps(40.0);
                changed = true;
            }

            if changed {
                needing_update.push(preset.preset_num() + 1);
            }
        }

        if needing_update.is_empty() {
            return Ok(false);
        }
        debug!("presets needing update: {needing_update:?}");
        if can_change {
            info!("writing presets");
            charger.write_presets(presets, SERIAL_RETRIES)?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Make sure the charger's active preset matches the selected
    /// operation, reconciling preset contents along the way.
    fn check_preset(&self, session: &mut Session, chg_status: &Status) {
        let current = chg_status.active_preset();
        if session.active_preset == Some(current) {
            return;
        }
        let needs_update = match self.update_presets(session) {
            Ok(flag) => flag,
            Err(err) => {
                error!("preset update failed: {err}");
                session.disallow_operations = true;
                true
            }
        };

        let target = session
            .selected_operation
            .and_then(|operation| self.shared.operation_presets.get(&operation).copied());
        if !needs_update && target.is_some() {
            let preset_idx = target.expect("target checked above");
            let preset_num = match &session.presets {
                Some(presets) => presets[preset_idx].preset_num(),
                None => {
                    session.disallow_operations = true;
                    return;
                }
            };
            match session.charger.set_active_preset(preset_num, SERIAL_RETRIES) {
                Ok(()) => {
                    session.active_preset = Some(preset_num);
                    session.disallow_operations =
                        self.shared.battery.is_none() || session.forced_error_code.is_some();
                }
                Err(err) => {
                    error!("set active preset failed: {err}");
                    session.disallow_operations = true;
                }
            }
        } else {
            session.disallow_operations = true;
        }
    }

    /// The charger just answered its options probe: pull presets, verify
    /// chemistries, and run the app handshake.
    fn charger_connected(&self, session: &mut Session) {
        info!("reading presets");
        match session.charger.read_presets(SERIAL_RETRIES) {
            Err(err) => error!("reading presets failed: {err}"),
            Ok(presets) => {
                session.presets = Some(presets);
                self.check_preset_chemistries(session);

                self.select_charger();
                self.bump_settings(session);
                self.charger_settings(session);
                self.battery_group(session);

                self.transition(session, Event::Connected);
                info!("charger connected");
            }
        }
    }

    fn emit_status(&self, session: &mut Session, chg_status: &mut Status, force_idle: bool) -> Result<()> {
        if let Some(code) = session.forced_error_code {
            chg_status.set_error_code(code);
            chg_status.set_mode(ChargerMode::Error as u8);
        }
        let event = Event::from_status(chg_status);
        self.transition(session, event);

        self.check_preset(session, chg_status);

        let (operation_flags, state_is_idle) = match session.state {
            State::Idle => (ChargerOperationFlag::None, true),
            State::HaltForSafety => (ChargerOperationFlag::None, false),
            State::Completed => (ChargerOperationFlag::Complete, false),
            State::Stopped => (ChargerOperationFlag::Stopped, false),
            _ => (ChargerOperationFlag::None, false),
        };
        let is_idle_status =
            (state_is_idle || force_idle) && session.forced_error_code.is_none();

        let mode = ChargerMode::from_raw(chg_status.mode())?;
        debug!(
            "state: {:?} is_idle_status: {is_idle_status} op_flags: {operation_flags:?} mode: {mode:?}",
            session.state
        );

        let supply_volts = (chg_status.supply_volts() * 1000.0) as u32;
        let supply_amps = (chg_status.supply_amps() * 1000.0) as i32;
        let cpu_temp = chg_status.cpu_temp().round() as u16;

        if is_idle_status {
            let mut status = ChargerIdle::default();
            status.firmware_version = chg_status.firmware_version();
            status.model_id = ChargerModel::Pl8;
            status.comm_state = CommState::Connected;
            status.supply_volts = supply_volts;
            status.supply_amps = supply_amps;
            status.cpu_temp = cpu_temp;
            status.operation_flags = operation_flags as u8;
            self.write_message(MessageId::StatusIdleUpdateNot, &status.serialize());
        } else {
            let mut status = ChargerStatus::default();
            status.mode_running = mode;
            status.error_code = chg_status.error_code();
            status.chemistry = Chemistry::from_raw(chg_status.chem8())?;
            status.set_cell_count(chg_status.ch1_cells());
            status.estimated_fuel_level = (chg_status.fuel_level() as f64 / 10.0).round() as u8;
            status.estimated_minutes = 0;
            status.amps = (chg_status.avg_amps() * 1000.0) as i32;
            status.pack_volts = (chg_status.b_volts().iter().sum::<f64>() * 1000.0) as u32;
            status.capacity_added = chg_status.mah_in().round() as u32;
            status.capacity_removed = chg_status.mah_out().round() as u32;
            status.cycle_timer = chg_status.charge_seconds();
            status.status_flags = chg_status.status_flags();
            status.rx_status_flags = chg_status.rx_status_flags();
            status.power_reduced_reason =
                if session.state == State::Charging || session.state == State::Discharging {
                    if chg_status.lower_pwm_reason() == 0 && chg_status.cv_started() {
                        ChargerPowerReducedReason::OutputCv
                    } else {
                        ChargerPowerReducedReason::from_raw(chg_status.lower_pwm_reason())?
                    }
                } else {
                    ChargerPowerReducedReason::None
                };

            let cell_count = status.cell_count() as usize;
            if cell_count > 0 {
                let b_volts = chg_status.b_volts();
                let mohm = chg_status.mohm();
                let bp_pct = chg_status.bypass_percent();
                for ii in 0..cell_count.min(8) {
                    status.cell_volts[ii] = (b_volts[ii] * 1000.0) as u16;
                    status.cell_ir[ii] = (mohm[ii] * 100.0) as u16;
                    status.cell_bypass[ii] = bp_pct[ii].round() as u8;
                }
            }

            status.model_id = ChargerModel::Pl8;
            status.comm_state = CommState::Connected;
            status.supply_volts = supply_volts;
            status.supply_amps = supply_amps;
            status.cpu_temp = cpu_temp;
            status.operation_flags = operation_flags as u8;
            self.write_message(MessageId::StatusUpdateNot, &status.serialize());
        }
        Ok(())
    }

    /// One full pass of the status loop. Returns whether the poller should
    /// keep running.
    fn status_tick(&self, session: &mut Session, force_idle: bool) -> bool {
        trace!("status_tick");
        if session.state == State::Disconnected {
            match session.charger.connect() {
                Ok(options) => {
                    session.options = Some(options);
                    self.charger_connected(session);
                }
                Err(err) => debug!("connect failed: {err}"),
            }
        }

        let mut chg_status = None;
        if session.state != State::Disconnected {
            match session.charger.read_status() {
                Ok(status) => {
                    session.no_status_count = 0;
                    chg_status = Some(status);
                }
                Err(err) => {
                    warn!("status read failed: {err}");
                    session.no_status_count += 1;
                    if session.no_status_count >= MAX_NO_STATUS {
                        session.no_status_count = 0;
                        session.options = None;
                        session.charger.close();
                        self.transition(session, Event::Disconnected);
                    }
                }
            }
        }

        if session.state == State::Disconnected {
            let mut status = ChargerIdle::default();
            status.model_id = ChargerModel::Pl8;
            status.comm_state = CommState::Disconnected;
            self.write_message(MessageId::StatusIdleUpdateNot, &status.serialize());
        } else if let Some(mut status) = chg_status {
            if let Err(err) = self.emit_status(session, &mut status, force_idle) {
                error!("status emit failed: {err}");
            }
        }

        let notifying = self.notifying();
        {
            let mut running = self.shared.running.lock().unwrap();
            *running = notifying;
            if !notifying {
                self.shared.running_cv.notify_all();
            }
        }
        notifying
    }

    fn spawn_status_loop(&self) {
        let emulator = self.clone();
        thread::Builder::new()
            .name("status-poll".into())
            .spawn(move || loop {
                thread::sleep(emulator.shared.status_interval);
                let keep_running = {
                    let mut session = emulator.session();
                    emulator.status_tick(&mut session, false)
                };
                if !keep_running {
                    break;
                }
            })
            .expect("failed to spawn status poller");
    }
}

impl InboundHandler for Emulator {
    fn connect_request(&self) {
        debug!("connect_request");

        // Wait for the status loop of a previous connection to exit; the
        // app does not always unsubscribe properly before reconnecting.
        self.shared.notifying.store(false, Ordering::SeqCst);
        {
            let timeout = self.shared.status_interval * 2;
            let mut running = self.shared.running.lock().unwrap();
            while *running {
                let (guard, result) = self
                    .shared
                    .running_cv
                    .wait_timeout(running, timeout)
                    .unwrap();
                running = guard;
                if result.timed_out() && *running {
                    error!("timed out waiting for status loop to exit");
                    self.shared.notifying.store(true, Ordering::SeqCst);
                    return;
                }
            }
        }
        self.shared.notifying.store(true, Ordering::SeqCst);

        {
            let mut session = self.session();
            session.reset();

            // No operations until error checks and setup are done.
            session.disallow_operations = true;

            self.connect_ack();

            // One inline pass to set up initial state.
            self.status_tick(&mut session, false);
        }

        self.spawn_status_loop();
        info!("ble connected");
    }

    fn get_device_info(&self) {
        let _session = self.session();
        self.device_info();
    }

    fn cycle_graph_get(&self) {
        let _session = self.session();
        self.cycle_graph_complete();
    }

    fn manual_operation(&self, request: ManualStart) {
        debug!("manual_operation");
        debug!("{request}");
        let mut session = self.session();
        info!("ignoring manual_operation: not supported");
        self.set_forced_error(&mut session, NOT_ALLOWED_ERROR);
    }

    fn operation_start(&self, port: u8) {
        debug!("operation_start(port={port})");
        let mut session = self.session();
        if session.disallow_operations {
            info!("ignoring operation_start: operations are disallowed");
            self.set_forced_error(&mut session, NOT_ALLOWED_ERROR);
        } else if session.state != State::Idle {
            info!("ignoring operation_start: not in idle state");
            self.set_forced_error(&mut session, NOT_IDLE_ERROR);
        } else if session.selected_operation.is_none() {
            info!("ignoring operation_start: no operation selected");
            self.set_forced_error(&mut session, OP_NOT_SET_ERROR);
        } else {
            let Some(count) = session.battery_group.as_ref().map(|group| group.battery_count)
            else {
                info!("ignoring operation_start: no battery group");
                self.set_forced_error(&mut session, NOT_ALLOWED_ERROR);
                return;
            };
            let result = if session.selected_operation == Some(ChargerOperation::Discharge) {
                session.charger.command_discharge(count, true, SERIAL_RETRIES)
            } else {
                session.charger.command_charge(count, true, SERIAL_RETRIES)
            };
            if let Err(err) = result {
                error!("start command failed: {err}");
            }
        }
    }

    fn operation_stop(&self, port: u8) {
        debug!("operation_stop(port={port})");
        let mut session = self.session();
        match session.charger.command_enter(SERIAL_RETRIES) {
            Ok(()) => self.set_event(&mut session, Event::Stop),
            Err(err) => error!("stop command failed: {err}"),
        }
    }

    fn dismiss(&self, port: u8, keep_setup: bool) {
        debug!("dismiss(port={port}, keep_setup={keep_setup})");
        let mut session = self.session();
        match session.charger.command_enter(SERIAL_RETRIES) {
            Ok(()) => self.set_event(&mut session, Event::Dismiss),
            Err(err) => error!("dismiss command failed: {err}"),
        }
    }

    fn clear_error(&self, port: u8) {
        debug!("clear_error(port={port})");
        let mut session = self.session();
        let result = if session.forced_error_code.is_none() {
            session.charger.command_enter(SERIAL_RETRIES)
        } else {
            Ok(())
        };
        match result {
            Ok(()) => {
                if session.forced_error_code != Some(BAD_CHEMISTRY_ERROR) {
                    session.forced_error_code = None;
                }
                self.set_event(&mut session, Event::Dismiss);
            }
            Err(err) => error!("clear error failed: {err}"),
        }
    }

    fn set_battery_group_count(&self, port: u8, group_index: u8, count: u8) {
        debug!("set_battery_group_count(port={port}, group_index={group_index}, count={count})");
        let mut session = self.session();
        if session.state != State::Idle {
            info!("ignoring set_battery_group_count: not in idle state");
            self.set_forced_error(&mut session, NOT_IDLE_ERROR);
        } else if let Some(old_count) = session.battery_group.as_ref().map(|group| group.battery_count)
        {
            if count != old_count {
                let apply = |session: &mut Session, new_count: u8| -> Result<()> {
                    if let Some(presets) = session.presets.as_mut() {
                        for &preset_num in self.shared.operation_presets.values() {
                            presets[preset_num].set_num_parallel(new_count)?;
                        }
                    }
                    Ok(())
                };

                let written = apply(&mut session, count).and_then(|()| {
                    info!("writing presets");
                    let Session {
                        charger, presets, ..
                    } = &mut *session;
                    match presets.as_mut() {
                        Some(presets) => charger.write_presets(presets, SERIAL_RETRIES),
                        None => Err(Error::invalid("presets not loaded")),
                    }
                });
                match written {
                    Ok(()) => {
                        if let Some(group) = session.battery_group.as_mut() {
                            group.battery_count = count;
                        }
                    }
                    Err(err) => {
                        error!("battery group count change failed: {err}");
                        if let Err(err) = apply(&mut session, old_count) {
                            error!("failed to revert preset pack counts: {err}");
                        }
                    }
                }
            }
        }
        self.battery_group(&session);
        self.charger_settings(&session);
    }

    fn monitor(&self, port: u8) {
        debug!("monitor(port={port})");
        let mut session = self.session();
        if session.disallow_operations {
            info!("ignoring monitor: operations are disallowed");
            self.set_forced_error(&mut session, NOT_ALLOWED_ERROR);
        } else if session.state != State::Idle {
            info!("ignoring monitor: not in idle state");
            self.set_forced_error(&mut session, NOT_IDLE_ERROR);
        } else if session.active_preset.is_none() {
            info!("ignoring monitor: no active preset");
            self.set_forced_error(&mut session, NOT_ALLOWED_ERROR);
        } else {
            let count = session
                .battery_group
                .as_ref()
                .map(|group| group.battery_count)
                .unwrap_or(1);
            if let Err(err) = session.charger.command_monitor(count, true, SERIAL_RETRIES) {
                error!("monitor command failed: {err}");
            }
        }
    }

    fn selected_operation(&self, port: u8, operation: u8) {
        debug!("selected_operation(port={port}, operation={operation})");
        let mut session = self.session();
        if session.disallow_operations {
            info!("ignoring selected_operation: operations are disallowed");
            self.set_forced_error(&mut session, NOT_ALLOWED_ERROR);
        } else if session.state != State::Idle {
            info!("ignoring selected_operation: not in idle state");
            self.set_forced_error(&mut session, NOT_IDLE_ERROR);
        } else {
            match ChargerOperation::from_raw(operation) {
                Err(err) => warn!("bad selected_operation: {err}"),
                Ok(ChargerOperation::Analyze) => {
                    info!("ignoring selected_operation: analyze not supported");
                    self.set_forced_error(&mut session, NOT_ALLOWED_ERROR);
                }
                Ok(new_operation) => {
                    let target = self
                        .shared
                        .operation_presets
                        .get(&new_operation)
                        .copied()
                        .and_then(|idx| {
                            session
                                .presets
                                .as_ref()
                                .map(|presets| presets[idx].preset_num())
                        });
                    match target {
                        None => warn!("no preset mapped for {new_operation:?}"),
                        Some(preset_num) => {
                            match session.charger.set_active_preset(preset_num, SERIAL_RETRIES) {
                                Ok(()) => {
                                    session.selected_operation = Some(new_operation);
                                    session.active_preset = Some(preset_num);
                                }
                                Err(err) => error!("set active preset failed: {err}"),
                            }
                        }
                    }
                }
            }
        }
        self.charger_settings(&session);
    }
}

#[cfg(test)]
impl Emulator {
    fn tick(&self) -> bool {
        let mut session = self.session();
        self.status_tick(&mut session, false)
    }

    fn state(&self) -> State {
        self.session().state
    }

    fn forced_error(&self) -> Option<u8> {
        self.session().forced_error_code
    }

    fn operations_disallowed(&self) -> bool {
        self.session().disallow_operations
    }

    fn battery_count(&self) -> Option<u8> {
        self.session()
            .battery_group
            .as_ref()
            .map(|group| group.battery_count)
    }

    fn cached_num_parallel(&self, idx: usize) -> u8 {
        self.session().presets.as_ref().unwrap()[idx].num_parallel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use crate::charger::options::OPTIONS_LEN;
    use crate::charger::preset::{NUM_PRESETS, PRESET_LEN};
    use crate::charger::status::STATUS_LEN;
    use crate::controller::message_handler::FrameParser;
    use crate::controller::messages::battery::tests::test_battery;
    use crate::error::VerifyError;

    const NORMAL_PRESET: usize = 3;

    fn short_read() -> Error {
        VerifyError::Short {
            context: "read status",
            expected: 153,
            actual: 0,
        }
        .into()
    }

    #[derive(Default)]
    struct FakeState {
        connect_ok: bool,
        connect_count: u32,
        closed_count: u32,
        presets: Vec<Preset>,
        statuses: VecDeque<Vec<u8>>,
        default_status: Option<Vec<u8>>,
        fail_reads: u32,
        fail_write_presets: bool,
        write_presets_count: u32,
        commands: Vec<String>,
    }

    struct FakeCharger(Arc<Mutex<FakeState>>);

    impl ChargerLink for FakeCharger {
        fn connect(&mut self) -> Result<Options> {
            let mut state = self.0.lock().unwrap();
            state.connect_count += 1;
            if state.connect_ok {
                Options::new(vec![0; OPTIONS_LEN])
            } else {
                Err(Error::ConnectFailed("no port found".into()))
            }
        }

        fn close(&mut self) {
            self.0.lock().unwrap().closed_count += 1;
        }

        fn read_status(&mut self) -> Result<Status> {
            let mut state = self.0.lock().unwrap();
            if state.fail_reads > 0 {
                state.fail_reads -= 1;
                return Err(short_read());
            }
            if let Some(data) = state.statuses.pop_front() {
                return Status::new(data);
            }
            match &state.default_status {
                Some(data) => Status::new(data.clone()),
                None => Err(short_read()),
            }
        }

        fn read_presets(&mut self, _retries: u32) -> Result<Vec<Preset>> {
            Ok(self.0.lock().unwrap().presets.clone())
        }

        fn write_presets(&mut self, presets: &mut [Preset], _retries: u32) -> Result<()> {
            let mut state = self.0.lock().unwrap();
            if state.fail_write_presets {
                return Err(VerifyError::Crc {
                    context: "write presets",
                    expected: 1,
                    actual: 2,
                }
                .into());
            }
            state.write_presets_count += 1;
            state.presets = presets.to_vec();
            Ok(())
        }

        fn read_options(&mut self, _retries: u32) -> Result<Options> {
            Options::new(vec![0; OPTIONS_LEN])
        }

        fn write_options(&mut self, _options: &mut Options, _retries: u32) -> Result<()> {
            Ok(())
        }

        fn set_active_preset(&mut self, which: u8, _retries: u32) -> Result<()> {
            self.0.lock().unwrap().commands.push(format!("SelP {which}"));
            Ok(())
        }

        fn command_enter(&mut self, _retries: u32) -> Result<()> {
            self.0.lock().unwrap().commands.push("enter".into());
            Ok(())
        }

        fn command_monitor(&mut self, num_parallel: u8, use_bananas: bool, _retries: u32) -> Result<()> {
            self.0
                .lock()
                .unwrap()
                .commands
                .push(format!("monitor {num_parallel} {use_bananas}"));
            Ok(())
        }

        fn command_charge(&mut self, num_parallel: u8, use_bananas: bool, _retries: u32) -> Result<()> {
            self.0
                .lock()
                .unwrap()
                .commands
                .push(format!("charge {num_parallel} {use_bananas}"));
            Ok(())
        }

        fn command_discharge(&mut self, num_parallel: u8, use_bananas: bool, _retries: u32) -> Result<()> {
            self.0
                .lock()
                .unwrap()
                .commands
                .push(format!("discharge {num_parallel} {use_bananas}"));
            Ok(())
        }

        fn command_cycle(&mut self, num_parallel: u8, use_bananas: bool, _retries: u32) -> Result<()> {
            self.0
                .lock()
                .unwrap()
                .commands
                .push(format!("cycle {num_parallel} {use_bananas}"));
            Ok(())
        }
    }

    #[derive(Default)]
    struct CaptureSink {
        data: Mutex<Vec<u8>>,
        fragment_sizes: Mutex<Vec<usize>>,
    }

    impl NotifySink for Arc<CaptureSink> {
        fn notify(&self, payload: &[u8]) {
            self.data.lock().unwrap().extend_from_slice(payload);
            self.fragment_sizes.lock().unwrap().push(payload.len());
        }
    }

    struct Harness {
        emulator: Emulator,
        charger: Arc<Mutex<FakeState>>,
        sink: Arc<CaptureSink>,
    }

    impl Harness {
        fn frames(&self) -> Vec<(u8, Vec<u8>)> {
            let data = self.sink.data.lock().unwrap().clone();
            let mut parser = FrameParser::new();
            let mut frames = Vec::new();
            for chunk in data.chunks(512) {
                frames.extend(parser.push(chunk));
            }
            frames
        }

        fn frame_ids(&self) -> Vec<u8> {
            self.frames().into_iter().map(|(id, _)| id).collect()
        }

        fn commands(&self) -> Vec<String> {
            self.charger.lock().unwrap().commands.clone()
        }

        fn clear_captures(&self) {
            self.sink.data.lock().unwrap().clear();
            self.sink.fragment_sizes.lock().unwrap().clear();
            self.charger.lock().unwrap().commands.clear();
        }
    }

    fn operation_map() -> BTreeMap<ChargerOperation, usize> {
        BTreeMap::from([
            (ChargerOperation::Accurate, 1),
            (ChargerOperation::Normal, NORMAL_PRESET),
            (ChargerOperation::Fastest, 2),
            (ChargerOperation::Storage, 4),
            (ChargerOperation::Discharge, 5),
            (ChargerOperation::Monitor, 6),
        ])
    }

    fn idle_status() -> Vec<u8> {
        let mut data = vec![0u8; STATUS_LEN];
        // Report the normal preset as active so a settled session does not
        // re-reconcile on every poll.
        data[137] = NORMAL_PRESET as u8;
        data
    }

    fn status_with_mode(mode: u8) -> Vec<u8> {
        let mut data = idle_status();
        data[133] = mode;
        data
    }

    fn mapped_presets(chemistry_idx: u8) -> Vec<Preset> {
        let mut presets: Vec<Preset> = (0..NUM_PRESETS)
            .map(|num| Preset::new(&[0u8; PRESET_LEN], num as u8).unwrap())
            .collect();
        for idx in operation_map().into_values() {
            presets[idx].set_chemistry_idx(chemistry_idx).unwrap();
        }
        presets
    }

    fn harness_with(
        battery: Option<Battery>,
        chemistry_idx: u8,
        interval: Duration,
    ) -> Harness {
        let charger = Arc::new(Mutex::new(FakeState {
            connect_ok: true,
            presets: mapped_presets(chemistry_idx),
            default_status: Some(idle_status()),
            ..FakeState::default()
        }));
        let sink = Arc::new(CaptureSink::default());
        let emulator = Emulator::new(
            Box::new(FakeCharger(charger.clone())),
            battery,
            operation_map(),
            interval,
            Box::new(sink.clone()),
        )
        .unwrap();
        Harness {
            emulator,
            charger,
            sink,
        }
    }

    fn harness(chemistry_idx: u8) -> Harness {
        // A long interval keeps the background poller dormant so tests can
        // drive ticks by hand.
        harness_with(Some(test_battery()), chemistry_idx, Duration::from_secs(3600))
    }

    fn lipo_idx() -> u8 {
        Chemistry::LiPo as u8
    }

    #[test]
    fn connect_handshake_and_idle_notify() {
        let hh = harness(lipo_idx());
        hh.emulator.start_notify();
        hh.emulator.connect_request();

        let frames = hh.frames();
        assert_eq!(frames[0].0, MessageId::ConnectAck as u8);
        assert_eq!(frames[0].1, vec![0x98, 0x01, 0x00]); // fw 408

        let ids = hh.frame_ids();
        let handshake: Vec<u8> = ids
            .iter()
            .copied()
            .filter(|id| {
                [
                    MessageId::SelectChargerCmd as u8,
                    MessageId::BumpSettings as u8,
                    MessageId::ChargerSettings as u8,
                    MessageId::BatteryGroupNot as u8,
                ]
                .contains(id)
            })
            .collect();
        assert_eq!(
            handshake,
            vec![
                MessageId::SelectChargerCmd as u8,
                MessageId::BumpSettings as u8,
                MessageId::ChargerSettings as u8,
                MessageId::BatteryGroupNot as u8,
            ]
        );

        let (last_id, last_payload) = frames.last().unwrap().clone();
        assert_eq!(last_id, MessageId::StatusIdleUpdateNot as u8);
        assert_eq!(last_payload[1], ChargerModel::Pl8 as u8);
        assert_eq!(last_payload[2], CommState::Connected as u8);

        // Notifications go out in transport-sized fragments.
        assert!(hh
            .sink
            .fragment_sizes
            .lock()
            .unwrap()
            .iter()
            .all(|len| *len <= 40));

        // Another poll emits another idle frame.
        hh.clear_captures();
        assert!(hh.emulator.tick());
        assert_eq!(hh.frame_ids(), vec![MessageId::StatusIdleUpdateNot as u8]);
        assert_eq!(hh.emulator.state(), State::Idle);
        assert!(!hh.emulator.operations_disallowed());
    }

    #[test]
    fn device_info_on_request() {
        let hh = harness(lipo_idx());
        hh.emulator.start_notify();
        hh.emulator.get_device_info();
        let frames = hh.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, MessageId::DeviceInfo as u8);
        let mut expected = vec![0, 1, 2, 3, 4, 5];
        expected.extend_from_slice(b"BumpEmulator");
        expected.resize(22, 0);
        assert_eq!(frames[0].1, expected);
    }

    #[test]
    fn chemistry_mismatch_forces_unclearable_error() {
        let hh = harness(Chemistry::NiCd as u8);
        hh.emulator.start_notify();
        hh.emulator.connect_request();

        assert_eq!(hh.emulator.forced_error(), Some(122));
        assert!(hh.emulator.operations_disallowed());

        let frames = hh.frames();
        let (last_id, last_payload) = frames.last().unwrap().clone();
        assert_eq!(last_id, MessageId::StatusUpdateNot as u8);
        assert_eq!(last_payload[4], ChargerMode::Error as u8);
        assert_eq!(last_payload[5], 122);

        // CLEAR_ERROR cannot mask a misconfigured preset map.
        hh.emulator.clear_error(0);
        assert_eq!(hh.emulator.forced_error(), Some(122));
        hh.clear_captures();
        hh.emulator.tick();
        let frames = hh.frames();
        let (last_id, last_payload) = frames.last().unwrap().clone();
        assert_eq!(last_id, MessageId::StatusUpdateNot as u8);
        assert_eq!(last_payload[5], 122);
    }

    #[test]
    fn operation_start_round_trip() {
        let hh = harness(lipo_idx());
        hh.emulator.start_notify();
        hh.emulator.connect_request();

        // The first pass reconciled and selected the mapped preset.
        assert!(hh.commands().iter().any(|cmd| cmd == "SelP 3"));
        assert!(hh.charger.lock().unwrap().write_presets_count >= 1);
        assert!(!hh.emulator.operations_disallowed());

        hh.clear_captures();
        hh.emulator.operation_start(0);
        // Normal is a charge operation; two packs in parallel, bananas on.
        assert_eq!(hh.commands(), vec!["charge 2 true".to_string()]);

        {
            let mut state = hh.charger.lock().unwrap();
            state.statuses.push_back(status_with_mode(1));
            state.statuses.push_back(status_with_mode(2));
        }
        hh.emulator.tick();
        assert_eq!(hh.emulator.state(), State::Starting);
        hh.emulator.tick();
        assert_eq!(hh.emulator.state(), State::Charging);

        let frames = hh.frames();
        let (last_id, last_payload) = frames.last().unwrap().clone();
        assert_eq!(last_id, MessageId::StatusUpdateNot as u8);
        assert_eq!(last_payload[4], ChargerMode::Charging as u8);
    }

    #[test]
    fn reconciliation_applies_battery_profile() {
        let hh = harness(lipo_idx());
        hh.emulator.start_notify();
        hh.emulator.connect_request();

        let state = hh.charger.lock().unwrap();
        let preset = &state.presets[NORMAL_PRESET];
        assert_eq!(preset.charge_mamps(), 2200); // 1.0 C of 2200 mAh
        // 2200 mA lands on the 250 mA discharge grid at 2250.
        assert_eq!(preset.discharge_mamps(), 2250);
        assert_eq!(preset.num_parallel(), 2);
        assert_eq!(preset.max_charge_amps(), 40.0);
        assert!((preset.charge_volts() - 4.2).abs() < 0.005);
        assert!((preset.discharge_volts() - 3.3).abs() < 0.005);
        assert_eq!(preset.num_cycles(), 1);
        assert_eq!(preset.auto_charge_rate(), 0);
        // Storage preset takes the storage voltages instead.
        let storage = &state.presets[4];
        assert!((storage.charge_volts() - 3.85).abs() < 0.005);
    }

    #[test]
    fn battery_group_count_change_reflashes_presets() {
        let hh = harness(lipo_idx());
        hh.emulator.start_notify();
        hh.emulator.connect_request();
        hh.clear_captures();

        hh.emulator.set_battery_group_count(0, 0, 3);
        assert_eq!(hh.emulator.battery_count(), Some(3));
        for idx in operation_map().into_values() {
            assert_eq!(hh.emulator.cached_num_parallel(idx), 3);
        }
        let ids = hh.frame_ids();
        assert!(ids.contains(&(MessageId::BatteryGroupNot as u8)));
        assert!(ids.contains(&(MessageId::ChargerSettings as u8)));
        let frames = hh.frames();
        let group_payload = &frames
            .iter()
            .find(|(id, _)| *id == MessageId::BatteryGroupNot as u8)
            .unwrap()
            .1;
        assert_eq!(group_payload[2], 3); // battery count

        // A failed flash reverts the cached presets and the group count.
        hh.charger.lock().unwrap().fail_write_presets = true;
        hh.emulator.set_battery_group_count(0, 0, 4);
        assert_eq!(hh.emulator.battery_count(), Some(3));
        for idx in operation_map().into_values() {
            assert_eq!(hh.emulator.cached_num_parallel(idx), 3);
        }
    }

    #[test]
    fn five_read_failures_reset_the_link() {
        let hh = harness(lipo_idx());
        hh.emulator.start_notify();
        hh.emulator.connect_request();
        assert_eq!(hh.emulator.state(), State::Idle);
        hh.clear_captures();

        {
            let mut state = hh.charger.lock().unwrap();
            state.default_status = None;
        }
        let closed_before = hh.charger.lock().unwrap().closed_count;
        for _ in 0..4 {
            hh.emulator.tick();
            assert_ne!(hh.emulator.state(), State::Disconnected);
        }
        // Nothing was notified while the link limped along.
        assert!(hh.frames().is_empty());

        hh.emulator.tick();
        assert_eq!(hh.emulator.state(), State::Disconnected);
        assert!(hh.charger.lock().unwrap().closed_count > closed_before);
        let frames = hh.frames();
        let (last_id, last_payload) = frames.last().unwrap().clone();
        assert_eq!(last_id, MessageId::StatusIdleUpdateNot as u8);
        assert_eq!(last_payload[2], CommState::Disconnected as u8);

        // A healthy charger re-enters the handshake on the next poll.
        {
            let mut state = hh.charger.lock().unwrap();
            state.default_status = Some(idle_status());
        }
        hh.clear_captures();
        hh.emulator.tick();
        assert_eq!(hh.emulator.state(), State::Idle);
        let ids = hh.frame_ids();
        assert!(ids.contains(&(MessageId::SelectChargerCmd as u8)));
        assert!(ids.contains(&(MessageId::BumpSettings as u8)));
    }

    #[test]
    fn reconnect_request_waits_for_status_loop() {
        let hh = harness_with(
            Some(test_battery()),
            lipo_idx(),
            Duration::from_millis(100),
        );
        hh.emulator.start_notify();
        hh.emulator.connect_request();

        // A second CONNECT_REQUEST must wait for the running poller to
        // observe the dropped notify flag before reinitializing.
        let emulator = hh.emulator.clone();
        let second = thread::spawn(move || emulator.connect_request());
        second.join().unwrap();

        let acks = hh
            .frame_ids()
            .into_iter()
            .filter(|id| *id == MessageId::ConnectAck as u8)
            .count();
        assert_eq!(acks, 2);
        assert!(hh.emulator.notifying());
        hh.emulator.stop_notify();
    }

    #[test]
    fn gating_rejects_commands_outside_idle() {
        let hh = harness(lipo_idx());
        hh.emulator.start_notify();
        hh.emulator.connect_request();
        assert!(!hh.emulator.operations_disallowed());

        // Push the machine into Charging, then try to start again.
        hh.charger
            .lock()
            .unwrap()
            .statuses
            .push_back(status_with_mode(2));
        hh.emulator.tick();
        assert_eq!(hh.emulator.state(), State::Charging);
        hh.emulator.operation_start(0);
        assert_eq!(hh.emulator.forced_error(), Some(108));
        // The forced error drove the machine into the error state; the app
        // can clear it because it is not in the unclearable set.
        assert_eq!(hh.emulator.state(), State::Error);
        hh.emulator.clear_error(0);
        assert_eq!(hh.emulator.forced_error(), None);
        assert_eq!(hh.emulator.state(), State::Idle);

        // Stop issues an Enter and lands in Stopped.
        hh.charger
            .lock()
            .unwrap()
            .statuses
            .push_back(status_with_mode(2));
        hh.emulator.tick();
        assert_eq!(hh.emulator.state(), State::Charging);
        hh.clear_captures();
        hh.emulator.operation_stop(0);
        assert!(hh.commands().contains(&"enter".to_string()));
        assert_eq!(hh.emulator.state(), State::Stopped);

        // Only a dismiss releases a stopped session.
        hh.emulator.tick();
        assert_eq!(hh.emulator.state(), State::Stopped);
        hh.emulator.dismiss(0, false);
        assert_eq!(hh.emulator.state(), State::Idle);
    }

    #[test]
    fn manual_operation_is_rejected() {
        let hh = harness(lipo_idx());
        hh.emulator.start_notify();
        hh.emulator.connect_request();
        let request = ManualStart {
            charger_port_number: 0,
            chemistry: Chemistry::LiPo,
            cells: 3,
            operation: ChargerOperation::Normal,
            cell_term_v: 4.2,
            rate: 2200,
            balanced: true,
        };
        hh.emulator.manual_operation(request);
        assert_eq!(hh.emulator.forced_error(), Some(49));
    }

    #[test]
    fn selected_operation_switches_active_preset() {
        let hh = harness(lipo_idx());
        hh.emulator.start_notify();
        hh.emulator.connect_request();
        hh.clear_captures();

        hh.emulator.selected_operation(0, ChargerOperation::Discharge as u8);
        assert!(hh.commands().iter().any(|cmd| cmd == "SelP 5"));
        assert!(hh
            .frame_ids()
            .contains(&(MessageId::ChargerSettings as u8)));

        hh.emulator.operation_start(0);
        assert!(hh.commands().iter().any(|cmd| cmd == "discharge 2 true"));
    }

    #[test]
    fn analyze_preference_is_refused_at_construction() {
        let mut battery = test_battery();
        battery.pref_operation = ChargerOperation::Analyze;
        let charger = Arc::new(Mutex::new(FakeState::default()));
        let sink = Arc::new(CaptureSink::default());
        let result = Emulator::new(
            Box::new(FakeCharger(charger)),
            Some(battery),
            operation_map(),
            Duration::from_secs(1),
            Box::new(sink),
        );
        assert!(result.is_err());
    }
}
