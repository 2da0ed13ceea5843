//! The session state machine.
//!
//! Events come from two places: each fresh status reading decodes into an
//! event through [`Event::from_status`], and the session injects explicit
//! events (CONNECTED, STOP, DISMISS, DISCONNECTED) around app commands.
//!
//! Transitions are pure; the one entry side effect (clearing the charger's
//! halt-for-safety prompt with an Enter) is returned as an [`Effect`] for
//! the session to carry out.

use crate::charger::status::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Idle,
    Starting,
    Charging,
    Discharging,
    Monitoring,
    Completed,
    Stopped,
    Error,
    HaltForSafety,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    None,
    Connected,
    Disconnected,
    Idle,
    Starting,
    Charging,
    Discharging,
    Monitoring,
    Stop,
    ChargingComplete,
    DischargingComplete,
    Dismiss,
    Error,
    HaltForSafety,
}

/// Work a transition asks the session to do on entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    /// Entered `HaltForSafety`: send the charger an Enter to dismiss its
    /// safety prompt.
    ClearHalt,
}

impl Event {
    /// Decode a status reading into the event it represents.
    pub fn from_status(status: &Status) -> Event {
        match status.mode() {
            0 => Event::Idle,
            1 => Event::Starting,
            2..=7 => {
                if status.is_charge_discharge_complete() {
                    Event::ChargingComplete
                } else {
                    Event::Charging
                }
            }
            8 => {
                if status.is_charge_discharge_complete() {
                    Event::DischargingComplete
                } else {
                    Event::Discharging
                }
            }
            9 => Event::Monitoring,
            10 => Event::HaltForSafety,
            0x63 => Event::Error,
            _ => Event::None,
        }
    }
}

impl State {
    /// Apply an event. Unlisted combinations stay in the current state.
    pub fn on_event(self, event: Event) -> (State, Effect) {
        use Event as E;
        use State as S;

        let next = match (self, event) {
            (S::Disconnected, E::Connected) => S::Idle,
            (S::Disconnected, _) => return (self, Effect::None),

            (S::Idle, E::HaltForSafety) => return (S::HaltForSafety, Effect::ClearHalt),
            (S::Idle, E::Starting) => S::Starting,
            (S::Idle, E::Charging) => S::Charging,
            (S::Idle, E::Discharging) => S::Discharging,
            (S::Idle, E::Monitoring) => S::Monitoring,
            (S::Idle, E::Stop) => S::Stopped,
            (S::Idle, E::ChargingComplete | E::DischargingComplete) => S::Completed,
            (S::Idle, E::Error) => S::Error,
            (S::Idle, E::Disconnected) => S::Disconnected,

            (S::Starting, E::HaltForSafety) => return (S::HaltForSafety, Effect::ClearHalt),
            (S::Starting, E::Charging) => S::Charging,
            (S::Starting, E::Discharging) => S::Discharging,
            (S::Starting, E::Idle) => S::Idle,
            (S::Starting, E::Stop) => S::Stopped,
            (S::Starting, E::ChargingComplete | E::DischargingComplete) => S::Completed,
            (S::Starting, E::Error) => S::Error,
            (S::Starting, E::Disconnected) => S::Disconnected,

            (S::Charging, E::Stop) => S::Stopped,
            (S::Charging, E::ChargingComplete | E::DischargingComplete) => S::Completed,
            (S::Charging, E::Error) => S::Error,
            (S::Charging, E::Starting) => S::Starting,
            (S::Charging, E::Discharging) => S::Discharging,
            (S::Charging, E::Idle) => S::Idle,
            (S::Charging, E::Disconnected) => S::Disconnected,

            (S::Discharging, E::Stop) => S::Stopped,
            (S::Discharging, E::ChargingComplete | E::DischargingComplete) => S::Completed,
            (S::Discharging, E::Error) => S::Error,
            (S::Discharging, E::Starting) => S::Starting,
            (S::Discharging, E::Charging) => S::Charging,
            (S::Discharging, E::Idle) => S::Idle,
            (S::Discharging, E::Disconnected) => S::Disconnected,

            (S::Monitoring, E::Starting) => S::Starting,
            (S::Monitoring, E::Charging) => S::Charging,
            (S::Monitoring, E::Discharging) => S::Discharging,
            (S::Monitoring, E::Idle) => S::Idle,
            (S::Monitoring, E::Stop) => S::Stopped,
            (S::Monitoring, E::ChargingComplete | E::DischargingComplete) => S::Completed,
            (S::Monitoring, E::Error) => S::Error,
            (S::Monitoring, E::Disconnected) => S::Disconnected,

            (S::Completed | S::Stopped | S::Error, E::Dismiss) => S::Idle,
            (S::Completed | S::Stopped | S::Error, E::Disconnected) => S::Disconnected,

            (S::HaltForSafety, E::Stop) => S::Stopped,
            (S::HaltForSafety, E::ChargingComplete | E::DischargingComplete) => S::Completed,
            (S::HaltForSafety, E::Error) => S::Error,
            (S::HaltForSafety, E::Charging) => S::Charging,
            (S::HaltForSafety, E::Discharging) => S::Discharging,
            (S::HaltForSafety, E::Monitoring) => S::Monitoring,
            (S::HaltForSafety, E::Idle) => S::Idle,
            (S::HaltForSafety, E::Disconnected) => S::Disconnected,

            _ => self,
        };
        (next, Effect::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charger::status::STATUS_LEN;

    const ALL_EVENTS: [Event; 14] = [
        Event::None,
        Event::Connected,
        Event::Disconnected,
        Event::Idle,
        Event::Starting,
        Event::Charging,
        Event::Discharging,
        Event::Monitoring,
        Event::Stop,
        Event::ChargingComplete,
        Event::DischargingComplete,
        Event::Dismiss,
        Event::Error,
        Event::HaltForSafety,
    ];

    fn status_with_mode(mode: u8, complete: bool) -> Status {
        let mut data = vec![0u8; STATUS_LEN];
        data[133] = mode;
        if complete {
            data[44..46].copy_from_slice(&(1u16 << 8).to_be_bytes());
        }
        Status::new(data).unwrap()
    }

    #[test]
    fn status_decodes_to_events() {
        assert_eq!(Event::from_status(&status_with_mode(0, false)), Event::Idle);
        assert_eq!(Event::from_status(&status_with_mode(1, false)), Event::Starting);
        for mode in 2..=7 {
            assert_eq!(Event::from_status(&status_with_mode(mode, false)), Event::Charging);
            assert_eq!(
                Event::from_status(&status_with_mode(mode, true)),
                Event::ChargingComplete
            );
        }
        assert_eq!(Event::from_status(&status_with_mode(8, false)), Event::Discharging);
        assert_eq!(
            Event::from_status(&status_with_mode(8, true)),
            Event::DischargingComplete
        );
        assert_eq!(Event::from_status(&status_with_mode(9, false)), Event::Monitoring);
        assert_eq!(
            Event::from_status(&status_with_mode(10, false)),
            Event::HaltForSafety
        );
        assert_eq!(Event::from_status(&status_with_mode(0x63, false)), Event::Error);
        assert_eq!(Event::from_status(&status_with_mode(42, false)), Event::None);
    }

    #[test]
    fn disconnected_only_leaves_on_connected() {
        for event in ALL_EVENTS {
            let (next, effect) = State::Disconnected.on_event(event);
            assert_eq!(effect, Effect::None);
            if event == Event::Connected {
                assert_eq!(next, State::Idle);
            } else {
                assert_eq!(next, State::Disconnected);
            }
        }
    }

    #[test]
    fn terminal_states_need_dismiss() {
        for state in [State::Completed, State::Stopped, State::Error] {
            for event in ALL_EVENTS {
                let (next, _) = state.on_event(event);
                match event {
                    Event::Dismiss => assert_eq!(next, State::Idle),
                    Event::Disconnected => assert_eq!(next, State::Disconnected),
                    _ => assert_eq!(next, state),
                }
            }
        }
    }

    #[test]
    fn halt_entry_requests_clear() {
        let (next, effect) = State::Idle.on_event(Event::HaltForSafety);
        assert_eq!(next, State::HaltForSafety);
        assert_eq!(effect, Effect::ClearHalt);
        let (next, effect) = State::Starting.on_event(Event::HaltForSafety);
        assert_eq!(next, State::HaltForSafety);
        assert_eq!(effect, Effect::ClearHalt);
        // Staying in halt does not re-clear.
        let (next, effect) = State::HaltForSafety.on_event(Event::HaltForSafety);
        assert_eq!(next, State::HaltForSafety);
        assert_eq!(effect, Effect::None);
        // Working states ignore halt.
        let (next, _) = State::Charging.on_event(Event::HaltForSafety);
        assert_eq!(next, State::Charging);
    }

    #[test]
    fn working_state_flow() {
        let (next, _) = State::Idle.on_event(Event::Starting);
        assert_eq!(next, State::Starting);
        let (next, _) = next.on_event(Event::Charging);
        assert_eq!(next, State::Charging);
        let (next, _) = next.on_event(Event::ChargingComplete);
        assert_eq!(next, State::Completed);
        let (next, _) = next.on_event(Event::Dismiss);
        assert_eq!(next, State::Idle);
    }
}
