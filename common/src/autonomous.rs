//! Display presence tracking and the periodic requests issued while no
//! display is attached.

use tracing::{info, warn};

use crate::{config::BridgeTiming, message::Message};

#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub display_present: bool,
    pub last_display_activity_ms: Option<u64>,
    pub last_status_request_ms: Option<u64>,
    pub last_settings_request_ms: Option<u64>,
    pub last_panel_override_ms: Option<u64>,
}

/// Which way presence flipped on this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    Connected,
    Lost,
}

#[derive(Debug, Clone)]
pub struct AutonomousController {
    timing: BridgeTiming,
}

impl AutonomousController {
    pub fn new(timing: BridgeTiming) -> Self {
        Self { timing }
    }

    /// Re-evaluate presence. Entering autonomous mode clears the timers so
    /// each action fires on the first autonomous tick; leaving it cancels the
    /// override cadence.
    pub fn update_presence(
        &self,
        state: &mut ConnectionState,
        display_configured: bool,
        now_ms: u64,
    ) -> Option<PresenceChange> {
        let present = display_configured
            && state
                .last_display_activity_ms
                .is_some_and(|last| now_ms.saturating_sub(last) < self.timing.presence_timeout_ms);

        if present == state.display_present {
            return None;
        }
        state.display_present = present;

        if present {
            info!("Display connected, relaying");
            state.last_panel_override_ms = None;
            Some(PresenceChange::Connected)
        } else {
            warn!(
                "No display traffic for {} ms, running autonomously",
                self.timing.presence_timeout_ms
            );
            state.last_status_request_ms = None;
            state.last_settings_request_ms = None;
            state.last_panel_override_ms = None;
            Some(PresenceChange::Lost)
        }
    }

    /// Messages due on this tick. Nothing is due while the display is present.
    pub fn due(
        &self,
        state: &mut ConnectionState,
        now_ms: u64,
        panel_override_c: Option<f32>,
    ) -> Vec<Message> {
        let mut messages = Vec::new();
        if state.display_present {
            return messages;
        }

        if is_due(
            &mut state.last_status_request_ms,
            now_ms,
            self.timing.status_request_interval_ms,
        ) {
            messages.push(Message::StatusRequest);
        }
        if is_due(
            &mut state.last_settings_request_ms,
            now_ms,
            self.timing.settings_request_interval_ms,
        ) {
            messages.push(Message::SettingsRequest);
        }
        if let Some(temp) = panel_override_c.filter(|temp| temp.is_finite()) {
            if is_due(
                &mut state.last_panel_override_ms,
                now_ms,
                self.timing.panel_override_interval_ms,
            ) {
                messages.push(Message::PanelTemperature(
                    temp.round().clamp(i8::MIN as f32, i8::MAX as f32) as i8,
                ));
            }
        }
        messages
    }
}

fn is_due(last: &mut Option<u64>, now_ms: u64, interval_ms: u64) -> bool {
    let due = last.map_or(true, |last| now_ms.saturating_sub(last) >= interval_ms);
    if due {
        *last = Some(now_ms);
    }
    due
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> AutonomousController {
        AutonomousController::new(BridgeTiming::default())
    }

    fn count(messages: &[Vec<Message>], wanted: &Message) -> usize {
        messages
            .iter()
            .flatten()
            .filter(|message| {
                std::mem::discriminant(*message) == std::mem::discriminant(wanted)
            })
            .count()
    }

    #[test]
    fn presence_times_out() {
        let autonomous = controller();
        let mut state = ConnectionState {
            last_display_activity_ms: Some(1_000),
            ..ConnectionState::default()
        };

        assert_eq!(
            autonomous.update_presence(&mut state, true, 1_000),
            Some(PresenceChange::Connected)
        );
        assert_eq!(autonomous.update_presence(&mut state, true, 5_999), None);
        assert_eq!(
            autonomous.update_presence(&mut state, true, 6_000),
            Some(PresenceChange::Lost)
        );

        state.last_display_activity_ms = Some(7_000);
        assert_eq!(
            autonomous.update_presence(&mut state, true, 7_000),
            Some(PresenceChange::Connected)
        );
    }

    #[test]
    fn unconfigured_display_is_never_present() {
        let autonomous = controller();
        let mut state = ConnectionState {
            last_display_activity_ms: Some(0),
            ..ConnectionState::default()
        };
        assert_eq!(autonomous.update_presence(&mut state, false, 0), None);
        assert!(!state.display_present);
    }

    #[test]
    fn periodic_cadences() {
        let autonomous = controller();
        let mut state = ConnectionState::default();

        let ticks: Vec<_> = (0..=10_000)
            .step_by(10)
            .map(|now| autonomous.due(&mut state, now, Some(21.4)))
            .collect();

        assert_eq!(count(&ticks, &Message::StatusRequest), 6);
        assert_eq!(count(&ticks, &Message::SettingsRequest), 2);
        assert_eq!(count(&ticks, &Message::PanelTemperature(0)), 11);
        assert_eq!(
            ticks[0],
            vec![
                Message::StatusRequest,
                Message::SettingsRequest,
                Message::PanelTemperature(21)
            ]
        );
    }

    #[test]
    fn override_requires_finite_value() {
        let autonomous = controller();
        let mut state = ConnectionState::default();
        assert_eq!(
            autonomous.due(&mut state, 0, Some(f32::NAN)),
            vec![Message::StatusRequest, Message::SettingsRequest]
        );
        assert!(autonomous.due(&mut state, 1_000, None).is_empty());
    }

    #[test]
    fn nothing_due_while_display_present() {
        let autonomous = controller();
        let mut state = ConnectionState {
            display_present: true,
            ..ConnectionState::default()
        };
        assert!(autonomous.due(&mut state, 0, Some(20.0)).is_empty());
    }

    #[test]
    fn losing_display_resets_timers() {
        let autonomous = controller();
        let mut state = ConnectionState {
            display_present: true,
            last_status_request_ms: Some(100),
            last_settings_request_ms: Some(100),
            last_display_activity_ms: Some(0),
            ..ConnectionState::default()
        };
        autonomous.update_presence(&mut state, true, 5_000);
        assert!(!state.display_present);
        assert_eq!(
            autonomous.due(&mut state, 5_000, None),
            vec![Message::StatusRequest, Message::SettingsRequest]
        );
    }
}
