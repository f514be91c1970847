// Evpipe Translator
// Per-device state machine turning remote-control records into keyboard and
// pointer events for two synthetic devices.
//
// Rules, first match wins:
// - sleep gate: while sleeping only a long press of a wake key is examined
// - sleep trigger: the suspend key releases the device and starts sleeping
// - pointer: touch codes become left-button clicks, wheel and absolute axes
//   drive the pointer while a touch is active
// - keyboard: remap table lookup with optional modifier bracketing
// - anything else is logged and dropped

use std::time::Duration;

use super::tables::RemapTable;
use super::{GrabRequest, RecordHandler, Translation};
use crate::input::codes::{
    ABS_X, ABS_Y, BTN_LEFT, BTN_TOUCH, EV_ABS, EV_KEY, EV_REL, KEY_ENTER, KEY_PRESS,
    KEY_RELEASE, REL_WHEEL,
};
use crate::input::EventRecord;
use crate::protocol::{AbsAxisInfo, DeviceDescriptor, EventMessage};

/// Handshake index of the synthetic keyboard
pub const KEYBOARD_INDEX: u32 = 0;
/// Handshake index of the synthetic pointer
pub const MOUSE_INDEX: u32 = 1;

/// Tunables of the remote-control profile.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteProfile {
    pub remap: RemapTable,
    /// Key that suspends forwarding (KEY_SOURCE on the reference remote)
    pub sleep_key: Option<u16>,
    /// Keys that resume forwarding when held
    pub wake_keys: Vec<u16>,
    /// Minimum hold of a wake key
    pub wake_hold: Duration,
    pub touch_down_code: u16,
    pub touch_up_code: u16,
    pub screen_width: i32,
    pub screen_height: i32,
}

impl Default for RemoteProfile {
    fn default() -> Self {
        Self {
            remap: RemapTable::default(),
            sleep_key: Some(241),
            wake_keys: vec![833, 872],
            wake_hold: Duration::from_secs(1),
            touch_down_code: 1198,
            touch_up_code: 1199,
            screen_width: 1920,
            screen_height: 1080,
        }
    }
}

impl RemoteProfile {
    /// Devices announced in the handshake, in index order.
    pub fn descriptors(&self) -> Vec<DeviceDescriptor> {
        let keyboard =
            DeviceDescriptor::new("keyboard", 1, 1).with_codes(EV_KEY, self.remap.output_codes());
        let mouse = DeviceDescriptor::new("mouse", 2, 2)
            .with_codes(EV_KEY, [BTN_LEFT, BTN_TOUCH])
            .with_codes(EV_REL, [REL_WHEEL])
            .with_abs_axis(EV_ABS, ABS_X, AbsAxisInfo::range(0, self.screen_width, 1))
            .with_abs_axis(EV_ABS, ABS_Y, AbsAxisInfo::range(0, self.screen_height, 1));
        vec![keyboard, mouse]
    }
}

/// Mutable state of one translated device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslatorState {
    pub sleeping: bool,
    /// Record timestamp (µs) of the last wake key press
    pub wake_hold_started_at: Option<i64>,
    pub mouse_touch_active: bool,
    pub skip_next_emit: bool,
}

enum PointerOutcome {
    Emit(EventMessage),
    /// Recognized but produces nothing
    Swallowed,
    NotPointer,
}

/// Remote-control translator.
#[derive(Debug, Clone)]
pub struct Translator {
    profile: RemoteProfile,
    state: TranslatorState,
}

impl Translator {
    pub fn new(profile: RemoteProfile) -> Self {
        Self {
            profile,
            state: TranslatorState::default(),
        }
    }

    pub fn profile(&self) -> &RemoteProfile {
        &self.profile
    }

    pub fn state(&self) -> &TranslatorState {
        &self.state
    }

    /// Translate one record into zero or more wire events.
    pub fn process(&mut self, record: &EventRecord) -> Translation {
        let mut out = Translation::default();

        if self.state.sleeping {
            self.process_sleeping(record, &mut out);
            return out;
        }

        if record.is_sync_marker() {
            return out;
        }

        if record.event_type == EV_KEY
            && Some(record.code) == self.profile.sleep_key
            && record.value == KEY_PRESS
        {
            log::info!("Suspend remote");
            self.state.sleeping = true;
            self.state.wake_hold_started_at = None;
            out.grab = Some(GrabRequest::Release);
            return out;
        }

        match self.convert_pointer(record) {
            PointerOutcome::Emit(event) => {
                self.emit_pointer(event, &mut out);
                if record.event_type == EV_KEY
                    && record.code == self.profile.touch_down_code
                    && record.value == KEY_PRESS
                {
                    // The next pointer event carries the coordinates from
                    // before the touch.
                    self.state.skip_next_emit = true;
                }
                return out;
            }
            PointerOutcome::Swallowed => return out,
            PointerOutcome::NotPointer => {}
        }

        if record.event_type == EV_KEY {
            if let Some(entry) = self.profile.remap.get(record.code).copied() {
                if entry.buggy_mouse {
                    self.state.skip_next_emit = true;
                }
                self.state.mouse_touch_active = false;

                let key = |value| EventMessage::new(KEYBOARD_INDEX, EV_KEY, entry.code, value);
                let modifier = entry
                    .modifier
                    .map(|m| move |value| EventMessage::new(KEYBOARD_INDEX, EV_KEY, m, value));

                match (record.value, modifier) {
                    (KEY_PRESS, Some(modifier)) => {
                        out.events.push(modifier(KEY_PRESS));
                        out.events.push(key(KEY_PRESS));
                    }
                    (KEY_RELEASE, Some(modifier)) => {
                        out.events.push(key(KEY_RELEASE));
                        out.events.push(modifier(KEY_RELEASE));
                    }
                    (value, _) => out.events.push(key(value)),
                }
                return out;
            }
        }

        log::info!(
            "Unhandled key: type {}, code {}, value {} at {}.{:06}",
            record.event_type,
            record.code,
            record.value,
            record.timestamp_sec,
            record.timestamp_usec
        );
        out
    }

    fn process_sleeping(&mut self, record: &EventRecord, out: &mut Translation) {
        if record.event_type != EV_KEY || !self.profile.wake_keys.contains(&record.code) {
            return;
        }

        match record.value {
            KEY_PRESS => self.state.wake_hold_started_at = Some(record.timestamp_micros()),
            KEY_RELEASE => {
                let Some(started) = self.state.wake_hold_started_at.take() else {
                    return;
                };
                let held = record.timestamp_micros().saturating_sub(started);
                if held > self.profile.wake_hold.as_micros() as i64 {
                    log::info!("Resume remote");
                    self.state.sleeping = false;
                    out.grab = Some(GrabRequest::Acquire);
                } else {
                    log::debug!("Wake key released after {}µs, still sleeping", held);
                }
            }
            _ => {}
        }
    }

    fn convert_pointer(&mut self, record: &EventRecord) -> PointerOutcome {
        let pointer = |event_type, code, value| {
            PointerOutcome::Emit(EventMessage::new(MOUSE_INDEX, event_type, code, value))
        };

        match record.event_type {
            EV_KEY if record.code == self.profile.touch_down_code => {
                if record.value != KEY_PRESS {
                    return PointerOutcome::Swallowed;
                }
                self.state.mouse_touch_active = true;
                pointer(EV_KEY, BTN_LEFT, KEY_PRESS)
            }
            EV_KEY if record.code == self.profile.touch_up_code => {
                if record.value != KEY_PRESS {
                    return PointerOutcome::Swallowed;
                }
                self.state.mouse_touch_active = false;
                pointer(EV_KEY, BTN_LEFT, KEY_RELEASE)
            }
            EV_KEY
                if self.state.mouse_touch_active
                    && (record.code == BTN_LEFT || record.code == KEY_ENTER) =>
            {
                pointer(EV_KEY, BTN_LEFT, record.value)
            }
            EV_ABS => {
                if self.state.mouse_touch_active {
                    pointer(EV_ABS, record.code, record.value)
                } else {
                    self.state.skip_next_emit = true;
                    PointerOutcome::Swallowed
                }
            }
            EV_REL if record.code == REL_WHEEL => {
                self.state.mouse_touch_active = true;
                pointer(EV_REL, REL_WHEEL, record.value)
            }
            _ => PointerOutcome::NotPointer,
        }
    }

    fn emit_pointer(&mut self, event: EventMessage, out: &mut Translation) {
        if self.state.skip_next_emit {
            self.state.skip_next_emit = false;
            log::debug!("Suppressed pointer event {:?}", event);
            return;
        }
        out.events.push(event);
    }
}

impl Default for Translator {
    fn default() -> Self {
        Self::new(RemoteProfile::default())
    }
}

impl RecordHandler for Translator {
    fn handle(&mut self, record: &EventRecord) -> Translation {
        self.process(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::codes::{EV_MSC, KEY_LEFTCTRL};
    use crate::translate::tables::RemapEntry;

    fn key(code: u16, value: i32) -> EventRecord {
        EventRecord::new(EV_KEY, code, value)
    }

    fn key_at(code: u16, value: i32, sec: i64, usec: i64) -> EventRecord {
        key(code, value).at(sec, usec)
    }

    fn kb(code: u16, value: i32) -> EventMessage {
        EventMessage::new(KEYBOARD_INDEX, EV_KEY, code, value)
    }

    fn events(t: &mut Translator, record: EventRecord) -> Vec<EventMessage> {
        t.process(&record).events.into_vec()
    }

    fn sleeping_translator() -> Translator {
        let mut t = Translator::default();
        let out = t.process(&key(241, 1));
        assert_eq!(out.grab, Some(GrabRequest::Release));
        assert!(t.state().sleeping);
        t
    }

    #[test]
    fn test_plain_remap() {
        let mut t = Translator::default();
        assert_eq!(events(&mut t, key(412, 1)), vec![kb(14, 1)]);
        assert_eq!(events(&mut t, key(412, 2)), vec![kb(14, 2)]);
        assert_eq!(events(&mut t, key(412, 0)), vec![kb(14, 0)]);
    }

    #[test]
    fn test_remap_with_modifier_brackets_key() {
        let mut t = Translator::default();
        assert_eq!(
            events(&mut t, key(398, 1)),
            vec![kb(KEY_LEFTCTRL, 1), kb(2, 1)]
        );
        assert_eq!(
            events(&mut t, key(398, 0)),
            vec![kb(2, 0), kb(KEY_LEFTCTRL, 0)]
        );
    }

    #[test]
    fn test_modifier_not_repeated_on_autorepeat() {
        let mut t = Translator::default();
        events(&mut t, key(398, 1));
        assert_eq!(events(&mut t, key(398, 2)), vec![kb(2, 2)]);
    }

    #[test]
    fn test_every_table_entry_translates_deterministically() {
        let profile = RemoteProfile::default();
        let entries: Vec<(u16, RemapEntry)> =
            profile.remap.iter().map(|(c, e)| (c, *e)).collect();
        for (code, entry) in entries {
            let mut t = Translator::new(profile.clone());
            let down = events(&mut t, key(code, 1));
            let up = events(&mut t, key(code, 0));
            match entry.modifier {
                Some(m) => {
                    assert_eq!(down, vec![kb(m, 1), kb(entry.code, 1)], "code {}", code);
                    assert_eq!(up, vec![kb(entry.code, 0), kb(m, 0)], "code {}", code);
                }
                None => {
                    assert_eq!(down, vec![kb(entry.code, 1)], "code {}", code);
                    assert_eq!(up, vec![kb(entry.code, 0)], "code {}", code);
                }
            }
        }
    }

    #[test]
    fn test_sync_marker_emits_nothing() {
        let mut t = Translator::default();
        assert!(t.process(&EventRecord::new(0, 0, 0)).is_empty());
    }

    #[test]
    fn test_unhandled_record_emits_nothing() {
        let mut t = Translator::default();
        assert!(t.process(&key(30, 1)).is_empty());
        assert!(t.process(&EventRecord::new(EV_MSC, 4, 0x70004)).is_empty());
        assert_eq!(t.state(), &TranslatorState::default());
    }

    #[test]
    fn test_sleep_trigger_suppresses_everything() {
        let mut t = sleeping_translator();
        assert!(t.process(&key(241, 0)).is_empty());
        assert!(t.process(&key(412, 1)).is_empty());
        assert!(t.process(&EventRecord::new(EV_REL, REL_WHEEL, 1)).is_empty());
    }

    #[test]
    fn test_short_wake_tap_keeps_sleeping() {
        let mut t = sleeping_translator();
        assert!(t.process(&key_at(833, 1, 10, 0)).grab.is_none());
        let out = t.process(&key_at(833, 0, 10, 900_000));
        assert!(out.grab.is_none());
        assert!(out.events.is_empty());
        assert!(t.state().sleeping);
    }

    #[test]
    fn test_wake_exactly_at_threshold_keeps_sleeping() {
        let mut t = sleeping_translator();
        t.process(&key_at(833, 1, 10, 0));
        t.process(&key_at(833, 0, 11, 0));
        assert!(t.state().sleeping);
    }

    #[test]
    fn test_long_wake_hold_resumes() {
        let mut t = sleeping_translator();
        t.process(&key_at(872, 1, 10, 0));
        let out = t.process(&key_at(872, 0, 11, 200_000));
        assert_eq!(out.grab, Some(GrabRequest::Acquire));
        assert!(out.events.is_empty());
        assert!(!t.state().sleeping);

        // Forwarding resumes.
        assert_eq!(events(&mut t, key(412, 1)), vec![kb(14, 1)]);
    }

    #[test]
    fn test_wake_press_restarts_hold() {
        let mut t = sleeping_translator();
        t.process(&key_at(833, 1, 10, 0));
        t.process(&key_at(833, 1, 12, 0));
        t.process(&key_at(833, 0, 12, 500_000));
        assert!(t.state().sleeping);
    }

    #[test]
    fn test_release_without_press_does_not_wake() {
        let mut t = sleeping_translator();
        t.process(&key_at(833, 0, 100, 0));
        assert!(t.state().sleeping);
    }

    #[test]
    fn test_touch_down_suppresses_following_stale_axis() {
        let mut t = Translator::default();
        let down = events(&mut t, key(1198, 1));
        assert_eq!(down, vec![EventMessage::new(MOUSE_INDEX, EV_KEY, BTN_LEFT, 1)]);

        // Stale coordinates right after the touch are dropped.
        assert!(t.process(&EventRecord::new(EV_ABS, ABS_X, 500)).is_empty());
        // Normal emission resumes.
        assert_eq!(
            events(&mut t, EventRecord::new(EV_ABS, ABS_X, 510)),
            vec![EventMessage::new(MOUSE_INDEX, EV_ABS, ABS_X, 510)]
        );
    }

    #[test]
    fn test_touch_up_releases_button() {
        let mut t = Translator::default();
        events(&mut t, key(1198, 1));
        events(&mut t, EventRecord::new(EV_ABS, ABS_X, 1));
        assert_eq!(
            events(&mut t, key(1199, 1)),
            vec![EventMessage::new(MOUSE_INDEX, EV_KEY, BTN_LEFT, 0)]
        );
        assert!(!t.state().mouse_touch_active);
    }

    #[test]
    fn test_touch_release_values_are_swallowed() {
        let mut t = Translator::default();
        assert!(t.process(&key(1198, 0)).is_empty());
        assert!(t.process(&key(1199, 0)).is_empty());
        assert!(!t.state().mouse_touch_active);
    }

    #[test]
    fn test_axis_without_touch_is_suppressed_and_arms_skip() {
        let mut t = Translator::default();
        assert!(t.process(&EventRecord::new(EV_ABS, ABS_Y, 42)).is_empty());
        assert!(t.state().skip_next_emit);

        // The wheel still activates the pointer but its event is the one skipped.
        assert!(t.process(&EventRecord::new(EV_REL, REL_WHEEL, -1)).is_empty());
        assert!(t.state().mouse_touch_active);
        assert_eq!(
            events(&mut t, EventRecord::new(EV_REL, REL_WHEEL, -1)),
            vec![EventMessage::new(MOUSE_INDEX, EV_REL, REL_WHEEL, -1)]
        );
    }

    #[test]
    fn test_enter_clicks_while_touch_active() {
        let mut t = Translator::default();
        events(&mut t, EventRecord::new(EV_REL, REL_WHEEL, 1));
        assert_eq!(
            events(&mut t, key(KEY_ENTER, 1)),
            vec![EventMessage::new(MOUSE_INDEX, EV_KEY, BTN_LEFT, 1)]
        );
    }

    #[test]
    fn test_left_click_without_touch_becomes_return() {
        let mut t = Translator::default();
        assert_eq!(events(&mut t, key(BTN_LEFT, 1)), vec![kb(KEY_ENTER, 1)]);
    }

    #[test]
    fn test_keyboard_use_ends_touch_mode() {
        let mut t = Translator::default();
        events(&mut t, EventRecord::new(EV_REL, REL_WHEEL, 1));
        events(&mut t, key(103, 1));
        assert!(!t.state().mouse_touch_active);
        assert_eq!(events(&mut t, key(KEY_ENTER, 1)), vec![kb(KEY_ENTER, 1)]);
    }

    #[test]
    fn test_buggy_mouse_key_swallows_trailing_pointer_event() {
        let mut t = Translator::default();
        assert_eq!(events(&mut t, key(773, 1)), vec![kb(1, 1)]);
        assert!(t.state().skip_next_emit);

        assert!(t.process(&EventRecord::new(EV_REL, REL_WHEEL, 1)).is_empty());
        assert!(!t.state().skip_next_emit);
        assert_eq!(events(&mut t, EventRecord::new(EV_REL, REL_WHEEL, 1)).len(), 1);
    }

    #[test]
    fn test_buggy_key_then_touch_down_is_suppressed() {
        let mut t = Translator::default();
        events(&mut t, key(773, 1));

        // The pending skip eats the touch-down itself, then the touch re-arms it.
        assert!(t.process(&key(1198, 1)).is_empty());
        assert!(t.state().mouse_touch_active);
        assert!(t.state().skip_next_emit);
        assert!(t.process(&EventRecord::new(EV_ABS, ABS_X, 500)).is_empty());
        assert_eq!(
            events(&mut t, EventRecord::new(EV_ABS, ABS_X, 510)),
            vec![EventMessage::new(MOUSE_INDEX, EV_ABS, ABS_X, 510)]
        );
    }

    #[test]
    fn test_tap_without_movement_loses_button_release() {
        let mut t = Translator::default();
        assert_eq!(
            events(&mut t, key(1198, 1)),
            vec![EventMessage::new(MOUSE_INDEX, EV_KEY, BTN_LEFT, 1)]
        );
        // No axis record consumed the skip, so the release is the event dropped.
        assert!(t.process(&key(1199, 1)).is_empty());
        assert!(!t.state().mouse_touch_active);
        assert!(!t.state().skip_next_emit);
    }

    #[test]
    fn test_skip_does_not_affect_keyboard_events() {
        let mut t = Translator::default();
        events(&mut t, key(139, 1));
        assert_eq!(events(&mut t, key(139, 0)), vec![kb(16, 0)]);
        assert!(t.state().skip_next_emit);
    }

    #[test]
    fn test_profile_descriptors() {
        let descriptors = RemoteProfile::default().descriptors();
        assert_eq!(descriptors.len(), 2);

        let keyboard = &descriptors[KEYBOARD_INDEX as usize];
        assert!(keyboard.supports(EV_KEY, 14));
        assert!(keyboard.supports(EV_KEY, KEY_LEFTCTRL));
        assert!(!keyboard.has_sync_capability());

        let mouse = &descriptors[MOUSE_INDEX as usize];
        assert!(mouse.supports(EV_KEY, BTN_LEFT));
        assert!(mouse.supports(EV_REL, REL_WHEEL));
        assert!(mouse.supports(EV_ABS, ABS_Y));
        assert_eq!((mouse.vendor, mouse.product), (2, 2));
    }
}
