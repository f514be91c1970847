// Evpipe Input Layer - Event Codes
// Numeric values from Linux input-event-codes.h used by the relay

/// EV_SYN event type code
pub const EV_SYN: u16 = 0x00;
/// EV_KEY event type code
pub const EV_KEY: u16 = 0x01;
/// EV_REL event type code
pub const EV_REL: u16 = 0x02;
/// EV_ABS event type code
pub const EV_ABS: u16 = 0x03;
/// EV_MSC event type code
pub const EV_MSC: u16 = 0x04;

pub const SYN_REPORT: u16 = 0;

pub const KEY_ENTER: u16 = 28;
pub const KEY_LEFTCTRL: u16 = 29;

pub const BTN_LEFT: u16 = 0x110;
pub const BTN_TOUCH: u16 = 0x14a;

pub const REL_WHEEL: u16 = 0x08;

pub const ABS_X: u16 = 0x00;
pub const ABS_Y: u16 = 0x01;

/// Key values carried by EV_KEY records
pub const KEY_RELEASE: i32 = 0;
pub const KEY_PRESS: i32 = 1;

/// Number of codes the kernel defines per event type (the `*_CNT` values).
pub const KEY_CNT: u16 = 0x300;
pub const REL_CNT: u16 = 0x10;
pub const ABS_CNT: u16 = 0x40;
pub const MSC_CNT: u16 = 0x08;

/// Exclusive upper bound for codes of `event_type`, if the type is bounded.
pub fn code_limit(event_type: u16) -> Option<u16> {
    match event_type {
        EV_KEY => Some(KEY_CNT),
        EV_REL => Some(REL_CNT),
        EV_ABS => Some(ABS_CNT),
        EV_MSC => Some(MSC_CNT),
        _ => None,
    }
}
