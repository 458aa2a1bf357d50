//! Static catalogs of bus nodes and command codes.
//!
//! Naming never fails: unknown ids simply resolve to `None` and keep
//! flowing through the system as raw bytes.

use crate::aux::{CommandId, TargetId};

pub fn target_name(id: TargetId) -> Option<&'static str> {
    match id {
        TargetId::ANY => Some("ANY"),
        TargetId::MB => Some("MB"),
        TargetId::HC => Some("HC"),
        TargetId::UKN1 => Some("UKN1"),
        TargetId::HC_PLUS => Some("HC+"),
        TargetId::AZM => Some("AZM"),
        TargetId::ALT => Some("ALT"),
        TargetId::APP => Some("APP"),
        TargetId::GPS => Some("GPS"),
        TargetId::UKN2 => Some("UKN2"),
        TargetId::WIFI => Some("WiFi"),
        TargetId::BAT => Some("BAT"),
        TargetId::CHG => Some("CHG"),
        TargetId::LIGHT => Some("LIGHT"),
        _ => None,
    }
}

pub fn target_id(name: &str) -> Option<TargetId> {
    match name {
        "ANY" => Some(TargetId::ANY),
        "MB" => Some(TargetId::MB),
        "HC" => Some(TargetId::HC),
        "UKN1" => Some(TargetId::UKN1),
        "HC+" => Some(TargetId::HC_PLUS),
        "AZM" => Some(TargetId::AZM),
        "ALT" => Some(TargetId::ALT),
        "APP" => Some(TargetId::APP),
        "GPS" => Some(TargetId::GPS),
        "UKN2" => Some(TargetId::UKN2),
        "WiFi" => Some(TargetId::WIFI),
        "BAT" => Some(TargetId::BAT),
        "CHG" => Some(TargetId::CHG),
        "LIGHT" => Some(TargetId::LIGHT),
        _ => None,
    }
}

/// Name of a command as understood by the given target. BAT, CHG and LIGHT
/// have their own small catalogs and fall back to the motor catalog on a
/// miss; everything else uses the motor catalog directly.
pub fn command_name(target: TargetId, id: CommandId) -> Option<&'static str> {
    device_command_name(target, id).or_else(|| motor_command_name(id))
}

/// Id of a named command for the given target, with the same lookup order
/// as [`command_name`].
pub fn command_id(target: TargetId, name: &str) -> Option<CommandId> {
    device_command_id(target, name).or_else(|| motor_command_id(name))
}

fn device_command_name(target: TargetId, id: CommandId) -> Option<&'static str> {
    match (target, id.0) {
        (TargetId::BAT, 0x10) => Some("GET_VOLTAGE"),
        (TargetId::BAT, 0x18) => Some("GET_SET_CURRENT"),
        (TargetId::CHG, 0x10) => Some("GET_SET_MODE"),
        (TargetId::LIGHT, 0x10) => Some("GET_SET_LEVEL"),
        _ => None,
    }
}

fn device_command_id(target: TargetId, name: &str) -> Option<CommandId> {
    match (target, name) {
        (TargetId::BAT, "GET_VOLTAGE") => Some(CommandId::GET_VOLTAGE),
        (TargetId::BAT, "GET_SET_CURRENT") => Some(CommandId::GET_SET_CURRENT),
        (TargetId::CHG, "GET_SET_MODE") => Some(CommandId::GET_SET_MODE),
        (TargetId::LIGHT, "GET_SET_LEVEL") => Some(CommandId::GET_SET_LEVEL),
        _ => None,
    }
}

fn motor_command_name(id: CommandId) -> Option<&'static str> {
    match id.0 {
        0x01 => Some("MC_GET_POSITION"),
        0x02 => Some("MC_GOTO_FAST"),
        0x04 => Some("MC_SET_POSITION"),
        0x05 => Some("MC_UNKNOWN_05"),
        0x06 => Some("MC_SET_POS_GUIDERATE"),
        0x07 => Some("MC_SET_NEG_GUIDERATE"),
        0x0b => Some("MC_LEVEL_START"),
        0x10 => Some("MC_SET_POS_BACKLASH"),
        0x11 => Some("MC_SET_NEG_BACKLASH"),
        0x13 => Some("MC_SLEW_DONE"),
        0x17 => Some("MC_GOTO_SLOW"),
        0x18 => Some("MC_AT_INDEX"),
        0x19 => Some("MC_SEEK_INDEX"),
        0x20 => Some("MC_SET_MAXRATE"),
        0x21 => Some("MC_GET_MAXRATE"),
        0x22 => Some("MC_ENABLE_MAXRATE"),
        0x23 => Some("MC_MAXRATE_ENABLED"),
        0x24 => Some("MC_MOVE_POS"),
        0x25 => Some("MC_MOVE_NEG"),
        0x38 => Some("MC_ENABLE_CORDWRAP"),
        0x39 => Some("MC_DISABLE_CORDWRAP"),
        0x3a => Some("MC_SET_CORDWRAP_POS"),
        0x3b => Some("MC_POLL_CORDWRAP"),
        0x3c => Some("MC_GET_CORDWRAP_POS"),
        0x40 => Some("MC_GET_POS_BACKLASH"),
        0x41 => Some("MC_GET_NEG_BACKLASH"),
        0x47 => Some("MC_GET_AUTOGUIDE_RATE"),
        0xfc => Some("MC_GET_APPROACH"),
        0xfd => Some("MC_SET_APPROACH"),
        0xfe => Some("GET_VER"),
        _ => None,
    }
}

fn motor_command_id(name: &str) -> Option<CommandId> {
    match name {
        "MC_GET_POSITION" => Some(CommandId::MC_GET_POSITION),
        "MC_GOTO_FAST" => Some(CommandId::MC_GOTO_FAST),
        "MC_SET_POSITION" => Some(CommandId::MC_SET_POSITION),
        "MC_UNKNOWN_05" => Some(CommandId::MC_UNKNOWN_05),
        "MC_SET_POS_GUIDERATE" => Some(CommandId::MC_SET_POS_GUIDERATE),
        "MC_SET_NEG_GUIDERATE" => Some(CommandId::MC_SET_NEG_GUIDERATE),
        "MC_LEVEL_START" => Some(CommandId::MC_LEVEL_START),
        "MC_SET_POS_BACKLASH" => Some(CommandId::MC_SET_POS_BACKLASH),
        "MC_SET_NEG_BACKLASH" => Some(CommandId::MC_SET_NEG_BACKLASH),
        "MC_SLEW_DONE" => Some(CommandId::MC_SLEW_DONE),
        "MC_GOTO_SLOW" => Some(CommandId::MC_GOTO_SLOW),
        "MC_AT_INDEX" => Some(CommandId::MC_AT_INDEX),
        "MC_SEEK_INDEX" => Some(CommandId::MC_SEEK_INDEX),
        "MC_SET_MAXRATE" => Some(CommandId::MC_SET_MAXRATE),
        "MC_GET_MAXRATE" => Some(CommandId::MC_GET_MAXRATE),
        "MC_ENABLE_MAXRATE" => Some(CommandId::MC_ENABLE_MAXRATE),
        "MC_MAXRATE_ENABLED" => Some(CommandId::MC_MAXRATE_ENABLED),
        "MC_MOVE_POS" => Some(CommandId::MC_MOVE_POS),
        "MC_MOVE_NEG" => Some(CommandId::MC_MOVE_NEG),
        "MC_ENABLE_CORDWRAP" => Some(CommandId::MC_ENABLE_CORDWRAP),
        "MC_DISABLE_CORDWRAP" => Some(CommandId::MC_DISABLE_CORDWRAP),
        "MC_SET_CORDWRAP_POS" => Some(CommandId::MC_SET_CORDWRAP_POS),
        "MC_POLL_CORDWRAP" => Some(CommandId::MC_POLL_CORDWRAP),
        "MC_GET_CORDWRAP_POS" => Some(CommandId::MC_GET_CORDWRAP_POS),
        "MC_GET_POS_BACKLASH" => Some(CommandId::MC_GET_POS_BACKLASH),
        "MC_GET_NEG_BACKLASH" => Some(CommandId::MC_GET_NEG_BACKLASH),
        "MC_GET_AUTOGUIDE_RATE" => Some(CommandId::MC_GET_AUTOGUIDE_RATE),
        "MC_GET_APPROACH" => Some(CommandId::MC_GET_APPROACH),
        "MC_SET_APPROACH" => Some(CommandId::MC_SET_APPROACH),
        "GET_VER" => Some(CommandId::GET_VER),
        _ => None,
    }
}

/// The hand controller's fixed rate ladder, in fractions of a full turn
/// per second: index 1..=5 are 1, 2, 5, 15 and 30 arc-minutes per second,
/// 6..=9 are 1, 2, 5 and 10 degrees per second.
pub const GUIDE_RATES: [f64; 10] = [
    0.0,
    1.0 / 21_600.0,
    2.0 / 21_600.0,
    5.0 / 21_600.0,
    15.0 / 21_600.0,
    30.0 / 21_600.0,
    1.0 / 360.0,
    2.0 / 360.0,
    5.0 / 360.0,
    10.0 / 360.0,
];

/// Ladder entry for a hand-controller rate index.
pub fn guide_rate(index: usize) -> Option<f64> {
    GUIDE_RATES.get(index).copied()
}
