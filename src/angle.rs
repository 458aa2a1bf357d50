//! Angles as fractions of a full turn, and their wire encodings.
//!
//! The protocol carries every angle and rate as a 24-bit fixed-point
//! fraction of one revolution, big-endian, unsigned on the wire: values in
//! `[0.5, 1)` are negative angles that wrapped around. The helpers here
//! keep that split explicit — [`pack_fraction`]/[`unpack_fraction`] are
//! bit-exact with the wire, [`normalize_fraction`] moves a raw wire value
//! into the signed `[-0.5, 0.5)` range used everywhere above the protocol
//! layer.

use std::fmt;

/// one revolution in 24-bit fixed point
const SCALE: f64 = (1u32 << 24) as f64;

/// A fraction of a turn that cannot be carried in the 3-byte wire field.
#[derive(Clone, Copy, Debug, PartialEq, thiserror::Error)]
#[error("fraction of a turn not representable on the wire: {value}")]
pub struct FractionOutOfRange {
    pub value: f64,
}

/// Encode a fraction of a turn into the 3-byte wire form.
///
/// The value is scaled by `2^24` and truncated toward zero; negative
/// fractions wrap into the upper half of the unsigned range, which is how
/// the motor controllers expect them.
pub fn pack_fraction(fraction: f64) -> Result<[u8; 3], FractionOutOfRange> {
    if !fraction.is_finite() || fraction <= -1.0 || fraction >= 1.0 {
        return Err(FractionOutOfRange { value: fraction });
    }
    let scaled = (fraction * SCALE) as i32;
    let bytes = scaled.to_be_bytes();
    Ok([bytes[1], bytes[2], bytes[3]])
}

/// Decode the 3-byte wire form into an unsigned fraction in `[0, 1)`.
pub fn unpack_fraction(bytes: [u8; 3]) -> f64 {
    u32::from_be_bytes([0x00, bytes[0], bytes[1], bytes[2]]) as f64 / SCALE
}

pub fn pack_u16(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

pub fn unpack_u16(bytes: [u8; 2]) -> u16 {
    u16::from_be_bytes(bytes)
}

/// Map any fraction onto the signed range `[-0.5, 0.5)`.
pub fn normalize_fraction(fraction: f64) -> f64 {
    let wrapped = fraction.rem_euclid(1.0);
    if wrapped >= 0.5 { wrapped - 1.0 } else { wrapped }
}

/// Minimal-arc difference: maps a delta of two fractions onto
/// `[-0.5, 0.5]`, so a target just across the wrap point is reached the
/// short way around.
pub fn wrap_delta(delta: f64) -> f64 {
    if delta > 0.5 {
        delta - 1.0
    } else if delta < -0.5 {
        delta + 1.0
    } else {
        delta
    }
}

/// An angle split into degrees, minutes and seconds. The sign lives on
/// its own so that angles smaller than one degree keep it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Dms {
    pub negative: bool,
    pub degrees: u32,
    pub minutes: u32,
    pub seconds: f64,
}

impl Dms {
    pub fn to_fraction(&self) -> f64 {
        let magnitude =
            self.degrees as f64 + self.minutes as f64 / 60.0 + self.seconds / 3600.0;
        let fraction = magnitude / 360.0;
        if self.negative { -fraction } else { fraction }
    }
}

impl fmt::Display for Dms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:03}°{:02}'{:04.1}\"",
            if self.negative { "-" } else { "" },
            self.degrees,
            self.minutes,
            self.seconds
        )
    }
}

/// Split a fraction of a turn into degrees, minutes and seconds.
pub fn fraction_to_dms(fraction: f64) -> Dms {
    let negative = fraction < 0.0;
    let total = 360.0 * fraction.abs();
    let degrees = total as u32;
    let minutes = ((total - degrees as f64) * 60.0) as u32;
    let seconds = (total - degrees as f64 - minutes as f64 / 60.0) * 3600.0;
    Dms {
        negative,
        degrees,
        minutes,
        seconds,
    }
}

#[cfg(test)]
mod tests {
    use crate::angle::{
        Dms, fraction_to_dms, normalize_fraction, pack_fraction, unpack_fraction, wrap_delta,
    };

    #[test]
    fn it_packs_the_goto_targets() {
        assert_eq!(pack_fraction(0.1).unwrap(), [0x19, 0x99, 0x99]);
        assert_eq!(pack_fraction(0.2).unwrap(), [0x33, 0x33, 0x33]);
        assert_eq!(pack_fraction(0.0).unwrap(), [0x00, 0x00, 0x00]);
    }

    #[test]
    fn negative_fractions_wrap_into_the_upper_half() {
        let bytes = pack_fraction(-0.25).unwrap();
        assert_eq!(bytes, [0xc0, 0x00, 0x00]);
        assert_eq!(unpack_fraction(bytes), 0.75);
        assert_eq!(normalize_fraction(unpack_fraction(bytes)), -0.25);
    }

    #[test]
    fn it_rejects_out_of_range_fractions() {
        assert!(pack_fraction(1.0).is_err());
        assert!(pack_fraction(-1.0).is_err());
        assert!(pack_fraction(f64::NAN).is_err());
        assert!(pack_fraction(0.999_999).is_ok());
    }

    #[test]
    fn pack_then_unpack_is_exact_on_the_wire_lattice() {
        let scale = (1u32 << 24) as f64;
        for k in [
            -(1i32 << 23),
            -1_677_722,
            -1,
            0,
            1,
            0x123456,
            1_677_721,
            (1 << 23) - 1,
        ] {
            let fraction = k as f64 / scale;
            let bytes = pack_fraction(fraction).unwrap();
            let back = normalize_fraction(unpack_fraction(bytes));
            assert_eq!(back, fraction, "k = {k}");
        }
    }

    #[test]
    fn it_unpacks_the_position_reply() {
        let fraction = unpack_fraction([0x12, 0x34, 0x56]);
        assert!((fraction - 0.071_111).abs() < 1e-6);

        // a hair under 25°36'
        let dms = fraction_to_dms(fraction);
        assert_eq!((dms.degrees, dms.minutes), (25, 35));
        assert!((dms.seconds - 59.886).abs() < 1e-3);
        assert_eq!(dms.to_string(), "025°35'59.9\"");
    }

    #[test]
    fn dms_round_trips_at_integer_arcseconds() {
        for (negative, degrees, minutes, seconds) in [
            (false, 0, 0, 1.0),
            (false, 25, 36, 0.0),
            (false, 179, 59, 59.0),
            (true, 0, 0, 30.0),
            (true, 0, 59, 59.0),
            (true, 89, 30, 15.0),
        ] {
            let dms = Dms {
                negative,
                degrees,
                minutes,
                seconds,
            };
            let fraction = dms.to_fraction();
            let back = fraction_to_dms(fraction).to_fraction();
            assert!(
                (back - fraction).abs() < 1e-9,
                "{degrees}°{minutes}'{seconds}\""
            );
        }
    }

    #[test]
    fn wrap_delta_takes_the_short_way_around() {
        assert_eq!(wrap_delta(0.1), 0.1);
        assert_eq!(wrap_delta(-0.4), -0.4);
        assert!((wrap_delta(0.75) + 0.25).abs() < 1e-12);
        assert!((wrap_delta(-0.75) - 0.25).abs() < 1e-12);
        assert_eq!(wrap_delta(0.5), 0.5);
    }

    #[test]
    fn normalize_covers_the_whole_circle() {
        assert_eq!(normalize_fraction(0.0), 0.0);
        assert_eq!(normalize_fraction(0.25), 0.25);
        assert_eq!(normalize_fraction(0.5), -0.5);
        assert_eq!(normalize_fraction(0.75), -0.25);
        assert_eq!(normalize_fraction(1.25), 0.25);
        assert_eq!(normalize_fraction(-0.25), -0.25);
    }
}
