//! Framing and codec for the AUX bus protocol.
//!
//! Every node inside the mount (motor controllers, battery, charger, the
//! hand controller and us) talks on a shared serial bus. The WiFi bridge
//! relays the raw bus bytes over TCP, so the frame format here is exactly
//! what travels between the motor boards:
//!
//! ```text
//! preamble  length  src  dst  mid  payload[0..n]  checksum
//!   0x3b      1       1    1    1      n bytes        1
//! ```
//!
//! `length` counts src, dst, mid and the payload (`3 + n`). The checksum
//! is the two's complement of the byte sum over everything after the
//! preamble, so a whole frame (checksum included) sums to zero mod 256.
//!
//! Everything in this module is pure; the I/O lives in
//! [`session`](crate::session).

pub mod registry;

use std::fmt;

use bytes::BufMut;

/// Frame start marker on the wire.
pub const PREAMBLE: u8 = 0x3b;

/// length + src + dst + mid; nothing shorter can be a frame
const MIN_FRAME: usize = 4;

/// One node on the AUX bus.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetId(pub u8);

impl TargetId {
    pub const ANY: Self = Self(0x00);
    pub const MB: Self = Self(0x01);
    pub const HC: Self = Self(0x04);
    /// observed on the bus, purpose unknown
    pub const UKN1: Self = Self(0x05);
    pub const HC_PLUS: Self = Self(0x0d);
    pub const AZM: Self = Self(0x10);
    pub const ALT: Self = Self(0x11);
    /// that's us: an app connected through the bridge
    pub const APP: Self = Self(0x20);
    pub const GPS: Self = Self(0xb0);
    /// observed on the bus, purpose unknown
    pub const UKN2: Self = Self(0xb4);
    pub const WIFI: Self = Self(0xb5);
    pub const BAT: Self = Self(0xb6);
    pub const CHG: Self = Self(0xb7);
    pub const LIGHT: Self = Self(0xbf);

    /// Controllers are the nodes that originate commands; replies are
    /// addressed to one of them.
    pub fn is_controller(&self) -> bool {
        matches!(*self, Self::HC | Self::HC_PLUS | Self::APP)
    }
}

impl fmt::Debug for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match registry::target_name(*self) {
            Some(name) => f.write_str(name),
            None => write!(f, "TargetId(0x{:02x})", self.0),
        }
    }
}

/// A command code. Its meaning depends on the target it is sent to; see
/// [`registry`] for the catalogs.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandId(pub u8);

impl CommandId {
    // motor controller (ALT/AZM) catalog
    pub const MC_GET_POSITION: Self = Self(0x01);
    pub const MC_GOTO_FAST: Self = Self(0x02);
    pub const MC_SET_POSITION: Self = Self(0x04);
    /// sent by the stock app during init; not documented anywhere
    pub const MC_UNKNOWN_05: Self = Self(0x05);
    pub const MC_SET_POS_GUIDERATE: Self = Self(0x06);
    pub const MC_SET_NEG_GUIDERATE: Self = Self(0x07);
    pub const MC_LEVEL_START: Self = Self(0x0b);
    pub const MC_SET_POS_BACKLASH: Self = Self(0x10);
    pub const MC_SET_NEG_BACKLASH: Self = Self(0x11);
    pub const MC_SLEW_DONE: Self = Self(0x13);
    pub const MC_GOTO_SLOW: Self = Self(0x17);
    pub const MC_AT_INDEX: Self = Self(0x18);
    pub const MC_SEEK_INDEX: Self = Self(0x19);
    pub const MC_SET_MAXRATE: Self = Self(0x20);
    pub const MC_GET_MAXRATE: Self = Self(0x21);
    pub const MC_ENABLE_MAXRATE: Self = Self(0x22);
    pub const MC_MAXRATE_ENABLED: Self = Self(0x23);
    pub const MC_MOVE_POS: Self = Self(0x24);
    pub const MC_MOVE_NEG: Self = Self(0x25);
    pub const MC_ENABLE_CORDWRAP: Self = Self(0x38);
    pub const MC_DISABLE_CORDWRAP: Self = Self(0x39);
    pub const MC_SET_CORDWRAP_POS: Self = Self(0x3a);
    pub const MC_POLL_CORDWRAP: Self = Self(0x3b);
    pub const MC_GET_CORDWRAP_POS: Self = Self(0x3c);
    pub const MC_GET_POS_BACKLASH: Self = Self(0x40);
    pub const MC_GET_NEG_BACKLASH: Self = Self(0x41);
    pub const MC_GET_AUTOGUIDE_RATE: Self = Self(0x47);
    pub const MC_GET_APPROACH: Self = Self(0xfc);
    pub const MC_SET_APPROACH: Self = Self(0xfd);
    pub const GET_VER: Self = Self(0xfe);

    // battery controller
    pub const GET_VOLTAGE: Self = Self(0x10);
    pub const GET_SET_CURRENT: Self = Self(0x18);

    // charger
    pub const GET_SET_MODE: Self = Self(0x10);

    // status light
    pub const GET_SET_LEVEL: Self = Self(0x10);
}

impl fmt::Debug for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandId(0x{:02x})", self.0)
    }
}

/// One AUX frame, minus the wire trimmings (preamble, length, checksum are
/// derived on encode).
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    pub source: TargetId,
    pub destination: TargetId,
    pub id: CommandId,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(source: TargetId, destination: TargetId, id: CommandId, payload: Vec<u8>) -> Self {
        Self {
            source,
            destination,
            id,
            payload,
        }
    }

    /// A command from us ([`TargetId::APP`]) to a bus node.
    pub fn command(destination: TargetId, id: CommandId, payload: Vec<u8>) -> Self {
        Self::new(TargetId::APP, destination, id, payload)
    }

    /// Value of the wire length field: src, dst, mid plus the payload.
    pub fn length(&self) -> u8 {
        (self.payload.len() + 3) as u8
    }

    /// Checksum over the length field, the addresses, the command id and
    /// the payload.
    pub fn checksum(&self) -> u8 {
        let header = [self.length(), self.source.0, self.destination.0, self.id.0];
        header
            .iter()
            .chain(self.payload.iter())
            .fold(0u8, |sum, byte| sum.wrapping_add(*byte))
            .wrapping_neg()
    }

    /// Write the full wire form, preamble and checksum included.
    pub fn encode<B: BufMut>(&self, buffer: &mut B) {
        buffer.put_u8(PREAMBLE);
        buffer.put_u8(self.length());
        buffer.put_u8(self.source.0);
        buffer.put_u8(self.destination.0);
        buffer.put_u8(self.id.0);
        buffer.put_slice(&self.payload);
        buffer.put_u8(self.checksum());
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.payload.len() + 6);
        self.encode(&mut buffer);
        buffer
    }

    /// Parse one frame slice as produced by [`split_stream`]: everything
    /// after the preamble, checksum byte included. Trailing bytes beyond
    /// `length + 1` are ignored, so line noise glued to the end of a frame
    /// doesn't invalidate it.
    ///
    /// A checksum mismatch still hands back the decoded fields inside the
    /// error, for diagnostics.
    pub fn parse(frame: &[u8]) -> Result<Self, FrameError> {
        if frame.len() < MIN_FRAME {
            return Err(FrameError::ShortFrame { length: frame.len() });
        }
        let length = frame[0] as usize;
        if length < 3 || frame.len() < length + 2 {
            return Err(FrameError::ShortFrame { length: frame.len() });
        }

        let message = Self {
            source: TargetId(frame[1]),
            destination: TargetId(frame[2]),
            id: CommandId(frame[3]),
            payload: frame[4..length + 1].to_vec(),
        };

        let computed = checksum(&frame[..length + 1]);
        let received = frame[length + 1];
        if computed != received {
            return Err(FrameError::Checksum {
                computed,
                received,
                message,
            });
        }

        Ok(message)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} -> {:?} ", self.source, self.destination)?;

        // replies are addressed to a controller, so the catalog that names
        // the command belongs to the other end
        let subject = if self.destination.is_controller() {
            self.source
        } else {
            self.destination
        };
        match registry::command_name(subject, self.id) {
            Some(name) => f.write_str(name)?,
            None => write!(f, "0x{:02x}", self.id.0)?,
        }

        if !self.payload.is_empty() {
            write!(f, " [")?;
            for (i, byte) in self.payload.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{byte:02x}")?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// Errors from [`Message::parse`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short: {length} bytes")]
    ShortFrame { length: usize },
    #[error("checksum mismatch: computed 0x{computed:02x}, received 0x{received:02x}")]
    Checksum {
        computed: u8,
        received: u8,
        message: Message,
    },
}

/// Two's complement of the byte sum, truncated to one byte.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |sum, byte| sum.wrapping_add(*byte))
        .wrapping_neg()
}

/// Slice an inbound buffer into frame slices on the `0x3b` preamble.
///
/// Returns the completed slices (suitable for [`Message::parse`]) and the
/// unconsumed tail. The tail is either empty or starts with a preamble
/// whose frame hasn't fully arrived yet; append the next read to it and
/// call again. Whatever precedes the first preamble is bridge noise and is
/// dropped, as are slices between preambles too short to be a frame.
pub fn split_stream(buffer: &[u8]) -> (Vec<&[u8]>, &[u8]) {
    let mut frames = Vec::new();
    let empty = &buffer[buffer.len()..];

    let Some(first) = buffer.iter().position(|&byte| byte == PREAMBLE) else {
        return (frames, empty);
    };

    let mut start = first + 1;
    while let Some(offset) = buffer[start..].iter().position(|&byte| byte == PREAMBLE) {
        let slice = &buffer[start..start + offset];
        if slice.len() >= MIN_FRAME {
            frames.push(slice);
        }
        start = start + offset + 1;
    }

    let tail = &buffer[start..];
    if !tail.is_empty() && tail.len() >= tail[0] as usize + 2 {
        frames.push(tail);
        (frames, empty)
    } else {
        // keep the preamble so the reassembled frame still parses
        (frames, &buffer[start - 1..])
    }
}

#[cfg(test)]
mod tests {
    use crate::aux::{CommandId, FrameError, Message, TargetId, checksum, split_stream};

    fn position_request() -> Message {
        Message::command(TargetId::ALT, CommandId::MC_GET_POSITION, vec![])
    }

    #[test]
    fn it_encodes_a_position_request() {
        assert_eq!(
            position_request().to_bytes(),
            [0x3b, 0x03, 0x20, 0x11, 0x01, 0xcb]
        );
    }

    #[test]
    fn it_parses_a_position_reply() {
        let message = Message::parse(&[0x06, 0x11, 0x20, 0x01, 0x12, 0x34, 0x56, 0x2c]).unwrap();
        assert_eq!(message.source, TargetId::ALT);
        assert_eq!(message.destination, TargetId::APP);
        assert_eq!(message.id, CommandId::MC_GET_POSITION);
        assert_eq!(message.payload, [0x12, 0x34, 0x56]);
    }

    #[test]
    fn a_full_frame_sums_to_zero() {
        let mut frame = Message::command(
            TargetId::AZM,
            CommandId::MC_GOTO_FAST,
            vec![0x33, 0x33, 0x33],
        )
        .to_bytes();
        // everything after the preamble, checksum included
        frame.remove(0);
        assert_eq!(frame.iter().fold(0u8, |sum, b| sum.wrapping_add(*b)), 0);
        assert_eq!(checksum(&frame), 0);
    }

    #[test]
    fn it_splits_a_stream() {
        let wire = [
            0x00, 0x3b, 0x03, 0x20, 0x11, 0xfe, 0xce, 0x3b, 0x03, 0x20, 0x10, 0xfe, 0xcf,
        ];
        let (frames, remainder) = split_stream(&wire);
        assert!(remainder.is_empty());
        assert_eq!(frames.len(), 2);

        let first = Message::parse(frames[0]).unwrap();
        assert_eq!(first.destination, TargetId::ALT);
        assert_eq!(first.id, CommandId::GET_VER);
        let second = Message::parse(frames[1]).unwrap();
        assert_eq!(second.destination, TargetId::AZM);
        assert_eq!(second.id, CommandId::GET_VER);
    }

    #[test]
    fn it_recovers_frames_between_noise() {
        let messages = [
            position_request(),
            Message::command(TargetId::AZM, CommandId::MC_GOTO_SLOW, vec![0x19, 0x99, 0x99]),
            Message::new(TargetId::BAT, TargetId::APP, CommandId::GET_VOLTAGE, vec![0x01, 0x02]),
        ];

        // noise must not contain the preamble byte
        let mut wire = vec![0x12, 0x00, 0xff];
        for message in &messages {
            wire.extend_from_slice(&message.to_bytes());
            wire.extend_from_slice(&[0x01, 0x02, 0xfe]);
        }

        let (frames, _remainder) = split_stream(&wire);
        let parsed: Vec<Message> = frames
            .into_iter()
            .map(|frame| Message::parse(frame).unwrap())
            .collect();
        assert_eq!(parsed, messages);
    }

    #[test]
    fn it_splits_incrementally() {
        let mut wire = vec![0xaa];
        for message in [
            position_request(),
            Message::command(TargetId::AZM, CommandId::MC_SLEW_DONE, vec![]),
            Message::command(TargetId::ALT, CommandId::MC_GOTO_FAST, vec![0x19, 0x99, 0x99]),
        ] {
            wire.extend_from_slice(&message.to_bytes());
        }

        let (whole, remainder) = split_stream(&wire);
        assert!(remainder.is_empty());
        let whole: Vec<Vec<u8>> = whole.into_iter().map(<[u8]>::to_vec).collect();

        for cut in 0..wire.len() {
            let (head, tail) = wire.split_at(cut);
            let (mut frames, remainder) = {
                let (frames, remainder) = split_stream(head);
                (
                    frames.into_iter().map(<[u8]>::to_vec).collect::<Vec<_>>(),
                    remainder.to_vec(),
                )
            };

            let mut rest = remainder;
            rest.extend_from_slice(tail);
            let (more, remainder) = split_stream(&rest);
            assert!(remainder.is_empty(), "cut at {cut}");
            frames.extend(more.into_iter().map(<[u8]>::to_vec));

            assert_eq!(frames, whole, "cut at {cut}");
        }
    }

    #[test]
    fn it_keeps_an_incomplete_tail() {
        let wire = position_request().to_bytes();
        let (frames, remainder) = split_stream(&wire[..4]);
        assert!(frames.is_empty());
        assert_eq!(remainder, &wire[..4]);
    }

    #[test]
    fn it_reports_checksum_mismatches_with_the_fields() {
        let mut frame = position_request().to_bytes();
        frame.remove(0);
        let last = frame.len() - 1;
        frame[last] ^= 0xff;

        match Message::parse(&frame) {
            Err(FrameError::Checksum {
                computed, message, ..
            }) => {
                assert_eq!(computed, 0xcb);
                assert_eq!(message.destination, TargetId::ALT);
            }
            other => panic!("expected checksum error, got {other:?}"),
        }
    }

    #[test]
    fn it_rejects_short_frames() {
        assert_eq!(
            Message::parse(&[0x03, 0x20]),
            Err(FrameError::ShortFrame { length: 2 })
        );
        // length field promises more than the slice holds
        assert_eq!(
            Message::parse(&[0x06, 0x11, 0x20, 0x01, 0x12]),
            Err(FrameError::ShortFrame { length: 5 })
        );
    }

    #[test]
    fn it_names_messages_for_debugging() {
        let reply = Message::new(
            TargetId::ALT,
            TargetId::APP,
            CommandId::MC_GET_POSITION,
            vec![0x12, 0x34, 0x56],
        );
        assert_eq!(format!("{reply:?}"), "ALT -> APP MC_GET_POSITION [12 34 56]");

        let voltage = Message::command(TargetId::BAT, CommandId::GET_VOLTAGE, vec![]);
        assert_eq!(format!("{voltage:?}"), "APP -> BAT GET_VOLTAGE");
    }
}
