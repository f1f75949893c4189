//! ASCII line protocol spoken by the gateway.
//!
//! Requests are a single opcode character followed by the two frame bytes
//! as fixed width upper case hex, e.g. `h02FE\n`. Replies are single lines
//! starting with a status prefix character. There is no checksum, so
//! decoding never fails: anything unexpected becomes
//! [`ResponseToken::Invalid`] or [`ResponseToken::NoResponse`].

use std::fmt;

/// Prefix of a backward frame reported by the gateway
pub const ANSWER_PREFIX: u8 = b'J';
/// Reply token for a YES (0xff) answer
pub const ACK_TOKEN: &str = "JFF";

const VERSION_PREFIX: u8 = b'V';

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Opcode {
    /// Send a 16-bit frame once
    Send,
    /// Send a 16-bit frame twice, for configuration commands
    SendTwice,
    /// Gateway version request, no frame
    Version,
    /// Bus state request, no frame
    BusStatus,
}

impl Opcode {
    pub fn as_byte(&self) -> u8 {
        match self {
            Opcode::Send => b'h',
            Opcode::SendTwice => b't',
            Opcode::Version => b'v',
            Opcode::BusStatus => b'd',
        }
    }

    pub fn from_byte(b: u8) -> Option<Opcode> {
        match b {
            b'h' => Some(Opcode::Send),
            b't' => Some(Opcode::SendTwice),
            b'v' => Some(Opcode::Version),
            b'd' => Some(Opcode::BusStatus),
            _ => None,
        }
    }

    /// True if the request carries a bus frame
    pub fn has_frame(&self) -> bool {
        matches!(self, Opcode::Send | Opcode::SendTwice)
    }
}

/// One request to the gateway
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    pub opcode: Opcode,
    pub address: u8,
    pub data: u8,
}

fn hex_digit(v: u8) -> u8 {
    b"0123456789ABCDEF"[(v & 0x0f) as usize]
}

fn hex_value(c: u8) -> Option<u8> {
    (c as char).to_digit(16).map(|d| d as u8)
}

fn hex_byte(s: &[u8]) -> Option<u8> {
    match s {
        [h, l, ..] => Some((hex_value(*h)? << 4) | hex_value(*l)?),
        _ => None,
    }
}

impl CommandFrame {
    pub fn new(opcode: Opcode, address: u8, data: u8) -> CommandFrame {
        CommandFrame {
            opcode,
            address,
            data,
        }
    }

    pub fn send(address: u8, data: u8) -> CommandFrame {
        Self::new(Opcode::Send, address, data)
    }

    pub fn send_twice(address: u8, data: u8) -> CommandFrame {
        Self::new(Opcode::SendTwice, address, data)
    }

    /// Serialize as `<op><addr hex><data hex>\n`
    pub fn encode(&self) -> Vec<u8> {
        if !self.opcode.has_frame() {
            return encode_bare(self.opcode);
        }
        vec![
            self.opcode.as_byte(),
            hex_digit(self.address >> 4),
            hex_digit(self.address),
            hex_digit(self.data >> 4),
            hex_digit(self.data),
            b'\n',
        ]
    }

    /// Parse a request line as written by [`CommandFrame::encode`]
    pub fn parse(line: &[u8]) -> Option<CommandFrame> {
        let line = trim_line(line);
        let (&op, rest) = line.split_first()?;
        let opcode = Opcode::from_byte(op)?;
        if !opcode.has_frame() {
            return if rest.is_empty() {
                Some(CommandFrame::new(opcode, 0, 0))
            } else {
                None
            };
        }
        if rest.len() != 4 {
            return None;
        }
        Some(CommandFrame {
            opcode,
            address: hex_byte(&rest[0..2])?,
            data: hex_byte(&rest[2..4])?,
        })
    }
}

impl fmt::Display for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:02X}{:02X}",
            self.opcode.as_byte() as char,
            self.address,
            self.data
        )
    }
}

/// Request without a bus frame, e.g. `v\n`
pub fn encode_bare(opcode: Opcode) -> Vec<u8> {
    vec![opcode.as_byte(), b'\n']
}

/// Meaning of the bytes read back after a request
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResponseToken {
    /// YES answer
    Affirmative,
    DeviceStatusReport(u8),
    /// Level 0..=254
    LevelReport(u8),
    Invalid,
    NoResponse,
}

fn trim_line(raw: &[u8]) -> &[u8] {
    let mut s = raw;
    while let [b'\r' | b'\n', rest @ ..] = s {
        s = rest;
    }
    while let [rest @ .., b'\r' | b'\n'] = s {
        s = rest;
    }
    s
}

fn strip_terminators(raw: &[u8]) -> Vec<u8> {
    raw.iter()
        .copied()
        .filter(|c| *c != b'\n' && *c != b'\r')
        .collect()
}

fn contains(haystack: &[u8], needle: &str) -> bool {
    haystack
        .windows(needle.len())
        .any(|w| w == needle.as_bytes())
}

fn answer_byte(payload: &[u8]) -> Option<u8> {
    match payload {
        [ANSWER_PREFIX, rest @ ..] => hex_byte(rest),
        _ => None,
    }
}

/// Classify a reply to a query expecting a YES or a level
pub fn decode(raw: &[u8]) -> ResponseToken {
    let payload = strip_terminators(raw);
    if payload.is_empty() {
        return ResponseToken::NoResponse;
    }
    if contains(&payload, ACK_TOKEN) {
        return ResponseToken::Affirmative;
    }
    match answer_byte(&payload) {
        Some(level) if level <= 254 => ResponseToken::LevelReport(level),
        _ => ResponseToken::Invalid,
    }
}

/// Classify a reply to QUERY STATUS. All 8 bits are meaningful so 0xff is
/// reported as a status, not as a YES.
pub fn decode_status(raw: &[u8]) -> ResponseToken {
    let payload = strip_terminators(raw);
    if payload.is_empty() {
        return ResponseToken::NoResponse;
    }
    match answer_byte(&payload) {
        Some(status) => ResponseToken::DeviceStatusReport(status),
        None => ResponseToken::Invalid,
    }
}

/// State of the bus as reported by the gateway
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BusStatus {
    NoPower,
    /// Bus current too high, the bus can't be driven low
    CurrentTooHigh,
    Ok,
    /// Bus voltage above 24 V
    OverVoltage,
    Invalid,
}

impl fmt::Display for BusStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusStatus::NoPower => write!(f, "No power on DALI bus"),
            BusStatus::CurrentTooHigh => {
                write!(f, "Bus current too high - cannot drive to zero")
            }
            BusStatus::Ok => write!(f, "DALI bus OK"),
            BusStatus::OverVoltage => write!(f, "Bus voltage > 24V"),
            BusStatus::Invalid => write!(f, "Invalid response received"),
        }
    }
}

pub fn decode_bus_status(raw: &[u8]) -> BusStatus {
    let payload = strip_terminators(raw);
    const TOKENS: [(&str, BusStatus); 4] = [
        ("D01", BusStatus::NoPower),
        ("D11", BusStatus::CurrentTooHigh),
        ("D21", BusStatus::Ok),
        ("D41", BusStatus::OverVoltage),
    ];
    TOKENS
        .iter()
        .find(|(token, _)| contains(&payload, token))
        .map_or(BusStatus::Invalid, |(_, status)| *status)
}

/// Gateway hardware and firmware identification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayVersion {
    pub hardware: String,
    pub firmware: String,
    pub hardware_type: String,
}

impl fmt::Display for GatewayVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "V{}{}{} (HW version: {}, FW version: {}, hardware type: {})",
            self.hardware,
            self.firmware,
            self.hardware_type,
            self.hardware,
            self.firmware,
            self.hardware_type
        )
    }
}

pub fn decode_version(raw: &[u8]) -> Option<GatewayVersion> {
    let payload = trim_line(raw);
    let [VERSION_PREFIX, rest @ ..] = payload else {
        return None;
    };
    if rest.len() < 6 || !rest[..6].is_ascii() {
        return None;
    }
    let field = |r: std::ops::Range<usize>| String::from_utf8_lossy(&rest[r]).into_owned();
    Some(GatewayVersion {
        hardware: field(0..2),
        firmware: field(2..4),
        hardware_type: field(4..6),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_literal() {
        let frame = CommandFrame::new(Opcode::Send, 0x02, 0xfe);
        assert_eq!(frame.encode(), b"h02FE\n".to_vec());
        assert_eq!(CommandFrame::send_twice(0xff, 0x20).encode(), b"tFF20\n");
        assert_eq!(encode_bare(Opcode::Version), b"v\n");
        assert_eq!(frame.to_string(), "h02FE");
    }

    #[test]
    fn frame_round_trip() {
        for opcode in [Opcode::Send, Opcode::SendTwice] {
            for address in 0..=0xffu8 {
                for data in 0..=0xffu8 {
                    let frame = CommandFrame::new(opcode, address, data);
                    let line = frame.encode();
                    assert_eq!(line.len(), 6);
                    assert_eq!(CommandFrame::parse(&line), Some(frame));
                }
            }
        }
        assert_eq!(
            CommandFrame::parse(b"d\n"),
            Some(CommandFrame::new(Opcode::BusStatus, 0, 0))
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(CommandFrame::parse(b""), None);
        assert_eq!(CommandFrame::parse(b"x0000\n"), None);
        assert_eq!(CommandFrame::parse(b"h0G00\n"), None);
        assert_eq!(CommandFrame::parse(b"h000\n"), None);
        assert_eq!(CommandFrame::parse(b"v00\n"), None);
    }

    #[test]
    fn decode_replies() {
        assert_eq!(decode(b""), ResponseToken::NoResponse);
        assert_eq!(decode(b"\n"), ResponseToken::NoResponse);
        assert_eq!(decode(b"JFF\n"), ResponseToken::Affirmative);
        assert_eq!(decode(b"N\nJFF\n"), ResponseToken::Affirmative);
        assert_eq!(decode(b"J78\n"), ResponseToken::LevelReport(120));
        assert_eq!(decode(b"J00"), ResponseToken::LevelReport(0));
        assert_eq!(decode(b"JFE\r\n"), ResponseToken::LevelReport(254));
        assert_eq!(decode(b"JZ1\n"), ResponseToken::Invalid);
        assert_eq!(decode(b"J7"), ResponseToken::Invalid);
        assert_eq!(decode(b"X12\n"), ResponseToken::Invalid);
        assert_eq!(decode(&[0xc3, 0x28, b'\n']), ResponseToken::Invalid);
    }

    #[test]
    fn decode_status_replies() {
        assert_eq!(decode_status(b"J24\n"), ResponseToken::DeviceStatusReport(0x24));
        assert_eq!(decode_status(b"JFF\n"), ResponseToken::DeviceStatusReport(0xff));
        assert_eq!(decode_status(b"N\n"), ResponseToken::Invalid);
        assert_eq!(decode_status(b""), ResponseToken::NoResponse);
    }

    #[test]
    fn decode_gateway_info() {
        assert_eq!(decode_bus_status(b"D21\n"), BusStatus::Ok);
        assert_eq!(decode_bus_status(b"D01\n"), BusStatus::NoPower);
        assert_eq!(decode_bus_status(b"D99\n"), BusStatus::Invalid);
        let v = decode_version(b"V010203\n").unwrap();
        assert_eq!(v.hardware, "01");
        assert_eq!(v.firmware, "02");
        assert_eq!(v.hardware_type, "03");
        assert_eq!(decode_version(b"V01\n"), None);
        assert_eq!(decode_version(b""), None);
    }
}
