/*
 * Copyright 2019 The Regents of the University of California
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 *
 */

//! The binary TLV control/status wire format (§4.7).
//!
//! A packet is one kind byte (`0x00` STATUS, `0x01` CMD) followed by a
//! sequence of tag/length/value records terminated by an `EOL` tag
//! (`0x00`). Length is one byte if its high bit is clear; otherwise the
//! low 7 bits give the byte count `n` of a big-endian length that
//! follows. Values are typed per tag (§4.7's "selected, authoritative
//! list", extended here with `OUTPUT_SAMPRATE` and `BLOCK_SEQUENCE`,
//! both exercised by §8's end-to-end scenarios and invariants but
//! omitted from the prose tag list).

use std::convert::TryFrom;
use std::fmt;
use std::io::Cursor;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// Packet kind, the first byte of every datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Server-to-client status report.
    Status,
    /// Client-to-server command.
    Cmd,
}

impl PacketKind {
    fn to_byte(self) -> u8 {
        match self {
            PacketKind::Status => 0x00,
            PacketKind::Cmd => 0x01,
        }
    }

    fn from_byte(b: u8) -> Result<Self, TlvError> {
        match b {
            0x00 => Ok(PacketKind::Status),
            0x01 => Ok(PacketKind::Cmd),
            other => Err(TlvError::UnknownPacketKind(other)),
        }
    }
}

/// Control-plane tag set (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Tag {
    /// Echoes the tag of a command that failed to apply (§7
    /// "Propagation").
    CommandTag = 1,
    /// The channel's ssrc.
    OutputSsrc = 2,
    /// Target tuned frequency, hertz.
    RadioFrequency = 3,
    /// Frontend first-LO frequency, hertz (STATUS only).
    FirstLoFrequency = 4,
    /// Display shift added to the reported frequency, hertz.
    ShiftFrequency = 5,
    /// Doppler shift, hertz.
    DopplerFrequency = 6,
    /// Doppler rate, hertz/sec.
    DopplerFrequencyRate = 7,
    /// Lower passband edge relative to center, hertz.
    LowEdge = 8,
    /// Upper passband edge relative to center, hertz.
    HighEdge = 9,
    /// Kaiser window shape parameter.
    KaiserBeta = 10,
    /// Second filter tap count; `0` disables it.
    Filter2 = 11,
    /// Second filter's Kaiser shape parameter.
    Filter2KaiserBeta = 12,
    /// Name of a preset to apply.
    Preset = 13,
    /// Demodulator type selector.
    DemodType = 14,
    /// Independent-sideband mode toggle.
    IndependentSideband = 15,
    /// Squelch threshold-extend toggle.
    ThreshExtend = 16,
    /// Output headroom/clip ceiling.
    Headroom = 17,
    /// AGC enable toggle.
    AgcEnable = 18,
    /// Manual/AGC output gain.
    Gain = 19,
    /// AGC hangtime, seconds.
    AgcHangtime = 20,
    /// AGC recovery rate, dB/sec.
    AgcRecoveryRate = 21,
    /// AGC target amplitude.
    AgcThreshold = 22,
    /// Linear-demod PLL enable toggle.
    PllEnable = 23,
    /// PLL loop bandwidth, hertz.
    PllBw = 24,
    /// PLL square (frequency-doubling) mode toggle.
    PllSquare = 25,
    /// Linear-demod envelope (AM) vs. coherent sub-mode toggle.
    Envelope = 26,
    /// SNR-based squelch metric enable toggle.
    SnrSquelch = 27,
    /// Output audio channel count (1 or 2).
    OutputChannels = 28,
    /// Squelch open threshold, dB (sentinel `<= -999.0` = always open).
    SquelchOpen = 29,
    /// Squelch close threshold, dB.
    SquelchClose = 30,
    /// Spectrum analyzer bin bandwidth, hertz.
    NoncoherentBinBw = 31,
    /// Spectrum analyzer bin count.
    BinCount = 32,
    /// Blocks between periodic STATUS emissions.
    StatusInterval = 33,
    /// Output encoding selector.
    OutputEncoding = 34,
    /// Opus target bitrate, bits/sec.
    OpusBitRate = 35,
    /// Generic option bitmask to set (escape hatch; not further
    /// interpreted by the core).
    Setopts = 36,
    /// Generic option bitmask to clear.
    Clearopts = 37,
    /// Frontend attenuation, dB.
    RfAtten = 38,
    /// Frontend gain, dB.
    RfGain = 39,
    /// Output transport minimum packet size, samples.
    Minpacket = 40,
    /// Destination socket for this channel's output data.
    OutputDataDestSocket = 41,
    /// Output (channel) sample rate, samples/sec.
    OutputSamprate = 42,
    /// Last master FFT block sequence processed (STATUS only; §8's
    /// monotonicity invariant is checked against this field).
    BlockSequence = 43,
    /// Current squelch state, `true` meaning open (STATUS only; §4.3,
    /// §4.8).
    SquelchState = 44,
    /// Current carrier/pilot PLL lock indicator (STATUS only; §4.4,
    /// §4.5, §4.8).
    PllLocked = 45,
    /// Spectrum analyzer bin-power vector (STATUS only; §4.6, §4.8).
    BinData = 46,
    /// Cumulative demodulation error count (STATUS only; §4.8 "aggregate
    /// counters").
    ErrorCount = 47,
}

impl Tag {
    /// The [`ValueKind`] this tag's value is encoded as.
    pub fn value_kind(self) -> ValueKind {
        use ValueKind::*;
        match self {
            Tag::CommandTag => Byte,
            Tag::OutputSsrc => Int32,
            Tag::RadioFrequency => Float64,
            Tag::FirstLoFrequency => Float64,
            Tag::ShiftFrequency => Float64,
            Tag::DopplerFrequency => Float64,
            Tag::DopplerFrequencyRate => Float64,
            Tag::LowEdge => Float64,
            Tag::HighEdge => Float64,
            Tag::KaiserBeta => Float64,
            Tag::Filter2 => Int32,
            Tag::Filter2KaiserBeta => Float64,
            Tag::Preset => Str,
            Tag::DemodType => Byte,
            Tag::IndependentSideband => Bool,
            Tag::ThreshExtend => Bool,
            Tag::Headroom => Float32,
            Tag::AgcEnable => Bool,
            Tag::Gain => Float32,
            Tag::AgcHangtime => Float32,
            Tag::AgcRecoveryRate => Float32,
            Tag::AgcThreshold => Float32,
            Tag::PllEnable => Bool,
            Tag::PllBw => Float32,
            Tag::PllSquare => Bool,
            Tag::Envelope => Bool,
            Tag::SnrSquelch => Bool,
            Tag::OutputChannels => Byte,
            Tag::SquelchOpen => Float32,
            Tag::SquelchClose => Float32,
            Tag::NoncoherentBinBw => Float64,
            Tag::BinCount => Int32,
            Tag::StatusInterval => Int32,
            Tag::OutputEncoding => Byte,
            Tag::OpusBitRate => Int32,
            Tag::Setopts => Int32,
            Tag::Clearopts => Int32,
            Tag::RfAtten => Float32,
            Tag::RfGain => Float32,
            Tag::Minpacket => Int32,
            Tag::OutputDataDestSocket => Socket,
            Tag::OutputSamprate => Int32,
            Tag::BlockSequence => Int64,
            Tag::SquelchState => Bool,
            Tag::PllLocked => Bool,
            Tag::BinData => FloatVector,
            Tag::ErrorCount => Int32,
        }
    }
}

impl TryFrom<u8> for Tag {
    type Error = TlvError;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        match b {
            1 => Ok(Tag::CommandTag),
            2 => Ok(Tag::OutputSsrc),
            3 => Ok(Tag::RadioFrequency),
            4 => Ok(Tag::FirstLoFrequency),
            5 => Ok(Tag::ShiftFrequency),
            6 => Ok(Tag::DopplerFrequency),
            7 => Ok(Tag::DopplerFrequencyRate),
            8 => Ok(Tag::LowEdge),
            9 => Ok(Tag::HighEdge),
            10 => Ok(Tag::KaiserBeta),
            11 => Ok(Tag::Filter2),
            12 => Ok(Tag::Filter2KaiserBeta),
            13 => Ok(Tag::Preset),
            14 => Ok(Tag::DemodType),
            15 => Ok(Tag::IndependentSideband),
            16 => Ok(Tag::ThreshExtend),
            17 => Ok(Tag::Headroom),
            18 => Ok(Tag::AgcEnable),
            19 => Ok(Tag::Gain),
            20 => Ok(Tag::AgcHangtime),
            21 => Ok(Tag::AgcRecoveryRate),
            22 => Ok(Tag::AgcThreshold),
            23 => Ok(Tag::PllEnable),
            24 => Ok(Tag::PllBw),
            25 => Ok(Tag::PllSquare),
            26 => Ok(Tag::Envelope),
            27 => Ok(Tag::SnrSquelch),
            28 => Ok(Tag::OutputChannels),
            29 => Ok(Tag::SquelchOpen),
            30 => Ok(Tag::SquelchClose),
            31 => Ok(Tag::NoncoherentBinBw),
            32 => Ok(Tag::BinCount),
            33 => Ok(Tag::StatusInterval),
            34 => Ok(Tag::OutputEncoding),
            35 => Ok(Tag::OpusBitRate),
            36 => Ok(Tag::Setopts),
            37 => Ok(Tag::Clearopts),
            38 => Ok(Tag::RfAtten),
            39 => Ok(Tag::RfGain),
            40 => Ok(Tag::Minpacket),
            41 => Ok(Tag::OutputDataDestSocket),
            42 => Ok(Tag::OutputSamprate),
            43 => Ok(Tag::BlockSequence),
            44 => Ok(Tag::SquelchState),
            45 => Ok(Tag::PllLocked),
            46 => Ok(Tag::BinData),
            47 => Ok(Tag::ErrorCount),
            other => Err(TlvError::UnknownTag(other)),
        }
    }
}

/// The wire representation of one tag's value (§4.7 "Value encoders").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Single byte.
    Byte,
    /// Big-endian 32-bit signed integer.
    Int32,
    /// Big-endian 64-bit signed integer.
    Int64,
    /// Big-endian IEEE-754 single precision.
    Float32,
    /// Big-endian IEEE-754 double precision.
    Float64,
    /// UTF-8 string, no embedded NUL.
    Str,
    /// Single byte, `0` or `1`.
    Bool,
    /// Address family (1 byte, `4`=IPv4) + address + port.
    Socket,
    /// Count (big-endian `u32`) followed by that many big-endian `f32`
    /// elements (§4.7 "vector (count + elements)"); used for the
    /// spectrum analyzer's bin-power snapshot.
    FloatVector,
}

/// A decoded tag/value pair.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// See [`ValueKind::Byte`].
    Byte(u8),
    /// See [`ValueKind::Int32`].
    Int32(i32),
    /// See [`ValueKind::Int64`].
    Int64(i64),
    /// See [`ValueKind::Float32`].
    Float32(f32),
    /// See [`ValueKind::Float64`].
    Float64(f64),
    /// See [`ValueKind::Str`].
    Str(String),
    /// See [`ValueKind::Bool`].
    Bool(bool),
    /// See [`ValueKind::Socket`].
    Socket(SocketAddr),
    /// See [`ValueKind::FloatVector`].
    FloatVector(Vec<f32>),
}

/// Errors from decoding a TLV packet or an individual value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlvError {
    /// The packet's first byte was neither `0x00` nor `0x01`.
    UnknownPacketKind(u8),
    /// A tag byte did not match any entry in [`Tag`]; per §7, the
    /// record is skipped rather than aborting the whole packet.
    UnknownTag(u8),
    /// A length or value ran past the end of the buffer; per §7, the
    /// packet is dropped.
    Truncated,
    /// A value's byte length did not match what its tag's
    /// [`ValueKind`] requires.
    ValueLengthMismatch { tag: u8, expected: usize, got: usize },
    /// A string value was not valid UTF-8.
    InvalidUtf8,
    /// A socket value named an unsupported address family byte.
    UnsupportedAddressFamily(u8),
}

impl fmt::Display for TlvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlvError::UnknownPacketKind(b) => write!(f, "unknown packet kind byte 0x{:02x}", b),
            TlvError::UnknownTag(b) => write!(f, "unknown tag byte 0x{:02x}", b),
            TlvError::Truncated => write!(f, "truncated TLV record"),
            TlvError::ValueLengthMismatch { tag, expected, got } => write!(
                f,
                "tag 0x{:02x}: expected {} value bytes, got {}",
                tag, expected, got
            ),
            TlvError::InvalidUtf8 => write!(f, "string value was not valid UTF-8"),
            TlvError::UnsupportedAddressFamily(b) => write!(f, "unsupported address family {}", b),
        }
    }
}

impl std::error::Error for TlvError {}

/// A raw, not-yet-type-interpreted record: a tag byte (including
/// unrecognized ones) and its value bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// The tag byte as it appeared on the wire.
    pub tag: u8,
    /// The value bytes, exactly `length` long.
    pub value: Vec<u8>,
}

/// Decodes a full packet: kind byte, then TLV records up to `EOL`.
pub fn decode_packet(bytes: &[u8]) -> Result<(PacketKind, Vec<RawRecord>), TlvError> {
    if bytes.is_empty() {
        return Err(TlvError::Truncated);
    }
    let kind = PacketKind::from_byte(bytes[0])?;
    let records = decode_records(&bytes[1..])?;
    Ok((kind, records))
}

/// Encodes a full packet: kind byte, then records, then `EOL`.
pub fn encode_packet(kind: PacketKind, records: &[RawRecord]) -> Vec<u8> {
    let mut out = vec![kind.to_byte()];
    encode_records(records, &mut out);
    out
}

/// Decodes a bare TLV record sequence (no leading kind byte), stopping
/// at `EOL` (tag `0x00`) or the end of the buffer.
pub fn decode_records(bytes: &[u8]) -> Result<Vec<RawRecord>, TlvError> {
    let mut records = Vec::new();
    let mut pos = 0usize;
    loop {
        if pos >= bytes.len() {
            break;
        }
        let tag = bytes[pos];
        pos += 1;
        if tag == 0 {
            break;
        }
        let (length, consumed) = read_length(&bytes[pos..])?;
        pos += consumed;
        if pos + length > bytes.len() {
            return Err(TlvError::Truncated);
        }
        let value = bytes[pos..pos + length].to_vec();
        pos += length;
        records.push(RawRecord { tag, value });
    }
    Ok(records)
}

/// Encodes a TLV record sequence, appending a trailing `EOL`.
pub fn encode_records(records: &[RawRecord], out: &mut Vec<u8>) {
    for record in records {
        out.push(record.tag);
        write_length(out, record.value.len());
        out.extend_from_slice(&record.value);
    }
    out.push(0); // EOL
}

fn read_length(bytes: &[u8]) -> Result<(usize, usize), TlvError> {
    if bytes.is_empty() {
        return Err(TlvError::Truncated);
    }
    let first = bytes[0];
    if first & 0x80 == 0 {
        Ok((first as usize, 1))
    } else {
        let n = (first & 0x7f) as usize;
        if bytes.len() < 1 + n || n > 8 {
            return Err(TlvError::Truncated);
        }
        let mut length: u64 = 0;
        for &b in &bytes[1..1 + n] {
            length = (length << 8) | b as u64;
        }
        Ok((length as usize, 1 + n))
    }
}

fn write_length(out: &mut Vec<u8>, length: usize) {
    if length < 0x80 {
        out.push(length as u8);
        return;
    }
    let mut be = Vec::new();
    let mut remaining = length as u64;
    while remaining > 0 {
        be.push((remaining & 0xff) as u8);
        remaining >>= 8;
    }
    be.reverse();
    out.push(0x80 | be.len() as u8);
    out.extend_from_slice(&be);
}

/// Interprets a raw record's value bytes per its tag's [`ValueKind`].
/// Unrecognized tags were already filtered out by [`decode_records`]
/// only in the sense that they parse structurally; this is where an
/// out-of-range tag byte, picked up again via [`Tag::try_from`], is
/// resolved, or a value whose length doesn't match its kind is
/// rejected (both non-fatal to the rest of the packet: the caller
/// skips the record and continues, per §7).
pub fn decode_value(raw: &RawRecord) -> Result<(Tag, Value), TlvError> {
    let tag = Tag::try_from(raw.tag)?;
    let value = match tag.value_kind() {
        ValueKind::Byte => {
            expect_len(raw, 1)?;
            Value::Byte(raw.value[0])
        }
        ValueKind::Bool => {
            expect_len(raw, 1)?;
            Value::Bool(raw.value[0] != 0)
        }
        ValueKind::Int32 => {
            expect_len(raw, 4)?;
            let mut cursor = Cursor::new(&raw.value);
            Value::Int32(cursor.read_i32::<BigEndian>().map_err(|_| TlvError::Truncated)?)
        }
        ValueKind::Int64 => {
            expect_len(raw, 8)?;
            let mut cursor = Cursor::new(&raw.value);
            Value::Int64(cursor.read_i64::<BigEndian>().map_err(|_| TlvError::Truncated)?)
        }
        ValueKind::Float32 => {
            expect_len(raw, 4)?;
            let mut cursor = Cursor::new(&raw.value);
            Value::Float32(cursor.read_f32::<BigEndian>().map_err(|_| TlvError::Truncated)?)
        }
        ValueKind::Float64 => {
            expect_len(raw, 8)?;
            let mut cursor = Cursor::new(&raw.value);
            Value::Float64(cursor.read_f64::<BigEndian>().map_err(|_| TlvError::Truncated)?)
        }
        ValueKind::Str => {
            let s = String::from_utf8(raw.value.clone()).map_err(|_| TlvError::InvalidUtf8)?;
            Value::Str(s)
        }
        ValueKind::Socket => Value::Socket(decode_socket(raw)?),
        ValueKind::FloatVector => Value::FloatVector(decode_float_vector(raw)?),
    };
    Ok((tag, value))
}

/// Encodes a tag/value pair into a raw record ready for
/// [`encode_records`].
pub fn encode_value(tag: Tag, value: &Value) -> RawRecord {
    let mut bytes = Vec::new();
    match value {
        Value::Byte(b) => bytes.push(*b),
        Value::Bool(b) => bytes.push(if *b { 1 } else { 0 }),
        Value::Int32(v) => bytes.write_i32::<BigEndian>(*v).expect("vec write cannot fail"),
        Value::Int64(v) => bytes.write_i64::<BigEndian>(*v).expect("vec write cannot fail"),
        Value::Float32(v) => bytes.write_f32::<BigEndian>(*v).expect("vec write cannot fail"),
        Value::Float64(v) => bytes.write_f64::<BigEndian>(*v).expect("vec write cannot fail"),
        Value::Str(s) => bytes.extend_from_slice(s.as_bytes()),
        Value::Socket(addr) => encode_socket(*addr, &mut bytes),
        Value::FloatVector(elements) => encode_float_vector(elements, &mut bytes),
    }
    RawRecord {
        tag: tag as u8,
        value: bytes,
    }
}

fn expect_len(raw: &RawRecord, expected: usize) -> Result<(), TlvError> {
    if raw.value.len() != expected {
        return Err(TlvError::ValueLengthMismatch {
            tag: raw.tag,
            expected,
            got: raw.value.len(),
        });
    }
    Ok(())
}

fn decode_socket(raw: &RawRecord) -> Result<SocketAddr, TlvError> {
    if raw.value.len() != 7 {
        return Err(TlvError::ValueLengthMismatch {
            tag: raw.tag,
            expected: 7,
            got: raw.value.len(),
        });
    }
    let family = raw.value[0];
    if family != 4 {
        return Err(TlvError::UnsupportedAddressFamily(family));
    }
    let ip = Ipv4Addr::new(raw.value[1], raw.value[2], raw.value[3], raw.value[4]);
    let port = u16::from_be_bytes([raw.value[5], raw.value[6]]);
    Ok(SocketAddr::new(IpAddr::V4(ip), port))
}

/// Decodes the `vector` value kind: a big-endian `u32` element count
/// followed by that many big-endian `f32` elements.
fn decode_float_vector(raw: &RawRecord) -> Result<Vec<f32>, TlvError> {
    let mut cursor = Cursor::new(&raw.value);
    let count = cursor.read_u32::<BigEndian>().map_err(|_| TlvError::Truncated)? as usize;
    let mut elements = Vec::with_capacity(count);
    for _ in 0..count {
        elements.push(cursor.read_f32::<BigEndian>().map_err(|_| TlvError::Truncated)?);
    }
    Ok(elements)
}

fn encode_float_vector(elements: &[f32], out: &mut Vec<u8>) {
    out.write_u32::<BigEndian>(elements.len() as u32)
        .expect("vec write cannot fail");
    for &element in elements {
        out.write_f32::<BigEndian>(element).expect("vec write cannot fail");
    }
}

fn encode_socket(addr: SocketAddr, out: &mut Vec<u8>) {
    match addr {
        SocketAddr::V4(v4) => {
            out.push(4);
            out.extend_from_slice(&v4.ip().octets());
            out.extend_from_slice(&v4.port().to_be_bytes());
        }
        SocketAddr::V6(_) => {
            // Only IPv4 destinations are modeled on the wire (§4.7's
            // socket value is "family + address + port" with no IPv6
            // family code specified); callers should not construct
            // IPv6 destinations for this protocol.
            out.push(4);
            out.extend_from_slice(&[0, 0, 0, 0]);
            out.extend_from_slice(&0u16.to_be_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_round_trips_short_and_extended() {
        for length in [0usize, 1, 127, 128, 300, 70_000] {
            let mut out = Vec::new();
            write_length(&mut out, length);
            let (decoded, _) = read_length(&out).unwrap();
            assert_eq!(decoded, length);
        }
    }

    #[test]
    fn record_sequence_round_trips() {
        let records = vec![
            RawRecord {
                tag: Tag::OutputSsrc as u8,
                value: vec![0, 0, 0, 17],
            },
            RawRecord {
                tag: Tag::Preset as u8,
                value: b"fm".to_vec(),
            },
        ];
        let mut out = Vec::new();
        encode_records(&records, &mut out);
        let decoded = decode_records(&out).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn packet_round_trips_with_kind() {
        let records = vec![RawRecord {
            tag: Tag::DemodType as u8,
            value: vec![0],
        }];
        let bytes = encode_packet(PacketKind::Cmd, &records);
        let (kind, decoded) = decode_packet(&bytes).unwrap();
        assert_eq!(kind, PacketKind::Cmd);
        assert_eq!(decoded, records);
    }

    #[test]
    fn every_value_kind_round_trips() {
        let cases = vec![
            (Tag::DemodType, Value::Byte(2)),
            (Tag::IndependentSideband, Value::Bool(true)),
            (Tag::OutputSsrc, Value::Int32(42)),
            (Tag::BlockSequence, Value::Int64(-7)),
            (Tag::Gain, Value::Float32(1.5)),
            (Tag::RadioFrequency, Value::Float64(162_550_000.0)),
            (Tag::Preset, Value::Str("ft8".to_string())),
            (
                Tag::OutputDataDestSocket,
                Value::Socket("127.0.0.1:5004".parse().unwrap()),
            ),
            (
                Tag::BinData,
                Value::FloatVector(vec![0.0, -12.5, 3.25]),
            ),
        ];
        for (tag, value) in cases {
            let raw = encode_value(tag, &value);
            let (decoded_tag, decoded_value) = decode_value(&raw).unwrap();
            assert_eq!(decoded_tag, tag);
            assert_eq!(decoded_value, value);
        }
    }

    #[test]
    fn truncated_length_is_rejected() {
        let bytes = vec![Tag::Gain as u8, 0x84]; // claims 4 extension bytes, none present
        assert_eq!(decode_records(&bytes), Err(TlvError::Truncated));
    }

    #[test]
    fn unknown_tag_is_reported_but_does_not_abort_decoding() {
        let bytes = vec![200u8, 1, 0xAB, 0];
        let records = decode_records(&bytes).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(decode_value(&records[0]), Err(TlvError::UnknownTag(200)));
    }
}
