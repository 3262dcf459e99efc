//! The envelope wire format (§4.D, §6): a 12-byte fixed header followed by
//! a JSON payload.

use crate::error::TransportError;

pub const MAGIC: u32 = 0x5343_4854; // "SCHT"
pub const VERSION: u16 = 0x0001;
pub const HEADER_LEN: usize = 12;
/// No single payload should legitimately approach this; guards against a
/// malicious length field causing an unbounded allocation.
pub const MAX_PAYLOAD_LEN: u32 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum EnvelopeType {
    ClientHello = 1,
    ServerHello = 2,
    Chat = 16,
    Ack = 17,
    Presence = 18,
    KeyExchange = 32,
    Error = 255,
    Ping = 64,
    Pong = 65,
}

impl EnvelopeType {
    pub fn from_u16(v: u16) -> Result<Self, TransportError> {
        Ok(match v {
            1 => Self::ClientHello,
            2 => Self::ServerHello,
            16 => Self::Chat,
            17 => Self::Ack,
            18 => Self::Presence,
            32 => Self::KeyExchange,
            255 => Self::Error,
            64 => Self::Ping,
            65 => Self::Pong,
            other => return Err(TransportError::UnknownEnvelopeType(other)),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub version: u16,
    pub payload_len: u32,
    pub kind: EnvelopeType,
}

impl FrameHeader {
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&MAGIC.to_be_bytes());
        buf[4..6].copy_from_slice(&self.version.to_be_bytes());
        buf[6..10].copy_from_slice(&self.payload_len.to_be_bytes());
        buf[10..12].copy_from_slice(&(self.kind as u16).to_be_bytes());
        buf
    }

    pub fn parse(buf: &[u8]) -> Result<Self, TransportError> {
        if buf.len() < HEADER_LEN {
            return Err(TransportError::Malformed("frame shorter than header".into()));
        }
        let magic = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(TransportError::BadMagic);
        }
        let version = u16::from_be_bytes(buf[4..6].try_into().unwrap());
        if version != VERSION {
            return Err(TransportError::UnsupportedVersion(version));
        }
        let payload_len = u32::from_be_bytes(buf[6..10].try_into().unwrap());
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(TransportError::PayloadTooLarge(payload_len, MAX_PAYLOAD_LEN));
        }
        let kind = EnvelopeType::from_u16(u16::from_be_bytes(buf[10..12].try_into().unwrap()))?;
        Ok(Self { version, payload_len, kind })
    }
}

/// Encode a complete frame: header followed by `payload`.
pub fn encode_frame(kind: EnvelopeType, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    let payload_len = u32::try_from(payload.len())
        .map_err(|_| TransportError::PayloadTooLarge(u32::MAX, MAX_PAYLOAD_LEN))?;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(TransportError::PayloadTooLarge(payload_len, MAX_PAYLOAD_LEN));
    }
    let header = FrameHeader { version: VERSION, payload_len, kind };
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Split a complete frame into its header and payload slice.
pub fn decode_frame(buf: &[u8]) -> Result<(FrameHeader, &[u8]), TransportError> {
    let header = FrameHeader::parse(buf)?;
    let payload_end = HEADER_LEN + header.payload_len as usize;
    if buf.len() < payload_end {
        return Err(TransportError::Malformed("payload shorter than declared length".into()));
    }
    Ok((header, &buf[HEADER_LEN..payload_end]))
}
