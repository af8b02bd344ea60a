/*
   0                                            15                                              31
   0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5  6  7  8  9  0  1
  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
  |      version (8)      |     protocol (8)      |               header length (16)              |
  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
  |                              header(n): msgpack { src, dest }                                |
  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
  |                                         payload(n)                                          |
  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
*/

use crate::address::Address;
use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

pub const VERSION: u8 = 1;
pub const HEAD_LEN: usize = 4;

#[derive(Eq, PartialEq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum ProtocolType {
    /// Liveness probe, empty payload
    Ping = 0,
    /// Answer to a probe, empty payload
    Pong = 1,
    Unknown = 255,
}

impl From<u8> for ProtocolType {
    fn from(value: u8) -> Self {
        match value {
            0 => ProtocolType::Ping,
            1 => ProtocolType::Pong,
            _ => ProtocolType::Unknown,
        }
    }
}

impl From<ProtocolType> for u8 {
    fn from(value: ProtocolType) -> Self {
        value as u8
    }
}

#[derive(Serialize, Deserialize)]
struct EnvelopeHeader {
    src: Address,
    dest: Address,
}

/// A datagram exchanged between overlay nodes.
///
/// Source and destination travel in the envelope, so the ping and pong
/// messages themselves carry no payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    protocol: ProtocolType,
    src: Address,
    dest: Address,
    payload: Bytes,
}

impl Envelope {
    pub fn new(protocol: ProtocolType, src: Address, dest: Address, payload: Bytes) -> Self {
        Self {
            protocol,
            src,
            dest,
            payload,
        }
    }
    pub fn ping(src: Address, dest: Address) -> Self {
        Self::new(ProtocolType::Ping, src, dest, Bytes::new())
    }
    pub fn pong(src: Address, dest: Address) -> Self {
        Self::new(ProtocolType::Pong, src, dest, Bytes::new())
    }
    pub fn protocol(&self) -> ProtocolType {
        self.protocol
    }
    pub fn src(&self) -> &Address {
        &self.src
    }
    pub fn dest(&self) -> &Address {
        &self.dest
    }
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn encode(&self) -> Result<Bytes> {
        let header = rmp_serde::to_vec(&EnvelopeHeader {
            src: self.src.clone(),
            dest: self.dest.clone(),
        })?;
        if header.len() > u16::MAX as usize {
            return Err(Error::InvalidProtocol);
        }
        let mut buf = BytesMut::with_capacity(HEAD_LEN + header.len() + self.payload.len());
        buf.put_u8(VERSION);
        buf.put_u8(self.protocol.into());
        buf.put_u16(header.len() as u16);
        buf.extend_from_slice(&header);
        buf.extend_from_slice(&self.payload);
        Ok(buf.freeze())
    }

    pub fn decode(buf: &[u8]) -> Result<Envelope> {
        if buf.len() < HEAD_LEN {
            return Err(Error::PacketTooShort {
                len: buf.len(),
                required: HEAD_LEN,
            });
        }
        if buf[0] != VERSION {
            return Err(Error::UnsupportedVersion(buf[0]));
        }
        let protocol = ProtocolType::from(buf[1]);
        if protocol == ProtocolType::Unknown {
            return Err(Error::InvalidProtocol);
        }
        let header_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let end = HEAD_LEN + header_len;
        if buf.len() < end {
            return Err(Error::PacketTooShort {
                len: buf.len(),
                required: end,
            });
        }
        let header: EnvelopeHeader = rmp_serde::from_slice(&buf[HEAD_LEN..end])?;
        Ok(Envelope {
            protocol,
            src: header.src,
            dest: header.dest,
            payload: Bytes::copy_from_slice(&buf[end..]),
        })
    }
}
