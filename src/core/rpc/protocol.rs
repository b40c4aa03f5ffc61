// src/core/rpc/protocol.rs

//! The data-node command protocol: binary, TCP, framed as a 4-byte
//! big-endian length prefix followed by a 4-byte ASCII opcode and an
//! opcode-specific payload.
//!
//! Grounded on `RespFrameCodec`'s `Encoder`/`Decoder` pair (same crate,
//! `tokio_util::codec` with the `codec` feature, same `BytesMut` buffer
//! discipline) but framing this system's binary payload instead of RESP.

use bytes::{Buf, BufMut, BytesMut};
use std::convert::TryFrom;
use tokio_util::codec::{Decoder, Encoder};

use crate::core::errors::SyncError;

const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;
const LEN_PREFIX: usize = 4;
const OPCODE_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    SyncCreate,
    SyncDelete,
    HashList,
    Handshake,
    PromoteMaster,
    DemoteToSlave,
}

impl Opcode {
    pub fn mnemonic(self) -> &'static [u8; 4] {
        match self {
            Opcode::SyncCreate => b"SYCR",
            Opcode::SyncDelete => b"SYDL",
            Opcode::HashList => b"SYLS",
            Opcode::Handshake => b"HSHK",
            Opcode::PromoteMaster => b"PRMT",
            Opcode::DemoteToSlave => b"DEMT",
        }
    }
}

impl TryFrom<&[u8]> for Opcode {
    type Error = SyncError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        match bytes {
            b"SYCR" => Ok(Opcode::SyncCreate),
            b"SYDL" => Ok(Opcode::SyncDelete),
            b"SYLS" => Ok(Opcode::HashList),
            b"HSHK" => Ok(Opcode::Handshake),
            b"PRMT" => Ok(Opcode::PromoteMaster),
            b"DEMT" => Ok(Opcode::DemoteToSlave),
            other => Err(SyncError::Protocol(format!(
                "unknown opcode {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NotFound,
    Busy,
    Error,
}

impl Status {
    pub fn to_byte(self) -> u8 {
        match self {
            Status::Ok => 0x00,
            Status::NotFound => 0x01,
            Status::Busy => 0x02,
            Status::Error => 0xFF,
        }
    }

    pub fn from_byte(b: u8) -> Status {
        match b {
            0x00 => Status::Ok,
            0x01 => Status::NotFound,
            0x02 => Status::Busy,
            _ => Status::Error,
        }
    }
}

/// A single decoded wire frame: opcode plus raw payload bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: BytesMut,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: BytesMut) -> Self {
        Self { opcode, payload }
    }
}

/// `Encoder`/`Decoder` implementation for the data-node command protocol.
#[derive(Debug, Default, Clone, Copy)]
pub struct DataNodeFrameCodec;

impl Encoder<Frame> for DataNodeFrameCodec {
    type Error = SyncError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body_len = OPCODE_LEN + frame.payload.len();
        if body_len > MAX_FRAME_LEN {
            return Err(SyncError::Protocol(format!(
                "frame too large: {body_len} bytes"
            )));
        }
        dst.reserve(LEN_PREFIX + body_len);
        dst.put_u32(body_len as u32);
        dst.put_slice(frame.opcode.mnemonic());
        dst.put_slice(&frame.payload);
        Ok(())
    }
}

impl Decoder for DataNodeFrameCodec {
    type Item = Frame;
    type Error = SyncError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }
        let body_len = u32::from_be_bytes(src[..LEN_PREFIX].try_into().unwrap()) as usize;
        if body_len < OPCODE_LEN {
            return Err(SyncError::Protocol(format!(
                "frame body too short: {body_len} bytes"
            )));
        }
        if body_len > MAX_FRAME_LEN {
            return Err(SyncError::Protocol(format!(
                "frame too large: {body_len} bytes"
            )));
        }
        if src.len() < LEN_PREFIX + body_len {
            src.reserve(LEN_PREFIX + body_len - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        let opcode_bytes = src.split_to(OPCODE_LEN);
        let opcode = Opcode::try_from(&opcode_bytes[..])?;
        let payload = src.split_to(body_len - OPCODE_LEN);
        Ok(Some(Frame::new(opcode, payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_frame() {
        let mut codec = DataNodeFrameCodec;
        let mut buf = BytesMut::new();
        let frame = Frame::new(Opcode::SyncCreate, BytesMut::from(&b"payload"[..]));
        codec.encode(frame, &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.opcode, Opcode::SyncCreate);
        assert_eq!(&decoded.payload[..], b"payload");
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_waits_for_full_frame() {
        let mut codec = DataNodeFrameCodec;
        let mut buf = BytesMut::new();
        let frame = Frame::new(Opcode::HashList, BytesMut::from(&b"abc"[..]));
        codec.encode(frame, &mut buf).unwrap();
        let mut partial = buf.split_to(3);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn rejects_unknown_opcode() {
        let mut codec = DataNodeFrameCodec;
        let mut buf = BytesMut::new();
        buf.put_u32(4 + 2);
        buf.put_slice(b"XXXX");
        buf.put_slice(b"ab");
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn status_byte_round_trips() {
        for s in [Status::Ok, Status::NotFound, Status::Busy, Status::Error] {
            assert_eq!(Status::from_byte(s.to_byte()), s);
        }
    }
}
