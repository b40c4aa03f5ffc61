// src/core/rpc/mod.rs

//! Node RPC client cache and the data-node binary command protocol.

pub mod client;
pub mod protocol;

pub use client::{ClientFactory, DataNodeClient, HandshakeReply, NodeRpcCache, TcpDataNodeClient};
pub use protocol::{DataNodeFrameCodec, Frame, Opcode, Status};
