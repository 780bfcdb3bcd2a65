use tb_core::{EndpointId, UploadToken};
use thiserror::Error;

use crate::transport::ChannelType;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("endpoint not connected: {0}")]
    UnknownEndpoint(EndpointId),

    #[error("connection to {0} closed")]
    Disconnected(EndpointId),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("unexpected reply to {command}: {reply}")]
    UnexpectedReply {
        command: &'static str,
        reply: &'static str,
    },

    #[error("no command handler installed")]
    NoHandler,

    #[error("unknown upload token: {0}")]
    UnknownToken(UploadToken),

    #[error("connection handshake failed: {0}")]
    Handshake(String),

    #[error("frame of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(usize),

    #[error("channel type {0} is not supported on this platform")]
    Unsupported(ChannelType),

    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
