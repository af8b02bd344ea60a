use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io")]
    Io(#[from] io::Error),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("invalid protocol")]
    InvalidProtocol,
    #[error("packet too short: len is {len} but at least {required} is required")]
    PacketTooShort { len: usize, required: usize },
    #[error("header encode: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("header decode: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("not bound")]
    NotBound,
}

pub type Result<T, E = Error> = ::std::result::Result<T, E>;
