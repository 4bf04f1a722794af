use std::io;

use super::vcr::VcrError;
use crate::msg::MsgError;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("no free connection slot")]
    NoFreeConnection,
    #[error("loopback overflow: {pending} + {length} bytes exceeds {max}")]
    LoopbackOverflow {
        pending: usize,
        length: usize,
        max: usize,
    },
    #[error("message of {0} bytes exceeds the maximum message size")]
    MessageTooLarge(usize),
    #[error("message buffer: {0}")]
    Msg(#[from] MsgError),
    #[error("call log: {0}")]
    Vcr(#[from] VcrError),
}
