//! Crate-wide protocol error: one failure-domain enum per component,
//! composed the way `ClientError`/`SessionError`/`SettingsError` fold into
//! a top-level error with `#[error(source, from)]`.

use n0_error::stack_error;

use crate::codec::FrameError;
use crate::message::MessageError;
use crate::request_table::RequestTableError;
use crate::session::SessionRunError;
use crate::transport::{ServerError, SessionError};

#[stack_error(derive, from_sources)]
pub enum ProtocolError {
    #[error("frame codec error")]
    Frame(#[error(source, from, std_err)] FrameError),

    #[error("malformed json-rpc message")]
    Message(#[error(source, from, std_err)] MessageError),

    #[error("request table error")]
    RequestTable(#[error(source, from, std_err)] RequestTableError),

    #[error("transport session error")]
    Session(#[error(source, from, std_err)] SessionError),

    #[error("transport server error")]
    Server(#[error(source, from, std_err)] ServerError),

    #[error("session engine error")]
    Run(#[error(source, from, std_err)] SessionRunError),

    /// A violation of the Session State Machine's guards,
    /// e.g. the first Control Stream frame not being `initialize`.
    #[error("fatal protocol violation: {0}")]
    Fatal(String),
}

impl ProtocolError {
    /// The JSON-RPC error code to report for this failure.
    pub fn error_code(&self) -> i64 {
        use crate::message::error_codes::*;
        match self {
            ProtocolError::Frame(e) => e.error_code(),
            ProtocolError::Message(_) => PARSE_ERROR,
            ProtocolError::RequestTable(_) => INVALID_REQUEST,
            ProtocolError::Session(_) | ProtocolError::Server(_) | ProtocolError::Run(_) => {
                INTERNAL_ERROR
            }
            ProtocolError::Fatal(_) => INVALID_REQUEST,
        }
    }
}
