// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error type for loss recovery operations.

use strum_macros::EnumIter;

/// Loss recovery error.
#[allow(clippy::enum_variant_names)]
#[derive(Clone, Debug, Default, PartialEq, Eq, EnumIter)]
pub enum Error {
    /// An endpoint uses this with CONNECTION_CLOSE to signal that the
    /// connection is being closed abruptly in the absence of any error.
    #[default]
    NoError,

    /// The endpoint encountered an internal error and cannot continue with the
    /// connection
    InternalError,

    /// An endpoint received a frame that was badly formatted -- for instance,
    /// an ACK frame whose gap or range lengths would acknowledge packet
    /// numbers below zero.
    FrameEncodingError,

    /// An endpoint detected an error with protocol compliance that was not
    /// covered by more specific error codes, such as an acknowledgment for a
    /// packet that was never sent.
    ProtocolViolation,

    /* Note: Private error codes are as follows */
    /// There is no more work to do.
    Done,

    /// A required allocation could not be satisfied. The current send
    /// opportunity may be dropped and retried on the next one.
    ResourceExhausted,

    /// The operation cannot be completed because it was attempted in an
    /// invalid state.
    InvalidState(String),

    /// The configuration is invalid.
    InvalidConfig(String),
}

impl Error {
    /// Return the wire value of the error.
    /// See RFC 9000 Section 22.5
    pub(crate) fn to_wire(&self) -> u64 {
        match *self {
            Error::NoError => 0x0,
            Error::InternalError => 0x1,
            Error::FrameEncodingError => 0x7,
            Error::ProtocolViolation => 0x0a,
            _ => 0x0,
        }
    }

    /// Whether the error must close the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InternalError | Error::FrameEncodingError | Error::ProtocolViolation
        )
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl std::convert::From<std::collections::TryReserveError> for Error {
    fn from(_: std::collections::TryReserveError) -> Self {
        Error::ResourceExhausted
    }
}

/// Represents information carried by `CONNECTION_CLOSE` frames.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionError {
    /// Whether the error came from the application or the QUIC layer.
    pub is_app: bool,

    /// Indicates the reason for closing this connection.
    pub error_code: u64,

    /// Type byte of the frame that triggered the error.
    pub frame_type: Option<u64>,

    /// Additional diagnostic information.
    pub reason: Vec<u8>,
}

impl std::fmt::Debug for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "is_app={:?} ", self.is_app)?;
        write!(f, "error_code={:?} ", self.error_code)?;
        if let Some(frame_type) = self.frame_type {
            write!(f, "frame_type={:#x} ", frame_type)?;
        }
        match std::str::from_utf8(&self.reason) {
            Ok(v) => write!(f, "reason={:?}", v)?,
            Err(_) => write!(f, "reason={:?}", self.reason)?,
        };

        Ok(())
    }
}
