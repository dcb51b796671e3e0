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

//! Error type for session and controller operations.

use strum_macros::EnumIter;

/// Errors surfaced by send sessions, the virtual clock and the simulator.
#[derive(Clone, Debug, Default, PartialEq, Eq, EnumIter)]
pub enum Error {
    /// There is no more work to do.
    #[default]
    Done,

    /// The configuration is invalid, e.g. a zero packet size or an unknown
    /// algorithm name.
    InvalidConfig(String),

    /// The operation cannot be completed because it was attempted in an
    /// invalid state, e.g. starting a session twice.
    InvalidState(String),

    /// The transport collaborator refused to send a packet.
    ///
    /// The session does not retry; the failed packet is not counted.
    TransportFailure(String),

    /// I/O error.
    IoError(String),
}

impl Error {
    /// Return the error number used by C callers and the tool exit status.
    pub fn to_errno(&self) -> i32 {
        match self {
            Error::Done => -100,
            Error::InvalidConfig(_) => -101,
            Error::InvalidState(_) => -102,
            Error::TransportFailure(_) => -103,
            Error::IoError(_) => -104,
        }
    }

    /// Whether the error came from the transport collaborator.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::TransportFailure(_) | Error::IoError(_))
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

impl std::convert::From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(format!("{}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn error_to_errno() {
        let mut seen = Vec::new();
        for err in Error::iter() {
            let errno = err.to_errno();
            assert!(errno < 0);
            assert!(!seen.contains(&errno));
            seen.push(errno);
        }
    }

    #[test]
    fn transport_errors() {
        assert!(Error::TransportFailure("closed".into()).is_transport());
        assert!(Error::IoError("reset".into()).is_transport());
        assert!(!Error::InvalidState("started".into()).is_transport());
        assert!(!Error::Done.is_transport());
    }

    #[test]
    fn io_error() {
        use std::error::Error;
        let e = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        let e = super::Error::from(e);

        assert_eq!(format!("{}", e), "IoError(\"unexpected end of file\")");
        assert!(e.source().is_none());
    }
}
