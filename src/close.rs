// Copyright 2023 Divy Srivastava <dj.srivastava23@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Close codes and the reasons a connection records for them.

use crate::error::ProtocolError;

/// A close status code as carried in a close frame (RFC 6455 §7.4).
///
/// `MessageTooBig` is not emitted unless a host opts into
/// [`crate::ConnectionOptions::max_message_bytes`]; see the design notes in
/// `DESIGN.md` for why the core's default behavior sticks to five codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
  Normal = 1000,
  ProtocolError = 1002,
  UnsupportedData = 1003,
  MessageTooBig = 1009,
  PolicyViolation = 1008,
  InternalError = 1011,
}

impl CloseCode {
  pub fn as_u16(self) -> u16 {
    self as u16
  }
}

impl From<CloseCode> for u16 {
  fn from(code: CloseCode) -> u16 {
    code.as_u16()
  }
}

/// Why a connection's single terminal transition fired.
///
/// Delivered to `on_end` alongside the numeric status code it maps to.
#[derive(Debug, Clone)]
pub enum EndReason {
  /// The host called [`crate::Connection::end`].
  ClosedBySelf,
  /// A close frame was received from the peer.
  ClosedByPeer,
  /// The transport reached end-of-stream.
  TransportEnded,
  /// The transport reported an I/O error.
  TransportError(String),
  /// No inbound bytes arrived within `idle_timeout`.
  IdleTimeout,
  /// The frame engine rejected malformed input.
  Protocol(ProtocolError),
}

impl EndReason {
  pub fn status_code(&self) -> CloseCode {
    match self {
      EndReason::ClosedBySelf => CloseCode::Normal,
      EndReason::ClosedByPeer => CloseCode::Normal,
      EndReason::TransportEnded => CloseCode::Normal,
      EndReason::TransportError(_) => CloseCode::InternalError,
      EndReason::IdleTimeout => CloseCode::PolicyViolation,
      EndReason::Protocol(err) => err.status_code(),
    }
  }

  pub fn message(&self) -> Option<&str> {
    match self {
      EndReason::TransportError(msg) => Some(msg),
      _ => None,
    }
  }
}
