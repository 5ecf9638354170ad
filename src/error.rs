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

use crate::close::CloseCode;

/// Errors produced while performing the HTTP/1.1 Upgrade exchange.
///
/// These never close a transport themselves; the caller owns the socket and
/// decides what to do with it once a handshake fails.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
  #[error("peer response did not look like an HTTP reply")]
  NotHttpServer,
  #[error("unsupported HTTP version, expected >= 1.1")]
  HttpVersion,
  #[error("server did not respond with 101 Switching Protocols")]
  StatusCodeNotUpgraded,
  #[error("malformed or unparsable handshake headers")]
  Headers,
  #[error("missing or invalid Upgrade header")]
  UpgradeHeader,
  #[error("missing or invalid Connection header")]
  ConnectionHeader,
  #[error("Sec-WebSocket-Accept did not match the expected value")]
  InvalidAccept,
  #[error("request method was not GET")]
  Method,
  #[error("missing or malformed Sec-WebSocket-Key")]
  WebSocketKey,
  #[error("unsupported or missing Sec-WebSocket-Version")]
  WebSocketVersion,
  #[error("socket closed before the handshake completed")]
  SocketClosedDuringHandshake,
  #[error("transport error during handshake")]
  Io(#[from] std::io::Error),
}

/// Errors raised by the streaming frame parser.
///
/// Each variant maps to exactly one close code, which is what the
/// connection writes back to the peer before tearing itself down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
  #[error("frame header truncated before the 2-byte prefix completed")]
  InvalidDataFrameH2,
  #[error("frame header truncated before the 16-bit length completed")]
  InvalidDataFrameP16,
  #[error("frame header truncated before the 64-bit length completed")]
  InvalidDataFrameP64,
  #[error("masked frame header truncated before the masking key completed")]
  MaskingKeyMissing,
  #[error("peer must mask frames but sent an unmasked one")]
  PeerMaskingDisabled,
  #[error("reserved bits set without a negotiated extension")]
  InvalidExtension,
  #[error("continuation frame received without an open message")]
  BadContinueOpcode,
  #[error("data opcode received while a message was already in progress")]
  BadDataOpcode,
  #[error("unsupported or reserved opcode")]
  UnsupportedOpcode,
  #[error("control frame was fragmented")]
  FragmentedControlFrame,
  #[error("control frame payload exceeded 125 bytes")]
  ControlFrameTooLarge,
  #[error("text payload was not valid UTF-8")]
  InvalidUtf8,
  #[error("message exceeded the configured size limit")]
  MessageTooBig,
  #[error("masking key was all-zero and the connection rejects that")]
  ZeroMaskingKey,
}

impl ProtocolError {
  /// The close code a connection writes back when this error fires.
  pub fn status_code(self) -> CloseCode {
    use ProtocolError::*;
    match self {
      InvalidDataFrameH2 | InvalidDataFrameP16 | InvalidDataFrameP64
      | MaskingKeyMissing | BadContinueOpcode | BadDataOpcode
      | FragmentedControlFrame | ControlFrameTooLarge => {
        CloseCode::ProtocolError
      }
      PeerMaskingDisabled | ZeroMaskingKey => CloseCode::PolicyViolation,
      InvalidExtension | UnsupportedOpcode | InvalidUtf8 => {
        CloseCode::UnsupportedData
      }
      MessageTooBig => CloseCode::MessageTooBig,
    }
  }
}
