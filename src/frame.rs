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

//! Pure, stateless mapping between frame descriptions and wire bytes.

use crate::error::ProtocolError;
use crate::mask;

/// A WebSocket frame opcode (RFC 6455 §5.2). Extensions and reserved values
/// are not supported; see [`OpCode::try_from`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
  Continuation = 0x0,
  Text = 0x1,
  Binary = 0x2,
  Close = 0x8,
  Ping = 0x9,
  Pong = 0xA,
}

impl OpCode {
  pub fn is_control(self) -> bool {
    matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
  }
}

impl TryFrom<u8> for OpCode {
  type Error = ProtocolError;

  fn try_from(value: u8) -> Result<Self, Self::Error> {
    match value {
      0x0 => Ok(OpCode::Continuation),
      0x1 => Ok(OpCode::Text),
      0x2 => Ok(OpCode::Binary),
      0x8 => Ok(OpCode::Close),
      0x9 => Ok(OpCode::Ping),
      0xA => Ok(OpCode::Pong),
      _ => Err(ProtocolError::UnsupportedOpcode),
    }
  }
}

/// Precomputed unmasked ping frame (server role never masks).
pub static PING_UNMASKED: &[u8] = &[0x89, 0x00];
/// Precomputed unmasked pong frame.
pub static PONG_UNMASKED: &[u8] = &[0x8A, 0x00];
/// Precomputed masked ping frame. The all-zero key is a no-op on an empty
/// payload, which RFC 6455 permits.
pub static PING_MASKED: &[u8] = &[0x89, 0x80, 0x00, 0x00, 0x00, 0x00];
/// Precomputed masked pong frame, same reasoning as [`PING_MASKED`].
pub static PONG_MASKED: &[u8] = &[0x8A, 0x80, 0x00, 0x00, 0x00, 0x00];

/// Serializes `opcode`/`payload` into `out`, replacing its contents.
///
/// `out` is always left holding exactly one complete, unfragmented frame
/// (FIN set) — this implementation never produces fragmented output. When
/// `mask_key` is `Some`, the payload is masked in `out`; the caller's
/// `payload` slice is never mutated.
pub fn encode_frame(
  opcode: OpCode,
  payload: &[u8],
  mask_key: Option<[u8; 4]>,
  out: &mut Vec<u8>,
) {
  out.clear();
  out.push(0x80 | opcode as u8);

  let mask_bit: u8 = if mask_key.is_some() { 0x80 } else { 0x00 };
  let len = payload.len();
  if len <= 125 {
    out.push(mask_bit | len as u8);
  } else if len <= u16::MAX as usize {
    out.push(mask_bit | 126);
    out.extend_from_slice(&(len as u16).to_be_bytes());
  } else {
    out.push(mask_bit | 127);
    out.extend_from_slice(&(len as u64).to_be_bytes());
  }

  match mask_key {
    Some(key) => {
      out.extend_from_slice(&key);
      let start = out.len();
      out.extend_from_slice(payload);
      mask::apply_mask(key, &mut out[start..], 0);
    }
    None => out.extend_from_slice(payload),
  }
}

/// Encodes a close frame's status code as the canonical two-byte
/// big-endian integer (RFC 6455 §5.5.1). See `DESIGN.md` for why this
/// departs from sending the decimal ASCII string.
pub fn encode_close_payload(code: u16) -> [u8; 2] {
  code.to_be_bytes()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unmasked_header_uses_shortest_length_encoding() {
    let mut out = Vec::new();
    encode_frame(OpCode::Text, b"hi", None, &mut out);
    assert_eq!(out, vec![0x81, 0x02, b'h', b'i']);
  }

  #[test]
  fn length_126_threshold() {
    let payload = vec![0u8; 126];
    let mut out = Vec::new();
    encode_frame(OpCode::Binary, &payload, None, &mut out);
    assert_eq!(out[1], 126);
    assert_eq!(&out[2..4], &126u16.to_be_bytes());
  }

  #[test]
  fn length_65536_uses_64_bit_form() {
    let payload = vec![0u8; 65536];
    let mut out = Vec::new();
    encode_frame(OpCode::Binary, &payload, None, &mut out);
    assert_eq!(out[1], 127);
    assert_eq!(&out[2..10], &65536u64.to_be_bytes());
  }

  #[test]
  fn masking_does_not_mutate_caller_payload() {
    let payload = vec![1u8, 2, 3, 4, 5];
    let original = payload.clone();
    let mut out = Vec::new();
    encode_frame(OpCode::Binary, &payload, Some([9, 9, 9, 9]), &mut out);
    assert_eq!(payload, original);
    assert_eq!(out[0] & 0x0F, OpCode::Binary as u8);
    assert_ne!(&out[out.len() - 5..], &payload[..]);
  }

  #[test]
  fn close_payload_is_canonical_two_bytes() {
    assert_eq!(encode_close_payload(1000), [0x03, 0xe8]);
  }
}
