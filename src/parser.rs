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

//! The streaming frame parser: a cooperative byte-consumer that reassembles
//! fragmented frames and fragmented messages across arbitrary chunk
//! boundaries, and interleaves control frames between data fragments.

use bytes::{Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::frame::OpCode;

/// A completed, host-facing unit produced by [`Parser::feed`].
#[derive(Debug)]
pub enum FrameEvent {
  Text(String),
  Binary(Bytes),
  /// Payload to echo back in the outbound pong (RFC 6455 §5.5.2).
  Ping(Bytes),
  Pong,
  /// The status code the peer sent in its close frame, if any.
  Close(Option<u16>),
}

/// Knobs the core leaves to the host. Defaults match the historical
/// reference implementation except where `DESIGN.md` records a deliberate
/// improvement.
#[derive(Debug, Clone)]
pub struct ParserOptions {
  /// Reject a message once its reassembled size exceeds this, closing with
  /// `1009`. `None` means unbounded, matching the reference's lack of a
  /// limit.
  pub max_message_bytes: Option<usize>,
  /// When `true`, reproduce the reference's behavior of aborting with a
  /// distinct error the moment a single `feed()` call can't supply a whole
  /// header in one go. When `false` (default), buffer the partial header
  /// and resume once more bytes arrive, per the RFC's SHOULD.
  pub strict_header_chunking: bool,
  /// Reject frames whose masking key is all zero bytes.
  pub allow_zero_mask_key: bool,
}

impl Default for ParserOptions {
  fn default() -> Self {
    ParserOptions {
      max_message_bytes: None,
      strict_header_chunking: false,
      allow_zero_mask_key: true,
    }
  }
}

#[derive(Debug)]
enum Stage {
  Header,
  Payload {
    fin: bool,
    opcode: OpCode,
    masked: bool,
    mask_key: [u8; 4],
    mask_index: usize,
    remaining: usize,
    is_control: bool,
  },
}

#[derive(Debug)]
struct MessageAssembly {
  in_progress: bool,
  opcode: OpCode,
  fragments: BytesMut,
}

impl MessageAssembly {
  fn new() -> Self {
    MessageAssembly {
      in_progress: false,
      opcode: OpCode::Text,
      fragments: BytesMut::new(),
    }
  }
}

/// Owns the fragment-reassembly state machine for one connection.
///
/// Stateless between calls to [`Parser::feed`] only in the sense that all
/// state is inline (`header_buf`, `stage`, `message`) — no heap linkage
/// between parse states.
pub struct Parser {
  peer_masking_required: bool,
  options: ParserOptions,
  header_buf: Vec<u8>,
  control_scratch: BytesMut,
  stage: Stage,
  message: MessageAssembly,
  last_strict_header_len: usize,
}

impl Parser {
  pub fn new(peer_masking_required: bool, options: ParserOptions) -> Self {
    Parser {
      peer_masking_required,
      options,
      header_buf: Vec::with_capacity(14),
      control_scratch: BytesMut::new(),
      stage: Stage::Header,
      message: MessageAssembly::new(),
      last_strict_header_len: 0,
    }
  }

  /// Feeds one inbound chunk, appending every completed event to `events`
  /// in arrival order. Returns on the first protocol violation; the
  /// connection is expected to drop immediately rather than keep feeding.
  pub fn feed(
    &mut self,
    mut chunk: &[u8],
    events: &mut Vec<FrameEvent>,
  ) -> Result<(), ProtocolError> {
    loop {
      match &self.stage {
        Stage::Header => {
          if chunk.is_empty() {
            return Ok(());
          }
          if self.options.strict_header_chunking && self.header_buf.is_empty()
          {
            self.parse_header_strict(chunk)?;
            // parse_header_strict only returns Ok after fully consuming a
            // header's worth of bytes from `chunk` and transitioning stage.
            chunk = &chunk[self.last_strict_header_len..];
            continue;
          }

          // `header_total_len` grows as more bytes arrive (the masked bit
          // and length code are only known after the first 2 bytes), so
          // this keeps consuming from `chunk` until the now-known total is
          // met or `chunk` runs out — a single bounded take would silently
          // drop the rest of `chunk` whenever the total grew mid-loop.
          loop {
            let total = header_total_len(&self.header_buf);
            if self.header_buf.len() >= total {
              break;
            }
            if chunk.is_empty() {
              return Ok(());
            }
            let take = (total - self.header_buf.len()).min(chunk.len());
            self.header_buf.extend_from_slice(&chunk[..take]);
            chunk = &chunk[take..];
          }

          self.finish_header()?;
        }
        Stage::Payload { remaining, .. } => {
          if *remaining > 0 && chunk.is_empty() {
            return Ok(());
          }
          let consumed = self.consume_payload(chunk, events)?;
          chunk = &chunk[consumed..];
        }
      }
    }
  }

  fn consume_payload(
    &mut self,
    chunk: &[u8],
    events: &mut Vec<FrameEvent>,
  ) -> Result<usize, ProtocolError> {
    let (fin, opcode, masked, mask_key, mask_index, remaining, is_control) =
      match &self.stage {
        Stage::Payload {
          fin,
          opcode,
          masked,
          mask_key,
          mask_index,
          remaining,
          is_control,
        } => (*fin, *opcode, *masked, *mask_key, *mask_index, *remaining, *is_control),
        Stage::Header => unreachable!(),
      };

    let take = remaining.min(chunk.len());
    let dest = if is_control {
      &mut self.control_scratch
    } else {
      &mut self.message.fragments
    };
    let base = dest.len();
    dest.extend_from_slice(&chunk[..take]);
    let new_index = if masked {
      crate::mask::apply_mask(mask_key, &mut dest[base..], mask_index)
    } else {
      mask_index
    };

    if !is_control {
      if let Some(max) = self.options.max_message_bytes {
        if self.message.fragments.len() > max {
          return Err(ProtocolError::MessageTooBig);
        }
      }
    }

    let remaining = remaining - take;
    if remaining == 0 {
      self.finish_frame(fin, opcode, is_control, events)?;
      self.stage = Stage::Header;
    } else {
      self.stage = Stage::Payload {
        fin,
        opcode,
        masked,
        mask_key,
        mask_index: new_index,
        remaining,
        is_control,
      };
    }

    Ok(take)
  }

  fn finish_frame(
    &mut self,
    fin: bool,
    opcode: OpCode,
    is_control: bool,
    events: &mut Vec<FrameEvent>,
  ) -> Result<(), ProtocolError> {
    if is_control {
      let payload = self.control_scratch.split().freeze();
      match opcode {
        OpCode::Close => {
          let code = if payload.len() >= 2 {
            Some(u16::from_be_bytes([payload[0], payload[1]]))
          } else {
            None
          };
          events.push(FrameEvent::Close(code));
        }
        OpCode::Ping => events.push(FrameEvent::Ping(payload)),
        OpCode::Pong => events.push(FrameEvent::Pong),
        _ => unreachable!("non-control opcode in control path"),
      }
      return Ok(());
    }

    if fin {
      let data = self.message.fragments.split().freeze();
      self.message.in_progress = false;
      match self.message.opcode {
        OpCode::Text => {
          let text = String::from_utf8(data.to_vec())
            .map_err(|_| ProtocolError::InvalidUtf8)?;
          events.push(FrameEvent::Text(text));
        }
        OpCode::Binary => events.push(FrameEvent::Binary(data)),
        _ => unreachable!("non-data opcode in data path"),
      }
    }
    Ok(())
  }

  fn finish_header(&mut self) -> Result<(), ProtocolError> {
    let buf = std::mem::take(&mut self.header_buf);

    let fin = buf[0] & 0b1000_0000 != 0;
    let rsv = buf[0] & 0b0111_0000;
    if rsv != 0 {
      return Err(ProtocolError::InvalidExtension);
    }
    let opcode = OpCode::try_from(buf[0] & 0b0000_1111)?;

    let masked = buf[1] & 0b1000_0000 != 0;
    if self.peer_masking_required && !masked {
      return Err(ProtocolError::PeerMaskingDisabled);
    }

    let length_code = buf[1] & 0x7F;
    let (len, key_offset): (u64, usize) = match length_code {
      126 => (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4),
      127 => {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&buf[2..10]);
        (u64::from_be_bytes(bytes), 10)
      }
      n => (n as u64, 2),
    };

    let mask_key = if masked {
      let mut key = [0u8; 4];
      key.copy_from_slice(&buf[key_offset..key_offset + 4]);
      if !self.options.allow_zero_mask_key && key == [0, 0, 0, 0] {
        return Err(ProtocolError::ZeroMaskingKey);
      }
      key
    } else {
      [0, 0, 0, 0]
    };

    let is_control = opcode.is_control();
    if is_control {
      if !fin {
        return Err(ProtocolError::FragmentedControlFrame);
      }
      if len > 125 {
        return Err(ProtocolError::ControlFrameTooLarge);
      }
    } else {
      match opcode {
        OpCode::Continuation => {
          if !self.message.in_progress {
            return Err(ProtocolError::BadContinueOpcode);
          }
        }
        OpCode::Text | OpCode::Binary => {
          if self.message.in_progress {
            return Err(ProtocolError::BadDataOpcode);
          }
          self.message.in_progress = true;
          self.message.opcode = opcode;
          self.message.fragments.clear();
        }
        _ => unreachable!("control opcode classified as data"),
      }
    }

    self.stage = Stage::Payload {
      fin,
      opcode,
      masked,
      mask_key,
      mask_index: 0,
      remaining: len as usize,
      is_control,
    };
    Ok(())
  }

  /// Reproduces the historical reference's behavior: a single `feed()`
  /// call must supply a complete header in one go, or parsing aborts with
  /// the error kind matching whichever piece was missing.
  fn parse_header_strict(&mut self, chunk: &[u8]) -> Result<(), ProtocolError> {
    if chunk.len() < 2 {
      return Err(ProtocolError::InvalidDataFrameH2);
    }
    let masked = chunk[1] & 0b1000_0000 != 0;
    let length_code = chunk[1] & 0x7F;
    let (ext, err_if_short) = match length_code {
      126 => (2, ProtocolError::InvalidDataFrameP16),
      127 => (8, ProtocolError::InvalidDataFrameP64),
      _ => (0, ProtocolError::InvalidDataFrameH2),
    };
    if chunk.len() < 2 + ext {
      return Err(err_if_short);
    }
    let mask_len = if masked { 4 } else { 0 };
    if chunk.len() < 2 + ext + mask_len {
      return Err(ProtocolError::MaskingKeyMissing);
    }
    let total = 2 + ext + mask_len;
    self.header_buf.extend_from_slice(&chunk[..total]);
    self.last_strict_header_len = total;
    self.finish_header()
  }
}

fn header_total_len(buf: &[u8]) -> usize {
  if buf.len() < 2 {
    return 2;
  }
  let masked = buf[1] & 0b1000_0000 != 0;
  let length_code = buf[1] & 0x7F;
  let ext = match length_code {
    126 => 2,
    127 => 8,
    _ => 0,
  };
  2 + ext + if masked { 4 } else { 0 }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn events_for(parser: &mut Parser, chunk: &[u8]) -> Vec<FrameEvent> {
    let mut events = Vec::new();
    parser.feed(chunk, &mut events).expect("no protocol error");
    events
  }

  #[test]
  fn server_decodes_masked_single_frame_hello() {
    // RFC 6455 §5.7 example: a single masked text frame carrying "Hello".
    let bytes = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
    let mut parser = Parser::new(true, ParserOptions::default());
    let events = events_for(&mut parser, &bytes);
    assert_eq!(events.len(), 1);
    match &events[0] {
      FrameEvent::Text(text) => assert_eq!(text, "Hello"),
      other => panic!("expected text, got {other:?}"),
    }
  }

  #[test]
  fn server_rejects_unmasked_client_frame() {
    let bytes = [0x01, 0x03, b'H', b'i', b'!'];
    let mut parser = Parser::new(true, ParserOptions::default());
    let mut events = Vec::new();
    let err = parser.feed(&bytes, &mut events).unwrap_err();
    assert_eq!(err, ProtocolError::PeerMaskingDisabled);
  }

  #[test]
  fn server_reassembles_masked_fragmented_message() {
    // "Hi" then continuation ".!" , each masked with the same key.
    let key = [0x12, 0x34, 0x56, 0x78];
    let mut first_payload = *b"Hi";
    crate::mask::apply_mask(key, &mut first_payload, 0);
    let mut second_payload = *b".!";
    crate::mask::apply_mask(key, &mut second_payload, 0);

    let mut bytes = vec![0x01, 0x82];
    bytes.extend_from_slice(&key);
    bytes.extend_from_slice(&first_payload);
    bytes.push(0x80);
    bytes.push(0x82);
    bytes.extend_from_slice(&key);
    bytes.extend_from_slice(&second_payload);

    let mut parser = Parser::new(true, ParserOptions::default());
    let events = events_for(&mut parser, &bytes);
    assert_eq!(events.len(), 1);
    match &events[0] {
      FrameEvent::Text(text) => assert_eq!(text, "Hi.!"),
      other => panic!("expected text, got {other:?}"),
    }
  }

  #[test]
  fn close_frame_payload_decodes_status_code() {
    let bytes = [0x88, 0x02, 0x03, 0xe8];
    let mut parser = Parser::new(false, ParserOptions::default());
    let events = events_for(&mut parser, &bytes);
    assert_eq!(events.len(), 1);
    match &events[0] {
      FrameEvent::Close(Some(code)) => assert_eq!(*code, 1000),
      other => panic!("expected close(1000), got {other:?}"),
    }
  }

  #[test]
  fn ping_yields_payload_for_pong_echo() {
    let bytes = [0x89, 0x00];
    let mut parser = Parser::new(false, ParserOptions::default());
    let events = events_for(&mut parser, &bytes);
    assert_eq!(events.len(), 1);
    match &events[0] {
      FrameEvent::Ping(payload) => assert!(payload.is_empty()),
      other => panic!("expected ping, got {other:?}"),
    }
  }

  #[test]
  fn header_and_payload_split_across_chunks_still_delivers_one_message() {
    let bytes = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
    let mut parser = Parser::new(true, ParserOptions::default());

    let mut events = Vec::new();
    parser.feed(&bytes[..6], &mut events).unwrap();
    assert!(events.is_empty());
    parser.feed(&bytes[6..], &mut events).unwrap();
    assert_eq!(events.len(), 1);
    match &events[0] {
      FrameEvent::Text(text) => assert_eq!(text, "Hello"),
      other => panic!("expected text, got {other:?}"),
    }
  }

  #[test]
  fn ping_interleaved_in_fragmented_message_does_not_disturb_reassembly() {
    let key = [0xaa, 0xbb, 0xcc, 0xdd];
    let mut first = *b"AB";
    crate::mask::apply_mask(key, &mut first, 0);
    let mut second = *b"CD";
    crate::mask::apply_mask(key, &mut second, 0);

    let mut bytes = vec![0x01, 0x82];
    bytes.extend_from_slice(&key);
    bytes.extend_from_slice(&first);
    // Unfragmented masked ping with no payload, interleaved mid-message.
    bytes.extend_from_slice(&[0x89, 0x80]);
    bytes.extend_from_slice(&key);
    bytes.push(0x80);
    bytes.push(0x82);
    bytes.extend_from_slice(&key);
    bytes.extend_from_slice(&second);

    let mut parser = Parser::new(true, ParserOptions::default());
    let events = events_for(&mut parser, &bytes);
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], FrameEvent::Ping(_)));
    match &events[1] {
      FrameEvent::Text(text) => assert_eq!(text, "ABCD"),
      other => panic!("expected text, got {other:?}"),
    }
  }

  #[test]
  fn continuation_without_open_message_is_protocol_error() {
    let bytes = [0x80, 0x80, 0, 0, 0, 0];
    let mut parser = Parser::new(true, ParserOptions::default());
    let mut events = Vec::new();
    let err = parser.feed(&bytes, &mut events).unwrap_err();
    assert_eq!(err, ProtocolError::BadContinueOpcode);
  }

  #[test]
  fn new_data_opcode_mid_message_is_protocol_error() {
    let mut bytes = vec![0x01, 0x80, 0, 0, 0, 0]; // text, fin=false, empty payload
    bytes.extend_from_slice(&[0x02, 0x80, 0, 0, 0, 0]); // binary while in progress
    let mut parser = Parser::new(true, ParserOptions::default());
    let mut events = Vec::new();
    let err = parser.feed(&bytes, &mut events).unwrap_err();
    assert_eq!(err, ProtocolError::BadDataOpcode);
  }

  #[test]
  fn reserved_bit_set_is_rejected() {
    let bytes = [0xC1, 0x80, 0, 0, 0, 0];
    let mut parser = Parser::new(true, ParserOptions::default());
    let mut events = Vec::new();
    let err = parser.feed(&bytes, &mut events).unwrap_err();
    assert_eq!(err, ProtocolError::InvalidExtension);
  }

  #[test]
  fn invalid_utf8_text_message_is_rejected() {
    let key = [0, 0, 0, 0];
    let mut bytes = vec![0x81, 0x81];
    bytes.extend_from_slice(&key);
    bytes.push(0xFF); // lone continuation byte, never valid UTF-8
    let mut parser = Parser::new(true, ParserOptions::default());
    let mut events = Vec::new();
    let err = parser.feed(&bytes, &mut events).unwrap_err();
    assert_eq!(err, ProtocolError::InvalidUtf8);
  }

  #[test]
  fn max_message_bytes_rejects_oversized_message() {
    let options = ParserOptions {
      max_message_bytes: Some(4),
      ..ParserOptions::default()
    };
    let mut bytes = vec![0x81, 0x85, 0, 0, 0, 0];
    bytes.extend_from_slice(b"Hello");
    let mut parser = Parser::new(true, options);
    let mut events = Vec::new();
    let err = parser.feed(&bytes, &mut events).unwrap_err();
    assert_eq!(err, ProtocolError::MessageTooBig);
  }

  #[test]
  fn zero_masking_key_rejected_when_disallowed() {
    let options = ParserOptions {
      allow_zero_mask_key: false,
      ..ParserOptions::default()
    };
    let bytes = [0x81, 0x80, 0, 0, 0, 0];
    let mut parser = Parser::new(true, options);
    let mut events = Vec::new();
    let err = parser.feed(&bytes, &mut events).unwrap_err();
    assert_eq!(err, ProtocolError::ZeroMaskingKey);
  }

  #[test]
  fn fragmented_control_frame_is_rejected() {
    let bytes = [0x09, 0x80, 0, 0, 0, 0];
    let mut parser = Parser::new(true, ParserOptions::default());
    let mut events = Vec::new();
    let err = parser.feed(&bytes, &mut events).unwrap_err();
    assert_eq!(err, ProtocolError::FragmentedControlFrame);
  }

  #[test]
  fn oversized_control_frame_is_rejected() {
    let mut bytes = vec![0x89u8, 0x80 | 126, 0, 126];
    bytes.extend_from_slice(&[0u8; 4]); // mask key
    bytes.extend_from_slice(&[0u8; 126]);
    let mut parser = Parser::new(true, ParserOptions::default());
    let mut events = Vec::new();
    let err = parser.feed(&bytes, &mut events).unwrap_err();
    assert_eq!(err, ProtocolError::ControlFrameTooLarge);
  }

  #[test]
  fn round_trip_unmasked_binary_at_length_boundaries() {
    for len in [0usize, 1, 125, 126, 127, 65535, 65536, 131072] {
      let payload = vec![0x5au8; len];
      let mut wire = Vec::new();
      crate::frame::encode_frame(OpCode::Binary, &payload, None, &mut wire);

      let mut parser = Parser::new(false, ParserOptions::default());
      let events = events_for(&mut parser, &wire);
      assert_eq!(events.len(), 1, "length {len}");
      match &events[0] {
        FrameEvent::Binary(data) => assert_eq!(data.as_ref(), payload.as_slice(), "length {len}"),
        other => panic!("length {len}: expected binary, got {other:?}"),
      }
    }
  }

  #[test]
  fn round_trip_masked_binary_at_length_boundaries_server_role() {
    for len in [0usize, 1, 125, 126, 127, 65535, 65536, 131072] {
      let payload = vec![0xa5u8; len];
      let mut wire = Vec::new();
      crate::frame::encode_frame(
        OpCode::Binary,
        &payload,
        Some([0x11, 0x22, 0x33, 0x44]),
        &mut wire,
      );

      let mut parser = Parser::new(true, ParserOptions::default());
      let events = events_for(&mut parser, &wire);
      assert_eq!(events.len(), 1, "length {len}");
      match &events[0] {
        FrameEvent::Binary(data) => assert_eq!(data.as_ref(), payload.as_slice(), "length {len}"),
        other => panic!("length {len}: expected binary, got {other:?}"),
      }
    }
  }

  #[test]
  fn strict_header_chunking_aborts_on_short_first_chunk() {
    let options = ParserOptions {
      strict_header_chunking: true,
      ..ParserOptions::default()
    };
    let mut parser = Parser::new(true, options);
    let mut events = Vec::new();
    let err = parser.feed(&[0x81], &mut events).unwrap_err();
    assert_eq!(err, ProtocolError::InvalidDataFrameH2);
  }
}
