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

//! Binds a transport byte-stream to the parser and codec, and exposes the
//! host-facing message API.

use std::time::{Duration, SystemTime};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

use crate::capability::{Clock, RandomSource, SystemClock, SystemRandom};
use crate::close::EndReason;
use crate::frame::{self, OpCode};
use crate::parser::{FrameEvent, Parser, ParserOptions};

/// Governs masking asymmetry: clients mask outbound frames and require
/// unmasked inbound ones be rejected on the *server* side; servers never
/// mask and must reject unmasked inbound client frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
  Client,
  Server,
}

/// Host-tunable limits and behaviors. See `DESIGN.md` for why these exist
/// even though the historical reference lacks them entirely.
#[derive(Clone)]
pub struct ConnectionOptions {
  pub parser: ParserOptions,
  /// Closes with `1008` if no inbound byte arrives within this window.
  /// `None` disables idle detection (the reference has no internal timer).
  pub idle_timeout: Option<Duration>,
  pub read_buffer_size: usize,
}

impl Default for ConnectionOptions {
  fn default() -> Self {
    ConnectionOptions {
      parser: ParserOptions::default(),
      idle_timeout: None,
      read_buffer_size: 4096,
    }
  }
}

type TextHandler = Box<dyn FnMut(&str) + Send>;
type BinaryHandler = Box<dyn FnMut(&[u8]) + Send>;
type SyncHandler = Box<dyn FnMut(SystemTime) + Send>;
type EndHandler = Box<dyn FnMut(&EndReason, u16) + Send>;

/// A handshaken WebSocket endpoint bound to transport `S`.
///
/// The connection exclusively owns `S`, its parser state, and its
/// reassembly buffers for its lifetime. `is_alive` transitions
/// `true -> false` exactly once, through [`Connection::drop_connection`].
pub struct Connection<S> {
  stream: S,
  role: Role,
  options: ConnectionOptions,
  is_alive: bool,
  last_sync_at: SystemTime,
  parser: Parser,
  /// Bytes that arrived before this `Connection` existed (handshake
  /// trailing data), held back until `run()` so the host gets a chance to
  /// install `on_*` handlers first.
  pending_inbound: Vec<u8>,
  write_buf: Vec<u8>,
  rng: Box<dyn RandomSource>,
  clock: Box<dyn Clock>,
  on_text: Option<TextHandler>,
  on_binary: Option<BinaryHandler>,
  on_sync: Option<SyncHandler>,
  on_end: Option<EndHandler>,
}

impl<S> Connection<S>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  pub fn new(stream: S, role: Role, options: ConnectionOptions) -> Self {
    Self::with_capabilities(
      stream,
      role,
      options,
      Box::new(SystemRandom),
      Box::new(SystemClock),
    )
  }

  /// Like [`Connection::new`] but with injectable randomness/time sources,
  /// for deterministic tests.
  pub fn with_capabilities(
    stream: S,
    role: Role,
    options: ConnectionOptions,
    rng: Box<dyn RandomSource>,
    clock: Box<dyn Clock>,
  ) -> Self {
    let peer_masking_required = role == Role::Server;
    let parser = Parser::new(peer_masking_required, options.parser.clone());
    let now = clock.now();
    Connection {
      stream,
      role,
      options,
      is_alive: true,
      last_sync_at: now,
      parser,
      pending_inbound: Vec::new(),
      write_buf: Vec::with_capacity(16),
      rng,
      clock,
      on_text: None,
      on_binary: None,
      on_sync: None,
      on_end: None,
    }
  }

  pub fn on_text(&mut self, cb: impl FnMut(&str) + Send + 'static) {
    self.on_text = Some(Box::new(cb));
  }

  pub fn on_binary(&mut self, cb: impl FnMut(&[u8]) + Send + 'static) {
    self.on_binary = Some(Box::new(cb));
  }

  pub fn on_sync(&mut self, cb: impl FnMut(SystemTime) + Send + 'static) {
    self.on_sync = Some(Box::new(cb));
  }

  pub fn on_end(&mut self, cb: impl FnMut(&EndReason, u16) + Send + 'static) {
    self.on_end = Some(Box::new(cb));
  }

  pub fn is_open(&self) -> bool {
    self.is_alive
  }

  pub fn last_sync_date(&self) -> SystemTime {
    self.last_sync_at
  }

  fn outbound_mask_key(&self) -> Option<[u8; 4]> {
    if self.role == Role::Client {
      let mut key = [0u8; 4];
      self.rng.fill(&mut key);
      Some(key)
    } else {
      None
    }
  }

  pub async fn send_text(&mut self, text: &str) -> std::io::Result<()> {
    if !self.is_alive {
      return Ok(());
    }
    let key = self.outbound_mask_key();
    frame::encode_frame(OpCode::Text, text.as_bytes(), key, &mut self.write_buf);
    self.stream.write_all(&self.write_buf).await
  }

  pub async fn send_binary(&mut self, data: &[u8]) -> std::io::Result<()> {
    if !self.is_alive {
      return Ok(());
    }
    let key = self.outbound_mask_key();
    frame::encode_frame(OpCode::Binary, data, key, &mut self.write_buf);
    self.stream.write_all(&self.write_buf).await
  }

  pub async fn send_ping(&mut self) -> std::io::Result<()> {
    if !self.is_alive {
      return Ok(());
    }
    let frame = match self.role {
      Role::Client => frame::PING_MASKED,
      Role::Server => frame::PING_UNMASKED,
    };
    self.stream.write_all(frame).await
  }

  async fn send_pong(&mut self, payload: &[u8]) -> std::io::Result<()> {
    if payload.is_empty() {
      let frame = match self.role {
        Role::Client => frame::PONG_MASKED,
        Role::Server => frame::PONG_UNMASKED,
      };
      return self.stream.write_all(frame).await;
    }
    let key = self.outbound_mask_key();
    frame::encode_frame(OpCode::Pong, payload, key, &mut self.write_buf);
    self.stream.write_all(&self.write_buf).await
  }

  /// Initiates a local close with `1000 CLOSED_BY_SELF`.
  pub async fn end(&mut self) {
    self.drop_connection(EndReason::ClosedBySelf).await;
  }

  /// The sole terminal state transition. Idempotent: a second call after
  /// `is_alive` is already false returns immediately.
  async fn drop_connection(&mut self, reason: EndReason) {
    if !self.is_alive {
      return;
    }
    self.is_alive = false;

    let status = reason.status_code();
    debug!(role = ?self.role, code = status.as_u16(), reason = ?reason, "closing connection");
    let payload = frame::encode_close_payload(status.as_u16());
    let key = self.outbound_mask_key();
    frame::encode_frame(OpCode::Close, &payload, key, &mut self.write_buf);
    let _ = self.stream.write_all(&self.write_buf).await;
    let _ = self.stream.shutdown().await;

    if let Some(cb) = self.on_end.as_mut() {
      cb(&reason, status.as_u16());
    }
  }

  /// Feeds already-available bytes (e.g. handshake trailing bytes) into the
  /// parser as though they had just arrived on the transport. Dispatches
  /// host callbacks immediately, so call this only once they're installed.
  pub async fn prime_inbound(&mut self, bytes: &[u8]) {
    if !bytes.is_empty() {
      self.on_chunk(bytes).await;
    }
  }

  /// Queues bytes read before this `Connection` existed (e.g. a server
  /// pipelining a frame in the same segment as its 101 response) so
  /// `run()` feeds them once the caller has had a chance to install
  /// handlers, instead of dispatching them during construction.
  pub(crate) fn queue_inbound(&mut self, bytes: Vec<u8>) {
    self.pending_inbound = bytes;
  }

  async fn on_chunk(&mut self, chunk: &[u8]) {
    trace!(bytes = chunk.len(), "inbound chunk");
    self.last_sync_at = self.clock.now();
    if let Some(cb) = self.on_sync.as_mut() {
      cb(self.last_sync_at);
    }

    let mut events = Vec::new();
    let result = self.parser.feed(chunk, &mut events);

    for event in events {
      if !self.is_alive {
        break;
      }
      match event {
        FrameEvent::Text(text) => {
          if let Some(cb) = self.on_text.as_mut() {
            cb(&text);
          }
        }
        FrameEvent::Binary(data) => {
          if let Some(cb) = self.on_binary.as_mut() {
            cb(&data);
          }
        }
        FrameEvent::Ping(payload) => {
          let _ = self.send_pong(&payload).await;
        }
        FrameEvent::Pong => {}
        FrameEvent::Close(_code) => {
          self.drop_connection(EndReason::ClosedByPeer).await;
        }
      }
    }

    if let Err(err) = result {
      warn!(error = %err, "protocol violation, dropping connection");
      self.drop_connection(EndReason::Protocol(err)).await;
    }
  }

  /// Drives the connection until it closes: reads chunks from the
  /// transport and feeds them to the parser, dispatching host callbacks
  /// synchronously from this call stack. Re-entrant sends from inside a
  /// callback are legal and are ordered before the next inbound event.
  pub async fn run(&mut self) -> std::io::Result<()> {
    let mut buf = vec![0u8; self.options.read_buffer_size];

    if !self.pending_inbound.is_empty() {
      let pending = std::mem::take(&mut self.pending_inbound);
      self.on_chunk(&pending).await;
    }

    loop {
      if !self.is_alive {
        return Ok(());
      }

      let read = match self.options.idle_timeout {
        Some(dur) => match tokio::time::timeout(dur, self.stream.read(&mut buf)).await {
          Ok(result) => result,
          Err(_elapsed) => {
            self.drop_connection(EndReason::IdleTimeout).await;
            return Ok(());
          }
        },
        None => self.stream.read(&mut buf).await,
      };

      match read {
        Ok(0) => {
          self.drop_connection(EndReason::TransportEnded).await;
          return Ok(());
        }
        Ok(n) => self.on_chunk(&buf[..n]).await,
        Err(e) => {
          self
            .drop_connection(EndReason::TransportError(e.to_string()))
            .await;
          return Err(e);
        }
      }
    }
  }
}
