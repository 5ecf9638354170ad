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

//! A full-duplex WebSocket (RFC 6455, version 13) endpoint: the HTTP
//! Upgrade handshake for both roles, and the frame-level protocol engine
//! that rides on top of a byte-oriented reliable stream.
//!
//! This crate's responsibility ends at delivering parsed application
//! messages (text, binary, ping/pong, close) to a host and accepting
//! outbound messages for serialization. Per-message deflate, subprotocol
//! negotiation beyond picking one string, and multiplexing are not
//! implemented.
//!
//! # Example
//!
//! ```no_run
//! use tokio::net::TcpStream;
//! use wischer::{Connection, ConnectionOptions, Role};
//!
//! async fn handle(socket: TcpStream) -> std::io::Result<()> {
//!   let mut ws = Connection::new(socket, Role::Server, ConnectionOptions::default());
//!   ws.on_text(|text| println!("got: {text}"));
//!   ws.on_end(|reason, code| println!("closed: {reason:?} ({code})"));
//!   ws.run().await
//! }
//! ```
//!
//! ## Client handshake
//!
//! ```no_run
//! use tokio::net::TcpStream;
//! use url::Url;
//! use wischer::{handshake, capability::SystemRandom, ConnectionOptions};
//!
//! async fn connect() -> anyhow::Result<()> {
//!   let url = Url::parse("ws://localhost:9001/")?;
//!   let stream = TcpStream::connect((url.host_str().unwrap(), url.port().unwrap_or(80))).await?;
//!   let (mut ws, _protocol) = handshake::connect(
//!     stream,
//!     &url,
//!     &[],
//!     &[],
//!     &SystemRandom,
//!     ConnectionOptions::default(),
//!   ).await?;
//!   ws.send_text("hello").await?;
//!   Ok(())
//! }
//! ```

pub mod capability;
mod close;
mod connection;
mod error;
mod frame;
pub mod handshake;
mod mask;
mod parser;

pub use crate::close::{CloseCode, EndReason};
pub use crate::connection::{Connection, ConnectionOptions, Role};
pub use crate::error::{HandshakeError, ProtocolError};
pub use crate::frame::OpCode;
pub use crate::mask::apply_mask;
pub use crate::parser::{FrameEvent, ParserOptions};
