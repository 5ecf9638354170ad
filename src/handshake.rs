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

//! Client-initiated and server-accepting HTTP/1.1 Upgrade exchanges.
//!
//! Establishing the transport itself (plain vs TLS) is left to the caller;
//! this module only speaks the handshake once a stream exists.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};
use url::Url;

use crate::capability::RandomSource;
use crate::connection::{Connection, ConnectionOptions, Role};
use crate::error::HandshakeError;

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const MAX_HEADERS: usize = 64;
/// Upper bound on the accumulated handshake header block. A peer that never
/// sends a terminating CRLF CRLF (or an oversized response) aborts instead
/// of growing this buffer without limit.
const MAX_HEADER_BLOCK_BYTES: usize = 64 * 1024;

/// `Sec-WebSocket-Accept = base64(sha1(key ‖ GUID))`.
pub fn compute_accept(key: &str) -> String {
  let mut hasher = Sha1::new();
  hasher.update(key.as_bytes());
  hasher.update(GUID.as_bytes());
  BASE64.encode(hasher.finalize())
}

fn header_contains_token(
  headers: &[httparse::Header<'_>],
  name: &str,
  token: &str,
) -> bool {
  headers.iter().any(|h| {
    h.name.eq_ignore_ascii_case(name)
      && std::str::from_utf8(h.value)
        .unwrap_or("")
        .split(',')
        .any(|part| part.trim().eq_ignore_ascii_case(token))
  })
}

fn find_header<'a>(
  headers: &'a [httparse::Header<'a>],
  name: &str,
) -> Option<&'a str> {
  headers
    .iter()
    .find(|h| h.name.eq_ignore_ascii_case(name))
    .and_then(|h| std::str::from_utf8(h.value).ok())
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
  buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Reads from `stream` until a CRLF CRLF-terminated header block is
/// available. Returns the header block (terminator included) and any bytes
/// read past it, which become the first parser input for the connection.
/// Aborts with [`HandshakeError::Headers`] once the accumulated block would
/// exceed [`MAX_HEADER_BLOCK_BYTES`], so a peer that never terminates its
/// headers can't drive unbounded memory growth.
async fn read_header_block<S: AsyncRead + Unpin>(
  stream: &mut S,
) -> Result<(Vec<u8>, Vec<u8>), HandshakeError> {
  let mut buf = Vec::with_capacity(512);
  let mut chunk = [0u8; 512];
  loop {
    if let Some(pos) = find_double_crlf(&buf) {
      let trailing = buf[pos + 4..].to_vec();
      buf.truncate(pos + 4);
      return Ok((buf, trailing));
    }
    let n = stream.read(&mut chunk).await.map_err(HandshakeError::Io)?;
    if n == 0 {
      return Err(HandshakeError::SocketClosedDuringHandshake);
    }
    if buf.len() + n > MAX_HEADER_BLOCK_BYTES {
      return Err(HandshakeError::Headers);
    }
    buf.extend_from_slice(&chunk[..n]);
  }
}

/// Client role: performs the Upgrade exchange over an already-connected
/// `stream` and returns the resulting [`Connection`] plus the
/// server-selected subprotocol, if any (fixing the historical bug of
/// echoing back the caller's offered list instead of parsing the
/// response — see `DESIGN.md`).
#[instrument(skip(stream, rng, options, extra_headers))]
pub async fn connect<S>(
  mut stream: S,
  url: &Url,
  extra_headers: &[(String, String)],
  subprotocols: &[String],
  rng: &dyn RandomSource,
  options: ConnectionOptions,
) -> Result<(Connection<S>, Option<String>), HandshakeError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let host = url.host_str().ok_or(HandshakeError::Headers)?;
  let port = url
    .port_or_known_default()
    .unwrap_or(if url.scheme() == "wss" { 443 } else { 80 });

  let mut path = url.path().to_string();
  if let Some(query) = url.query() {
    path.push('?');
    path.push_str(query);
  }

  let mut key_bytes = [0u8; 16];
  rng.fill(&mut key_bytes);
  let key = BASE64.encode(key_bytes);

  let mut request = format!(
    "GET {path} HTTP/1.1\r\n\
     Host: {host}:{port}\r\n\
     Upgrade: websocket\r\n\
     Connection: keep-alive, upgrade\r\n\
     Sec-WebSocket-Key: {key}\r\n\
     Sec-WebSocket-Version: 13\r\n"
  );
  for (name, value) in extra_headers {
    request.push_str(&format!("{}: {}\r\n", name.to_lowercase(), value));
  }
  if !subprotocols.is_empty() {
    request.push_str(&format!(
      "Sec-WebSocket-Protocol: {}\r\n",
      subprotocols.join(", ")
    ));
  }
  request.push_str("\r\n");

  stream
    .write_all(request.as_bytes())
    .await
    .map_err(HandshakeError::Io)?;

  let (header_block, trailing) = read_header_block(&mut stream).await?;

  let mut headers_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
  let mut response = httparse::Response::new(&mut headers_buf);
  response
    .parse(&header_block)
    .map_err(|_| HandshakeError::NotHttpServer)?;

  let version = response.version.ok_or(HandshakeError::HttpVersion)?;
  if version < 1 {
    return Err(HandshakeError::HttpVersion);
  }
  let code = response.code.ok_or(HandshakeError::StatusCodeNotUpgraded)?;
  if code != 101 {
    return Err(HandshakeError::StatusCodeNotUpgraded);
  }

  if !header_contains_token(response.headers, "upgrade", "websocket") {
    return Err(HandshakeError::UpgradeHeader);
  }
  if !header_contains_token(response.headers, "connection", "upgrade") {
    return Err(HandshakeError::ConnectionHeader);
  }

  let accept =
    find_header(response.headers, "sec-websocket-accept").ok_or(HandshakeError::InvalidAccept)?;
  if accept != compute_accept(&key) {
    return Err(HandshakeError::InvalidAccept);
  }

  let chosen_protocol =
    find_header(response.headers, "sec-websocket-protocol").map(str::to_string);

  debug!(protocol = ?chosen_protocol, "client handshake complete");
  let mut connection = Connection::new(stream, Role::Client, options);
  // Held back, not dispatched here: the caller hasn't installed `on_*`
  // handlers yet, so feeding it now would silently drop or mishandle a
  // frame (including a close) the server pipelined with its response.
  // `run()` feeds it once handlers are in place.
  connection.queue_inbound(trailing);
  Ok((connection, chosen_protocol))
}

/// A minimal view of the request the host's HTTP layer already parsed.
/// Constructing this is the caller's job — general-purpose HTTP request
/// parsing is out of scope for this crate.
pub struct IncomingRequest<'a> {
  pub method: &'a str,
  /// `0` for HTTP/1.0, `1` for HTTP/1.1, matching `httparse`'s convention.
  pub version: u8,
  pub headers: &'a [httparse::Header<'a>],
}

/// Server-side options for one upgrade.
pub struct ServerOptions<'a> {
  /// Chooses a subprotocol from the client's offered list, or `None`
  /// (the default when no selector is supplied).
  pub select_protocol: Option<&'a (dyn Fn(&[String]) -> Option<String> + Send + Sync)>,
  pub extra_response_headers: &'a [(String, String)],
  pub connection: ConnectionOptions,
}

impl<'a> Default for ServerOptions<'a> {
  fn default() -> Self {
    ServerOptions {
      select_protocol: None,
      extra_response_headers: &[],
      connection: ConnectionOptions::default(),
    }
  }
}

/// Server role: validates an already-parsed request, writes the 101
/// response, and hands the socket to a [`Connection`] with `role=server`.
#[instrument(skip(stream, request, options))]
pub async fn accept<S>(
  mut stream: S,
  request: &IncomingRequest<'_>,
  options: ServerOptions<'_>,
) -> Result<(Connection<S>, Option<String>), HandshakeError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  if request.method != "GET" {
    return Err(HandshakeError::Method);
  }
  if request.version < 1 {
    return Err(HandshakeError::HttpVersion);
  }
  if !header_contains_token(request.headers, "upgrade", "websocket") {
    return Err(HandshakeError::UpgradeHeader);
  }
  if !header_contains_token(request.headers, "connection", "upgrade") {
    return Err(HandshakeError::ConnectionHeader);
  }

  let key =
    find_header(request.headers, "sec-websocket-key").ok_or(HandshakeError::WebSocketKey)?;
  let decoded = BASE64.decode(key).map_err(|_| HandshakeError::WebSocketKey)?;
  if decoded.len() != 16 {
    return Err(HandshakeError::WebSocketKey);
  }

  let version_hdr = find_header(request.headers, "sec-websocket-version")
    .ok_or(HandshakeError::WebSocketVersion)?;
  if version_hdr != "13" {
    return Err(HandshakeError::WebSocketVersion);
  }

  let offered: Vec<String> = find_header(request.headers, "sec-websocket-protocol")
    .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
    .unwrap_or_default();
  let chosen = options.select_protocol.and_then(|select| select(&offered));

  let accept_value = compute_accept(key);
  let mut response = format!(
    "HTTP/1.1 101 Switching Protocols\r\n\
     Upgrade: websocket\r\n\
     Connection: upgrade\r\n\
     Sec-WebSocket-Accept: {accept_value}\r\n"
  );
  if let Some(proto) = &chosen {
    response.push_str(&format!("Sec-WebSocket-Protocol: {proto}\r\n"));
  }
  for (name, value) in options.extra_response_headers {
    response.push_str(&format!("{name}: {value}\r\n"));
  }
  response.push_str("\r\n");

  stream
    .write_all(response.as_bytes())
    .await
    .map_err(HandshakeError::Io)?;

  debug!(protocol = ?chosen, "server handshake complete");
  let connection = Connection::new(stream, Role::Server, options.connection);
  Ok((connection, chosen))
}
