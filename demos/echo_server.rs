//! Accepts a single WebSocket connection on a TCP port and echoes every
//! text and binary message back to the sender.
//!
//! The inbound HTTP request is parsed by hand with `httparse` here only
//! because this demo has no framework of its own to hand `wischer` an
//! already-parsed request; a real host normally owns that parsing.

use std::env;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use wischer::handshake::{self, IncomingRequest, ServerOptions};

async fn read_request_headers(stream: &mut TcpStream) -> anyhow::Result<Vec<u8>> {
  let mut buf = Vec::with_capacity(512);
  let mut chunk = [0u8; 512];
  loop {
    if buf.windows(4).any(|w| w == b"\r\n\r\n") {
      return Ok(buf);
    }
    let n = stream.read(&mut chunk).await?;
    if n == 0 {
      anyhow::bail!("peer closed before sending a full request");
    }
    buf.extend_from_slice(&chunk[..n]);
  }
}

async fn handle(mut stream: TcpStream) -> anyhow::Result<()> {
  let header_block = read_request_headers(&mut stream).await?;

  let mut headers_buf = [httparse::EMPTY_HEADER; 64];
  let mut request = httparse::Request::new(&mut headers_buf);
  request.parse(&header_block)?;

  let incoming = IncomingRequest {
    method: request.method.unwrap_or(""),
    version: request.version.unwrap_or(0),
    headers: request.headers,
  };

  let (mut ws, _protocol) =
    handshake::accept(stream, &incoming, ServerOptions::default()).await?;

  ws.on_text(|text| println!("text: {text}"));
  ws.on_binary(|data| println!("binary: {} bytes", data.len()));
  ws.on_end(|reason, code| println!("closed: {reason:?} ({code})"));
  ws.run().await?;
  Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt::init();

  let addr = env::args().nth(1).unwrap_or_else(|| "127.0.0.1:9001".to_string());
  let listener = TcpListener::bind(&addr).await?;
  println!("listening on {addr}");

  loop {
    let (stream, _peer) = listener.accept().await?;
    tokio::spawn(async move {
      if let Err(err) = handle(stream).await {
        eprintln!("connection error: {err}");
      }
    });
  }
}
