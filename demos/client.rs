//! Connects to a WebSocket server, sends one text message, and prints
//! everything the server sends back until the connection closes.

use std::env;

use tokio::net::TcpStream;
use url::Url;
use wischer::capability::SystemRandom;
use wischer::handshake;
use wischer::ConnectionOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt::init();

  let target = env::args().nth(1).unwrap_or_else(|| "ws://127.0.0.1:9001/".to_string());
  let url = Url::parse(&target)?;
  let host = url.host_str().ok_or_else(|| anyhow::anyhow!("missing host"))?;
  let port = url.port_or_known_default().ok_or_else(|| anyhow::anyhow!("missing port"))?;

  let stream = TcpStream::connect((host, port)).await?;
  let (mut ws, protocol) = handshake::connect(
    stream,
    &url,
    &[],
    &[],
    &SystemRandom,
    ConnectionOptions::default(),
  )
  .await?;
  println!("connected, server subprotocol: {protocol:?}");

  ws.on_text(|text| println!("< {text}"));
  ws.on_end(|reason, code| println!("closed: {reason:?} ({code})"));
  ws.send_text("hello from wischer").await?;
  ws.run().await?;
  Ok(())
}
