//! Client side of the control socket, used by `streamctl` and tests.

use anyhow::{bail, Context};
use stream_proto::protocol::{Message, Request, Response, PROTOCOL_VERSION};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

pub struct DaemonConnection {
    stream: TcpStream,
    read_buffer: Vec<u8>,
}

impl DaemonConnection {
    /// Connect and check the daemon's `Hello`.
    pub async fn connect(addr: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("cannot reach daemon at {}", addr))?;
        let mut conn = Self {
            stream,
            read_buffer: Vec::with_capacity(4096),
        };
        match conn.read_response().await? {
            Response::Hello { protocol_version } if protocol_version == PROTOCOL_VERSION => {
                debug!("connected to daemon at {} (protocol {})", addr, protocol_version);
                Ok(conn)
            }
            Response::Hello { protocol_version } => bail!(
                "daemon speaks protocol {}, this client speaks {}",
                protocol_version,
                PROTOCOL_VERSION
            ),
            other => bail!("expected Hello from daemon, got {:?}", other),
        }
    }

    pub async fn request(&mut self, request: Request) -> anyhow::Result<Response> {
        let encoded = Message::Request(request).encode()?;
        self.stream.write_all(&encoded).await?;
        self.read_response().await
    }

    async fn read_response(&mut self) -> anyhow::Result<Response> {
        let mut tmp = [0u8; 4096];
        loop {
            if let Some((msg, consumed)) = Message::decode(&self.read_buffer)? {
                self.read_buffer.drain(..consumed);
                match msg {
                    Message::Response(response) => return Ok(response),
                    Message::Request(other) => bail!("unexpected request from daemon: {:?}", other),
                }
            }
            let n = self.stream.read(&mut tmp).await?;
            if n == 0 {
                bail!("daemon closed the connection");
            }
            self.read_buffer.extend_from_slice(&tmp[..n]);
        }
    }
}
