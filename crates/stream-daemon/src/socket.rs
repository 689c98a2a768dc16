//! TCP control socket: length-prefixed JSON frames, one `Response` per
//! `Request`, `Hello` on connect.

use std::sync::Arc;

use stream_proto::offline::OfflineStore;
use stream_proto::protocol::{Message, Request, Response, PROTOCOL_VERSION};
use stream_proto::schedule::ScheduleClient;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::controller::{CommandResult, ControllerHandle};
use crate::interruption::InterruptionSender;

/// Everything a client request can reach.
#[derive(Clone)]
pub struct Services {
    pub controller: ControllerHandle,
    pub interruptions: InterruptionSender,
    pub schedule: ScheduleClient,
    pub offline: Arc<OfflineStore>,
    /// Signalled by a `Shutdown` request.
    pub shutdown: Arc<Notify>,
}

pub async fn bind(addr: &str) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!("TCP server listening at {}", listener.local_addr()?);
    Ok(listener)
}

/// Accept clients forever, one task per connection.
pub fn serve(listener: TcpListener, services: Services) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut client_id = 0usize;
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    client_id += 1;
                    let id = client_id;
                    info!("Client {} connected from {}", id, peer);
                    let services = services.clone();
                    tokio::spawn(async move {
                        handle_client(stream, id, services).await;
                        info!("Client {} disconnected", id);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    })
}

async fn handle_client(stream: TcpStream, client_id: usize, services: Services) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    let hello = Response::Hello {
        protocol_version: PROTOCOL_VERSION,
    };
    if write_response(&mut write_half, hello).await.is_err() {
        return;
    }

    loop {
        match read_half.read(&mut tmp).await {
            Ok(0) => {
                debug!("Client {} closed connection", client_id);
                return;
            }
            Ok(n) => read_buf.extend_from_slice(&tmp[..n]),
            Err(e) => {
                warn!("Read error from client {}: {}", client_id, e);
                return;
            }
        }

        loop {
            let (msg, consumed) = match Message::decode(&read_buf) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    // Framing is lost; nothing after this can be trusted.
                    warn!("Client {} sent a bad frame: {}", client_id, e);
                    let _ = write_response(
                        &mut write_half,
                        Response::Error {
                            message: e.to_string(),
                        },
                    )
                    .await;
                    return;
                }
            };
            read_buf.drain(..consumed);

            let response = match msg {
                Message::Request(request) => {
                    info!("Client {} sent request: {:?}", client_id, request);
                    dispatch(request, &services).await
                }
                Message::Response(other) => Response::Error {
                    message: format!("expected a request, got {:?}", other),
                },
            };
            if write_response(&mut write_half, response).await.is_err() {
                return;
            }
        }
    }
}

async fn write_response<W>(writer: &mut W, response: Response) -> anyhow::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let encoded = Message::Response(response).encode()?;
    writer.write_all(&encoded).await?;
    Ok(())
}

fn outcome(result: CommandResult) -> Response {
    match result {
        Ok(outcome) => Response::Outcome {
            applied: outcome.applied(),
        },
        Err(e) => Response::Error {
            message: e.to_string(),
        },
    }
}

fn error_response(e: impl std::fmt::Display) -> Response {
    Response::Error {
        message: e.to_string(),
    }
}

/// Map one request onto the services. Never fails: errors become
/// `Response::Error`.
pub async fn dispatch(request: Request, services: &Services) -> Response {
    let controller = &services.controller;
    match request {
        Request::Load { source } => outcome(controller.load(source).await),
        Request::Play => outcome(controller.play().await),
        Request::Pause => outcome(controller.pause().await),
        Request::PlayPause => outcome(controller.play_pause().await),
        Request::Stop => outcome(controller.stop().await),
        Request::SetPosition { fraction } => outcome(controller.set_position(fraction).await),
        Request::CallState { state } => Response::Outcome {
            applied: services.interruptions.notify(state).await,
        },
        Request::Status => match controller.status().await {
            Ok(data) => Response::Status { data },
            Err(e) => error_response(e),
        },
        Request::FetchSchedule { date } => {
            let fetched = match date {
                Some(date) => services.schedule.fetch_schedule(date).await,
                None => services.schedule.fetch_today().await,
            };
            match fetched {
                Ok(programs) => Response::Schedule { programs },
                Err(e) => error_response(e),
            }
        }
        Request::ListOffline => match services.offline.list().await {
            Ok(entries) => Response::Offline { entries },
            Err(e) => error_response(e),
        },
        Request::AddOffline { program } => match services.offline.add(&program).await {
            Ok(entry) => Response::Added { entry },
            Err(e) => error_response(e),
        },
        Request::RemoveOffline { id, day_label } => {
            match services.offline.remove(id, &day_label).await {
                Ok(entry) => Response::Removed { entry },
                Err(e) => error_response(e),
            }
        }
        Request::Shutdown => {
            info!("Shutdown requested over control socket");
            services.shutdown.notify_one();
            Response::Outcome { applied: true }
        }
    }
}
