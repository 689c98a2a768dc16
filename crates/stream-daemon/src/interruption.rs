//! Call-state channel into the controller, independent of the command path.
//!
//! Producers are the control socket (`CallState` requests) and, optionally, a
//! FIFO that a modem/telephony script writes `ringing`, `offhook` or `idle`
//! lines into.

use std::path::PathBuf;

use stream_proto::protocol::CallState;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct InterruptionSender {
    tx: mpsc::Sender<CallState>,
}

impl InterruptionSender {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<CallState>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Returns false once the controller has stopped.
    pub async fn notify(&self, state: CallState) -> bool {
        self.tx.send(state).await.is_ok()
    }
}

/// Forward every parseable line of `reader` until EOF. Returns the number of
/// call states delivered, or `None` if the controller went away.
pub async fn forward_lines<R>(reader: R, sender: &InterruptionSender) -> Option<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut delivered = 0;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match line.parse::<CallState>() {
                    Ok(state) => {
                        debug!("call state from line source: {:?}", state);
                        if !sender.notify(state).await {
                            return None;
                        }
                        delivered += 1;
                    }
                    Err(e) => warn!("call state source: {}", e),
                }
            }
            Ok(None) => return Some(delivered),
            Err(e) => {
                warn!("call state source read error: {}", e);
                return Some(delivered);
            }
        }
    }
}

/// Keep reading call states from a FIFO, reopening it after each writer
/// disconnects.
pub fn spawn_fifo_watcher(path: PathBuf, sender: InterruptionSender) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!("call state: watching {:?}", path);
        loop {
            let file = match tokio::fs::File::open(&path).await {
                Ok(f) => f,
                Err(e) => {
                    warn!("call state: cannot open {:?}: {}", path, e);
                    return;
                }
            };
            if forward_lines(BufReader::new(file), &sender).await.is_none() {
                debug!("call state: controller gone, watcher exiting");
                return;
            }
            // A plain file (not a FIFO) would spin at EOF.
            tokio::time::sleep(tokio::time::Duration::from_millis(250)).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forward_lines_parses_and_skips_garbage() {
        let (sender, mut rx) = InterruptionSender::channel(8);
        let input: &[u8] = b"ringing\n\nbogus\nOffHook\nidle\n";

        let delivered = forward_lines(input, &sender).await;

        assert_eq!(delivered, Some(3));
        assert_eq!(rx.recv().await, Some(CallState::Ringing));
        assert_eq!(rx.recv().await, Some(CallState::OffHook));
        assert_eq!(rx.recv().await, Some(CallState::Idle));
    }

    #[tokio::test]
    async fn test_forward_lines_stops_when_receiver_dropped() {
        let (sender, rx) = InterruptionSender::channel(1);
        drop(rx);
        let input: &[u8] = b"ringing\nidle\n";
        assert_eq!(forward_lines(input, &sender).await, None);
    }
}
