use log::{error, warn};
use tokio::sync::mpsc;

use std::sync::Arc;

use crate::dispatch::{dispatch, ChannelAlert};
use crate::registry::Registry;

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Sending half of a connection's bounded inbound queue. The transport
/// pushes raw frames here; `send` applies backpressure once the worker
/// falls behind.
pub struct ConnectionHandle {
    frames: mpsc::Sender<Vec<u8>>,
}

impl ConnectionHandle {
    pub async fn send(&mut self, frame: Vec<u8>) -> Result<(), mpsc::error::SendError<Vec<u8>>> {
        self.frames.send(frame).await
    }
}

/// Drains one connection's inbound queue. Each frame is dispatched under
/// the owning channel's lock (held only for the transition itself);
/// replies go to `outbound` for the transport to write, breach alerts go
/// to `alerts` for the channel owner. A malformed frame ends the loop:
/// the logical session closes, nothing else is affected.
pub async fn drive(
    registry: Arc<Registry>,
    mut inbound: mpsc::Receiver<Vec<u8>>,
    mut outbound: mpsc::Sender<Vec<u8>>,
    mut alerts: mpsc::Sender<ChannelAlert>,
) {
    while let Some(frame) = inbound.recv().await {
        let dispatched = match dispatch(&registry, &frame) {
            Ok(dispatched) => dispatched,
            Err(e) => {
                warn!("closing session: {}", e);
                return;
            }
        };
        for response in dispatched.responses {
            if outbound.send(response).await.is_err() {
                return;
            }
        }
        if let Some(alert) = dispatched.alert {
            error!(
                "channel {:?} frozen after {} from {:?}",
                alert.channel, alert.error, alert.peer
            );
            if alerts.send(alert).await.is_err() {
                return;
            }
        }
    }
}

/// Spawns the worker for one connection and returns the transport-facing
/// ends: the bounded frame queue in, outbound frames and breach alerts
/// out. Must be called within a tokio runtime.
pub fn spawn(
    registry: Arc<Registry>,
    capacity: usize,
) -> (
    ConnectionHandle,
    mpsc::Receiver<Vec<u8>>,
    mpsc::Receiver<ChannelAlert>,
) {
    let (frame_sender, frame_receiver) = mpsc::channel(capacity);
    let (outbound_sender, outbound_receiver) = mpsc::channel(capacity);
    let (alert_sender, alert_receiver) = mpsc::channel(capacity);

    tokio::spawn(drive(
        registry,
        frame_receiver,
        outbound_sender,
        alert_sender,
    ));

    (
        ConnectionHandle {
            frames: frame_sender,
        },
        outbound_receiver,
        alert_receiver,
    )
}

#[cfg(test)]
mod tests {
    use super::{spawn, DEFAULT_QUEUE_CAPACITY};
    use crate::registry::Registry;

    use std::sync::Arc;
    use wire::{Envelope, Message, PeerId, SerdeVec, Text};

    #[test]
    fn worker_drains_the_queue_and_survives_chatter() {
        let mut runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let registry = Arc::new(Registry::new());
            let (mut handle, _outbound, _alerts) =
                spawn(registry.clone(), DEFAULT_QUEUE_CAPACITY);

            let frame = Envelope::new(
                PeerId::from([3; 16]),
                Message::Text(Text {
                    body: SerdeVec(b"ping".to_vec()),
                }),
            )
            .encode()
            .unwrap();

            for _ in 0..10 {
                handle.send(frame.clone()).await.unwrap();
            }
            // the worker keeps consuming; the queue never jams on chatter
            handle.send(frame).await.unwrap();
        });
    }
}
