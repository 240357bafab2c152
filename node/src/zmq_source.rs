//! `ZmqEventSource`: bridges a blocking ZeroMQ SUB socket onto the async
//! engine loop. `zmq`'s socket API has no async story of its own, so the
//! socket lives on tokio's blocking thread pool and forwards parsed frames
//! over an mpsc channel; `recv` on this side just awaits the channel.

use anticycle_core::error::EventSourceError;
use anticycle_core::events::{EventSource, MempoolEvent};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub struct ZmqEventSource {
    receiver: mpsc::Receiver<Result<MempoolEvent, EventSourceError>>,
}

impl ZmqEventSource {
    /// Connects a SUB socket to `endpoint`, subscribes to every topic, and
    /// spawns the blocking receive loop. Returns once the socket is
    /// connected and subscribed; the pump thread runs until the channel's
    /// receiver is dropped.
    pub fn connect(endpoint: &str) -> Result<Self, EventSourceError> {
        let context = zmq::Context::new();
        let socket = context
            .socket(zmq::SUB)
            .map_err(|e| EventSourceError::Transport(e.to_string()))?;
        socket
            .connect(endpoint)
            .map_err(|e| EventSourceError::Transport(e.to_string()))?;
        socket
            .set_subscribe(b"")
            .map_err(|e| EventSourceError::Transport(e.to_string()))?;

        info!(endpoint, "subscribed to mempool event stream");

        let (tx, rx) = mpsc::channel(1024);
        tokio::task::spawn_blocking(move || pump(socket, tx));

        Ok(ZmqEventSource { receiver: rx })
    }
}

fn pump(socket: zmq::Socket, tx: mpsc::Sender<Result<MempoolEvent, EventSourceError>>) {
    loop {
        let frames = match socket.recv_multipart(0) {
            Ok(frames) => frames,
            Err(e) => {
                error!(error = %e, "zmq recv failed; event source thread exiting");
                let _ = tx.blocking_send(Err(EventSourceError::Transport(e.to_string())));
                return;
            }
        };

        let [topic, body, sequence]: [Vec<u8>; 3] = match frames.try_into() {
            Ok(frames) => frames,
            Err(frames) => {
                warn!(frame_count = frames.len(), "expected 3-frame zmq message; dropping");
                continue;
            }
        };

        // A malformed frame is logged and dropped, not forwarded: one bad
        // frame on the wire (e.g. a notification type this daemon doesn't
        // model) must not tear down the whole event loop the way a genuine
        // transport failure should.
        let event = match MempoolEvent::parse(&topic, &body, &sequence) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "malformed event frame; dropping");
                continue;
            }
        };

        if tx.blocking_send(Ok(event)).is_err() {
            // Receiver dropped; engine shut down, nothing left to forward to.
            return;
        }
    }
}

#[async_trait]
impl EventSource for ZmqEventSource {
    async fn recv(&mut self) -> Result<MempoolEvent, EventSourceError> {
        self.receiver.recv().await.ok_or(EventSourceError::Closed)?
    }
}
