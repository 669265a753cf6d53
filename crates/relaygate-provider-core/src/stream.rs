use bytes::Bytes;
use relaygate_protocol::{SseEvent, SseParser, Usage};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::headers::Headers;
use crate::upstream::ByteStream;

const DOWNSTREAM_BUFFER: usize = 16;

/// Per-stream translation state owned by the pump task.
///
/// Implementations keep only running counters, never the whole payload.
pub trait StreamTranscoder: Send {
    /// Frames to forward downstream for one upstream event.
    fn on_event(&mut self, event: &SseEvent) -> Vec<Bytes>;
    /// Frames to emit after the upstream ended normally.
    fn on_finish(&mut self) -> Vec<Bytes>;
    /// Usage observed so far; `None` when nothing usable was seen.
    fn usage(&self) -> Option<Usage>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOutcome {
    pub usage: Option<Usage>,
    /// `false` when the downstream went away before the upstream finished.
    pub completed: bool,
}

#[derive(Debug)]
pub struct StreamReply {
    pub status: u16,
    pub headers: Headers,
    pub body: ByteStream,
    pub outcome: oneshot::Receiver<StreamOutcome>,
}

/// Relays upstream SSE through `transcoder` without buffering the payload.
///
/// When the returned receiver is dropped the pump stops and drops `upstream`,
/// which in turn cancels the upstream read.
pub fn spawn_stream_pump(
    upstream: ByteStream,
    transcoder: Box<dyn StreamTranscoder>,
) -> (ByteStream, oneshot::Receiver<StreamOutcome>) {
    let (tx, rx) = mpsc::channel::<Bytes>(DOWNSTREAM_BUFFER);
    let (done_tx, done_rx) = oneshot::channel();
    tokio::spawn(async move {
        let mut upstream = upstream;
        let mut transcoder = transcoder;
        let completed = pump(&mut upstream, transcoder.as_mut(), &tx).await;
        drop(upstream);
        if !completed {
            debug!(event = "stream_aborted", "downstream closed before upstream finished");
        }
        let _ = done_tx.send(StreamOutcome {
            usage: transcoder.usage(),
            completed,
        });
    });
    (rx, done_rx)
}

async fn pump(
    upstream: &mut ByteStream,
    transcoder: &mut dyn StreamTranscoder,
    tx: &mpsc::Sender<Bytes>,
) -> bool {
    let mut parser = SseParser::new();
    loop {
        let chunk = tokio::select! {
            chunk = upstream.recv() => chunk,
            _ = tx.closed() => return false,
        };
        let Some(chunk) = chunk else {
            break;
        };
        for event in parser.push_bytes(&chunk) {
            if !forward(tx, transcoder.on_event(&event)).await {
                return false;
            }
        }
    }
    for event in parser.finish() {
        if !forward(tx, transcoder.on_event(&event)).await {
            return false;
        }
    }
    forward(tx, transcoder.on_finish()).await
}

async fn forward(tx: &mpsc::Sender<Bytes>, frames: Vec<Bytes>) -> bool {
    for frame in frames {
        if tx.send(frame).await.is_err() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use relaygate_protocol::encode_data_event;

    use super::*;

    #[derive(Default)]
    struct Echo {
        events: u64,
    }

    impl StreamTranscoder for Echo {
        fn on_event(&mut self, event: &SseEvent) -> Vec<Bytes> {
            self.events += 1;
            vec![encode_data_event(event.data.as_bytes())]
        }

        fn on_finish(&mut self) -> Vec<Bytes> {
            vec![Bytes::from_static(b"data: end\n\n")]
        }

        fn usage(&self) -> Option<Usage> {
            (self.events > 0).then(|| Usage::new(1, self.events))
        }
    }

    #[tokio::test]
    async fn forwards_events_and_reports_usage() {
        let (up_tx, up_rx) = mpsc::channel(4);
        let (mut body, outcome) = spawn_stream_pump(up_rx, Box::new(Echo::default()));
        up_tx.send(Bytes::from_static(b"data: a\n\ndata: ")).await.unwrap();
        up_tx.send(Bytes::from_static(b"b\n\n")).await.unwrap();
        drop(up_tx);

        let mut frames = Vec::new();
        while let Some(frame) = body.recv().await {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 3);
        assert_eq!(&frames[1][..], b"data: b\n\n");
        let outcome = outcome.await.unwrap();
        assert!(outcome.completed);
        assert_eq!(outcome.usage, Some(Usage::new(1, 2)));
    }

    #[tokio::test]
    async fn dropping_downstream_cancels_upstream() {
        let (up_tx, up_rx) = mpsc::channel(4);
        let (body, outcome) = spawn_stream_pump(up_rx, Box::new(Echo::default()));
        drop(body);

        let outcome = tokio::time::timeout(Duration::from_secs(1), outcome)
            .await
            .unwrap()
            .unwrap();
        assert!(!outcome.completed);
        assert_eq!(outcome.usage, None);
        assert!(up_tx.is_closed());
    }
}
