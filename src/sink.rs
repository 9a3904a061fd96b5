// src/sink.rs
//
// Consumer-facing callback interface.
//
// Samples are delivered synchronously on the link's decoding thread and borrow
// a buffer that is reused for the next frame. Consumers that want to keep or
// process samples elsewhere copy them out, e.g. through ChannelSink.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;

use serde::Serialize;

use crate::diagnostics::Diagnostics;
use crate::io::LinkId;
use crate::protocol::{DataType, DeviceType};

/// One decoded sample batch, valid for the duration of the callback.
#[derive(Clone, Copy, Debug)]
pub struct Sample<'a> {
    pub values: &'a [f32],
    pub device_type: DeviceType,
    pub handle: u8,
    pub data_type: DataType,
    pub link: LinkId,
    /// Interleaved channels in `values`
    pub channels: u16,
    /// Index of `values[0]` within the device's stream of this data type
    pub sequence: u64,
    /// Host receive time, microseconds since UNIX epoch
    pub timestamp_us: u64,
}

impl Sample<'_> {
    pub fn to_owned(&self) -> OwnedSample {
        OwnedSample {
            values: self.values.to_vec(),
            device_type: self.device_type,
            handle: self.handle,
            data_type: self.data_type,
            link: self.link,
            channels: self.channels,
            sequence: self.sequence,
            timestamp_us: self.timestamp_us,
        }
    }
}

/// A sample copied out of the decoding thread's buffer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OwnedSample {
    pub values: Vec<f32>,
    pub device_type: DeviceType,
    pub handle: u8,
    pub data_type: DataType,
    pub link: LinkId,
    pub channels: u16,
    pub sequence: u64,
    pub timestamp_us: u64,
}

/// How a link's decoding thread ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum LinkEnd {
    /// Closed locally (disconnect/close)
    Closed,
    /// Transport reported end of stream
    Disconnected,
    /// Transport failed
    Failed(String),
}

/// Receiver of decoded samples. Called from decoding threads, one per link.
pub trait SampleSink: Send + Sync {
    fn on_sample(&self, sample: &Sample<'_>);

    /// Terminal status of a link. Default ignores it.
    fn on_link_closed(&self, _link: LinkId, _end: &LinkEnd) {}
}

impl<F> SampleSink for F
where
    F: Fn(&Sample<'_>) + Send + Sync,
{
    fn on_sample(&self, sample: &Sample<'_>) {
        self(sample)
    }
}

// ============================================================================
// Channel Sink
// ============================================================================

/// Event delivered through a ChannelSink.
#[derive(Clone, Debug, PartialEq)]
pub enum SinkEvent {
    Sample(OwnedSample),
    LinkClosed(LinkId, LinkEnd),
}

/// Bounded queue sink. Never blocks the decoding thread: when the consumer
/// lags, samples are dropped and counted.
pub struct ChannelSink {
    tx: SyncSender<SinkEvent>,
    dropped: AtomicU64,
    diagnostics: Option<Arc<Diagnostics>>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (ChannelSink, Receiver<SinkEvent>) {
        let (tx, rx) = mpsc::sync_channel(capacity);
        (
            ChannelSink {
                tx,
                dropped: AtomicU64::new(0),
                diagnostics: None,
            },
            rx,
        )
    }

    /// Also count drops in the given diagnostics.
    pub fn with_diagnostics(mut self, diagnostics: Arc<Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        if let Some(diagnostics) = &self.diagnostics {
            diagnostics.record_sink_drop();
        }
    }
}

impl SampleSink for ChannelSink {
    fn on_sample(&self, sample: &Sample<'_>) {
        match self.tx.try_send(SinkEvent::Sample(sample.to_owned())) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.record_drop(),
            // Receiver gone; nothing left to deliver to
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn on_link_closed(&self, link: LinkId, end: &LinkEnd) {
        if self.tx.try_send(SinkEvent::LinkClosed(link, end.clone())).is_err() {
            tlog!("[sink] Link {} ended ({:?}) but the consumer queue is full", link, end);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn sample(values: &[f32]) -> Sample<'_> {
        Sample {
            values,
            device_type: DeviceType::CapnoGo,
            handle: 2,
            data_type: DataType::Co2,
            link: LinkId::A,
            channels: 1,
            sequence: 0,
            timestamp_us: 1,
        }
    }

    #[test]
    fn test_closure_is_a_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let sink = move |s: &Sample<'_>| seen_clone.lock().unwrap().push(s.to_owned());

        sink.on_sample(&sample(&[1.0, 2.0]));
        sink.on_link_closed(LinkId::A, &LinkEnd::Closed);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].values, vec![1.0, 2.0]);
    }

    #[test]
    fn test_channel_sink_delivers_copies() {
        let (sink, rx) = ChannelSink::new(4);
        let mut buffer = vec![21.3, 21.5];
        sink.on_sample(&sample(&buffer));
        buffer.clear();

        match rx.recv().unwrap() {
            SinkEvent::Sample(s) => assert_eq!(s.values, vec![21.3, 21.5]),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_channel_sink_drops_when_full() {
        let diagnostics = Arc::new(Diagnostics::new());
        let (sink, rx) = ChannelSink::new(2);
        let sink = sink.with_diagnostics(Arc::clone(&diagnostics));

        for _ in 0..5 {
            sink.on_sample(&sample(&[0.0]));
        }

        assert_eq!(sink.dropped(), 3);
        assert_eq!(diagnostics.snapshot().sink_dropped, 3);
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn test_channel_sink_reports_link_end() {
        let (sink, rx) = ChannelSink::new(1);
        sink.on_link_closed(LinkId::B, &LinkEnd::Failed("device removed".into()));
        assert_eq!(
            rx.recv().unwrap(),
            SinkEvent::LinkClosed(LinkId::B, LinkEnd::Failed("device removed".into()))
        );
    }
}
