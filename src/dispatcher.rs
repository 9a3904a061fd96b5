// src/dispatcher.rs
//
// Composition root of the protocol engine.
//
// A session owns up to two links. Each link gets one named decoding thread that
// runs read -> assemble -> resolve handle -> decode -> sink callback, in arrival
// order. The thread owns its FrameAssembler and DeviceRegistry outright; the only
// state shared with API callers is the sink, the diagnostics counters, each
// link's HandleSet (for command routing) and the session record behind a
// Mutex + Condvar.
//
// Lifecycle:
// - connect/open start a session; AlreadyConnected while one is live
// - disconnect/close take the session out under the lock, close every link,
//   then join threads with the lock released (never the calling thread)
// - a link thread that ends on its own (EOF, transport failure) decrements the
//   session's live count; when it reaches zero initialize() returns

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::decoders::DecodeError;
use crate::diagnostics::{Diagnostics, DiagnosticsSnapshot};
use crate::error::{DongleError, Result};
use crate::io::{now_us, FrameAssembler, Link, LinkControl, LinkId};
use crate::protocol::{DataType, DeviceType, Frame, FrameKind, COMMAND_SIZE, VERSION};
use crate::registry::{DeviceRegistry, HandleSet, IdentityOutcome};
use crate::settings::DongleConfig;
use crate::sink::{LinkEnd, Sample, SampleSink};

// ============================================================================
// Link Pipeline
// ============================================================================

/// Per-link decode state, owned by the link's thread.
pub(crate) struct LinkPipeline {
    link: LinkId,
    assembler: FrameAssembler,
    registry: DeviceRegistry,
    /// Reused sample buffer; samples borrow it for the duration of the callback
    values: Vec<f32>,
    sink: Arc<dyn SampleSink>,
    diagnostics: Arc<Diagnostics>,
    logged: DropLog,
}

/// Which drop reasons have already been logged on this link.
#[derive(Default)]
struct DropLog {
    unknown_handle: bool,
    device_mismatch: bool,
    malformed: bool,
}

/// True the first time it is called for a given flag.
fn first_time(flag: &mut bool) -> bool {
    !std::mem::replace(flag, true)
}

enum DataOutcome {
    Dispatched,
    Withheld,
    UnknownHandle,
    DeviceMismatch(DeviceType),
    Malformed(DecodeError),
}

impl LinkPipeline {
    pub(crate) fn new(link: LinkId, sink: Arc<dyn SampleSink>, diagnostics: Arc<Diagnostics>) -> Self {
        LinkPipeline {
            link,
            assembler: FrameAssembler::new(),
            registry: DeviceRegistry::new(link),
            values: Vec::with_capacity(64),
            sink,
            diagnostics,
            logged: DropLog::default(),
        }
    }

    pub(crate) fn handle_set(&self) -> Arc<HandleSet> {
        self.registry.handle_set()
    }

    /// Feed one read's worth of bytes and dispatch every completed frame.
    pub(crate) fn process_chunk(&mut self, bytes: &[u8]) {
        let discarded_before = self.assembler.stats().discarded_bytes;
        let frames = self.assembler.feed(bytes);
        self.diagnostics
            .record_resync(self.assembler.stats().discarded_bytes - discarded_before);

        for frame in frames {
            self.handle_frame(frame);
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        self.diagnostics.record_frame();

        match frame.kind {
            FrameKind::Identity => {
                let (_, outcome) =
                    self.registry
                        .on_identity_frame(frame.device_type, frame.handle, &frame.payload);
                if let IdentityOutcome::Replaced(_) = outcome {
                    self.diagnostics.record_handle_reuse();
                }
            }
            FrameKind::Disconnect => {
                self.registry.on_disconnect(frame.handle);
            }
            FrameKind::Data(data_type) => {
                let outcome = self.dispatch_data(&frame, data_type);
                self.account(&frame, outcome);
            }
        }
    }

    fn dispatch_data(&mut self, frame: &Frame, data_type: DataType) -> DataOutcome {
        let record = match self.registry.lookup_mut(frame.handle) {
            Ok(record) => record,
            Err(_) => return DataOutcome::UnknownHandle,
        };
        if record.device_type != frame.device_type {
            return DataOutcome::DeviceMismatch(record.device_type);
        }
        record.frames += 1;

        match record.state.decode(data_type, &frame.payload, &mut self.values) {
            Ok(Some(decoded)) => {
                let sample = Sample {
                    values: &self.values,
                    device_type: record.device_type,
                    handle: record.handle,
                    data_type,
                    link: self.link,
                    channels: decoded.channels,
                    sequence: decoded.sequence,
                    timestamp_us: now_us(),
                };
                self.sink.on_sample(&sample);
                DataOutcome::Dispatched
            }
            Ok(None) => DataOutcome::Withheld,
            Err(e) => DataOutcome::Malformed(e),
        }
    }

    fn account(&mut self, frame: &Frame, outcome: DataOutcome) {
        match outcome {
            DataOutcome::Dispatched => self.diagnostics.record_sample(),
            DataOutcome::Withheld => {}
            DataOutcome::UnknownHandle => {
                self.diagnostics.record_unknown_handle();
                if first_time(&mut self.logged.unknown_handle) {
                    tlog!(
                        "[dispatch:{}] Dropping data for unregistered handle {} (further drops counted only)",
                        self.link,
                        frame.handle
                    );
                }
            }
            DataOutcome::DeviceMismatch(registered) => {
                self.diagnostics.record_device_mismatch();
                if first_time(&mut self.logged.device_mismatch) {
                    tlog!(
                        "[dispatch:{}] Dropping {} frame on handle {} registered as {}",
                        self.link,
                        frame.device_type,
                        frame.handle,
                        registered
                    );
                }
            }
            DataOutcome::Malformed(e) => {
                self.diagnostics.record_malformed();
                if first_time(&mut self.logged.malformed) {
                    tlog!(
                        "[dispatch:{}] Dropping malformed payload on handle {}: {} [{}]",
                        self.link,
                        frame.handle,
                        e,
                        hex::encode(&frame.payload)
                    );
                }
            }
        }
    }

    fn close(&mut self) {
        self.registry.close();
        self.assembler.reset();
    }
}

/// Drive one link until it closes, ends, or fails.
fn run_link(link: &mut Link, pipeline: &mut LinkPipeline) -> LinkEnd {
    loop {
        let result = match link.read_chunk() {
            Ok(chunk) if !chunk.is_empty() => {
                pipeline.process_chunk(chunk);
                continue;
            }
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        };

        return match result {
            Ok(()) if link.is_closed() => LinkEnd::Closed,
            Ok(()) => LinkEnd::Disconnected,
            Err(e) => LinkEnd::Failed(e.to_string()),
        };
    }
}

// ============================================================================
// Session
// ============================================================================

struct ActiveLink {
    control: LinkControl,
    handles: Arc<HandleSet>,
    thread: Option<JoinHandle<()>>,
}

struct Session {
    generation: u64,
    links: Vec<ActiveLink>,
    /// Link threads that have not exited yet
    live: usize,
}

struct Shared {
    session: Mutex<Option<Session>>,
    changed: Condvar,
    next_generation: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bookkeeping run when a link thread exits, including by panic in the sink.
struct ThreadExit {
    shared: Arc<Shared>,
    sink: Arc<dyn SampleSink>,
    handles: Arc<HandleSet>,
    link: LinkId,
    generation: u64,
    end: LinkEnd,
}

impl Drop for ThreadExit {
    fn drop(&mut self) {
        self.handles.clear();
        {
            let mut guard = self.shared.lock();
            if let Some(session) = guard.as_mut() {
                if session.generation == self.generation {
                    session.live = session.live.saturating_sub(1);
                }
            }
        }
        self.shared.changed.notify_all();

        if thread::panicking() {
            tlog!("[link:{}] Decoding thread panicked", self.link);
            return;
        }
        self.sink.on_link_closed(self.link, &self.end);
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Facade over the dongle's links.
///
/// Samples reach the sink on the links' decoding threads. All methods may be
/// called from any thread, including from inside the sink (except `initialize`,
/// which would wait on its own thread).
pub struct Dispatcher {
    config: DongleConfig,
    sink: Arc<dyn SampleSink>,
    diagnostics: Arc<Diagnostics>,
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Build a dispatcher. With `auto_start` set, the configured links are opened
    /// and decoding starts before this returns.
    pub fn new(config: DongleConfig, sink: impl SampleSink + 'static) -> Result<Self> {
        Self::with_shared(config, Arc::new(sink), Arc::new(Diagnostics::new()))
    }

    /// Build a dispatcher around an existing sink and diagnostics, so both can
    /// be shared with the consumer (e.g. a `ChannelSink` counting its drops).
    pub fn with_shared(
        config: DongleConfig,
        sink: Arc<dyn SampleSink>,
        diagnostics: Arc<Diagnostics>,
    ) -> Result<Self> {
        config.validate()?;

        let dispatcher = Dispatcher {
            config,
            sink,
            diagnostics,
            shared: Arc::new(Shared {
                session: Mutex::new(None),
                changed: Condvar::new(),
                next_generation: AtomicU64::new(1),
            }),
        };

        if dispatcher.config.auto_start {
            dispatcher.open()?;
        }
        Ok(dispatcher)
    }

    pub fn config(&self) -> &DongleConfig {
        &self.config
    }

    /// Protocol engine version.
    pub fn version(&self) -> &'static str {
        VERSION
    }

    /// Connect using the configured ports.
    pub fn open(&self) -> Result<()> {
        self.connect(&self.config.port_a, self.config.port_b.as_deref())
    }

    /// Open the given serial ports and start decoding.
    pub fn connect(&self, port_a: &str, port_b: Option<&str>) -> Result<()> {
        // Checked here too so ports are not opened only to be closed again
        if self.is_connected() {
            return Err(DongleError::AlreadyConnected);
        }

        let link_a = Link::open(LinkId::A, port_a, &self.config.link)?;
        let link_b = match port_b {
            Some(port) => match Link::open(LinkId::B, port, &self.config.link) {
                Ok(link) => Some(link),
                Err(e) => {
                    link_a.close();
                    return Err(e);
                }
            },
            None => None,
        };

        self.connect_links(link_a, link_b)
    }

    /// Start decoding over already-built links.
    pub fn connect_links(&self, link_a: Link, link_b: Option<Link>) -> Result<()> {
        let links: Vec<Link> = std::iter::once(link_a).chain(link_b).collect();

        let mut guard = self.shared.lock();
        loop {
            if guard.as_ref().is_some_and(|s| s.live > 0) {
                for link in &links {
                    link.close();
                }
                return Err(DongleError::AlreadyConnected);
            }

            // A previous session whose links all ended on their own. Its threads may
            // still be inside the sink and need the lock, so join with it released.
            match guard.take() {
                Some(stale) => {
                    drop(guard);
                    join_threads(stale.links);
                    guard = self.shared.lock();
                }
                None => break,
            }
        }

        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed);
        let controls: Vec<LinkControl> = links.iter().map(Link::control).collect();
        let mut session = Session {
            generation,
            links: Vec::with_capacity(links.len()),
            live: 0,
        };

        for link in links {
            let id = link.id();
            let control = link.control();
            match self.spawn_link(link, generation) {
                Ok((thread, handles)) => {
                    session.links.push(ActiveLink {
                        control,
                        handles,
                        thread: Some(thread),
                    });
                    session.live += 1;
                }
                Err(source) => {
                    tlog!("[dispatch] Failed to spawn decoding thread for link {}: {}", id, source);
                    for control in &controls {
                        control.close();
                    }
                    drop(guard);
                    join_threads(session.links);
                    return Err(DongleError::Spawn { link: id, source });
                }
            }
        }

        tlog!(
            "[dispatch] Connected: {}",
            session
                .links
                .iter()
                .map(|l| format!("{}={}", l.control.id(), l.control.name()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        *guard = Some(session);
        Ok(())
    }

    fn spawn_link(&self, mut link: Link, generation: u64) -> std::io::Result<(JoinHandle<()>, Arc<HandleSet>)> {
        let id = link.id();
        let mut pipeline = LinkPipeline::new(id, Arc::clone(&self.sink), Arc::clone(&self.diagnostics));
        let handles = pipeline.handle_set();
        let shared = Arc::clone(&self.shared);
        let sink = Arc::clone(&self.sink);
        let thread_handles = Arc::clone(&handles);

        let thread = thread::Builder::new()
            .name(format!("capnolink-link-{}", id))
            .spawn(move || {
                // Created on the thread; a failed spawn must not touch the session
                let mut exit = ThreadExit {
                    shared,
                    sink,
                    handles: thread_handles,
                    link: id,
                    generation,
                    end: LinkEnd::Failed("decoding thread panicked".to_string()),
                };
                tlog!("[link:{}] Decoding thread started on {}", id, link.name());
                let end = run_link(&mut link, &mut pipeline);
                link.close();
                pipeline.close();
                tlog!("[link:{}] Decoding thread exiting: {:?}", id, end);
                exit.end = end;
            })?;

        Ok((thread, handles))
    }

    /// Stop every link and wait for their threads.
    pub fn disconnect(&self) -> Result<()> {
        let session = self.shared.lock().take().ok_or(DongleError::NotConnected)?;
        self.shared.changed.notify_all();

        for link in &session.links {
            link.control.close();
        }
        join_threads(session.links);

        tlog!("[dispatch] Disconnected");
        Ok(())
    }

    /// Disconnect if connected. Idempotent.
    pub fn close(&self) {
        match self.disconnect() {
            Ok(()) | Err(DongleError::NotConnected) => {}
            Err(e) => tlog!("[dispatch] Close failed: {}", e),
        }
    }

    /// Open the configured links if idle, then block until the session ends.
    pub fn initialize(&self) -> Result<()> {
        if !self.is_connected() {
            match self.open() {
                Ok(()) | Err(DongleError::AlreadyConnected) => {}
                Err(e) => return Err(e),
            }
        }

        self.wait();
        Ok(())
    }

    /// Block until no link of the current session is decoding, or the session
    /// is replaced.
    pub fn wait(&self) {
        let guard = self.shared.lock();
        let Some(generation) = guard.as_ref().map(|s| s.generation) else {
            return;
        };
        let _guard = self
            .shared
            .changed
            .wait_while(guard, |session| {
                session
                    .as_ref()
                    .is_some_and(|s| s.generation == generation && s.live > 0)
            })
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Send a 16-byte command to the device on `handle`. Link A is tried first.
    pub fn write(&self, bytes: &[u8], handle: u8) -> Result<()> {
        self.route(bytes, handle, None)
    }

    /// Send a 16-byte command to `handle` on a specific link.
    pub fn write_on(&self, link: LinkId, bytes: &[u8], handle: u8) -> Result<()> {
        self.route(bytes, handle, Some(link))
    }

    fn route(&self, bytes: &[u8], handle: u8, only: Option<LinkId>) -> Result<()> {
        if bytes.len() != COMMAND_SIZE {
            return Err(DongleError::InvalidCommand {
                expected: COMMAND_SIZE,
                actual: bytes.len(),
            });
        }

        let control = {
            let guard = self.shared.lock();
            let session = guard
                .as_ref()
                .filter(|s| s.live > 0)
                .ok_or(DongleError::NotConnected)?;
            session
                .links
                .iter()
                .filter(|l| only.map_or(true, |id| l.control.id() == id))
                .find(|l| l.handles.contains(handle))
                .map(|l| l.control.clone())
                .ok_or(DongleError::UnknownHandle { handle })?
        };

        // Outside the session lock; the link serialises its own writers
        control.write(bytes)
    }

    /// A session exists and at least one of its links is still decoding.
    pub fn is_connected(&self) -> bool {
        self.shared.lock().as_ref().is_some_and(|s| s.live > 0)
    }

    /// Handles currently registered, per link.
    pub fn connected_handles(&self) -> Vec<(LinkId, u8)> {
        let guard = self.shared.lock();
        guard
            .iter()
            .flat_map(|s| s.links.iter())
            .flat_map(|l| {
                let id = l.control.id();
                l.handles.handles().into_iter().map(move |h| (id, h))
            })
            .collect()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.close();
    }
}

/// Join link threads, skipping the calling thread (disconnect from the sink).
fn join_threads(links: Vec<ActiveLink>) {
    let current = thread::current().id();
    for mut link in links {
        let Some(thread) = link.thread.take() else {
            continue;
        };
        if thread.thread().id() == current {
            continue;
        }
        if thread.join().is_err() {
            tlog!("[dispatch] Link {} thread ended with a panic", link.control.id());
        }
    }
}
