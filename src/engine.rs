//! Stream engine
//!
//! Owns the two bulk streams of a configured adapter and reconciles two
//! consumers of the inbound side:
//!
//! - a reader task that moves every inbound transfer into a bounded queue,
//! - a dispatcher task that drains the queue into the user callback,
//! - [`StreamEngine::transact`], which pauses the dispatcher, writes one
//!   frame and takes the device's loopback (and optionally a response)
//!   straight from the queue.
//!
//! The queue receiver sits behind an async mutex; holding its guard is the
//! right to consume. The dispatcher holds it for the lifetime of one
//! generation and a transaction takes it only after cancelling that
//! generation. The outbound stream sits behind a second mutex held for a
//! whole transaction, so loopback and response frames of two transactions
//! never interleave.
//!
//! The reader is the only task that can end the engine: a failed read cancels
//! the root scope and every later call fails with `EngineShutDown`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

use crate::constants::{GS_USB_FRAME_SIZE, GS_USB_FRAME_SIZE_HW_TIMESTAMP};
use crate::device::{GsUsb, StreamClaim};
use crate::error::{GsUsbError, Result};
use crate::frame::Frame;
use crate::scope::Scope;
use crate::transport::{InStream, OutStream, Transport};

type RawFrame = Vec<u8>;
type Callback = Box<dyn FnMut(Frame) + Send + 'static>;

/// How a transaction recognises its loopback and response frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EchoMatch {
    /// Take the next inbound frames, whatever they are
    #[default]
    Any,
    /// The loopback must carry the sent `echo_id` and `can_id`, the response
    /// must be a bus frame. Frames that do not match go to the callback.
    Strict,
}

/// Stream engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long inbound traffic is discarded after the streams open
    pub settle_window: Duration,
    /// Capacity of the queue between reader and consumers
    pub queue_capacity: usize,
    /// Size of one inbound read; 24 covers a classic frame with timestamp
    pub read_size: usize,
    /// Loopback/response matching policy
    pub echo_match: EchoMatch,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settle_window: Duration::from_secs(1),
            queue_capacity: 64,
            read_size: GS_USB_FRAME_SIZE_HW_TIMESTAMP,
            echo_match: EchoMatch::Any,
        }
    }
}

/// Transfer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub frames_read: u64,
    pub bytes_read: u64,
    pub frames_written: u64,
    pub bytes_written: u64,
}

#[derive(Debug, Default)]
struct Counters {
    frames_read: AtomicU64,
    bytes_read: AtomicU64,
    frames_written: AtomicU64,
    bytes_written: AtomicU64,
}

impl Counters {
    fn record_read(&self, bytes: usize) {
        self.frames_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn record_write(&self, bytes: usize) {
        self.frames_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> EngineStats {
        EngineStats {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

struct Shared {
    echo_match: EchoMatch,
    /// Cancelled on shutdown or reader failure
    root: Scope,
    /// Consumer gate: dispatcher XOR one transaction
    inbound: Mutex<mpsc::Receiver<RawFrame>>,
    /// Writer token
    outbound: Mutex<Box<dyn OutStream>>,
    /// Scope of the live dispatcher generation
    generation: StdMutex<Scope>,
    deliver: mpsc::UnboundedSender<Frame>,
    counters: Arc<Counters>,
}

impl Shared {
    fn current_generation(&self) -> Scope {
        self.generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn launch_dispatcher(self: &Arc<Self>) {
        if self.root.is_cancelled() {
            return;
        }
        let scope = Scope::new();
        *self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = scope.clone();
        tokio::spawn(dispatch(Arc::clone(self), scope));
    }

    fn forward(&self, frame: Frame) {
        // Only fails once the delivery task is gone, i.e. after shutdown
        let _ = self.deliver.send(frame);
    }

    fn is_loopback(&self, sent: &Frame, frame: &Frame) -> bool {
        match self.echo_match {
            EchoMatch::Any => true,
            EchoMatch::Strict => frame.echo_id == sent.echo_id && frame.can_id == sent.can_id,
        }
    }

    fn is_response(&self, frame: &Frame) -> bool {
        match self.echo_match {
            EchoMatch::Any => true,
            EchoMatch::Strict => frame.is_rx_frame(),
        }
    }

    async fn exchange(
        &self,
        out: &mut dyn OutStream,
        inbound: &mut mpsc::Receiver<RawFrame>,
        frame: &Frame,
        deadline: Instant,
        expect_response: bool,
    ) -> Result<Option<Frame>> {
        let bytes = frame.encode();
        // Never abandoned mid-transfer: the stream enforces `budget` itself
        let budget = deadline.saturating_duration_since(Instant::now());
        let written = out.write(&bytes, budget).await?;
        if written < bytes.len() {
            return Err(GsUsbError::ShortWrite {
                expected: bytes.len(),
                actual: written,
            });
        }
        self.counters.record_write(written);
        trace!("tx {frame:?}");

        let loopback = self
            .await_frame(
                inbound,
                deadline,
                |f| self.is_loopback(frame, f),
                GsUsbError::LoopbackTimeout,
            )
            .await?;
        trace!("loopback {loopback:?}");

        if !expect_response {
            return Ok(None);
        }
        let response = self
            .await_frame(
                inbound,
                deadline,
                |f| self.is_response(f),
                GsUsbError::ResponseTimeout,
            )
            .await?;
        Ok(Some(response))
    }

    async fn await_frame(
        &self,
        inbound: &mut mpsc::Receiver<RawFrame>,
        deadline: Instant,
        wanted: impl Fn(&Frame) -> bool,
        on_timeout: GsUsbError,
    ) -> Result<Frame> {
        loop {
            let raw = match tokio::time::timeout_at(deadline, inbound.recv()).await {
                Err(_) => return Err(on_timeout),
                Ok(None) => return Err(GsUsbError::EngineShutDown),
                Ok(Some(raw)) => raw,
            };
            let frame = Frame::decode(&raw);
            if wanted(&frame) {
                return Ok(frame);
            }
            trace!("unmatched frame passed on: {frame:?}");
            self.forward(frame);
        }
    }
}

/// Relaunches the dispatcher when a transaction ends, however it ends
struct ResumeDispatcher<'a>(&'a Arc<Shared>);

impl Drop for ResumeDispatcher<'_> {
    fn drop(&mut self) {
        self.0.launch_dispatcher();
    }
}

/// Streaming session on a configured adapter
///
/// Received frames are handed to the callback in arrival order, except for
/// frames a transaction consumes as its loopback or response. Must be
/// created inside a tokio runtime. Dropping the engine shuts it down.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use gs_usb_stream::{EngineConfig, Frame, GsUsb, ModeFlags, StreamEngine, UsbTransport};
///
/// # async fn run() -> gs_usb_stream::Result<()> {
/// let transport = UsbTransport::scan()?
///     .into_iter()
///     .next()
///     .ok_or(gs_usb_stream::GsUsbError::DeviceNotFound)?;
/// let mut dev = GsUsb::open(transport)?;
/// dev.configure(1_000_000, ModeFlags::empty())?;
///
/// let engine = StreamEngine::start(&dev, EngineConfig::default(), |frame| {
///     println!("RX  {}", frame);
/// })
/// .await?;
///
/// let response = engine
///     .transact(&Frame::probe(0x3F0, &[0]), Duration::from_millis(500), true)
///     .await?;
/// println!("response: {:?}", response);
/// # Ok(())
/// # }
/// ```
pub struct StreamEngine {
    shared: Arc<Shared>,
}

impl StreamEngine {
    /// Open the device's streams and start delivering frames to `callback`
    ///
    /// Fails with `NotConfigured` unless nominal bit timing was set. Waits
    /// for the settle window, discarding whatever the device sends in that
    /// time, before the first frame is dispatched.
    ///
    /// Only one engine may stream from a device at a time; a second `start`
    /// fails with `AlreadyStreaming` until the first engine's reader has
    /// stopped.
    ///
    /// The callback runs on a runtime task and must not block. A slow
    /// callback delays delivery but never loses frames, since undelivered
    /// frames are buffered; blocking work belongs on
    /// `tokio::task::spawn_blocking` or a thread of its own.
    pub async fn start<T, F>(device: &GsUsb<T>, config: EngineConfig, callback: F) -> Result<Self>
    where
        T: Transport,
        F: FnMut(Frame) + Send + 'static,
    {
        if !device.is_timing_configured() {
            return Err(GsUsbError::NotConfigured);
        }
        let claim = device.claim_streams()?;
        let inbound = device.transport().open_in_stream()?;
        let outbound = device.transport().open_out_stream()?;
        Self::spawn(claim, inbound, outbound, config, Box::new(callback)).await
    }

    async fn spawn(
        claim: StreamClaim,
        inbound: Box<dyn InStream>,
        outbound: Box<dyn OutStream>,
        config: EngineConfig,
        callback: Callback,
    ) -> Result<Self> {
        let root = Scope::new();
        let counters = Arc::new(Counters::default());
        let (queue_tx, mut queue_rx) = mpsc::channel(config.queue_capacity.max(1));

        tokio::spawn(read_inbound(
            claim,
            inbound,
            queue_tx,
            root.clone(),
            Arc::clone(&counters),
            config.read_size.max(GS_USB_FRAME_SIZE),
        ));

        let discarded = settle(&mut queue_rx, config.settle_window).await;
        debug!("discarded {discarded} stale frame(s) before dispatch");
        if root.is_cancelled() {
            return Err(GsUsbError::EngineShutDown);
        }

        let (deliver_tx, deliver_rx) = mpsc::unbounded_channel();
        tokio::spawn(deliver(root.clone(), deliver_rx, callback));

        let shared = Arc::new(Shared {
            echo_match: config.echo_match,
            root,
            inbound: Mutex::new(queue_rx),
            outbound: Mutex::new(outbound),
            generation: StdMutex::new(Scope::new()),
            deliver: deliver_tx,
            counters,
        });
        shared.launch_dispatcher();
        debug!("streaming");

        Ok(Self { shared })
    }

    /// Write `frame` and wait for the device to echo it, then optionally for
    /// one more frame as the response
    ///
    /// Waits up to `timeout` for another transaction to finish (`Busy`),
    /// then gives write, loopback and response one shared `timeout` budget.
    /// Asynchronous delivery resumes before this returns, on every path.
    pub async fn transact(
        &self,
        frame: &Frame,
        timeout: Duration,
        expect_response: bool,
    ) -> Result<Option<Frame>> {
        let shared = &self.shared;
        if shared.root.is_cancelled() {
            return Err(GsUsbError::EngineShutDown);
        }

        let mut writer = tokio::select! {
            biased;
            _ = shared.root.cancelled() => return Err(GsUsbError::EngineShutDown),
            writer = tokio::time::timeout(timeout, shared.outbound.lock()) => {
                writer.map_err(|_| GsUsbError::Busy)?
            }
        };

        // Dropped after `inbound`, before `writer`
        let _resume = ResumeDispatcher(shared);
        shared.current_generation().cancel();
        let mut inbound = tokio::select! {
            biased;
            _ = shared.root.cancelled() => return Err(GsUsbError::EngineShutDown),
            inbound = shared.inbound.lock() => inbound,
        };

        let deadline = Instant::now() + timeout;
        let result = tokio::select! {
            biased;
            _ = shared.root.cancelled() => Err(GsUsbError::EngineShutDown),
            result = shared.exchange(&mut **writer, &mut inbound, frame, deadline, expect_response) => result,
        };
        if let Err(e) = &result {
            debug!("transaction failed: {e}");
        }
        result
    }

    /// Write `frame` and wait for its loopback only
    pub async fn send(&self, frame: &Frame, timeout: Duration) -> Result<()> {
        self.transact(frame, timeout, false).await.map(|_| ())
    }

    /// Send a probe frame to `can_id` and return the id and payload of the
    /// reply
    ///
    /// The probe carries all eight `data` bytes on the wire with a DLC of 1.
    pub async fn write_and_read_simple(
        &self,
        can_id: u32,
        data: [u8; 8],
        timeout: Duration,
    ) -> Result<(u32, [u8; 8])> {
        let request = Frame {
            can_dlc: 1,
            data,
            ..Frame::probe(can_id, &[])
        };
        let response = self
            .transact(&request, timeout, true)
            .await?
            .ok_or(GsUsbError::ResponseTimeout)?;
        Ok((response.can_id, response.data))
    }

    /// Stop the reader, dispatcher and callback delivery
    pub fn shutdown(&self) {
        if !self.shared.root.is_cancelled() {
            debug!("shutting down");
        }
        self.shared.root.cancel();
    }

    /// Whether the engine has shut down
    pub fn is_shut_down(&self) -> bool {
        self.shared.root.is_cancelled()
    }

    /// Resolve once the engine has shut down, e.g. because the device was
    /// unplugged
    pub async fn closed(&self) {
        self.shared.root.cancelled().await;
    }

    /// Transfer counters since start, stale frames included
    pub fn stats(&self) -> EngineStats {
        self.shared.counters.snapshot()
    }
}

impl std::fmt::Debug for StreamEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEngine")
            .field("echo_match", &self.shared.echo_match)
            .field("shut_down", &self.is_shut_down())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Owns the device's inbound endpoint; the claim is released on exit
async fn read_inbound(
    _claim: StreamClaim,
    mut stream: Box<dyn InStream>,
    queue: mpsc::Sender<RawFrame>,
    root: Scope,
    counters: Arc<Counters>,
    read_size: usize,
) {
    let mut buf = vec![0u8; read_size];
    loop {
        let read = tokio::select! {
            biased;
            _ = root.cancelled() => break,
            read = stream.read(&mut buf) => read,
        };
        let n = match read {
            Ok(0) => continue,
            Ok(n) => n,
            Err(e) => {
                warn!("inbound stream failed, shutting down: {e}");
                root.cancel();
                break;
            }
        };
        counters.record_read(n);

        let raw = buf[..n].to_vec();
        trace!("rx {:?}", Frame::decode(&raw));
        let queued = tokio::select! {
            biased;
            _ = root.cancelled() => break,
            queued = queue.send(raw) => queued,
        };
        if queued.is_err() {
            break;
        }
    }
    debug!("reader stopped");
}

/// Discard inbound traffic for `window`, then whatever is still buffered
async fn settle(queue: &mut mpsc::Receiver<RawFrame>, window: Duration) -> usize {
    let deadline = Instant::now() + window;
    let mut discarded = 0;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            raw = queue.recv() => match raw {
                Some(_) => discarded += 1,
                None => break,
            },
        }
    }
    while queue.try_recv().is_ok() {
        discarded += 1;
    }
    discarded
}

async fn dispatch(shared: Arc<Shared>, scope: Scope) {
    let mut inbound = tokio::select! {
        biased;
        _ = shared.root.cancelled() => return,
        _ = scope.cancelled() => return,
        inbound = shared.inbound.lock() => inbound,
    };
    trace!("dispatcher generation started");

    loop {
        let raw = tokio::select! {
            biased;
            _ = shared.root.cancelled() => break,
            _ = scope.cancelled() => break,
            raw = inbound.recv() => raw,
        };
        let Some(raw) = raw else { break };
        shared.forward(Frame::decode(&raw));

        // Already buffered frames belong to this generation
        while let Ok(raw) = inbound.try_recv() {
            shared.forward(Frame::decode(&raw));
        }
    }
    trace!("dispatcher generation stopped");
}

async fn deliver(root: Scope, mut frames: mpsc::UnboundedReceiver<Frame>, mut callback: Callback) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = root.cancelled() => break,
            frame = frames.recv() => frame,
        };
        let Some(frame) = frame else { break };
        callback(frame);
    }
}
