//! In-memory transport for unit tests
//!
//! Behaves like a gs_usb adapter: canned control responses, an inbound queue
//! the test feeds, and an outbound stream that can echo every written frame
//! the way the device confirms transmission.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::constants::*;
use crate::error::{GsUsbError, Result};
use crate::frame::Frame;
use crate::structures::Features;
use crate::transport::{InStream, OutStream, Transport};

pub(crate) type ControlLog = Arc<Mutex<Vec<(u8, u16, Vec<u8>)>>>;

fn words(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn default_features() -> Features {
    Features::LISTEN_ONLY
        | Features::LOOP_BACK
        | Features::ONE_SHOT
        | Features::HW_TIMESTAMP
        | Features::IDENTIFY
        | Features::USER_ID
        | Features::BT_CONST_EXT
        | Features::TERMINATION
        | Features::GET_STATE
}

struct ControlState {
    clock_hz: u32,
    responses: HashMap<u8, Vec<u8>>,
    fail: bool,
}

impl ControlState {
    fn set_constants(&mut self, features: Features) {
        let nominal = [1, 16, 1, 8, 4, 1, 1024, 1];
        let data = [1, 16, 1, 8, 4, 1, 32, 1];

        let mut bt_const = vec![features.bits(), self.clock_hz];
        bt_const.extend_from_slice(&nominal);
        let mut bt_const_ext = bt_const.clone();
        bt_const_ext.extend_from_slice(&data);

        self.responses.insert(GS_USB_BREQ_BT_CONST, words(&bt_const));
        self.responses
            .insert(GS_USB_BREQ_BT_CONST_EXT, words(&bt_const_ext));
    }
}

type Inbound = Arc<AsyncMutex<mpsc::UnboundedReceiver<Result<Vec<u8>>>>>;

#[derive(Default)]
struct WriteBehavior {
    loopback: bool,
    fail: bool,
    stall: bool,
    delay: Option<Duration>,
    responses: VecDeque<Frame>,
}

struct Bus {
    inbound_tx: mpsc::UnboundedSender<Result<Vec<u8>>>,
    /// One endpoint; every opened in-stream reads from it
    inbound_rx: Inbound,
    behavior: Mutex<WriteBehavior>,
    written: Mutex<Vec<Frame>>,
}

impl Bus {
    fn push(&self, frame: &Frame) {
        // Adapters running with hardware timestamps send 24-byte transfers
        let mut bytes = frame.encode().to_vec();
        bytes.extend_from_slice(&[0x10, 0x20, 0x30, 0x40]);
        let _ = self.inbound_tx.send(Ok(bytes));
    }
}

pub(crate) struct MockTransport {
    control: Mutex<ControlState>,
    log: ControlLog,
    bus: Arc<Bus>,
}

impl MockTransport {
    pub(crate) fn new(clock_hz: u32) -> Self {
        let mut control = ControlState {
            clock_hz,
            responses: HashMap::new(),
            fail: false,
        };
        control.responses.insert(
            GS_USB_BREQ_DEVICE_CONFIG,
            vec![0, 0, 0, 0, 20, 0, 0, 0, 10, 0, 0, 0],
        );
        control.responses.insert(GS_USB_BREQ_TIMESTAMP, words(&[0]));
        control
            .responses
            .insert(GS_USB_BREQ_GET_TERMINATION, words(&[0]));
        control.responses.insert(GS_USB_BREQ_GET_USER_ID, words(&[0]));
        control
            .responses
            .insert(GS_USB_BREQ_GET_STATE, words(&[GS_CAN_STATE_ERROR_ACTIVE, 0, 0]));
        control.set_constants(default_features());

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            control: Mutex::new(control),
            log: Arc::new(Mutex::new(Vec::new())),
            bus: Arc::new(Bus {
                inbound_tx,
                inbound_rx: Arc::new(AsyncMutex::new(inbound_rx)),
                behavior: Mutex::new(WriteBehavior::default()),
                written: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn set_response(&self, request: u8, data: Vec<u8>) {
        self.control.lock().unwrap().responses.insert(request, data);
    }

    pub(crate) fn set_features(&self, features: Features) {
        self.control.lock().unwrap().set_constants(features);
    }

    pub(crate) fn fail_control(&self, fail: bool) {
        self.control.lock().unwrap().fail = fail;
    }

    pub(crate) fn control_log(&self) -> Vec<(u8, u16, Vec<u8>)> {
        self.log.lock().unwrap().clone()
    }

    pub(crate) fn control_log_handle(&self) -> ControlLog {
        Arc::clone(&self.log)
    }

    /// Deliver a frame from the bus
    pub(crate) fn inject(&self, frame: Frame) {
        self.bus.push(&frame);
    }

    /// Make the next inbound read fail as if the device was unplugged
    pub(crate) fn fail_reads(&self) {
        let _ = self
            .bus
            .inbound_tx
            .send(Err(GsUsbError::BulkTransfer(rusb::Error::NoDevice)));
    }

    /// Echo every written frame back on the inbound stream
    pub(crate) fn set_loopback(&self, loopback: bool) {
        self.bus.behavior.lock().unwrap().loopback = loopback;
    }

    /// Reply to the next write with `frame`, after its echo
    pub(crate) fn queue_response(&self, frame: Frame) {
        self.bus.behavior.lock().unwrap().responses.push_back(frame);
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.bus.behavior.lock().unwrap().fail = fail;
    }

    /// Make writes time out after the full budget without sending
    pub(crate) fn stall_writes(&self, stall: bool) {
        self.bus.behavior.lock().unwrap().stall = stall;
    }

    /// Make writes take `delay` before the frame reaches the bus
    pub(crate) fn delay_writes(&self, delay: Duration) {
        self.bus.behavior.lock().unwrap().delay = Some(delay);
    }

    pub(crate) fn written(&self) -> Vec<Frame> {
        self.bus.written.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    fn control_in(&self, request: u8, value: u16, length: usize) -> Result<Vec<u8>> {
        self.log.lock().unwrap().push((request, value, Vec::new()));
        let control = self.control.lock().unwrap();
        if control.fail {
            return Err(GsUsbError::ControlTransfer(rusb::Error::Pipe));
        }
        let mut data = control
            .responses
            .get(&request)
            .cloned()
            .ok_or(GsUsbError::ControlTransfer(rusb::Error::NotSupported))?;
        data.truncate(length);
        Ok(data)
    }

    fn control_out(&self, request: u8, value: u16, data: &[u8]) -> Result<()> {
        self.log.lock().unwrap().push((request, value, data.to_vec()));
        if self.control.lock().unwrap().fail {
            return Err(GsUsbError::ControlTransfer(rusb::Error::Pipe));
        }
        Ok(())
    }

    fn open_in_stream(&self) -> Result<Box<dyn InStream>> {
        Ok(Box::new(MockInStream {
            rx: Arc::clone(&self.bus.inbound_rx),
        }))
    }

    fn open_out_stream(&self) -> Result<Box<dyn OutStream>> {
        Ok(Box::new(MockOutStream {
            bus: Arc::clone(&self.bus),
        }))
    }
}

struct MockInStream {
    rx: Inbound,
}

#[async_trait]
impl InStream for MockInStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(Ok(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => std::future::pending().await,
        }
    }
}

struct MockOutStream {
    bus: Arc<Bus>,
}

#[async_trait]
impl OutStream for MockOutStream {
    async fn write(&mut self, buf: &[u8], timeout: Duration) -> Result<usize> {
        let (stall, fail, delay) = {
            let behavior = self.bus.behavior.lock().unwrap();
            (behavior.stall, behavior.fail, behavior.delay)
        };
        if stall {
            tokio::time::sleep(timeout).await;
            return Err(GsUsbError::WriteTimeout);
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(GsUsbError::WriteFailed(rusb::Error::Io));
        }

        let frame = Frame::decode(buf);
        self.bus.written.lock().unwrap().push(frame);

        let (loopback, response) = {
            let mut behavior = self.bus.behavior.lock().unwrap();
            (behavior.loopback, behavior.responses.pop_front())
        };
        if loopback {
            self.bus.push(&frame);
        }
        if let Some(response) = response {
            self.bus.push(&response);
        }
        Ok(buf.len())
    }
}
