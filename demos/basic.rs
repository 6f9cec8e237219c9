//! GS-USB streaming example
//!
//! This example demonstrates basic usage of the streaming driver:
//! - Scanning for devices
//! - Configuring bitrate and starting the channel
//! - Receiving CAN frames in the background
//! - Sending frames and running a request/response exchange

use std::time::Duration;

use gs_usb_stream::{
    EngineConfig, Frame, GsUsb, GsUsbError, ModeFlags, StreamEngine, UsbTransport, CAN_EFF_FLAG,
    CAN_RTR_FLAG,
};

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> gs_usb_stream::Result<()> {
    // Find our device
    let Some(transport) = UsbTransport::scan()?.into_iter().next() else {
        println!("Can not find gs_usb device");
        return Ok(());
    };
    println!("Found device: {}", transport);

    let mut dev = GsUsb::open(transport)?;
    println!("Capabilities: {}", dev.bit_timing_constants()?);

    dev.configure(1_000_000, ModeFlags::empty())?;
    println!("Bitrate set to 1 Mbps, device started");

    let engine = StreamEngine::start(&dev, EngineConfig::default(), |frame| {
        println!("RX  {}", frame);
    })
    .await?;

    let data: [u8; 8] = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0];
    let frames = [
        // Standard frame format with data
        Frame::with_data(0x7FF, &data),
        // Extended frame format with data
        Frame::with_data(0x12345678 | CAN_EFF_FLAG, &data),
        // Remote transmission request (standard)
        Frame::with_data(0x7FF | CAN_RTR_FLAG, &[]),
    ];

    println!("\nStarting CAN communication (press Ctrl+C to stop)...\n");

    let timeout = Duration::from_millis(500);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut frame_index = 0;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = engine.closed() => {
                eprintln!("Device went away");
                break;
            }
            _ = ticker.tick() => {}
        }

        let frame = &frames[frame_index];
        frame_index = (frame_index + 1) % frames.len();
        match engine.send(frame, timeout).await {
            Ok(()) => println!("TX  {}", frame),
            Err(e) => eprintln!("Send error: {}", e),
        }

        match engine.write_and_read_simple(0x3F0, [0; 8], timeout).await {
            Ok((id, data)) => println!("REQ 3F0 -> {:X} {:02X?}", id, data),
            Err(GsUsbError::LoopbackTimeout | GsUsbError::ResponseTimeout) => {
                println!("REQ 3F0 -> no reply");
            }
            Err(e) => eprintln!("Request error: {}", e),
        }
    }

    engine.shutdown();
    println!("Stats: {:?}", engine.stats());
    Ok(())
}
