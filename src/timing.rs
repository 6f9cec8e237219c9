//! Nominal bit timing lookup
//!
//! A closed table keyed by device clock and bitrate, not a solver. Only the
//! 48 MHz and 80 MHz clocks are tabulated; every entry targets an 87.5%
//! sample point except 80 MHz / 800 kbit/s.

use crate::error::{GsUsbError, Result};
use crate::structures::BitTiming;

/// Clock frequencies with a timing table
pub const SUPPORTED_CLOCKS: [u32; 2] = [48_000_000, 80_000_000];

const fn entry(phase_seg1: u32, phase_seg2: u32, brp: u32) -> BitTiming {
    BitTiming::new(1, phase_seg1, phase_seg2, 1, brp)
}

const TABLE_48MHZ: [(u32, BitTiming); 10] = [
    (10_000, entry(12, 2, 300)),
    (20_000, entry(12, 2, 150)),
    (50_000, entry(12, 2, 60)),
    (83_333, entry(12, 2, 36)),
    (100_000, entry(12, 2, 30)),
    (125_000, entry(12, 2, 24)),
    (250_000, entry(12, 2, 12)),
    (500_000, entry(12, 2, 6)),
    (800_000, entry(12, 2, 4)),
    (1_000_000, entry(12, 2, 3)),
];

const TABLE_80MHZ: [(u32, BitTiming); 10] = [
    (10_000, entry(12, 2, 500)),
    (20_000, entry(12, 2, 250)),
    (50_000, entry(12, 2, 100)),
    (83_333, entry(12, 2, 60)),
    (100_000, entry(12, 2, 50)),
    (125_000, entry(12, 2, 40)),
    (250_000, entry(12, 2, 20)),
    (500_000, entry(12, 2, 10)),
    (800_000, entry(7, 1, 10)),
    (1_000_000, entry(12, 2, 5)),
];

fn table(clock_hz: u32) -> Option<&'static [(u32, BitTiming)]> {
    match clock_hz {
        48_000_000 => Some(&TABLE_48MHZ),
        80_000_000 => Some(&TABLE_80MHZ),
        _ => None,
    }
}

/// Look up nominal bit timing for `bitrate` on a device clocked at `clock_hz`
///
/// The clock is checked before the bitrate, so an unknown clock always
/// yields `ClockNotSupported`.
pub fn lookup(clock_hz: u32, bitrate: u32) -> Result<BitTiming> {
    let entries = table(clock_hz).ok_or(GsUsbError::ClockNotSupported { clock_hz })?;
    entries
        .iter()
        .find(|(rate, _)| *rate == bitrate)
        .map(|(_, timing)| *timing)
        .ok_or(GsUsbError::UnsupportedBitrate { bitrate, clock_hz })
}

/// Bitrates tabulated for `clock_hz`, in ascending order
pub fn supported_bitrates(clock_hz: u32) -> Vec<u32> {
    table(clock_hz)
        .map(|entries| entries.iter().map(|(rate, _)| *rate).collect())
        .unwrap_or_default()
}
