//! GS-USB control request payloads
//!
//! This module contains the data structures exchanged through control
//! transfers: device mode, bit timing, device config, timing capabilities,
//! bus state and the single-field termination/identify requests.

use bitflags::bitflags;

use crate::constants::{
    can_state_name, GS_CAN_FEATURE_BERR_REPORTING, GS_CAN_FEATURE_BT_CONST_EXT,
    GS_CAN_FEATURE_FD, GS_CAN_FEATURE_GET_STATE, GS_CAN_FEATURE_HW_TIMESTAMP,
    GS_CAN_FEATURE_IDENTIFY, GS_CAN_FEATURE_LISTEN_ONLY, GS_CAN_FEATURE_LOOP_BACK,
    GS_CAN_FEATURE_ONE_SHOT, GS_CAN_FEATURE_PAD_PKTS_TO_MAX_PKT_SIZE,
    GS_CAN_FEATURE_REQ_USB_QUIRK_LPC546XX, GS_CAN_FEATURE_TERMINATION,
    GS_CAN_FEATURE_TRIPLE_SAMPLE, GS_CAN_FEATURE_USER_ID, GS_CAN_MODE_BERR_REPORTING,
    GS_CAN_MODE_FD, GS_CAN_MODE_HW_TIMESTAMP, GS_CAN_MODE_LISTEN_ONLY, GS_CAN_MODE_LOOP_BACK,
    GS_CAN_MODE_ONE_SHOT, GS_CAN_MODE_PAD_PKTS_TO_MAX_PKT_SIZE, GS_CAN_MODE_TRIPLE_SAMPLE,
    GS_CAN_STATE_BUS_OFF, GS_CAN_STATE_ERROR_ACTIVE, GS_CAN_STATE_ERROR_PASSIVE,
    GS_CAN_STATE_ERROR_WARNING, GS_USB_BT_CONST_EXT_SIZE, GS_USB_BT_CONST_SIZE,
    GS_USB_DEVICE_CONFIG_SIZE, GS_USB_DEVICE_STATE_SIZE,
};
use crate::error::{GsUsbError, Result};

/// Read the little-endian u32 at word `index`
fn word(data: &[u8], index: usize) -> u32 {
    let at = index * 4;
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn ensure_len(data: &[u8], expected: usize) -> Result<()> {
    if data.len() < expected {
        return Err(GsUsbError::ShortRead {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Channel mode requested through GS_USB_BREQ_MODE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CanMode {
    /// Stop the channel; configuration requests are accepted again
    Reset = 0,
    /// Put the channel on the bus
    Start = 1,
}

bitflags! {
    /// Mode flags sent alongside [`CanMode`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModeFlags: u32 {
        /// Listen-only mode (no ACKs sent)
        const LISTEN_ONLY = GS_CAN_MODE_LISTEN_ONLY;
        /// Loopback mode
        const LOOP_BACK = GS_CAN_MODE_LOOP_BACK;
        /// Triple sample mode
        const TRIPLE_SAMPLE = GS_CAN_MODE_TRIPLE_SAMPLE;
        /// One-shot mode (no retransmission)
        const ONE_SHOT = GS_CAN_MODE_ONE_SHOT;
        /// Hardware timestamps appended to received frames
        const HW_TIMESTAMP = GS_CAN_MODE_HW_TIMESTAMP;
        /// Pad packets to max packet size
        const PAD_PKTS_TO_MAX_PKT_SIZE = GS_CAN_MODE_PAD_PKTS_TO_MAX_PKT_SIZE;
        /// CAN FD mode
        const FD = GS_CAN_MODE_FD;
        /// Bus error reporting
        const BERR_REPORTING = GS_CAN_MODE_BERR_REPORTING;
    }
}

bitflags! {
    /// Feature bits reported in the BT_CONST response
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Features: u32 {
        const LISTEN_ONLY = GS_CAN_FEATURE_LISTEN_ONLY;
        const LOOP_BACK = GS_CAN_FEATURE_LOOP_BACK;
        const TRIPLE_SAMPLE = GS_CAN_FEATURE_TRIPLE_SAMPLE;
        const ONE_SHOT = GS_CAN_FEATURE_ONE_SHOT;
        const HW_TIMESTAMP = GS_CAN_FEATURE_HW_TIMESTAMP;
        const IDENTIFY = GS_CAN_FEATURE_IDENTIFY;
        const USER_ID = GS_CAN_FEATURE_USER_ID;
        const PAD_PKTS_TO_MAX_PKT_SIZE = GS_CAN_FEATURE_PAD_PKTS_TO_MAX_PKT_SIZE;
        const FD = GS_CAN_FEATURE_FD;
        const REQ_USB_QUIRK_LPC546XX = GS_CAN_FEATURE_REQ_USB_QUIRK_LPC546XX;
        const BT_CONST_EXT = GS_CAN_FEATURE_BT_CONST_EXT;
        const TERMINATION = GS_CAN_FEATURE_TERMINATION;
        const BERR_REPORTING = GS_CAN_FEATURE_BERR_REPORTING;
        const GET_STATE = GS_CAN_FEATURE_GET_STATE;
    }
}

impl Features {
    /// Mode flags this device accepts
    ///
    /// Mode bits share their positions with the matching feature bits.
    pub fn supported_modes(&self) -> ModeFlags {
        ModeFlags::from_bits_truncate(self.bits())
    }
}

/// Device mode configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMode {
    /// Reset or start
    pub mode: CanMode,
    /// Mode flags
    pub flags: ModeFlags,
}

impl DeviceMode {
    /// Create a new device mode configuration
    pub fn new(mode: CanMode, flags: ModeFlags) -> Self {
        Self { mode, flags }
    }

    /// Pack into bytes for USB transfer
    pub fn pack(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(&(self.mode as u32).to_le_bytes());
        buf[4..8].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf
    }
}

/// CAN bit timing configuration
///
/// Used for both the nominal (arbitration) phase and the CAN FD data phase.
/// Values are sent verbatim; device limits are not checked here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitTiming {
    /// Propagation segment
    pub prop_seg: u32,
    /// Phase segment 1
    pub phase_seg1: u32,
    /// Phase segment 2
    pub phase_seg2: u32,
    /// Synchronization jump width
    pub sjw: u32,
    /// Baud rate prescaler
    pub brp: u32,
}

impl BitTiming {
    /// Create a new bit timing configuration
    pub const fn new(prop_seg: u32, phase_seg1: u32, phase_seg2: u32, sjw: u32, brp: u32) -> Self {
        Self {
            prop_seg,
            phase_seg1,
            phase_seg2,
            sjw,
            brp,
        }
    }

    /// Pack into bytes for USB transfer
    pub fn pack(&self) -> [u8; 20] {
        let mut buf = [0u8; 20];
        buf[0..4].copy_from_slice(&self.prop_seg.to_le_bytes());
        buf[4..8].copy_from_slice(&self.phase_seg1.to_le_bytes());
        buf[8..12].copy_from_slice(&self.phase_seg2.to_le_bytes());
        buf[12..16].copy_from_slice(&self.sjw.to_le_bytes());
        buf[16..20].copy_from_slice(&self.brp.to_le_bytes());
        buf
    }

    /// Number of time quanta per bit, including the sync segment
    pub fn quanta_per_bit(&self) -> u32 {
        1 + self.prop_seg + self.phase_seg1 + self.phase_seg2
    }

    /// Bitrate these registers produce at `clock_hz`
    pub fn bitrate(&self, clock_hz: u32) -> u32 {
        let divisor = self.brp.saturating_mul(self.quanta_per_bit());
        if divisor == 0 {
            return 0;
        }
        clock_hz / divisor
    }

    /// Sample point as a fraction of the bit time
    pub fn sample_point(&self) -> f32 {
        let tq = self.quanta_per_bit();
        (tq - self.phase_seg2) as f32 / tq as f32
    }
}

impl std::fmt::Display for BitTiming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Prop Seg: {}\nPhase Seg 1: {}\nPhase Seg 2: {}\nSJW: {}\nBRP: {}",
            self.prop_seg, self.phase_seg1, self.phase_seg2, self.sjw, self.brp
        )
    }
}

/// Device configuration from GS_USB_BREQ_DEVICE_CONFIG
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Interface count (number of CAN channels - 1)
    pub icount: u8,
    /// Firmware version (multiply by 0.1 for actual version)
    pub sw_version: u32,
    /// Hardware version (multiply by 0.1 for actual version)
    pub hw_version: u32,
}

impl DeviceConfig {
    /// Unpack from the 12-byte response
    pub fn unpack(data: &[u8]) -> Result<Self> {
        ensure_len(data, GS_USB_DEVICE_CONFIG_SIZE)?;
        Ok(Self {
            icount: data[3],
            sw_version: word(data, 1),
            hw_version: word(data, 2),
        })
    }

    /// Get the number of CAN channels
    pub fn channel_count(&self) -> u8 {
        self.icount.saturating_add(1)
    }
}

impl std::fmt::Display for DeviceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "iCount: {}\nSW Version: {:.1}\nHW Version: {:.1}",
            self.icount,
            self.sw_version as f32 / 10.0,
            self.hw_version as f32 / 10.0
        )
    }
}

/// Bit timing register limits for one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingLimits {
    pub tseg1_min: u32,
    pub tseg1_max: u32,
    pub tseg2_min: u32,
    pub tseg2_max: u32,
    pub sjw_max: u32,
    pub brp_min: u32,
    pub brp_max: u32,
    pub brp_inc: u32,
}

impl TimingLimits {
    /// Unpack eight words starting at word `first`
    fn unpack_at(data: &[u8], first: usize) -> Self {
        Self {
            tseg1_min: word(data, first),
            tseg1_max: word(data, first + 1),
            tseg2_min: word(data, first + 2),
            tseg2_max: word(data, first + 3),
            sjw_max: word(data, first + 4),
            brp_min: word(data, first + 5),
            brp_max: word(data, first + 6),
            brp_inc: word(data, first + 7),
        }
    }
}

/// Device capabilities from GS_USB_BREQ_BT_CONST
///
/// Read once per session; `clock_hz` selects the bit timing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Raw feature bitfield
    pub feature_bits: u32,
    /// CAN clock frequency in Hz
    pub clock_hz: u32,
    /// Nominal phase limits
    pub timing_limits: TimingLimits,
}

impl DeviceCapabilities {
    /// Unpack from BT_CONST response (40 bytes, 10 x uint32)
    pub fn unpack(data: &[u8]) -> Result<Self> {
        ensure_len(data, GS_USB_BT_CONST_SIZE)?;
        Ok(Self {
            feature_bits: word(data, 0),
            clock_hz: word(data, 1),
            timing_limits: TimingLimits::unpack_at(data, 2),
        })
    }

    /// Feature bits known to this driver
    pub fn features(&self) -> Features {
        Features::from_bits_truncate(self.feature_bits)
    }

    /// Get clock frequency in MHz
    pub fn clock_mhz(&self) -> f32 {
        self.clock_hz as f32 / 1_000_000.0
    }
}

impl std::fmt::Display for DeviceCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let l = &self.timing_limits;
        write!(
            f,
            "Feature bitfield: 0x{:08x}\n\
             Clock: {} Hz ({:.1} MHz)\n\
             TSEG1: {} - {}\n\
             TSEG2: {} - {}\n\
             SJW (max): {}\n\
             BRP: {} - {} (inc: {})",
            self.feature_bits,
            self.clock_hz,
            self.clock_mhz(),
            l.tseg1_min,
            l.tseg1_max,
            l.tseg2_min,
            l.tseg2_max,
            l.sjw_max,
            l.brp_min,
            l.brp_max,
            l.brp_inc
        )
    }
}

/// Capabilities from GS_USB_BREQ_BT_CONST_EXT, adding data phase limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedCapabilities {
    /// Nominal capabilities (same layout as BT_CONST)
    pub capabilities: DeviceCapabilities,
    /// CAN FD data phase limits
    pub data_timing_limits: TimingLimits,
}

impl ExtendedCapabilities {
    /// Unpack from BT_CONST_EXT response (72 bytes, 18 x uint32)
    pub fn unpack(data: &[u8]) -> Result<Self> {
        ensure_len(data, GS_USB_BT_CONST_EXT_SIZE)?;
        Ok(Self {
            capabilities: DeviceCapabilities::unpack(data)?,
            data_timing_limits: TimingLimits::unpack_at(data, 10),
        })
    }
}

/// CAN device state from GS_USB_BREQ_GET_STATE response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceState {
    /// CAN state enum value
    pub state: u32,
    /// RX error counter
    pub rxerr: u32,
    /// TX error counter
    pub txerr: u32,
}

impl DeviceState {
    /// Unpack from GET_STATE response (12 bytes, 3 x uint32)
    pub fn unpack(data: &[u8]) -> Result<Self> {
        ensure_len(data, GS_USB_DEVICE_STATE_SIZE)?;
        Ok(Self {
            state: word(data, 0),
            rxerr: word(data, 1),
            txerr: word(data, 2),
        })
    }

    /// Get human-readable state name
    pub fn state_name(&self) -> &'static str {
        can_state_name(self.state)
    }

    /// Check if in normal operation (error active state)
    pub fn is_error_active(&self) -> bool {
        self.state == GS_CAN_STATE_ERROR_ACTIVE
    }

    /// Check if in error warning state (TEC/REC > 96)
    pub fn is_error_warning(&self) -> bool {
        self.state == GS_CAN_STATE_ERROR_WARNING
    }

    /// Check if in error passive state (TEC/REC > 127)
    pub fn is_error_passive(&self) -> bool {
        self.state == GS_CAN_STATE_ERROR_PASSIVE
    }

    /// Check if bus is off (TEC > 255)
    pub fn is_bus_off(&self) -> bool {
        self.state == GS_CAN_STATE_BUS_OFF
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "State: {}\nRX Error Counter: {}\nTX Error Counter: {}",
            self.state_name(),
            self.rxerr,
            self.txerr
        )
    }
}

/// Bus termination resistor state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Off,
    On,
}

impl Termination {
    /// Wire value for SET_TERMINATION
    pub fn to_raw(self) -> u32 {
        match self {
            Termination::Off => 0,
            Termination::On => 1,
        }
    }

    /// Interpret a GET_TERMINATION word; any non-zero value means on
    pub fn from_raw(raw: u32) -> Self {
        if raw == 0 {
            Termination::Off
        } else {
            Termination::On
        }
    }
}

/// LED identify mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum IdentifyMode {
    Off = 0,
    On = 1,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(values: &[u32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_device_mode_pack() {
        let mode = DeviceMode::new(CanMode::Start, ModeFlags::FD);
        let packed = mode.pack();
        assert_eq!(packed[0..4], [1, 0, 0, 0]);
        assert_eq!(packed[4..8], [0, 1, 0, 0]);
    }

    #[test]
    fn test_mode_flag_bits() {
        let all = ModeFlags::all().bits();
        assert_eq!(all, 0b1_0001_1001_1111);
        assert_eq!(ModeFlags::BERR_REPORTING.bits(), 1 << 12);
    }

    #[test]
    fn test_bit_timing_pack() {
        let timing = BitTiming::new(1, 12, 2, 1, 6);
        let packed = timing.pack();
        assert_eq!(packed[0..4], [1, 0, 0, 0]); // prop_seg
        assert_eq!(packed[4..8], [12, 0, 0, 0]); // phase_seg1
        assert_eq!(packed[8..12], [2, 0, 0, 0]); // phase_seg2
        assert_eq!(packed[12..16], [1, 0, 0, 0]); // sjw
        assert_eq!(packed[16..20], [6, 0, 0, 0]); // brp
    }

    #[test]
    fn test_bit_timing_bitrate() {
        let timing = BitTiming::new(1, 12, 2, 1, 6);
        assert_eq!(timing.bitrate(48_000_000), 500_000);
        assert_eq!(timing.sample_point(), 0.875);
        assert_eq!(BitTiming::new(0, 0, 0, 0, 0).bitrate(48_000_000), 0);
    }

    #[test]
    fn test_device_config_unpack() {
        let data = [0, 0, 0, 1, 20, 0, 0, 0, 10, 0, 0, 0];
        let config = DeviceConfig::unpack(&data).unwrap();
        assert_eq!(config.icount, 1);
        assert_eq!(config.channel_count(), 2);
        assert_eq!(config.sw_version, 20);
        assert_eq!(config.hw_version, 10);
    }

    #[test]
    fn test_device_config_short_read() {
        let err = DeviceConfig::unpack(&[0; 11]).unwrap_err();
        assert!(matches!(
            err,
            GsUsbError::ShortRead {
                expected: 12,
                actual: 11
            }
        ));
    }

    #[test]
    fn test_capabilities_unpack() {
        let data = words(&[0x2E13, 48_000_000, 1, 16, 1, 8, 4, 1, 1024, 1]);
        let cap = DeviceCapabilities::unpack(&data).unwrap();
        assert_eq!(cap.clock_hz, 48_000_000);
        assert_eq!(cap.timing_limits.tseg1_max, 16);
        assert_eq!(cap.timing_limits.brp_max, 1024);
        assert!(cap.features().contains(Features::TERMINATION));
        assert!(!cap.features().contains(Features::FD));
    }

    #[test]
    fn test_extended_capabilities_unpack() {
        let mut values = vec![0x0500, 80_000_000, 2, 256, 1, 128, 128, 1, 512, 1];
        values.extend_from_slice(&[1, 32, 1, 16, 16, 1, 32, 1]);
        let ext = ExtendedCapabilities::unpack(&words(&values)).unwrap();
        assert_eq!(ext.capabilities.clock_hz, 80_000_000);
        assert_eq!(ext.data_timing_limits.tseg1_max, 32);
        assert_eq!(ext.data_timing_limits.brp_max, 32);

        assert!(ExtendedCapabilities::unpack(&words(&values[..10])).is_err());
    }

    #[test]
    fn test_supported_modes() {
        let features = Features::LISTEN_ONLY | Features::IDENTIFY | Features::FD;
        assert_eq!(
            features.supported_modes(),
            ModeFlags::LISTEN_ONLY | ModeFlags::FD
        );
    }

    #[test]
    fn test_device_state_unpack() {
        let data = [1, 0, 0, 0, 50, 0, 0, 0, 25, 0, 0, 0];
        let state = DeviceState::unpack(&data).unwrap();
        assert_eq!(state.state, 1);
        assert_eq!(state.rxerr, 50);
        assert_eq!(state.txerr, 25);
        assert!(state.is_error_warning());
        assert_eq!(state.state_name(), "ERROR_WARNING");
    }

    #[test]
    fn test_termination_raw() {
        assert_eq!(Termination::On.to_raw(), 1);
        assert_eq!(Termination::from_raw(0), Termination::Off);
        assert_eq!(Termination::from_raw(0x78), Termination::On);
    }
}
