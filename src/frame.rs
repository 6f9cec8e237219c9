//! GS-USB CAN frame codec
//!
//! This module provides the `Frame` struct for the fixed 20-byte classic CAN
//! host frame and the field-by-field little-endian codec around it.
//!
//! Layout: `echo_id (4) | can_id (4) | can_dlc (1) | channel (1) | flags (1) |
//! reserved (1) | data (8)`.

use bitflags::bitflags;

use crate::constants::{
    CAN_EFF_FLAG, CAN_EFF_MASK, CAN_ERR_FLAG, CAN_MAX_DLC, CAN_MAX_DLEN, CAN_RTR_FLAG,
    CAN_SFF_MASK, GS_CAN_FLAG_BRS, GS_CAN_FLAG_ESI, GS_CAN_FLAG_FD, GS_CAN_FLAG_OVERFLOW,
    GS_USB_FRAME_SIZE, GS_USB_RX_ECHO_ID,
};

bitflags! {
    /// Bits of the `flags` byte in a host frame.
    ///
    /// Bits 4-7 are reserved and never produced by [`pack_flags`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FrameFlags: u8 {
        /// RX overflow occurred
        const OVERFLOW = GS_CAN_FLAG_OVERFLOW;
        /// CAN FD frame
        const FD = GS_CAN_FLAG_FD;
        /// Bit rate switch
        const BRS = GS_CAN_FLAG_BRS;
        /// Error state indicator
        const ESI = GS_CAN_FLAG_ESI;
    }
}

/// Pack a flag set into the wire `flags` byte
pub fn pack_flags(flags: FrameFlags) -> u8 {
    (flags & FrameFlags::all()).bits()
}

/// Unpack the wire `flags` byte, ignoring reserved bits
pub fn unpack_flags(byte: u8) -> FrameFlags {
    FrameFlags::from_bits_truncate(byte)
}

/// Convert DLC to data length for classic CAN
pub fn dlc_to_len(dlc: u8) -> usize {
    (dlc as usize).min(CAN_MAX_DLEN)
}

/// Convert data length to DLC for classic CAN
pub fn len_to_dlc(length: usize) -> u8 {
    length.min(CAN_MAX_DLEN) as u8
}

/// GS-USB host frame
///
/// Every field is carried verbatim, including `reserved` and reserved flag
/// bits, so `Frame::decode(&f.encode()) == f` for any value.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Frame {
    /// Correlation tag; `GS_USB_RX_ECHO_ID` marks bus traffic and probes
    pub echo_id: u32,
    /// CAN identifier (with flags like CAN_EFF_FLAG if needed)
    pub can_id: u32,
    /// Data length code
    pub can_dlc: u8,
    /// CAN channel
    pub channel: u8,
    /// Raw flags byte, see [`FrameFlags`]
    pub flags: u8,
    /// Reserved byte
    pub reserved: u8,
    /// Frame data, zero padded beyond `can_dlc`
    pub data: [u8; CAN_MAX_DLEN],
}

impl Frame {
    /// Create a new CAN frame with the specified ID and data
    ///
    /// Data longer than 8 bytes is truncated.
    pub fn with_data(can_id: u32, data: &[u8]) -> Self {
        let len = data.len().min(CAN_MAX_DLEN);
        let mut frame = Self {
            can_id,
            can_dlc: len_to_dlc(len),
            ..Self::default()
        };
        frame.data[..len].copy_from_slice(&data[..len]);
        frame
    }

    /// Create a probe frame that carries no echo correlation
    pub fn probe(can_id: u32, data: &[u8]) -> Self {
        Self {
            echo_id: GS_USB_RX_ECHO_ID,
            ..Self::with_data(can_id, data)
        }
    }

    /// Encode into the 20-byte wire representation
    pub fn encode(&self) -> [u8; GS_USB_FRAME_SIZE] {
        let mut buf = [0u8; GS_USB_FRAME_SIZE];
        buf[0..4].copy_from_slice(&self.echo_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.can_id.to_le_bytes());
        buf[8] = self.can_dlc;
        buf[9] = self.channel;
        buf[10] = self.flags;
        buf[11] = self.reserved;
        buf[12..20].copy_from_slice(&self.data);
        buf
    }

    /// Decode from received bytes
    ///
    /// Never fails: input shorter than 20 bytes is zero padded and longer
    /// input (e.g. a trailing hardware timestamp) is truncated before the
    /// fields are parsed. The result is only structurally valid.
    pub fn decode(bytes: &[u8]) -> Self {
        let mut buf = [0u8; GS_USB_FRAME_SIZE];
        let len = bytes.len().min(GS_USB_FRAME_SIZE);
        buf[..len].copy_from_slice(&bytes[..len]);

        let mut data = [0u8; CAN_MAX_DLEN];
        data.copy_from_slice(&buf[12..20]);

        Self {
            echo_id: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            can_id: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            can_dlc: buf[8],
            channel: buf[9],
            flags: buf[10],
            reserved: buf[11],
            data,
        }
    }

    /// Get the decoded frame flags
    pub fn frame_flags(&self) -> FrameFlags {
        unpack_flags(self.flags)
    }

    /// Replace the flags byte from a flag set
    pub fn set_frame_flags(&mut self, flags: FrameFlags) {
        self.flags = pack_flags(flags);
    }

    /// Get the arbitration ID (without flags)
    pub fn arbitration_id(&self) -> u32 {
        if self.is_extended_id() {
            self.can_id & CAN_EFF_MASK
        } else {
            self.can_id & CAN_SFF_MASK
        }
    }

    /// Check if this is an extended ID frame (29-bit)
    pub fn is_extended_id(&self) -> bool {
        (self.can_id & CAN_EFF_FLAG) != 0
    }

    /// Check if this is a remote transmission request
    pub fn is_remote_frame(&self) -> bool {
        (self.can_id & CAN_RTR_FLAG) != 0
    }

    /// Check if this is an error frame
    pub fn is_error_frame(&self) -> bool {
        (self.can_id & CAN_ERR_FLAG) != 0
    }

    /// Check if this frame came from the bus rather than a local echo
    pub fn is_rx_frame(&self) -> bool {
        self.echo_id == GS_USB_RX_ECHO_ID
    }

    /// Check if `can_dlc` is within the classic CAN range
    pub fn has_valid_dlc(&self) -> bool {
        self.can_dlc <= CAN_MAX_DLC
    }

    /// Get actual data length based on DLC
    pub fn data_length(&self) -> usize {
        dlc_to_len(self.can_dlc)
    }

    /// Get frame data as a slice
    pub fn data(&self) -> &[u8] {
        &self.data[..self.data_length()]
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data_str = if self.is_remote_frame() {
            "remote request".to_string()
        } else {
            self.data()
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(" ")
        };

        write!(
            f,
            "{:>8X}   [{}]  {}",
            self.arbitration_id(),
            self.data_length(),
            data_str
        )
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("echo_id", &format_args!("0x{:08X}", self.echo_id))
            .field("can_id", &format_args!("0x{:08X}", self.can_id))
            .field("can_dlc", &self.can_dlc)
            .field("channel", &self.channel)
            .field("flags", &format_args!("0x{:02X}", self.flags))
            .field("reserved", &self.reserved)
            .field("data", &self.data)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dlc_conversions() {
        assert_eq!(dlc_to_len(0), 0);
        assert_eq!(dlc_to_len(8), 8);
        assert_eq!(dlc_to_len(15), 8); // Clamped to 8
        assert_eq!(len_to_dlc(64), 8);
    }

    #[test]
    fn test_frame_creation() {
        let data = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0];
        let frame = Frame::with_data(0x7FF, &data);

        assert_eq!(frame.arbitration_id(), 0x7FF);
        assert!(!frame.is_extended_id());
        assert_eq!(frame.data_length(), 8);
        assert_eq!(frame.data(), &data);
        assert_eq!(frame.echo_id, 0);
    }

    #[test]
    fn test_probe_frame() {
        let frame = Frame::probe(0x3F0, &[0x00]);
        assert!(frame.is_rx_frame());
        assert_eq!(frame.can_dlc, 1);
    }

    #[test]
    fn test_encode_layout() {
        let frame = Frame {
            echo_id: 0x0403_0201,
            can_id: 0x1234_5678 | CAN_EFF_FLAG,
            can_dlc: 3,
            channel: 1,
            flags: GS_CAN_FLAG_OVERFLOW,
            reserved: 0xAA,
            data: [9, 8, 7, 0, 0, 0, 0, 0],
        };
        let bytes = frame.encode();
        assert_eq!(bytes[0..4], [0x01, 0x02, 0x03, 0x04]);
        assert_eq!(bytes[4..8], [0x78, 0x56, 0x34, 0x92]);
        assert_eq!(bytes[8..12], [3, 1, 1, 0xAA]);
        assert_eq!(bytes[12..20], [9, 8, 7, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_decode_encode_preserves_bytes() {
        // Reserved byte and reserved flag bits survive
        let bytes: Vec<u8> = (0..20).map(|i| (i * 37 + 5) as u8).collect();
        assert_eq!(Frame::decode(&bytes).encode().as_slice(), bytes.as_slice());

        let frame = Frame {
            echo_id: 7,
            can_id: 0x123,
            can_dlc: 8,
            channel: 2,
            flags: 0xF5,
            reserved: 0x5A,
            data: [1, 2, 3, 4, 5, 6, 7, 8],
        };
        assert_eq!(Frame::decode(&frame.encode()), frame);
    }

    #[test]
    fn test_decode_short_input_zero_pads() {
        assert_eq!(Frame::decode(&[]), Frame::default());

        let frame = Frame::decode(&[0xFF, 0xFF, 0xFF, 0xFF, 0x23, 0x01, 0x00, 0x00, 2]);
        assert!(frame.is_rx_frame());
        assert_eq!(frame.can_id, 0x123);
        assert_eq!(frame.can_dlc, 2);
        assert_eq!(frame.data, [0u8; 8]);
    }

    #[test]
    fn test_decode_long_input_truncates() {
        let frame = Frame::with_data(0x42, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut bytes = frame.encode().to_vec();
        // Hardware timestamp trailer
        bytes.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(Frame::decode(&bytes), frame);
    }

    #[test]
    fn test_flags_bit_independence() {
        let singles = [
            FrameFlags::OVERFLOW,
            FrameFlags::FD,
            FrameFlags::BRS,
            FrameFlags::ESI,
        ];
        for mask in 0u8..16 {
            let set = singles
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .fold(FrameFlags::empty(), |acc, (_, f)| acc | *f);
            let byte = pack_flags(set);
            assert_eq!(byte & 0xF0, 0);
            assert_eq!(unpack_flags(byte), set);
        }
    }

    #[test]
    fn test_unpack_ignores_reserved_bits() {
        assert_eq!(unpack_flags(0xF0), FrameFlags::empty());
        assert_eq!(unpack_flags(0x12), FrameFlags::FD);
        assert_eq!(pack_flags(FrameFlags::from_bits_retain(0x80)), 0);
    }

    #[test]
    fn test_display() {
        let frame = Frame::with_data(0x7FF, &[0xAB, 0x01]);
        assert_eq!(frame.to_string(), "     7FF   [2]  AB 01");
        let rtr = Frame::with_data(0x10 | CAN_RTR_FLAG, &[]);
        assert!(rtr.to_string().ends_with("remote request"));
    }
}
