//! MCP3304 13-bit SPI ADC framing (single-ended mode).
//!
//! A conversion is three byte transfers:
//!
//! - TX `0 0 0 0 START SGL D2 D1`, RX ignored
//! - TX `D0 x x x x x x x`, RX `x x x SIGN B11 B10 B9 B8`
//! - TX `0`, RX `B7..B0`
//!
//! Single-ended readings can never be negative, so the sign bit is dropped.

/// Number of input channels on the chip.
pub const CHANNELS: u8 = 8;
/// Largest code a single-ended conversion returns.
pub const MAX_COUNT: u16 = 0x0FFF;

const START_SINGLE: u8 = 0b0000_1100;

/// Bytes to clock out for a single-ended conversion of `channel` (0..=7).
pub fn command_frame(channel: u8) -> [u8; 3] {
    let ch = channel & 0x07;
    [START_SINGLE | (ch >> 1), (ch << 7) & 0x80, 0x00]
}

/// Extract the 12-bit magnitude from the bytes clocked in during `command_frame`.
pub fn decode_frame(rx: [u8; 3]) -> u16 {
    (u16::from(rx[1] & 0x0F) << 8) | u16::from(rx[2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, [0x0C, 0x00, 0x00])]
    #[case(1, [0x0C, 0x80, 0x00])]
    #[case(5, [0x0E, 0x80, 0x00])]
    #[case(7, [0x0F, 0x80, 0x00])]
    fn command_frame_encodes_channel(#[case] ch: u8, #[case] expected: [u8; 3]) {
        assert_eq!(command_frame(ch), expected);
    }

    #[test]
    fn decode_ignores_sign_and_high_nibble() {
        assert_eq!(decode_frame([0xFF, 0xFA, 0xBC]), 0x0ABC);
        assert_eq!(decode_frame([0x00, 0x10, 0x01]), 1);
        assert_eq!(decode_frame([0x00, 0x0F, 0xFF]), MAX_COUNT);
    }
}
