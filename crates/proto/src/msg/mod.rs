//! Sequential little-endian message codec.

mod buffer;
mod reader;

pub use buffer::{BufferSnapshot, MessageBuffer, MsgError};
pub use reader::MessageReader;

/// Coordinates travel as 13.3 fixed point.
pub const COORD_SCALE: f32 = 8.0;
/// Angles travel as one byte per axis.
pub const ANGLE_STEP: f32 = 360.0 / 256.0;

#[inline]
pub fn coord_to_wire(value: f32) -> i16 {
    (value * COORD_SCALE) as i32 as i16
}

#[inline]
pub fn coord_from_wire(value: i16) -> f32 {
    value as f32 * (1.0 / COORD_SCALE)
}

#[inline]
pub fn angle_to_wire(degrees: f32) -> u8 {
    ((degrees * 256.0 / 360.0) as i32 & 255) as u8
}

/// Decodes into [-180, 180).
#[inline]
pub fn angle_from_wire(value: u8) -> f32 {
    value as i8 as f32 * ANGLE_STEP
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn angle_distance(a: f32, b: f32) -> f32 {
        let d = (a - b).rem_euclid(360.0);
        d.min(360.0 - d)
    }

    #[test]
    fn test_angle_wraps_negative() {
        assert_eq!(angle_to_wire(-90.0), 192);
        assert_eq!(angle_from_wire(192), -90.0);
        assert_eq!(angle_from_wire(angle_to_wire(270.0)), -90.0);
    }

    #[test]
    fn test_coord_examples() {
        assert_eq!(coord_to_wire(1.0), 8);
        assert_eq!(coord_from_wire(coord_to_wire(-512.5)), -512.5);
    }

    proptest! {
        #[test]
        fn coord_within_quantization(v in -4095.0f32..4095.0) {
            let back = coord_from_wire(coord_to_wire(v));
            prop_assert!((back - v).abs() < 1.0 / COORD_SCALE);
        }

        #[test]
        fn coord_through_buffer(v in -4095.0f32..4095.0) {
            let mut buf = MessageBuffer::new(2);
            buf.write_coord(v).unwrap();
            let mut reader = MessageReader::new(buf.as_slice());
            prop_assert!((reader.read_coord() - v).abs() < 1.0 / COORD_SCALE);
        }

        #[test]
        fn angle_within_quantization(v in -720.0f32..720.0) {
            let back = angle_from_wire(angle_to_wire(v));
            prop_assert!(angle_distance(back, v) < ANGLE_STEP + 1e-3);
        }
    }
}
