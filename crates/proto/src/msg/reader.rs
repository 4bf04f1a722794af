use super::{angle_from_wire, coord_from_wire};

const MAX_STRING: usize = 2048;

/// Read cursor over one received message.
///
/// Every read past the end returns a sentinel (`-1`, `-1.0` or an empty
/// string) and latches `bad_read`. Once latched, all further reads fail too,
/// so a caller only has to check the flag at message boundaries.
#[derive(Debug, Clone)]
pub struct MessageReader<'a> {
    data: &'a [u8],
    pos: usize,
    bad_read: bool,
}

impl<'a> MessageReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            bad_read: false,
        }
    }

    pub fn begin_reading(&mut self) {
        self.pos = 0;
        self.bad_read = false;
    }

    pub fn bad_read(&self) -> bool {
        self.bad_read
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.bad_read || self.pos + n > self.data.len() {
            self.bad_read = true;
            return None;
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Some(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take(N).and_then(|bytes| bytes.try_into().ok())
    }

    pub fn read_char(&mut self) -> i32 {
        self.take_array::<1>()
            .map_or(-1, |b| i8::from_le_bytes(b) as i32)
    }

    pub fn read_byte(&mut self) -> i32 {
        self.take_array::<1>().map_or(-1, |b| b[0] as i32)
    }

    pub fn read_short(&mut self) -> i32 {
        self.take_array::<2>()
            .map_or(-1, |b| i16::from_le_bytes(b) as i32)
    }

    pub fn read_long(&mut self) -> i32 {
        self.take_array::<4>().map_or(-1, i32::from_le_bytes)
    }

    pub fn read_float(&mut self) -> f32 {
        self.take_array::<4>().map_or(-1.0, f32::from_le_bytes)
    }

    /// Reads up to the next NUL. A missing terminator is a bad read.
    pub fn read_string(&mut self) -> String {
        let mut bytes = Vec::new();
        loop {
            let c = self.read_byte();
            if c == -1 || c == 0 {
                break;
            }
            bytes.push(c as u8);
            if bytes.len() >= MAX_STRING - 1 {
                break;
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn read_coord(&mut self) -> f32 {
        match self.take_array::<2>() {
            Some(b) => coord_from_wire(i16::from_le_bytes(b)),
            None => -1.0 / 8.0,
        }
    }

    pub fn read_angle(&mut self) -> f32 {
        match self.take_array::<1>() {
            Some(b) => angle_from_wire(b[0]),
            None => -360.0 / 256.0,
        }
    }

    pub fn read_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        self.take(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::MessageBuffer;

    #[test]
    fn test_reads_in_order() {
        let mut buf = MessageBuffer::new(64);
        buf.write_char(-3).unwrap();
        buf.write_byte(200).unwrap();
        buf.write_short(-1234).unwrap();
        buf.write_long(0x1234_5678).unwrap();
        buf.write_float(2.5).unwrap();
        buf.write_string("maps/e1m1.bsp").unwrap();

        let mut reader = MessageReader::new(buf.as_slice());
        assert_eq!(reader.read_char(), -3);
        assert_eq!(reader.read_byte(), 200);
        assert_eq!(reader.read_short(), -1234);
        assert_eq!(reader.read_long(), 0x1234_5678);
        assert_eq!(reader.read_float(), 2.5);
        assert_eq!(reader.read_string(), "maps/e1m1.bsp");
        assert!(!reader.bad_read());
        assert_eq!(reader.read_byte(), -1);
        assert!(reader.bad_read());
    }

    #[test]
    fn test_bad_read_is_sticky() {
        let data = [1u8, 2, 3];
        let mut reader = MessageReader::new(&data);
        assert_eq!(reader.read_long(), -1);
        assert!(reader.bad_read());
        // three bytes are still there, but the cursor refuses them
        assert_eq!(reader.read_byte(), -1);
        assert_eq!(reader.read_short(), -1);
        assert!(reader.bad_read());

        reader.begin_reading();
        assert!(!reader.bad_read());
        assert_eq!(reader.read_byte(), 1);
    }

    #[test]
    fn test_unterminated_string_is_bad_read() {
        let data = *b"abc";
        let mut reader = MessageReader::new(&data);
        assert_eq!(reader.read_string(), "abc");
        assert!(reader.bad_read());
    }

    #[test]
    fn test_little_endian_layout() {
        let mut buf = MessageBuffer::new(8);
        buf.write_long(0x0403_0201).unwrap();
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4]);
    }
}
