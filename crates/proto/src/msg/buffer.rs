use super::{angle_to_wire, coord_to_wire};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MsgError {
    #[error("overflow without allow_overflow set ({requested} bytes into {cursize}/{max_size})")]
    Overflow {
        requested: usize,
        cursize: usize,
        max_size: usize,
    },
    #[error("{requested} bytes is larger than the full buffer size {max_size}")]
    TooLarge { requested: usize, max_size: usize },
}

/// Growable octet buffer with a hard capacity.
///
/// Writes that do not fit either fail or, when `allow_overflow` is set, wipe
/// the buffer and raise the `overflowed` flag so the owner can drop the
/// partial message.
#[derive(Debug, Clone)]
pub struct MessageBuffer {
    data: Vec<u8>,
    max_size: usize,
    allow_overflow: bool,
    overflowed: bool,
}

/// Deep copy of a buffer's contents, used to peek at pending input and put
/// everything back exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSnapshot {
    data: Vec<u8>,
    overflowed: bool,
}

impl MessageBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            data: Vec::with_capacity(max_size),
            max_size,
            allow_overflow: false,
            overflowed: false,
        }
    }

    pub fn with_overflow(max_size: usize) -> Self {
        Self {
            allow_overflow: true,
            ..Self::new(max_size)
        }
    }

    pub fn set_allow_overflow(&mut self, allow: bool) {
        self.allow_overflow = allow;
    }

    pub fn allow_overflow(&self) -> bool {
        self.allow_overflow
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.overflowed = false;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn remaining(&self) -> usize {
        self.max_size - self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Changes the capacity. Contents past the new size are discarded.
    pub fn resize(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.data.truncate(max_size);
    }

    pub fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            data: self.data.clone(),
            overflowed: self.overflowed,
        }
    }

    pub fn restore(&mut self, snapshot: &BufferSnapshot) {
        self.data.clear();
        self.data.extend_from_slice(&snapshot.data);
        self.overflowed = snapshot.overflowed;
    }

    fn reserve(&mut self, length: usize) -> Result<(), MsgError> {
        if self.data.len() + length <= self.max_size {
            return Ok(());
        }

        if !self.allow_overflow {
            return Err(MsgError::Overflow {
                requested: length,
                cursize: self.data.len(),
                max_size: self.max_size,
            });
        }

        if length > self.max_size {
            return Err(MsgError::TooLarge {
                requested: length,
                max_size: self.max_size,
            });
        }

        log::warn!("message buffer overflow ({} bytes), clearing", self.max_size);
        self.clear();
        self.overflowed = true;
        Ok(())
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<(), MsgError> {
        self.reserve(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Replaces the contents with `bytes`.
    pub fn fill(&mut self, bytes: &[u8]) -> Result<(), MsgError> {
        self.clear();
        self.write(bytes)
    }

    pub fn write_char(&mut self, value: i8) -> Result<(), MsgError> {
        self.write(&value.to_le_bytes())
    }

    pub fn write_byte(&mut self, value: u8) -> Result<(), MsgError> {
        self.write(&[value])
    }

    pub fn write_short(&mut self, value: i16) -> Result<(), MsgError> {
        self.write(&value.to_le_bytes())
    }

    pub fn write_long(&mut self, value: i32) -> Result<(), MsgError> {
        self.write(&value.to_le_bytes())
    }

    pub fn write_float(&mut self, value: f32) -> Result<(), MsgError> {
        self.write(&value.to_le_bytes())
    }

    pub fn write_string(&mut self, value: &str) -> Result<(), MsgError> {
        self.reserve(value.len() + 1)?;
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
        Ok(())
    }

    pub fn write_coord(&mut self, value: f32) -> Result<(), MsgError> {
        self.write_short(coord_to_wire(value))
    }

    pub fn write_angle(&mut self, value: f32) -> Result<(), MsgError> {
        self.write_byte(angle_to_wire(value))
    }

    /// Appends text, first dropping a trailing terminator left by a previous
    /// print so consecutive prints read back as one string.
    pub fn print(&mut self, text: &str) -> Result<(), MsgError> {
        if self.data.last() != Some(&0) {
            return self.write_string(text);
        }
        self.data.pop();
        if let Err(err) = self.write_string(text) {
            self.data.push(0);
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_without_allow_is_error() {
        let text = "abcdefgh";
        let mut buf = MessageBuffer::new(text.len() - 1);
        let err = buf.write_string(text).unwrap_err();
        assert!(matches!(err, MsgError::Overflow { requested: 9, .. }));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_overflow_with_allow_resets() {
        let mut buf = MessageBuffer::with_overflow(8);
        buf.write_long(7).unwrap();
        buf.write_long(8).unwrap();
        assert_eq!(buf.len(), 8);

        buf.write_byte(1).unwrap();
        assert!(buf.overflowed());
        assert_eq!(buf.as_slice(), &[1]);

        buf.clear();
        assert!(!buf.overflowed());
    }

    #[test]
    fn test_single_write_larger_than_buffer() {
        let mut buf = MessageBuffer::with_overflow(4);
        assert_eq!(
            buf.write(&[0; 5]),
            Err(MsgError::TooLarge {
                requested: 5,
                max_size: 4
            })
        );
    }

    #[test]
    fn test_print_concatenates() {
        let mut buf = MessageBuffer::new(64);
        buf.print("hello ").unwrap();
        buf.print("world").unwrap();
        assert_eq!(buf.as_slice(), b"hello world\0");
    }

    #[test]
    fn test_print_after_binary_data() {
        let mut buf = MessageBuffer::new(64);
        buf.write_byte(9).unwrap();
        buf.print("x").unwrap();
        assert_eq!(buf.as_slice(), &[9, b'x', 0]);
    }

    #[test]
    fn test_snapshot_restore() {
        let mut buf = MessageBuffer::new(32);
        buf.write_string("pending").unwrap();
        let snap = buf.snapshot();

        buf.fill(&[1, 2, 3]).unwrap();
        assert_eq!(buf.len(), 3);

        buf.restore(&snap);
        assert_eq!(buf.as_slice(), b"pending\0");
    }

    #[test]
    fn test_resize_truncates() {
        let mut buf = MessageBuffer::new(16);
        buf.write(&[1; 10]).unwrap();
        buf.resize(4);
        assert_eq!(buf.len(), 4);
        assert!(buf.write_byte(0).is_err());
    }
}
