//! Demo files: a text line with the forced CD track followed by frames of
//! `u32` length, three `f32` view angles and the raw server message, all
//! little-endian.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use glam::Vec3;

use crate::protocol::MAX_MSGLEN;

pub const DEMO_EXTENSION: &str = "dem";

/// Track value written when no CD track is forced.
pub const NO_TRACK: i32 = -1;

#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    #[error("demo io: {0}")]
    Io(#[from] io::Error),
    #[error("demo message of {0} bytes exceeds the maximum message length")]
    MessageTooLarge(usize),
    #[error("relative pathnames are not allowed: {0}")]
    RelativePath(String),
    #[error("can not record, already connected to a server")]
    AlreadyConnected,
    #[error("not recording a demo")]
    NotRecording,
    #[error("bad demo header: {0:?}")]
    BadHeader(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemoFrame {
    pub view_angles: Vec3,
    pub payload: Vec<u8>,
}

/// Rejects names that climb out of the demo directory and appends `.dem`
/// when the name carries no extension.
pub fn demo_path(name: &str) -> Result<PathBuf, DemoError> {
    if name.contains("..") {
        return Err(DemoError::RelativePath(name.to_string()));
    }
    let mut path = PathBuf::from(name);
    if path.extension().is_none() {
        path.set_extension(DEMO_EXTENSION);
    }
    Ok(path)
}

pub struct DemoWriter {
    out: Box<dyn Write>,
    path: PathBuf,
    frames: u64,
}

impl DemoWriter {
    pub fn create(path: impl AsRef<Path>, track: i32) -> Result<Self, DemoError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Self::new(BufWriter::new(file), path, track)
    }

    pub fn new(out: impl Write + 'static, path: PathBuf, track: i32) -> Result<Self, DemoError> {
        let mut out: Box<dyn Write> = Box::new(out);
        writeln!(out, "{track}")?;
        Ok(Self {
            out,
            path,
            frames: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn write_frame(&mut self, view_angles: Vec3, payload: &[u8]) -> Result<(), DemoError> {
        if payload.len() > MAX_MSGLEN {
            return Err(DemoError::MessageTooLarge(payload.len()));
        }
        self.out.write_all(&(payload.len() as u32).to_le_bytes())?;
        for angle in view_angles.to_array() {
            self.out.write_all(&angle.to_le_bytes())?;
        }
        self.out.write_all(payload)?;
        self.out.flush()?;
        self.frames += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), DemoError> {
        self.out.flush()?;
        Ok(())
    }
}

pub struct DemoReader {
    input: Box<dyn BufRead>,
}

impl DemoReader {
    /// Opens a demo and returns it with its forced CD track.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, i32), DemoError> {
        let file = File::open(path.as_ref())?;
        Self::new(BufReader::new(file))
    }

    pub fn new(input: impl BufRead + 'static) -> Result<(Self, i32), DemoError> {
        let mut input: Box<dyn BufRead> = Box::new(input);
        let mut line = Vec::new();
        input.by_ref().take(32).read_until(b'\n', &mut line)?;
        if line.last() != Some(&b'\n') {
            return Err(DemoError::BadHeader(
                String::from_utf8_lossy(&line).into_owned(),
            ));
        }
        let text = String::from_utf8_lossy(&line);
        let track = text
            .trim()
            .parse::<i32>()
            .map_err(|_| DemoError::BadHeader(text.trim().to_string()))?;
        Ok((Self { input }, track))
    }

    /// Next frame, or `None` once the file ends (a truncated final frame
    /// also ends playback).
    pub fn read_frame(&mut self) -> Result<Option<DemoFrame>, DemoError> {
        let mut header = [0u8; 16];
        if !read_full(&mut self.input, &mut header)? {
            return Ok(None);
        }
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if len > MAX_MSGLEN {
            return Err(DemoError::MessageTooLarge(len));
        }
        let mut angles = [0f32; 3];
        for (i, angle) in angles.iter_mut().enumerate() {
            let at = 4 + i * 4;
            *angle = f32::from_le_bytes([
                header[at],
                header[at + 1],
                header[at + 2],
                header[at + 3],
            ]);
        }

        let mut payload = vec![0u8; len];
        if !read_full(&mut self.input, &mut payload)? {
            return Ok(None);
        }
        Ok(Some(DemoFrame {
            view_angles: Vec3::from_array(angles),
            payload,
        }))
    }
}

/// Fills `buf`; false when the input ends first.
fn read_full(input: &mut dyn Read, buf: &mut [u8]) -> io::Result<bool> {
    match input.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Benchmark bookkeeping for `timedemo`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeDemo {
    pub start_frame: u64,
    pub last_frame: Option<u64>,
    pub start_time: f64,
}

impl TimeDemo {
    pub fn new(start_frame: u64, now: f64) -> Self {
        Self {
            start_frame,
            last_frame: None,
            start_time: now,
        }
    }

    /// Marks `frame` as read. Returns false when this host frame already
    /// consumed a demo frame. The clock starts on the second frame so
    /// loading time is not counted.
    pub fn begin_frame(&mut self, frame: u64, now: f64) -> bool {
        if self.last_frame == Some(frame) {
            return false;
        }
        self.last_frame = Some(frame);
        if frame == self.start_frame + 1 {
            self.start_time = now;
        }
        true
    }

    pub fn report(&self, frame: u64, now: f64) -> TimeDemoReport {
        let frames = frame.saturating_sub(self.start_frame).saturating_sub(1);
        let mut seconds = now - self.start_time;
        if seconds <= 0.0 {
            seconds = 1.0;
        }
        TimeDemoReport {
            frames,
            seconds,
            fps: frames as f64 / seconds,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeDemoReport {
    pub frames: u64,
    pub seconds: f64,
    pub fps: f64,
}

impl fmt::Display for TimeDemoReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames {:5.1} seconds {:5.1} fps",
            self.frames, self.seconds, self.fps
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_demo_path_rules() {
        assert_eq!(demo_path("demo1").unwrap(), PathBuf::from("demo1.dem"));
        assert_eq!(demo_path("demo1.bin").unwrap(), PathBuf::from("demo1.bin"));
        assert!(matches!(
            demo_path("../secret"),
            Err(DemoError::RelativePath(_))
        ));
    }

    #[test]
    fn test_header_and_frames() {
        let mut bytes = b"-1\n".to_vec();
        bytes.extend_from_slice(&3u32.to_le_bytes());
        for angle in [10.0f32, 20.0, 30.0] {
            bytes.extend_from_slice(&angle.to_le_bytes());
        }
        bytes.extend_from_slice(&[1, 2, 3]);

        let (mut reader, track) = DemoReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(track, NO_TRACK);
        let frame = reader.read_frame().unwrap().unwrap();
        assert_eq!(frame.view_angles, Vec3::new(10.0, 20.0, 30.0));
        assert_eq!(frame.payload, vec![1, 2, 3]);
        assert!(reader.read_frame().unwrap().is_none());
    }

    #[test]
    fn test_oversized_frame_is_fatal() {
        let mut bytes = b"2\n".to_vec();
        bytes.extend_from_slice(&(MAX_MSGLEN as u32 + 1).to_le_bytes());
        bytes.extend_from_slice(&[0u8; 12]);
        let (mut reader, track) = DemoReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(track, 2);
        assert!(matches!(
            reader.read_frame(),
            Err(DemoError::MessageTooLarge(_))
        ));
    }

    #[test]
    fn test_truncated_frame_ends_playback() {
        let mut bytes = b"-1\n".to_vec();
        bytes.extend_from_slice(&8u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 12]);
        bytes.extend_from_slice(&[1, 2]);
        let (mut reader, _) = DemoReader::new(Cursor::new(bytes)).unwrap();
        assert!(reader.read_frame().unwrap().is_none());
    }

    #[test]
    fn test_missing_header_line() {
        assert!(matches!(
            DemoReader::new(Cursor::new(b"12".to_vec())),
            Err(DemoError::BadHeader(_))
        ));
    }

    #[test]
    fn test_timedemo_report() {
        let mut td = TimeDemo::new(100, 0.0);
        assert!(td.begin_frame(100, 0.5));
        assert!(!td.begin_frame(100, 0.6));
        assert!(td.begin_frame(101, 2.0));
        assert_eq!(td.start_time, 2.0);

        let report = td.report(111, 4.0);
        assert_eq!(report.frames, 10);
        assert_eq!(report.seconds, 2.0);
        assert_eq!(report.to_string(), "10 frames   2.0 seconds   5.0 fps");

        let instant = TimeDemo::new(5, 3.0).report(5, 3.0);
        assert_eq!(instant.frames, 0);
        assert_eq!(instant.seconds, 1.0);
    }
}
