//! Call log: records the result of every server-side transport call so a
//! session can be replayed without a network.
//!
//! File layout, all little-endian: `i32` signature, `i32` argc, then argc
//! strings as `i32` length + bytes. Each record is `f64` host time, `i32` op,
//! `i64` session followed by an op-specific tail.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::connection::ConnectionId;
use super::driver::{Driver, DriverContext, Received, SendStatus};
use super::error::NetError;
use crate::protocol::NET_MAXMESSAGE;

/// "VCR1"
pub const VCR_SIGNATURE: i32 = 0x5643_5231;

const ADDRESS_LEN: usize = 64;
const MAX_ARGS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum VcrOp {
    Connect = 1,
    GetMessage = 2,
    SendMessage = 3,
    CanSendMessage = 4,
    SendUnreliable = 5,
}

impl VcrOp {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(VcrOp::Connect),
            2 => Some(VcrOp::GetMessage),
            3 => Some(VcrOp::SendMessage),
            4 => Some(VcrOp::CanSendMessage),
            5 => Some(VcrOp::SendUnreliable),
            _ => None,
        }
    }
}

/// Identity of one intercepted call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VcrKey {
    pub time: f64,
    pub op: VcrOp,
    pub session: i64,
}

impl fmt::Display for VcrKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} at {} on session {}", self.op, self.time, self.session)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VcrError {
    #[error("bad signature {0:#x}")]
    BadSignature(i32),
    #[error("mismatch: expected {expected}, got {actual}")]
    Mismatch { expected: VcrKey, actual: VcrKey },
    #[error("end of playback")]
    EndOfPlayback,
    #[error("bad op {0}")]
    BadOp(i32),
    #[error("{field} length {len} out of range")]
    BadLength { field: &'static str, len: i32 },
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

fn read_i32(input: &mut dyn Read) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

/// Reads a count or byte length, rejecting values a sane log never holds.
fn read_len(input: &mut dyn Read, field: &'static str, max: usize) -> Result<usize, VcrError> {
    let len = read_i32(input)?;
    match usize::try_from(len) {
        Ok(n) if n <= max => Ok(n),
        _ => Err(VcrError::BadLength { field, len }),
    }
}

fn read_key(input: &mut dyn Read) -> Result<Option<VcrKey>, VcrError> {
    let mut buf = [0u8; 20];
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }

    let time = f64::from_le_bytes(buf[0..8].try_into().unwrap_or_default());
    let op_code = i32::from_le_bytes(buf[8..12].try_into().unwrap_or_default());
    let session = i64::from_le_bytes(buf[12..20].try_into().unwrap_or_default());
    let op = VcrOp::from_i32(op_code).ok_or(VcrError::BadOp(op_code))?;
    Ok(Some(VcrKey { time, op, session }))
}

/// Writes the call log while the manager runs against real drivers.
pub struct VcrRecorder {
    out: Box<dyn Write>,
}

impl VcrRecorder {
    pub fn create(path: impl AsRef<Path>, argv: &[String]) -> Result<Self, VcrError> {
        let file = File::create(path.as_ref())?;
        Self::new(BufWriter::new(file), argv)
    }

    pub fn new(out: impl Write + 'static, argv: &[String]) -> Result<Self, VcrError> {
        let mut recorder = Self { out: Box::new(out) };
        recorder.out.write_all(&VCR_SIGNATURE.to_le_bytes())?;
        recorder.out.write_all(&(argv.len() as i32).to_le_bytes())?;
        for arg in argv {
            recorder.out.write_all(&(arg.len() as i32).to_le_bytes())?;
            recorder.out.write_all(arg.as_bytes())?;
        }
        Ok(recorder)
    }

    fn write_key(&mut self, key: VcrKey) -> io::Result<()> {
        self.out.write_all(&key.time.to_le_bytes())?;
        self.out.write_all(&(key.op as i32).to_le_bytes())?;
        self.out.write_all(&key.session.to_le_bytes())
    }

    /// An accept check. `accepted` carries the new session and its address.
    pub fn record_connect(
        &mut self,
        time: f64,
        accepted: Option<(i64, &str)>,
    ) -> Result<(), VcrError> {
        let session = accepted.map_or(0, |(session, _)| session);
        self.write_key(VcrKey {
            time,
            op: VcrOp::Connect,
            session,
        })?;
        if let Some((_, address)) = accepted {
            let mut field = [0u8; ADDRESS_LEN];
            let bytes = address.as_bytes();
            let n = bytes.len().min(ADDRESS_LEN - 1);
            field[..n].copy_from_slice(&bytes[..n]);
            self.out.write_all(&field)?;
        }
        Ok(())
    }

    pub fn record_get_message(
        &mut self,
        time: f64,
        session: i64,
        ret: i32,
        payload: &[u8],
    ) -> Result<(), VcrError> {
        self.write_key(VcrKey {
            time,
            op: VcrOp::GetMessage,
            session,
        })?;
        self.out.write_all(&ret.to_le_bytes())?;
        if ret > 0 {
            self.out.write_all(&(payload.len() as i32).to_le_bytes())?;
            self.out.write_all(payload)?;
        }
        Ok(())
    }

    pub fn record_result(
        &mut self,
        time: f64,
        op: VcrOp,
        session: i64,
        ret: i32,
    ) -> Result<(), VcrError> {
        self.write_key(VcrKey { time, op, session })?;
        self.out.write_all(&ret.to_le_bytes())?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), VcrError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Replays a call log in place of every real driver. Any call that does not
/// match the next record is fatal.
pub struct VcrPlayback {
    input: Box<dyn Read>,
    next: Option<VcrKey>,
    argv: Vec<String>,
}

impl VcrPlayback {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VcrError> {
        let file = File::open(path.as_ref())?;
        Self::new(BufReader::new(file))
    }

    pub fn new(input: impl Read + 'static) -> Result<Self, VcrError> {
        let mut input: Box<dyn Read> = Box::new(input);

        let signature = read_i32(&mut input)?;
        if signature != VCR_SIGNATURE {
            return Err(VcrError::BadSignature(signature));
        }

        let argc = read_len(&mut input, "argc", MAX_ARGS)?;
        let mut argv = Vec::with_capacity(argc);
        for _ in 0..argc {
            let len = read_len(&mut input, "argument", NET_MAXMESSAGE)?;
            let mut bytes = vec![0u8; len];
            input.read_exact(&mut bytes)?;
            argv.push(String::from_utf8_lossy(&bytes).into_owned());
        }

        let next = read_key(&mut input)?;
        Ok(Self { input, next, argv })
    }

    /// Command line of the recorded session.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn finished(&self) -> bool {
        self.next.is_none()
    }

    fn expect(&self, actual: VcrKey, check_session: bool) -> Result<VcrKey, VcrError> {
        let expected = self.next.ok_or(VcrError::EndOfPlayback)?;
        let session_ok = !check_session || expected.session == actual.session;
        if expected.time != actual.time || expected.op != actual.op || !session_ok {
            return Err(VcrError::Mismatch { expected, actual });
        }
        Ok(expected)
    }

    fn advance(&mut self) -> Result<(), VcrError> {
        self.next = read_key(&mut self.input)?;
        Ok(())
    }

    fn session(ctx: &DriverContext<'_>, id: ConnectionId) -> i64 {
        ctx.pool.get(id).map_or(0, |c| c.session_id)
    }

    fn replay_result(
        &mut self,
        ctx: &DriverContext<'_>,
        op: VcrOp,
        id: ConnectionId,
    ) -> Result<i32, VcrError> {
        let key = VcrKey {
            time: ctx.host_time,
            op,
            session: Self::session(ctx, id),
        };
        self.expect(key, true)?;
        let ret = read_i32(&mut self.input)?;
        self.advance()?;
        Ok(ret)
    }
}

impl Driver for VcrPlayback {
    fn name(&self) -> &'static str {
        "VCR"
    }

    fn init(&mut self, _ctx: &mut DriverContext<'_>) -> bool {
        true
    }

    fn initialized(&self) -> bool {
        true
    }

    fn listen(&mut self, _ctx: &mut DriverContext<'_>, _enable: bool) -> Result<(), NetError> {
        Ok(())
    }

    fn search_for_hosts(&mut self, _ctx: &mut DriverContext<'_>, _xmit: bool) {}

    fn connect(
        &mut self,
        _ctx: &mut DriverContext<'_>,
        host: &str,
    ) -> Result<Option<ConnectionId>, NetError> {
        log::warn!("outgoing connect to {host} is not part of a call log");
        Ok(None)
    }

    fn check_new_connections(
        &mut self,
        ctx: &mut DriverContext<'_>,
    ) -> Result<Option<ConnectionId>, NetError> {
        let key = VcrKey {
            time: ctx.host_time,
            op: VcrOp::Connect,
            session: 0,
        };
        let expected = self.expect(key, false)?;
        if expected.session == 0 {
            self.advance()?;
            return Ok(None);
        }

        let mut field = [0u8; ADDRESS_LEN];
        self.input.read_exact(&mut field).map_err(VcrError::from)?;
        let end = field.iter().position(|b| *b == 0).unwrap_or(ADDRESS_LEN);
        let address = String::from_utf8_lossy(&field[..end]).into_owned();
        self.advance()?;

        let id = ctx
            .pool
            .allocate(&address, ctx.driver_index, ctx.net_time)
            .ok_or(NetError::NoFreeConnection)?;
        if let Some(connection) = ctx.pool.get_mut(id) {
            connection.session_id = expected.session;
        }
        Ok(Some(id))
    }

    fn get_message(
        &mut self,
        ctx: &mut DriverContext<'_>,
        id: ConnectionId,
    ) -> Result<Received, NetError> {
        let key = VcrKey {
            time: ctx.host_time,
            op: VcrOp::GetMessage,
            session: Self::session(ctx, id),
        };
        self.expect(key, true)?;

        let ret = read_i32(&mut self.input).map_err(VcrError::from)?;
        if ret > 0 {
            let len = read_len(&mut self.input, "message", NET_MAXMESSAGE)?;
            let mut payload = vec![0u8; len];
            self.input
                .read_exact(&mut payload)
                .map_err(VcrError::from)?;
            ctx.load_message(&payload)?;
        }
        self.advance()?;
        Ok(Received::from_code(ret))
    }

    fn send_message(
        &mut self,
        ctx: &mut DriverContext<'_>,
        id: ConnectionId,
        _data: &[u8],
    ) -> Result<SendStatus, NetError> {
        let ret = self.replay_result(ctx, VcrOp::SendMessage, id)?;
        Ok(SendStatus::from_code(ret))
    }

    fn send_unreliable_message(
        &mut self,
        ctx: &mut DriverContext<'_>,
        id: ConnectionId,
        _data: &[u8],
    ) -> Result<SendStatus, NetError> {
        let ret = self.replay_result(ctx, VcrOp::SendUnreliable, id)?;
        Ok(SendStatus::from_code(ret))
    }

    fn can_send_message(
        &mut self,
        ctx: &mut DriverContext<'_>,
        id: ConnectionId,
    ) -> Result<bool, NetError> {
        let ret = self.replay_result(ctx, VcrOp::CanSendMessage, id)?;
        Ok(ret != 0)
    }

    fn close(&mut self, _ctx: &mut DriverContext<'_>, _id: ConnectionId) {}

    fn shutdown(&mut self, _ctx: &mut DriverContext<'_>) {}

    fn times_out(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::rc::Rc;
    use std::cell::RefCell;

    /// Writer whose bytes stay reachable after the recorder is dropped.
    #[derive(Clone, Default)]
    struct Shared(Rc<RefCell<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_header_round_trip() {
        let shared = Shared::default();
        let argv = vec!["nq-server".to_string(), "-record".to_string()];
        VcrRecorder::new(shared.clone(), &argv)
            .unwrap()
            .finish()
            .unwrap();

        let bytes = shared.0.borrow().clone();
        assert_eq!(&bytes[..4], &VCR_SIGNATURE.to_le_bytes());
        let playback = VcrPlayback::new(Cursor::new(bytes)).unwrap();
        assert_eq!(playback.argv(), argv.as_slice());
        assert!(playback.finished());
    }

    #[test]
    fn test_bad_signature() {
        let bytes = 7i32.to_le_bytes().to_vec();
        assert!(matches!(
            VcrPlayback::new(Cursor::new(bytes)),
            Err(VcrError::BadSignature(7))
        ));
    }

    #[test]
    fn test_oversized_lengths_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&VCR_SIGNATURE.to_le_bytes());
        bytes.extend_from_slice(&i32::MAX.to_le_bytes());
        assert!(matches!(
            VcrPlayback::new(Cursor::new(bytes)),
            Err(VcrError::BadLength { field: "argc", .. })
        ));

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&VCR_SIGNATURE.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&(-4i32).to_le_bytes());
        assert!(matches!(
            VcrPlayback::new(Cursor::new(bytes)),
            Err(VcrError::BadLength {
                field: "argument",
                len: -4
            })
        ));
    }

    #[test]
    fn test_unknown_op_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&VCR_SIGNATURE.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&1.0f64.to_le_bytes());
        bytes.extend_from_slice(&9i32.to_le_bytes());
        bytes.extend_from_slice(&0i64.to_le_bytes());
        assert!(matches!(
            VcrPlayback::new(Cursor::new(bytes)),
            Err(VcrError::BadOp(9))
        ));
    }
}
