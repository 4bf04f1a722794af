use std::collections::VecDeque;
use std::path::PathBuf;

use super::error::ClientError;
use super::events::{ClientEvent, DecodedMessage};
use super::loader::ResourceLoader;
use super::state::{ClientState, ClientStatic, ConnectionState, UserCmd};
use crate::config::ClientConfig;
use crate::demo::{DemoError, DemoReader, DemoWriter, NO_TRACK, TimeDemo, demo_path};
use crate::msg::MessageBuffer;
use crate::net::{NetManager, Received, SendStatus};
use crate::protocol::{ClientOp, SIGNONS, ServerOp};

const MOVE_MESSAGE_SIZE: usize = 128;
/// The first moves after signon are dropped; the server is not ready yet.
const DROPPED_MOVES: u32 = 2;
const SHOWNET_HISTORY: usize = 4096;

/// One message pulled from the server or the demo being played.
#[derive(Debug, Clone, PartialEq)]
enum Incoming {
    Dead,
    Nothing,
    Reliable(Vec<u8>),
    Unreliable(Vec<u8>),
}

/// Client side of the protocol: connection lifecycle, signon, message
/// parsing, interpolation and demo record/playback.
pub struct ClientSession {
    pub(super) config: ClientConfig,
    pub(super) cls: ClientStatic,
    pub(super) cl: ClientState,
    pub(super) events: VecDeque<ClientEvent>,
    shownet: VecDeque<DecodedMessage>,
    frame_count: u64,
    realtime: f64,
    last_keepalive: f64,
}

impl ClientSession {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            cls: ClientStatic::new(),
            cl: ClientState::new(),
            events: VecDeque::new(),
            shownet: VecDeque::new(),
            frame_count: 0,
            realtime: 0.0,
            last_keepalive: 0.0,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ClientConfig {
        &mut self.config
    }

    pub fn state(&self) -> &ClientState {
        &self.cl
    }

    pub fn state_mut(&mut self) -> &mut ClientState {
        &mut self.cl
    }

    pub fn static_state(&self) -> &ClientStatic {
        &self.cls
    }

    pub fn is_connected(&self) -> bool {
        self.cls.is_connected()
    }

    pub fn signon(&self) -> u8 {
        self.cls.signon
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ClientEvent> + '_ {
        self.events.drain(..)
    }

    /// Messages decoded while `shownet` was on, oldest first.
    pub fn shownet_history(&self) -> &VecDeque<DecodedMessage> {
        &self.shownet
    }

    pub(super) fn note_decoded(&mut self, message: DecodedMessage) {
        if self.shownet.len() == SHOWNET_HISTORY {
            self.shownet.pop_front();
        }
        self.shownet.push_back(message);
    }

    /// Runs one client frame: read everything the server sent, relink
    /// entities, then send this frame's move and pending commands. A fatal
    /// error disconnects the session before it is returned.
    pub fn frame(
        &mut self,
        net: &mut NetManager,
        frametime: f64,
        cmd: &UserCmd,
        loader: &mut dyn ResourceLoader,
    ) -> Result<(), ClientError> {
        self.frame_count += 1;
        self.realtime = net.clock().now();

        let result = self.run_frame(net, frametime, cmd, loader);
        if let Err(err) = &result {
            log::error!("client error: {err}");
            self.disconnect(net);
            self.events.push_back(ClientEvent::Disconnected);
        }
        result
    }

    fn run_frame(
        &mut self,
        net: &mut NetManager,
        frametime: f64,
        cmd: &UserCmd,
        loader: &mut dyn ResourceLoader,
    ) -> Result<(), ClientError> {
        if self.cls.is_connected() {
            self.read_from_server(net, frametime, loader)?;
        }
        self.send_cmd(net, cmd)
    }

    pub fn connect(&mut self, net: &mut NetManager, host: Option<&str>) -> Result<(), ClientError> {
        if self.cls.is_playing_demo() {
            return Ok(());
        }
        self.disconnect(net);

        let label = host.unwrap_or("local");
        log::info!("connecting to {label}");
        let id = net
            .connect(host)?
            .ok_or_else(|| ClientError::ConnectFailed(label.to_string()))?;
        log::debug!("connected to {label}");

        self.cls.connection = Some(id);
        self.cls.state = ConnectionState::Connected;
        self.cls.signon = 0;
        self.cls.message.clear();
        self.cls.message.write_byte(ClientOp::Nop as u8)?;
        Ok(())
    }

    /// Sends a disconnect to the server and drops the connection. Stops
    /// demo playback or recording first.
    pub fn disconnect(&mut self, net: &mut NetManager) {
        if self.cls.is_playing_demo() {
            self.stop_playback();
        } else if self.cls.is_connected() {
            if self.cls.recording.is_some() {
                if let Err(err) = self.stop_recording() {
                    log::warn!("failed to finish demo: {err}");
                }
            }

            log::debug!("sending clc_disconnect");
            if let Some(id) = self.cls.connection {
                let bye = [ClientOp::Disconnect as u8];
                if let Err(err) = net.send_unreliable_message(id, &bye) {
                    log::warn!("disconnect not sent: {err}");
                }
                net.close(id);
            }
            self.cls.state = ConnectionState::Disconnected;
        }

        self.cls.message.clear();
        self.cls.connection = None;
        self.cls.timedemo = None;
        self.cls.signon = 0;
    }

    /// Reads and parses everything pending, then relinks entities.
    pub fn read_from_server(
        &mut self,
        net: &mut NetManager,
        frametime: f64,
        loader: &mut dyn ResourceLoader,
    ) -> Result<(), ClientError> {
        self.cl.old_time = self.cl.time;
        self.cl.time += frametime;

        loop {
            let data = match self.get_message(net)? {
                Incoming::Dead => return Err(ClientError::LostConnection),
                Incoming::Nothing => break,
                Incoming::Reliable(data) | Incoming::Unreliable(data) => data,
            };
            self.cl.last_received_message = self.realtime;
            self.parse_server_message(net, &data, loader)?;
            if !self.cls.is_connected() {
                break;
            }
        }

        let nolerp = self.config.nolerp || self.cls.timedemo.is_some();
        self.cl.relink_entities(nolerp, self.cls.is_playing_demo());
        Ok(())
    }

    /// Next message from the demo being played or the live connection.
    /// Live single-byte nop keepalives are swallowed; live messages are
    /// appended to the demo being recorded.
    fn get_message(&mut self, net: &mut NetManager) -> Result<Incoming, ClientError> {
        if self.cls.is_playing_demo() {
            return self.read_demo_message();
        }

        let Some(id) = self.cls.connection else {
            return Ok(Incoming::Dead);
        };
        let received = loop {
            let received = net.get_message(id)?;
            if !received.has_message() {
                return Ok(match received {
                    Received::Dead => Incoming::Dead,
                    _ => Incoming::Nothing,
                });
            }
            if net.message().as_slice() == [ServerOp::Nop as u8] {
                log::debug!("<-- server to client keepalive");
                continue;
            }
            break received;
        };

        let data = net.message().as_slice().to_vec();
        if let Some(writer) = &mut self.cls.recording {
            writer.write_frame(self.cl.view_angles, &data)?;
        }
        Ok(match received {
            Received::Reliable => Incoming::Reliable(data),
            _ => Incoming::Unreliable(data),
        })
    }

    fn read_demo_message(&mut self) -> Result<Incoming, ClientError> {
        if self.cls.signon == SIGNONS {
            if let Some(timedemo) = &mut self.cls.timedemo {
                if !timedemo.begin_frame(self.frame_count, self.realtime) {
                    return Ok(Incoming::Nothing);
                }
            } else if self.cl.time <= self.cl.mtime[0] {
                return Ok(Incoming::Nothing);
            }
        }

        let frame = match &mut self.cls.playback {
            Some(reader) => reader.read_frame()?,
            None => return Ok(Incoming::Nothing),
        };
        match frame {
            Some(frame) => {
                self.cl.mview_angles[1] = self.cl.mview_angles[0];
                self.cl.mview_angles[0] = frame.view_angles;
                Ok(Incoming::Reliable(frame.payload))
            }
            None => {
                self.stop_playback();
                Ok(Incoming::Nothing)
            }
        }
    }

    /// Keeps the server from timing us out while resources load. Anything
    /// but an unreliable nop arriving meanwhile is a protocol violation.
    pub(super) fn keepalive(&mut self, net: &mut NetManager) -> Result<(), ClientError> {
        if net.local_server().is_some() || self.cls.is_playing_demo() {
            return Ok(());
        }

        let saved = net.message().snapshot();
        loop {
            match self.get_message(net)? {
                Incoming::Dead => return Err(ClientError::KeepaliveFailed),
                Incoming::Nothing => break,
                Incoming::Reliable(_) => return Err(ClientError::KeepaliveReliable),
                Incoming::Unreliable(data) => {
                    if data.first() != Some(&(ServerOp::Nop as u8)) {
                        return Err(ClientError::KeepaliveNotNop);
                    }
                }
            }
        }
        net.message_mut().restore(&saved);

        let now = net.clock().now();
        if now - self.last_keepalive < self.config.keepalive_interval {
            return Ok(());
        }
        self.last_keepalive = now;

        let Some(id) = self.cls.connection else {
            return Ok(());
        };
        log::info!("--> client to server keepalive");
        self.cls.message.write_byte(ClientOp::Nop as u8)?;
        net.send_message(id, self.cls.message.as_slice())?;
        self.cls.message.clear();
        Ok(())
    }

    /// Queues the reply for the signon stage just reached.
    pub(super) fn signon_reply(&mut self) -> Result<(), ClientError> {
        log::debug!("signon reply {}", self.cls.signon);
        let msg = &mut self.cls.message;
        match self.cls.signon {
            1 => write_string_cmd(msg, "prespawn")?,
            2 => {
                write_string_cmd(msg, &format!("name \"{}\"\n", self.config.name))?;
                write_string_cmd(
                    msg,
                    &format!(
                        "color {} {}\n",
                        self.config.top_color & 15,
                        self.config.bottom_color & 15
                    ),
                )?;
                write_string_cmd(msg, &format!("spawn {}", self.config.spawn_parms))?;
            }
            3 => write_string_cmd(msg, "begin")?,
            4 => self.events.push_back(ClientEvent::SignonComplete),
            _ => {}
        }
        Ok(())
    }

    /// Sends this frame's move once in the game, then flushes queued
    /// reliable commands when the connection can take them.
    pub fn send_cmd(&mut self, net: &mut NetManager, cmd: &UserCmd) -> Result<(), ClientError> {
        if !self.cls.is_connected() {
            return Ok(());
        }
        if self.cls.signon == SIGNONS {
            self.send_move(net, cmd)?;
            if !self.cls.is_connected() {
                return Ok(());
            }
        }

        if self.cls.is_playing_demo() {
            self.cls.message.clear();
            return Ok(());
        }
        if self.cls.message.is_empty() {
            return Ok(());
        }
        let Some(id) = self.cls.connection else {
            return Ok(());
        };
        if !net.can_send_message(id)? {
            log::debug!("can't send reliable commands yet");
            return Ok(());
        }
        if net.send_message(id, self.cls.message.as_slice())? == SendStatus::Dead {
            return Err(ClientError::LostConnection);
        }
        self.cls.message.clear();
        Ok(())
    }

    fn send_move(&mut self, net: &mut NetManager, cmd: &UserCmd) -> Result<(), ClientError> {
        let mut buf = MessageBuffer::new(MOVE_MESSAGE_SIZE);
        buf.write_byte(ClientOp::Move as u8)?;
        buf.write_float(self.cl.mtime[0] as f32)?;
        for axis in 0..3 {
            buf.write_angle(self.cl.view_angles[axis])?;
        }
        buf.write_short(cmd.forward_move as i16)?;
        buf.write_short(cmd.side_move as i16)?;
        buf.write_short(cmd.up_move as i16)?;
        buf.write_byte(cmd.buttons.bits())?;
        buf.write_byte(cmd.impulse)?;

        if self.cls.is_playing_demo() {
            return Ok(());
        }
        self.cl.move_messages += 1;
        if self.cl.move_messages <= DROPPED_MOVES {
            return Ok(());
        }

        let Some(id) = self.cls.connection else {
            return Ok(());
        };
        if net.send_unreliable_message(id, buf.as_slice())? == SendStatus::Dead {
            log::warn!("lost server connection while sending move");
            self.disconnect(net);
        }
        Ok(())
    }

    /// Starts recording the server stream to `name`. Without `map_given`
    /// recording must start before connecting.
    pub fn record(
        &mut self,
        name: &str,
        map_given: bool,
        track: Option<i32>,
    ) -> Result<PathBuf, ClientError> {
        let path = demo_path(name)?;
        if !map_given && self.cls.is_connected() {
            return Err(DemoError::AlreadyConnected.into());
        }
        let track = match track {
            Some(track) => {
                log::info!("forcing CD track to {track}");
                track
            }
            None => NO_TRACK,
        };

        log::info!("recording to {}", path.display());
        self.cls.recording = Some(DemoWriter::create(&path, track)?);
        self.cls.force_track = track;
        Ok(path)
    }

    /// Finishes the demo being recorded with a disconnect frame.
    pub fn stop_recording(&mut self) -> Result<(), ClientError> {
        let mut writer = self.cls.recording.take().ok_or(DemoError::NotRecording)?;
        writer.write_frame(self.cl.view_angles, &[ServerOp::Disconnect as u8])?;
        let path = writer.path().to_path_buf();
        writer.finish()?;
        log::info!("completed demo {}", path.display());
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.cls.recording.is_some()
    }

    /// Disconnects and starts reading `name` in place of a server.
    pub fn play_demo(&mut self, net: &mut NetManager, name: &str) -> Result<(), ClientError> {
        self.disconnect(net);
        let path = demo_path(name)?;
        log::info!("playing demo from {}", path.display());
        let (reader, track) = DemoReader::open(&path)?;
        self.start_playback(reader, track);
        Ok(())
    }

    /// Plays `name` as fast as possible and reports the frame rate at the end.
    pub fn time_demo(&mut self, net: &mut NetManager, name: &str) -> Result<(), ClientError> {
        self.play_demo(net, name)?;
        self.realtime = net.clock().now();
        self.cls.timedemo = Some(TimeDemo::new(self.frame_count, self.realtime));
        Ok(())
    }

    /// Plays from an already opened demo stream.
    pub fn start_playback(&mut self, reader: DemoReader, track: i32) {
        self.cls.playback = Some(reader);
        self.cls.state = ConnectionState::Connected;
        self.cls.signon = 0;
        self.cls.force_track = track;
    }

    pub fn stop_playback(&mut self) {
        if self.cls.playback.take().is_none() {
            return;
        }
        self.cls.state = ConnectionState::Disconnected;
        self.cls.signon = 0;
        if let Some(timedemo) = self.cls.timedemo.take() {
            let report = timedemo.report(self.frame_count, self.realtime);
            log::info!("{report}");
        }
        self.events.push_back(ClientEvent::DemoFinished);
    }

    pub fn is_playing_demo(&self) -> bool {
        self.cls.is_playing_demo()
    }
}

fn write_string_cmd(msg: &mut MessageBuffer, text: &str) -> Result<(), ClientError> {
    msg.write_byte(ClientOp::StringCmd as u8)?;
    msg.write_string(text)?;
    Ok(())
}
