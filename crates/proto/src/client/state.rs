use glam::Vec3;

use super::entity::EntitySnapshot;
use super::loader::ModelInfo;
use crate::demo::{DemoReader, DemoWriter, NO_TRACK, TimeDemo};
use crate::msg::MessageBuffer;
use crate::net::ConnectionId;
use crate::protocol::{Buttons, MAX_CL_STATS, MAX_LIGHTSTYLES, MAX_SCOREBOARD};

/// Size of the outgoing reliable command buffer.
pub const CLIENT_MESSAGE_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

/// Movement intent for one frame, produced by the input layer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UserCmd {
    pub forward_move: f32,
    pub side_move: f32,
    pub up_move: f32,
    pub buttons: Buttons,
    pub impulse: u8,
}

/// State that survives level changes.
pub struct ClientStatic {
    pub state: ConnectionState,
    pub signon: u8,
    pub connection: Option<ConnectionId>,
    /// Reliable commands waiting for `send_cmd`.
    pub message: MessageBuffer,
    pub recording: Option<DemoWriter>,
    pub playback: Option<DemoReader>,
    pub timedemo: Option<TimeDemo>,
    pub force_track: i32,
}

impl ClientStatic {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            signon: 0,
            connection: None,
            message: MessageBuffer::new(CLIENT_MESSAGE_SIZE),
            recording: None,
            playback: None,
            timedemo: None,
            force_track: NO_TRACK,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_playing_demo(&self) -> bool {
        self.playback.is_some()
    }
}

impl Default for ClientStatic {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Scoreboard {
    pub name: String,
    pub frags: i32,
    pub colors: u8,
}

/// Lightning bolts and grapple beams, kept alive for a short time.
#[derive(Debug, Clone, PartialEq)]
pub struct Beam {
    pub entity: i32,
    pub model: &'static str,
    pub end_time: f64,
    pub start: Vec3,
    pub end: Vec3,
}

/// Per-level client state, wiped by every serverinfo.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientState {
    pub stats: [i32; MAX_CL_STATS],
    pub items: i32,
    /// Server times of the two latest messages, newest first.
    pub mtime: [f64; 2],
    pub time: f64,
    pub old_time: f64,
    pub last_received_message: f64,

    pub view_angles: Vec3,
    pub mview_angles: [Vec3; 2],
    pub mvelocity: [Vec3; 2],
    pub velocity: Vec3,
    pub punch_angle: Vec3,
    pub ideal_pitch: f32,
    pub view_height: f32,

    pub paused: bool,
    pub on_ground: bool,
    pub in_water: bool,
    pub intermission: u8,
    pub completed_time: f64,

    pub level_name: String,
    pub view_entity: i32,
    pub max_clients: usize,
    pub game_type: u8,

    pub model_names: Vec<String>,
    /// Indexed like the precache list; slot 0 is always empty.
    pub models: Vec<Option<ModelInfo>>,
    pub sound_names: Vec<String>,
    pub sounds: Vec<bool>,

    pub scores: Vec<Scoreboard>,
    pub light_styles: Vec<String>,
    pub entities: Vec<EntitySnapshot>,
    pub static_entities: Vec<EntitySnapshot>,
    pub beams: Vec<Beam>,
    /// Indexes into `entities` linked this frame.
    pub visible_entities: Vec<usize>,

    pub cd_track: u8,
    pub loop_track: u8,
    pub move_messages: u32,
}

impl ClientState {
    pub fn new() -> Self {
        Self {
            stats: [0; MAX_CL_STATS],
            items: 0,
            mtime: [0.0; 2],
            time: 0.0,
            old_time: 0.0,
            last_received_message: 0.0,
            view_angles: Vec3::ZERO,
            mview_angles: [Vec3::ZERO; 2],
            mvelocity: [Vec3::ZERO; 2],
            velocity: Vec3::ZERO,
            punch_angle: Vec3::ZERO,
            ideal_pitch: 0.0,
            view_height: 0.0,
            paused: false,
            on_ground: false,
            in_water: false,
            intermission: 0,
            completed_time: 0.0,
            level_name: String::new(),
            view_entity: 0,
            max_clients: 0,
            game_type: 0,
            model_names: Vec::new(),
            models: Vec::new(),
            sound_names: Vec::new(),
            sounds: Vec::new(),
            scores: Vec::new(),
            light_styles: vec![String::new(); MAX_LIGHTSTYLES],
            entities: Vec::new(),
            static_entities: Vec::new(),
            beams: Vec::new(),
            visible_entities: Vec::new(),
            cd_track: 0,
            loop_track: 0,
            move_messages: 0,
        }
    }

    /// Resets everything for a new level.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    pub fn set_max_clients(&mut self, max_clients: usize) {
        self.max_clients = max_clients.min(MAX_SCOREBOARD);
        self.scores = vec![Scoreboard::default(); self.max_clients];
    }

    /// Entity `num`, growing the list on first sight.
    pub fn entity_mut(&mut self, num: usize) -> &mut EntitySnapshot {
        if num >= self.entities.len() {
            self.entities.resize_with(num + 1, EntitySnapshot::default);
        }
        &mut self.entities[num]
    }

    pub fn entity(&self, num: usize) -> Option<&EntitySnapshot> {
        self.entities.get(num)
    }
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}
