use glam::Vec3;

use crate::protocol::TempEntityKind;

#[derive(Debug, Clone, PartialEq)]
pub enum TempEntity {
    Point {
        kind: TempEntityKind,
        origin: Vec3,
    },
    Beam {
        kind: TempEntityKind,
        entity: i32,
        start: Vec3,
        end: Vec3,
    },
    Explosion2 {
        origin: Vec3,
        color_start: u8,
        color_length: u8,
    },
}

/// One server message as the parser saw it: the view angles that came with
/// it and every opcode byte it carried. Kept while `shownet` is on.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub view_angles: Vec3,
    pub opcodes: Vec<u8>,
}

/// Work for the subsystems outside the protocol core (console, audio,
/// renderer, command buffer). The session queues these while parsing and
/// the host drains them each frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Print(String),
    CenterPrint(String),
    /// Text for the host's command buffer.
    StuffText(String),
    Sound {
        entity: i32,
        channel: i32,
        sound: u8,
        volume: u8,
        attenuation: f32,
        origin: Vec3,
    },
    StopSound {
        entity: i32,
        channel: i32,
    },
    StaticSound {
        origin: Vec3,
        sound: u8,
        volume: u8,
        attenuation: u8,
    },
    Particles {
        origin: Vec3,
        direction: Vec3,
        count: u32,
        color: u8,
    },
    Damage {
        armor: u8,
        blood: u8,
        from: Vec3,
    },
    TempEntity(TempEntity),
    LightStyle {
        index: usize,
        map: String,
    },
    CdTrack {
        track: u8,
        looped: u8,
    },
    Pause(bool),
    Intermission,
    Finale(String),
    Cutscene(String),
    SellScreen,
    /// A new level was announced; precaching is done.
    LevelLoaded {
        level_name: String,
    },
    SignonComplete,
    Disconnected,
    DemoFinished,
}
