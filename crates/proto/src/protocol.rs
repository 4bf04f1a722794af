use bitflags::bitflags;

pub const PROTOCOL_VERSION: i32 = 15;
pub const DEFAULT_PORT: u16 = 26000;

/// Largest message a connection may carry.
pub const MAX_MSGLEN: usize = 8000;
/// Largest payload of a single unreliable datagram.
pub const MAX_DATAGRAM: usize = 1024;
/// Driver-level buffer size, leaving room for framing.
pub const NET_MAXMESSAGE: usize = 8192;

pub const MAX_EDICTS: usize = 600;
pub const MAX_MODELS: usize = 256;
pub const MAX_SOUNDS: usize = 256;
pub const MAX_LIGHTSTYLES: usize = 64;
pub const MAX_STYLESTRING: usize = 64;
pub const MAX_SCOREBOARD: usize = 16;
pub const MAX_CL_STATS: usize = 32;
pub const MAX_STATIC_ENTITIES: usize = 128;
pub const MAX_VISEDICTS: usize = 256;

/// Number of handshake stages before a client is fully in the game.
pub const SIGNONS: u8 = 4;

pub const DEFAULT_VIEWHEIGHT: i32 = 22;
pub const DEFAULT_SOUND_PACKET_VOLUME: i32 = 255;
pub const DEFAULT_SOUND_PACKET_ATTENUATION: f32 = 1.0;

pub const GAME_COOP: u8 = 0;
pub const GAME_DEATHMATCH: u8 = 1;

pub const STAT_HEALTH: usize = 0;
pub const STAT_FRAGS: usize = 1;
pub const STAT_WEAPON: usize = 2;
pub const STAT_AMMO: usize = 3;
pub const STAT_ARMOR: usize = 4;
pub const STAT_WEAPONFRAME: usize = 5;
pub const STAT_SHELLS: usize = 6;
pub const STAT_NAILS: usize = 7;
pub const STAT_ROCKETS: usize = 8;
pub const STAT_CELLS: usize = 9;
pub const STAT_ACTIVEWEAPON: usize = 10;
pub const STAT_TOTALSECRETS: usize = 11;
pub const STAT_TOTALMONSTERS: usize = 12;
pub const STAT_SECRETS: usize = 13;
pub const STAT_MONSTERS: usize = 14;

/// Server to client opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServerOp {
    Bad = 0,
    Nop = 1,
    Disconnect = 2,
    UpdateStat = 3,
    Version = 4,
    SetView = 5,
    Sound = 6,
    Time = 7,
    Print = 8,
    StuffText = 9,
    SetAngle = 10,
    ServerInfo = 11,
    LightStyle = 12,
    UpdateName = 13,
    UpdateFrags = 14,
    ClientData = 15,
    StopSound = 16,
    UpdateColors = 17,
    Particle = 18,
    Damage = 19,
    SpawnStatic = 20,
    SpawnBinary = 21,
    SpawnBaseline = 22,
    TempEntity = 23,
    SetPause = 24,
    SignonNum = 25,
    CenterPrint = 26,
    KilledMonster = 27,
    FoundSecret = 28,
    SpawnStaticSound = 29,
    Intermission = 30,
    Finale = 31,
    CdTrack = 32,
    SellScreen = 33,
    Cutscene = 34,
}

impl ServerOp {
    /// Opcodes with this bit set are entity fast updates.
    pub const FAST_UPDATE: u8 = 0x80;

    pub fn from_byte(value: u8) -> Option<Self> {
        use ServerOp::*;
        let op = match value {
            0 => Bad,
            1 => Nop,
            2 => Disconnect,
            3 => UpdateStat,
            4 => Version,
            5 => SetView,
            6 => Sound,
            7 => Time,
            8 => Print,
            9 => StuffText,
            10 => SetAngle,
            11 => ServerInfo,
            12 => LightStyle,
            13 => UpdateName,
            14 => UpdateFrags,
            15 => ClientData,
            16 => StopSound,
            17 => UpdateColors,
            18 => Particle,
            19 => Damage,
            20 => SpawnStatic,
            21 => SpawnBinary,
            22 => SpawnBaseline,
            23 => TempEntity,
            24 => SetPause,
            25 => SignonNum,
            26 => CenterPrint,
            27 => KilledMonster,
            28 => FoundSecret,
            29 => SpawnStaticSound,
            30 => Intermission,
            31 => Finale,
            32 => CdTrack,
            33 => SellScreen,
            34 => Cutscene,
            _ => return None,
        };
        Some(op)
    }

    pub fn name(&self) -> &'static str {
        use ServerOp::*;
        match self {
            Bad => "svc_bad",
            Nop => "svc_nop",
            Disconnect => "svc_disconnect",
            UpdateStat => "svc_updatestat",
            Version => "svc_version",
            SetView => "svc_setview",
            Sound => "svc_sound",
            Time => "svc_time",
            Print => "svc_print",
            StuffText => "svc_stufftext",
            SetAngle => "svc_setangle",
            ServerInfo => "svc_serverinfo",
            LightStyle => "svc_lightstyle",
            UpdateName => "svc_updatename",
            UpdateFrags => "svc_updatefrags",
            ClientData => "svc_clientdata",
            StopSound => "svc_stopsound",
            UpdateColors => "svc_updatecolors",
            Particle => "svc_particle",
            Damage => "svc_damage",
            SpawnStatic => "svc_spawnstatic",
            SpawnBinary => "svc_spawnbinary",
            SpawnBaseline => "svc_spawnbaseline",
            TempEntity => "svc_temp_entity",
            SetPause => "svc_setpause",
            SignonNum => "svc_signonnum",
            CenterPrint => "svc_centerprint",
            KilledMonster => "svc_killedmonster",
            FoundSecret => "svc_foundsecret",
            SpawnStaticSound => "svc_spawnstaticsound",
            Intermission => "svc_intermission",
            Finale => "svc_finale",
            CdTrack => "svc_cdtrack",
            SellScreen => "svc_sellscreen",
            Cutscene => "svc_cutscene",
        }
    }
}

/// Client to server opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClientOp {
    Bad = 0,
    Nop = 1,
    Disconnect = 2,
    Move = 3,
    StringCmd = 4,
}

impl ClientOp {
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(ClientOp::Bad),
            1 => Some(ClientOp::Nop),
            2 => Some(ClientOp::Disconnect),
            3 => Some(ClientOp::Move),
            4 => Some(ClientOp::StringCmd),
            _ => None,
        }
    }
}

bitflags! {
    /// Field presence mask of an entity fast update.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UpdateBits: u16 {
        const MOREBITS   = 1 << 0;
        const ORIGIN1    = 1 << 1;
        const ORIGIN2    = 1 << 2;
        const ORIGIN3    = 1 << 3;
        const ANGLE2     = 1 << 4;
        const NOLERP     = 1 << 5;
        const FRAME      = 1 << 6;
        /// Always set on the opcode byte; marks a fast update.
        const SIGNAL     = 1 << 7;
        const ANGLE1     = 1 << 8;
        const ANGLE3     = 1 << 9;
        const MODEL      = 1 << 10;
        const COLORMAP   = 1 << 11;
        const SKIN       = 1 << 12;
        const EFFECTS    = 1 << 13;
        const LONGENTITY = 1 << 14;
    }
}

impl UpdateBits {
    pub const ORIGINS: [UpdateBits; 3] = [Self::ORIGIN1, Self::ORIGIN2, Self::ORIGIN3];
    pub const ANGLES: [UpdateBits; 3] = [Self::ANGLE1, Self::ANGLE2, Self::ANGLE3];

    /// Bits that only fit in the continuation byte.
    pub fn needs_more_bits(&self) -> bool {
        self.bits() & 0xff00 != 0
    }
}

bitflags! {
    /// Field presence mask of `svc_clientdata`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClientDataBits: u16 {
        const VIEWHEIGHT  = 1 << 0;
        const IDEALPITCH  = 1 << 1;
        const PUNCH1      = 1 << 2;
        const PUNCH2      = 1 << 3;
        const PUNCH3      = 1 << 4;
        const VELOCITY1   = 1 << 5;
        const VELOCITY2   = 1 << 6;
        const VELOCITY3   = 1 << 7;
        const ITEMS       = 1 << 9;
        const ONGROUND    = 1 << 10;
        const INWATER     = 1 << 11;
        const WEAPONFRAME = 1 << 12;
        const ARMOR       = 1 << 13;
        const WEAPON      = 1 << 14;
    }
}

impl ClientDataBits {
    pub const PUNCHES: [ClientDataBits; 3] = [Self::PUNCH1, Self::PUNCH2, Self::PUNCH3];
    pub const VELOCITIES: [ClientDataBits; 3] =
        [Self::VELOCITY1, Self::VELOCITY2, Self::VELOCITY3];
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SoundBits: u8 {
        const VOLUME      = 1 << 0;
        const ATTENUATION = 1 << 1;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Effects: u8 {
        const BRIGHTFIELD = 1 << 0;
        const MUZZLEFLASH = 1 << 1;
        const BRIGHTLIGHT = 1 << 2;
        const DIMLIGHT    = 1 << 3;
    }
}

bitflags! {
    /// Button state carried by `clc_move`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Buttons: u8 {
        const ATTACK = 1 << 0;
        const JUMP   = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TempEntityKind {
    Spike = 0,
    SuperSpike = 1,
    Gunshot = 2,
    Explosion = 3,
    TarExplosion = 4,
    Lightning1 = 5,
    Lightning2 = 6,
    WizSpike = 7,
    KnightSpike = 8,
    Lightning3 = 9,
    LavaSplash = 10,
    Teleport = 11,
    Explosion2 = 12,
    Beam = 13,
}

impl TempEntityKind {
    pub fn from_byte(value: u8) -> Option<Self> {
        use TempEntityKind::*;
        let kind = match value {
            0 => Spike,
            1 => SuperSpike,
            2 => Gunshot,
            3 => Explosion,
            4 => TarExplosion,
            5 => Lightning1,
            6 => Lightning2,
            7 => WizSpike,
            8 => KnightSpike,
            9 => Lightning3,
            10 => LavaSplash,
            11 => Teleport,
            12 => Explosion2,
            13 => Beam,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_beam(&self) -> bool {
        matches!(
            self,
            TempEntityKind::Lightning1
                | TempEntityKind::Lightning2
                | TempEntityKind::Lightning3
                | TempEntityKind::Beam
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_op_round_trip() {
        for value in 0..=34u8 {
            let op = ServerOp::from_byte(value).unwrap();
            assert_eq!(op as u8, value);
        }
        assert!(ServerOp::from_byte(35).is_none());
    }

    #[test]
    fn test_update_bits_split() {
        let low = UpdateBits::ORIGIN1 | UpdateBits::FRAME;
        assert!(!low.needs_more_bits());
        assert!((low | UpdateBits::MODEL).needs_more_bits());
        assert_eq!(UpdateBits::LONGENTITY.bits(), 0x4000);
    }
}
