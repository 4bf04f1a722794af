use glam::Vec3;

use super::entity::{EntityState, EntitySnapshot, EntityUpdate};
use super::error::ClientError;
use super::events::{ClientEvent, DecodedMessage, TempEntity};
use super::loader::ResourceLoader;
use super::session::ClientSession;
use super::state::Beam;
use crate::demo::NO_TRACK;
use crate::msg::MessageReader;
use crate::net::NetManager;
use crate::protocol::{
    ClientDataBits, DEFAULT_SOUND_PACKET_ATTENUATION, DEFAULT_SOUND_PACKET_VOLUME,
    DEFAULT_VIEWHEIGHT, MAX_CL_STATS, MAX_EDICTS, MAX_LIGHTSTYLES, MAX_MODELS, MAX_SCOREBOARD,
    MAX_SOUNDS, MAX_STATIC_ENTITIES, MAX_STYLESTRING, PROTOCOL_VERSION,
    STAT_ACTIVEWEAPON, STAT_AMMO, STAT_ARMOR, STAT_HEALTH, STAT_MONSTERS, STAT_SECRETS,
    STAT_SHELLS, STAT_WEAPON, STAT_WEAPONFRAME, SIGNONS, ServerOp, SoundBits, TempEntityKind,
};

const MAX_BEAMS: usize = 24;
const BEAM_LIFETIME: f64 = 0.2;

/// Server times and entity updates read from one message. They only reach
/// the client state once the whole message has decoded cleanly.
struct StagedUpdates {
    mtime: [f64; 2],
    timed: bool,
    updates: Vec<(usize, EntityUpdate, [f64; 2])>,
}

impl StagedUpdates {
    fn new(mtime: [f64; 2]) -> Self {
        Self {
            mtime,
            timed: false,
            updates: Vec::new(),
        }
    }

    fn time(&mut self, time: f64) {
        self.mtime = [time, self.mtime[0]];
        self.timed = true;
    }

    fn push(&mut self, num: usize, update: EntityUpdate) {
        self.updates.push((num, update, self.mtime));
    }
}

impl ClientSession {
    /// Dispatches every command in one server message.
    pub(super) fn parse_server_message(
        &mut self,
        net: &mut NetManager,
        data: &[u8],
        loader: &mut dyn ResourceLoader,
    ) -> Result<(), ClientError> {
        if self.config.shownet {
            log::debug!("{} bytes from server", data.len());
        }
        // Reset every message unless the server says otherwise.
        self.cl.on_ground = false;

        let view_angles = if self.cls.is_playing_demo() {
            self.cl.mview_angles[0]
        } else {
            self.cl.view_angles
        };
        let mut opcodes = Vec::new();

        let mut reader = MessageReader::new(data);
        let mut staged = StagedUpdates::new(self.cl.mtime);
        loop {
            if reader.bad_read() {
                return Err(ClientError::BadServerMessage);
            }
            let cmd = reader.read_byte();
            if cmd == -1 {
                self.commit_updates(staged)?;
                if self.config.shownet {
                    self.note_decoded(DecodedMessage {
                        view_angles,
                        opcodes,
                    });
                }
                return Ok(());
            }
            let cmd = cmd as u8;
            if self.config.shownet {
                opcodes.push(cmd);
            }

            if cmd & ServerOp::FAST_UPDATE != 0 {
                if self.config.shownet {
                    log::debug!("{:3}:fast update", reader.position() - 1);
                }
                let update = EntityUpdate::read(cmd, &mut reader);
                if reader.bad_read() {
                    return Err(ClientError::BadServerMessage);
                }
                staged.push(entity_index(update.number)?, update);
                continue;
            }

            let op = ServerOp::from_byte(cmd)
                .ok_or(ClientError::IllegibleMessage(i32::from(cmd)))?;
            if self.config.shownet {
                log::debug!("{:3}:{}", reader.position() - 1, op.name());
            }

            match op {
                ServerOp::Bad | ServerOp::SpawnBinary => {
                    return Err(ClientError::IllegibleMessage(i32::from(cmd)));
                }
                ServerOp::Nop => {}
                ServerOp::Disconnect => return Err(ClientError::ServerDisconnected),
                ServerOp::UpdateStat => {
                    let index = reader.read_byte();
                    if index < 0 || index as usize >= MAX_CL_STATS {
                        return Err(ClientError::BadStat(index));
                    }
                    self.cl.stats[index as usize] = reader.read_long();
                }
                ServerOp::Version => {
                    let version = reader.read_long();
                    if version != PROTOCOL_VERSION {
                        return Err(ClientError::BadProtocolVersion(version));
                    }
                }
                ServerOp::SetView => self.cl.view_entity = reader.read_short(),
                ServerOp::Sound => self.parse_start_sound(&mut reader)?,
                ServerOp::Time => staged.time(f64::from(reader.read_float())),
                ServerOp::Print => {
                    let text = reader.read_string();
                    self.events.push_back(ClientEvent::Print(text));
                }
                ServerOp::CenterPrint => {
                    let text = reader.read_string();
                    self.events.push_back(ClientEvent::CenterPrint(text));
                }
                ServerOp::StuffText => {
                    let text = reader.read_string();
                    self.events.push_back(ClientEvent::StuffText(text));
                }
                ServerOp::SetAngle => {
                    for axis in 0..3 {
                        self.cl.view_angles[axis] = reader.read_angle();
                    }
                }
                ServerOp::ServerInfo => self.parse_server_info(net, &mut reader, loader)?,
                ServerOp::LightStyle => {
                    let index = reader.read_byte();
                    if index < 0 || index as usize >= MAX_LIGHTSTYLES {
                        return Err(ClientError::BadLightStyle(index));
                    }
                    let mut map = reader.read_string();
                    map.truncate(MAX_STYLESTRING - 1);
                    self.cl.light_styles[index as usize] = map.clone();
                    self.events.push_back(ClientEvent::LightStyle {
                        index: index as usize,
                        map,
                    });
                }
                ServerOp::UpdateName => {
                    let slot = self.player_slot(&mut reader, "svc_updatename")?;
                    self.cl.scores[slot].name = reader.read_string();
                }
                ServerOp::UpdateFrags => {
                    let slot = self.player_slot(&mut reader, "svc_updatefrags")?;
                    self.cl.scores[slot].frags = reader.read_short();
                }
                ServerOp::UpdateColors => {
                    let slot = self.player_slot(&mut reader, "svc_updatecolors")?;
                    self.cl.scores[slot].colors = reader.read_byte() as u8;
                }
                ServerOp::ClientData => {
                    let bits = ClientDataBits::from_bits_retain(reader.read_short() as u16);
                    self.parse_client_data(bits, &mut reader);
                }
                ServerOp::StopSound => {
                    let value = reader.read_short();
                    self.events.push_back(ClientEvent::StopSound {
                        entity: value >> 3,
                        channel: value & 7,
                    });
                }
                ServerOp::Particle => {
                    let origin = read_vec(&mut reader);
                    let mut direction = Vec3::ZERO;
                    for axis in 0..3 {
                        direction[axis] = reader.read_char() as f32 * (1.0 / 16.0);
                    }
                    let count = match reader.read_byte() {
                        255 => 1024,
                        n => n.max(0) as u32,
                    };
                    let color = reader.read_byte() as u8;
                    self.events.push_back(ClientEvent::Particles {
                        origin,
                        direction,
                        count,
                        color,
                    });
                }
                ServerOp::Damage => {
                    let armor = reader.read_byte() as u8;
                    let blood = reader.read_byte() as u8;
                    let from = read_vec(&mut reader);
                    self.events.push_back(ClientEvent::Damage { armor, blood, from });
                }
                ServerOp::SpawnStatic => {
                    if self.cl.static_entities.len() >= MAX_STATIC_ENTITIES {
                        return Err(ClientError::TooManyStatics);
                    }
                    let baseline = EntityState::read(&mut reader);
                    let ent = EntitySnapshot::from_baseline(baseline, &self.cl.models);
                    self.cl.static_entities.push(ent);
                }
                ServerOp::SpawnBaseline => {
                    let num = reader.read_short();
                    let num = entity_index(num)?;
                    self.cl.entity_mut(num).baseline = EntityState::read(&mut reader);
                }
                ServerOp::TempEntity => self.parse_temp_entity(&mut reader)?,
                ServerOp::SetPause => {
                    self.cl.paused = reader.read_byte() > 0;
                    self.events.push_back(ClientEvent::Pause(self.cl.paused));
                }
                ServerOp::SignonNum => {
                    let stage = reader.read_byte();
                    if stage <= i32::from(self.cls.signon) {
                        return Err(ClientError::SignonOutOfOrder {
                            received: stage,
                            current: self.cls.signon,
                        });
                    }
                    self.cls.signon = stage.min(i32::from(SIGNONS)) as u8;
                    self.signon_reply()?;
                }
                ServerOp::KilledMonster => self.cl.stats[STAT_MONSTERS] += 1,
                ServerOp::FoundSecret => self.cl.stats[STAT_SECRETS] += 1,
                ServerOp::SpawnStaticSound => {
                    let origin = read_vec(&mut reader);
                    let sound = reader.read_byte() as u8;
                    let volume = reader.read_byte() as u8;
                    let attenuation = reader.read_byte() as u8;
                    self.events.push_back(ClientEvent::StaticSound {
                        origin,
                        sound,
                        volume,
                        attenuation,
                    });
                }
                ServerOp::Intermission => {
                    self.cl.intermission = 1;
                    self.cl.completed_time = self.cl.time;
                    self.events.push_back(ClientEvent::Intermission);
                }
                ServerOp::Finale => {
                    self.cl.intermission = 2;
                    self.cl.completed_time = self.cl.time;
                    let text = reader.read_string();
                    self.events.push_back(ClientEvent::Finale(text));
                }
                ServerOp::Cutscene => {
                    self.cl.intermission = 3;
                    self.cl.completed_time = self.cl.time;
                    let text = reader.read_string();
                    self.events.push_back(ClientEvent::Cutscene(text));
                }
                ServerOp::CdTrack => {
                    self.cl.cd_track = reader.read_byte() as u8;
                    self.cl.loop_track = reader.read_byte() as u8;
                    let track = if self.cls.force_track != NO_TRACK {
                        self.cls.force_track as u8
                    } else {
                        self.cl.cd_track
                    };
                    self.events.push_back(ClientEvent::CdTrack {
                        track,
                        looped: self.cl.loop_track,
                    });
                }
                ServerOp::SellScreen => self.events.push_back(ClientEvent::SellScreen),
            }
        }
    }

    fn player_slot(
        &self,
        reader: &mut MessageReader<'_>,
        op: &'static str,
    ) -> Result<usize, ClientError> {
        let index = reader.read_byte();
        if index < 0 || index as usize >= self.cl.max_clients {
            return Err(ClientError::BadPlayer { op, index });
        }
        Ok(index as usize)
    }

    fn parse_server_info(
        &mut self,
        net: &mut NetManager,
        reader: &mut MessageReader<'_>,
        loader: &mut dyn ResourceLoader,
    ) -> Result<(), ClientError> {
        log::debug!("serverinfo packet received");
        self.cl.clear();
        self.cls.message.clear();

        let version = reader.read_long();
        if version != PROTOCOL_VERSION {
            return Err(ClientError::BadProtocolVersion(version));
        }

        let max_clients = reader.read_byte();
        if max_clients < 1 || max_clients as usize > MAX_SCOREBOARD {
            return Err(ClientError::BadMaxClients(max_clients));
        }
        self.cl.set_max_clients(max_clients as usize);
        self.cl.game_type = reader.read_byte() as u8;
        self.cl.level_name = reader.read_string();
        log::info!("{}", self.cl.level_name);

        // Slot 0 of both precache lists is unused.
        self.cl.model_names = read_precache_list(reader, MAX_MODELS)
            .ok_or(ClientError::TooManyModels)?;
        self.cl.sound_names = read_precache_list(reader, MAX_SOUNDS)
            .ok_or(ClientError::TooManySounds)?;

        self.cl.models = vec![None; self.cl.model_names.len()];
        for index in 1..self.cl.model_names.len() {
            let name = &self.cl.model_names[index];
            let info = loader
                .load_model(name)
                .ok_or_else(|| ClientError::ModelNotFound(name.clone()))?;
            self.cl.models[index] = Some(info);
            self.keepalive(net)?;
        }

        self.cl.sounds = vec![false; self.cl.sound_names.len()];
        for index in 1..self.cl.sound_names.len() {
            self.cl.sounds[index] = loader.load_sound(&self.cl.sound_names[index]);
            self.keepalive(net)?;
        }

        self.events.push_back(ClientEvent::LevelLoaded {
            level_name: self.cl.level_name.clone(),
        });
        Ok(())
    }

    fn parse_start_sound(&mut self, reader: &mut MessageReader<'_>) -> Result<(), ClientError> {
        let mask = SoundBits::from_bits_retain(reader.read_byte() as u8);
        let volume = if mask.contains(SoundBits::VOLUME) {
            reader.read_byte()
        } else {
            DEFAULT_SOUND_PACKET_VOLUME
        };
        let attenuation = if mask.contains(SoundBits::ATTENUATION) {
            reader.read_byte() as f32 / 64.0
        } else {
            DEFAULT_SOUND_PACKET_ATTENUATION
        };

        let channel = reader.read_short();
        let sound = reader.read_byte() as u8;
        let entity = channel >> 3;
        if entity > MAX_EDICTS as i32 {
            return Err(ClientError::BadSoundEntity(entity));
        }
        let origin = read_vec(reader);
        self.events.push_back(ClientEvent::Sound {
            entity,
            channel: channel & 7,
            sound,
            volume: volume as u8,
            attenuation,
            origin,
        });
        Ok(())
    }

    fn parse_client_data(&mut self, bits: ClientDataBits, reader: &mut MessageReader<'_>) {
        let cl = &mut self.cl;
        let view_height = if bits.contains(ClientDataBits::VIEWHEIGHT) {
            reader.read_char()
        } else {
            DEFAULT_VIEWHEIGHT
        };
        cl.view_height = view_height as f32;
        cl.ideal_pitch = if bits.contains(ClientDataBits::IDEALPITCH) {
            reader.read_char() as f32
        } else {
            0.0
        };

        cl.mvelocity[1] = cl.mvelocity[0];
        for axis in 0..3 {
            cl.punch_angle[axis] = if bits.contains(ClientDataBits::PUNCHES[axis]) {
                reader.read_char() as f32
            } else {
                0.0
            };
            cl.mvelocity[0][axis] = if bits.contains(ClientDataBits::VELOCITIES[axis]) {
                reader.read_char() as f32 * 16.0
            } else {
                0.0
            };
        }

        // Items are always present.
        cl.items = reader.read_long();
        cl.on_ground = bits.contains(ClientDataBits::ONGROUND);
        cl.in_water = bits.contains(ClientDataBits::INWATER);

        let mut byte_if = |flag: ClientDataBits| {
            if bits.contains(flag) {
                reader.read_byte()
            } else {
                0
            }
        };
        cl.stats[STAT_WEAPONFRAME] = byte_if(ClientDataBits::WEAPONFRAME);
        cl.stats[STAT_ARMOR] = byte_if(ClientDataBits::ARMOR);
        cl.stats[STAT_WEAPON] = byte_if(ClientDataBits::WEAPON);

        cl.stats[STAT_HEALTH] = reader.read_short();
        cl.stats[STAT_AMMO] = reader.read_byte();
        for ammo in 0..4 {
            cl.stats[STAT_SHELLS + ammo] = reader.read_byte();
        }
        cl.stats[STAT_ACTIVEWEAPON] = reader.read_byte();
    }

    fn commit_updates(&mut self, staged: StagedUpdates) -> Result<(), ClientError> {
        if staged.timed {
            self.cl.mtime = staged.mtime;
        }
        if staged.updates.is_empty() {
            return Ok(());
        }
        if self.cls.signon == SIGNONS - 1 {
            // First entity update: the client is in the game.
            self.cls.signon = SIGNONS;
            self.signon_reply()?;
        }

        let max_clients = self.cl.max_clients;
        for (num, update, mtime) in staged.updates {
            self.cl.entity_mut(num);
            let cl = &mut self.cl;
            cl.entities[num].apply(&update, mtime, &cl.models, max_clients)?;
        }
        Ok(())
    }

    fn parse_temp_entity(&mut self, reader: &mut MessageReader<'_>) -> Result<(), ClientError> {
        let value = reader.read_byte();
        let kind = TempEntityKind::from_byte(value as u8).ok_or(ClientError::BadTempEntity(value))?;

        let event = if kind.is_beam() {
            let entity = reader.read_short();
            let start = read_vec(reader);
            let end = read_vec(reader);
            self.add_beam(kind, entity, start, end);
            TempEntity::Beam {
                kind,
                entity,
                start,
                end,
            }
        } else if kind == TempEntityKind::Explosion2 {
            let origin = read_vec(reader);
            let color_start = reader.read_byte() as u8;
            let color_length = reader.read_byte() as u8;
            TempEntity::Explosion2 {
                origin,
                color_start,
                color_length,
            }
        } else {
            TempEntity::Point {
                kind,
                origin: read_vec(reader),
            }
        };
        self.events.push_back(ClientEvent::TempEntity(event));
        Ok(())
    }

    /// Reuses the beam already attached to `entity`, else a free slot.
    fn add_beam(&mut self, kind: TempEntityKind, entity: i32, start: Vec3, end: Vec3) {
        let model = match kind {
            TempEntityKind::Lightning1 => "progs/bolt.mdl",
            TempEntityKind::Lightning2 => "progs/bolt2.mdl",
            TempEntityKind::Lightning3 => "progs/bolt3.mdl",
            _ => "progs/beam.mdl",
        };
        let beam = Beam {
            entity,
            model,
            end_time: self.cl.time + BEAM_LIFETIME,
            start,
            end,
        };

        let time = self.cl.time;
        let beams = &mut self.cl.beams;
        if let Some(slot) = beams.iter_mut().find(|b| b.entity == entity) {
            *slot = beam;
        } else if let Some(slot) = beams.iter_mut().find(|b| b.end_time < time) {
            *slot = beam;
        } else if beams.len() < MAX_BEAMS {
            beams.push(beam);
        } else {
            log::warn!("beam list overflow");
        }
    }
}

fn entity_index(num: i32) -> Result<usize, ClientError> {
    if num < 0 || num as usize >= MAX_EDICTS {
        return Err(ClientError::BadEntityNumber(num));
    }
    Ok(num as usize)
}

fn read_vec(reader: &mut MessageReader<'_>) -> Vec3 {
    let mut v = Vec3::ZERO;
    for axis in 0..3 {
        v[axis] = reader.read_coord();
    }
    v
}

/// Reads names until an empty string. Returns `None` when the list would
/// not fit in `max` slots.
fn read_precache_list(reader: &mut MessageReader<'_>, max: usize) -> Option<Vec<String>> {
    let mut names = vec![String::new()];
    loop {
        let name = reader.read_string();
        if name.is_empty() {
            return Some(names);
        }
        if names.len() == max {
            return None;
        }
        names.push(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::loader::ListLoader;
    use crate::config::{ClientConfig, NetConfig};
    use crate::msg::MessageBuffer;
    use crate::net::{LocalServerInfo, LoopbackDriver, ManualClock};
    use crate::server::encode::{
        write_entity_update, write_server_info, write_signon_num, write_time,
    };

    fn local_net() -> NetManager {
        let config = NetConfig {
            enable_datagram: false,
            ..Default::default()
        };
        let mut net = NetManager::with_drivers(
            config,
            vec![Box::new(LoopbackDriver::new())],
            Box::new(ManualClock::new(1.0)),
        );
        // Keepalives are skipped while a local server runs.
        net.set_local_server(Some(LocalServerInfo {
            hostname: "test".to_string(),
            map: "start".to_string(),
            max_users: 1,
        }));
        net
    }

    fn models() -> Vec<String> {
        vec!["maps/start.bsp".to_string(), "progs/player.mdl".to_string()]
    }

    fn parse(session: &mut ClientSession, data: &[u8]) -> Result<(), ClientError> {
        let mut net = local_net();
        let mut loader = ListLoader::new(models());
        session.parse_server_message(&mut net, data, &mut loader)
    }

    fn server_info(max_clients: u8) -> Vec<u8> {
        let mut buf = MessageBuffer::new(1024);
        let sounds = vec!["misc/null.wav".to_string()];
        write_server_info(&mut buf, max_clients, 1, "The Start", &models(), &sounds).unwrap();
        buf.as_slice().to_vec()
    }

    #[test]
    fn test_server_info_loads_precaches() {
        let mut session = ClientSession::new(ClientConfig::default());
        parse(&mut session, &server_info(4)).unwrap();

        let cl = session.state();
        assert_eq!(cl.max_clients, 4);
        assert_eq!(cl.level_name, "The Start");
        assert_eq!(cl.model_names[2], "progs/player.mdl");
        assert!(cl.models[1].is_some());
        assert_eq!(cl.sound_names.len(), 2);
        let events: Vec<_> = session.drain_events().collect();
        assert!(events.contains(&ClientEvent::LevelLoaded {
            level_name: "The Start".to_string()
        }));
    }

    #[test]
    fn test_bad_max_clients() {
        let mut session = ClientSession::new(ClientConfig::default());
        assert!(matches!(
            parse(&mut session, &server_info(33)),
            Err(ClientError::BadMaxClients(33))
        ));
    }

    #[test]
    fn test_missing_model_is_fatal() {
        let mut session = ClientSession::new(ClientConfig::default());
        let mut net = local_net();
        let mut loader = ListLoader::new(["maps/start.bsp"]);
        let result = session.parse_server_message(&mut net, &server_info(1), &mut loader);
        assert!(matches!(result, Err(ClientError::ModelNotFound(name)) if name == "progs/player.mdl"));
    }

    #[test]
    fn test_signon_out_of_order() {
        let mut session = ClientSession::new(ClientConfig::default());
        session.cls.signon = 3;
        let mut buf = MessageBuffer::new(16);
        write_signon_num(&mut buf, 2).unwrap();
        assert!(matches!(
            parse(&mut session, buf.as_slice()),
            Err(ClientError::SignonOutOfOrder {
                received: 2,
                current: 3
            })
        ));
    }

    #[test]
    fn test_signon_one_queues_prespawn() {
        let mut session = ClientSession::new(ClientConfig::default());
        let mut buf = MessageBuffer::new(16);
        write_signon_num(&mut buf, 1).unwrap();
        parse(&mut session, buf.as_slice()).unwrap();

        assert_eq!(session.signon(), 1);
        let msg = session.cls.message.as_slice();
        assert_eq!(msg[0], crate::protocol::ClientOp::StringCmd as u8);
        assert_eq!(&msg[1..], b"prespawn\0");
    }

    #[test]
    fn test_first_fast_update_completes_signon() {
        let mut session = ClientSession::new(ClientConfig::default());
        session.cls.signon = SIGNONS - 1;
        let mut buf = MessageBuffer::new(64);
        let state = EntityState {
            origin: Vec3::new(16.0, 0.0, 0.0),
            ..Default::default()
        };
        write_entity_update(&mut buf, 3, &state, &EntityState::default(), false).unwrap();
        parse(&mut session, buf.as_slice()).unwrap();

        assert_eq!(session.signon(), SIGNONS);
        assert_eq!(session.state().entities[3].msg_origins[0].x, 16.0);
        let events: Vec<_> = session.drain_events().collect();
        assert_eq!(events, vec![ClientEvent::SignonComplete]);
    }

    fn timed_update(time: f64, x: f32) -> Vec<u8> {
        let mut buf = MessageBuffer::new(64);
        write_time(&mut buf, time).unwrap();
        let state = EntityState {
            origin: Vec3::new(x, 0.0, 0.0),
            ..Default::default()
        };
        write_entity_update(&mut buf, 1, &state, &EntityState::default(), false).unwrap();
        buf.as_slice().to_vec()
    }

    #[test]
    fn test_truncated_update_leaves_entities_untouched() {
        let mut session = ClientSession::new(ClientConfig::default());
        parse(&mut session, &timed_update(1.0, 10.0)).unwrap();
        assert_eq!(session.state().entities[1].msg_origins[0].x, 10.0);
        assert_eq!(session.state().mtime, [1.0, 0.0]);

        let mut data = timed_update(1.5, 20.0);
        data.pop();
        assert!(matches!(
            parse(&mut session, &data),
            Err(ClientError::BadServerMessage)
        ));
        let cl = session.state();
        assert_eq!(cl.entities[1].msg_origins[0], Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(cl.mtime, [1.0, 0.0]);
    }

    #[test]
    fn test_truncated_first_update_keeps_signon() {
        let mut session = ClientSession::new(ClientConfig::default());
        session.cls.signon = SIGNONS - 1;
        let mut data = timed_update(1.0, 16.0);
        data.pop();
        assert!(parse(&mut session, &data).is_err());

        assert_eq!(session.signon(), SIGNONS - 1);
        assert_eq!(session.drain_events().count(), 0);
    }

    #[test]
    fn test_truncated_message() {
        let mut session = ClientSession::new(ClientConfig::default());
        let data = [ServerOp::UpdateStat as u8, 0, 1, 2];
        assert!(matches!(
            parse(&mut session, &data),
            Err(ClientError::BadServerMessage)
        ));
    }

    #[test]
    fn test_unknown_opcode() {
        let mut session = ClientSession::new(ClientConfig::default());
        assert!(matches!(
            parse(&mut session, &[60]),
            Err(ClientError::IllegibleMessage(60))
        ));
        assert!(matches!(
            parse(&mut session, &[ServerOp::Bad as u8]),
            Err(ClientError::IllegibleMessage(0))
        ));
    }

    #[test]
    fn test_particle_count_255_means_explosion() {
        let mut session = ClientSession::new(ClientConfig::default());
        let mut buf = MessageBuffer::new(32);
        buf.write_byte(ServerOp::Particle as u8).unwrap();
        for _ in 0..3 {
            buf.write_coord(0.0).unwrap();
        }
        for _ in 0..3 {
            buf.write_char(0).unwrap();
        }
        buf.write_byte(255).unwrap();
        buf.write_byte(73).unwrap();
        parse(&mut session, buf.as_slice()).unwrap();

        let events: Vec<_> = session.drain_events().collect();
        assert!(matches!(
            events.as_slice(),
            [ClientEvent::Particles {
                count: 1024,
                color: 73,
                ..
            }]
        ));
    }

    #[test]
    fn test_print_is_left_to_the_host() {
        let mut session = ClientSession::new(ClientConfig::default());
        let mut buf = MessageBuffer::new(32);
        buf.write_byte(ServerOp::Print as u8).unwrap();
        buf.write_string("hello\n").unwrap();
        parse(&mut session, buf.as_slice()).unwrap();

        let events: Vec<_> = session.drain_events().collect();
        assert_eq!(events, vec![ClientEvent::Print("hello\n".to_string())]);
    }

    #[test]
    fn test_shownet_keeps_decoded_messages() {
        let config = ClientConfig {
            shownet: true,
            ..Default::default()
        };
        let mut session = ClientSession::new(config);
        session.cl.view_angles = Vec3::new(0.0, 90.0, 0.0);
        parse(&mut session, &timed_update(1.0, 8.0)).unwrap();

        let mut data = timed_update(1.5, 8.0);
        data.pop();
        assert!(parse(&mut session, &data).is_err());

        let history: Vec<_> = session.shownet_history().iter().collect();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].view_angles, Vec3::new(0.0, 90.0, 0.0));
        assert_eq!(history[0].opcodes[0], ServerOp::Time as u8);
        assert!(history[0].opcodes[1] & ServerOp::FAST_UPDATE != 0);
    }

    #[test]
    fn test_server_disconnect() {
        let mut session = ClientSession::new(ClientConfig::default());
        assert!(matches!(
            parse(&mut session, &[ServerOp::Disconnect as u8]),
            Err(ClientError::ServerDisconnected)
        ));
    }
}
