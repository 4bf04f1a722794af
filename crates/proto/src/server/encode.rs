//! Writers for the server half of the protocol. Each one is the exact
//! inverse of the matching client decoder.

use glam::Vec3;

use crate::client::EntityState;
use crate::msg::{MessageBuffer, MsgError};
use crate::protocol::{
    ClientDataBits, DEFAULT_VIEWHEIGHT, PROTOCOL_VERSION, STAT_AMMO, STAT_ARMOR, STAT_CELLS,
    STAT_HEALTH, STAT_NAILS, STAT_ROCKETS, STAT_SHELLS, STAT_WEAPONFRAME, ServerOp, SoundBits,
    UpdateBits,
};

/// Origins closer than this to the baseline are not sent.
const ORIGIN_EPSILON: f32 = 0.1;

pub fn write_op(buf: &mut MessageBuffer, op: ServerOp) -> Result<(), MsgError> {
    buf.write_byte(op as u8)
}

pub fn write_vec(buf: &mut MessageBuffer, v: Vec3) -> Result<(), MsgError> {
    for axis in 0..3 {
        buf.write_coord(v[axis])?;
    }
    Ok(())
}

/// `svc_serverinfo`. Both precache lists start at index 1.
pub fn write_server_info(
    buf: &mut MessageBuffer,
    max_clients: u8,
    game_type: u8,
    level_name: &str,
    models: &[String],
    sounds: &[String],
) -> Result<(), MsgError> {
    write_op(buf, ServerOp::ServerInfo)?;
    buf.write_long(PROTOCOL_VERSION)?;
    buf.write_byte(max_clients)?;
    buf.write_byte(game_type)?;
    buf.write_string(level_name)?;
    for name in models {
        buf.write_string(name)?;
    }
    buf.write_byte(0)?;
    for name in sounds {
        buf.write_string(name)?;
    }
    buf.write_byte(0)
}

fn write_state_fields(buf: &mut MessageBuffer, state: &EntityState) -> Result<(), MsgError> {
    buf.write_byte(state.model_index)?;
    buf.write_byte(state.frame)?;
    buf.write_byte(state.colormap)?;
    buf.write_byte(state.skin)?;
    for axis in 0..3 {
        buf.write_coord(state.origin[axis])?;
        buf.write_angle(state.angles[axis])?;
    }
    Ok(())
}

pub fn write_baseline(buf: &mut MessageBuffer, num: u16, state: &EntityState) -> Result<(), MsgError> {
    write_op(buf, ServerOp::SpawnBaseline)?;
    buf.write_short(num as i16)?;
    write_state_fields(buf, state)
}

pub fn write_static(buf: &mut MessageBuffer, state: &EntityState) -> Result<(), MsgError> {
    write_op(buf, ServerOp::SpawnStatic)?;
    write_state_fields(buf, state)
}

/// Which fields of `state` differ from `baseline`.
pub fn update_bits(num: u16, state: &EntityState, baseline: &EntityState, nolerp: bool) -> UpdateBits {
    let mut bits = UpdateBits::empty();
    for axis in 0..3 {
        if (state.origin[axis] - baseline.origin[axis]).abs() > ORIGIN_EPSILON {
            bits |= UpdateBits::ORIGINS[axis];
        }
        if state.angles[axis] != baseline.angles[axis] {
            bits |= UpdateBits::ANGLES[axis];
        }
    }
    if nolerp {
        bits |= UpdateBits::NOLERP;
    }
    if state.colormap != baseline.colormap {
        bits |= UpdateBits::COLORMAP;
    }
    if state.skin != baseline.skin {
        bits |= UpdateBits::SKIN;
    }
    if state.frame != baseline.frame {
        bits |= UpdateBits::FRAME;
    }
    if state.effects != baseline.effects {
        bits |= UpdateBits::EFFECTS;
    }
    if state.model_index != baseline.model_index {
        bits |= UpdateBits::MODEL;
    }
    if num >= 256 {
        bits |= UpdateBits::LONGENTITY;
    }
    if bits.needs_more_bits() {
        bits |= UpdateBits::MOREBITS;
    }
    bits
}

/// Fast update carrying only the fields that differ from the baseline.
pub fn write_entity_update(
    buf: &mut MessageBuffer,
    num: u16,
    state: &EntityState,
    baseline: &EntityState,
    nolerp: bool,
) -> Result<(), MsgError> {
    let bits = update_bits(num, state, baseline, nolerp);
    buf.write_byte((bits | UpdateBits::SIGNAL).bits() as u8)?;
    if bits.contains(UpdateBits::MOREBITS) {
        buf.write_byte((bits.bits() >> 8) as u8)?;
    }
    if bits.contains(UpdateBits::LONGENTITY) {
        buf.write_short(num as i16)?;
    } else {
        buf.write_byte(num as u8)?;
    }

    if bits.contains(UpdateBits::MODEL) {
        buf.write_byte(state.model_index)?;
    }
    if bits.contains(UpdateBits::FRAME) {
        buf.write_byte(state.frame)?;
    }
    if bits.contains(UpdateBits::COLORMAP) {
        buf.write_byte(state.colormap)?;
    }
    if bits.contains(UpdateBits::SKIN) {
        buf.write_byte(state.skin)?;
    }
    if bits.contains(UpdateBits::EFFECTS) {
        buf.write_byte(state.effects.bits())?;
    }
    for axis in 0..3 {
        if bits.contains(UpdateBits::ORIGINS[axis]) {
            buf.write_coord(state.origin[axis])?;
        }
        if bits.contains(UpdateBits::ANGLES[axis]) {
            buf.write_angle(state.angles[axis])?;
        }
    }
    Ok(())
}

/// The player's own status, sent every frame as `svc_clientdata`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStatus {
    pub view_height: f32,
    pub ideal_pitch: f32,
    pub punch_angle: Vec3,
    pub velocity: Vec3,
    pub items: i32,
    pub on_ground: bool,
    pub in_water: bool,
    pub weapon_model: u8,
    pub active_weapon: u8,
    /// Indexed like the client stat table.
    pub stats: [i32; 10],
}

impl Default for PlayerStatus {
    fn default() -> Self {
        let mut stats = [0; 10];
        stats[STAT_HEALTH] = 100;
        Self {
            view_height: DEFAULT_VIEWHEIGHT as f32,
            ideal_pitch: 0.0,
            punch_angle: Vec3::ZERO,
            velocity: Vec3::ZERO,
            items: 0,
            on_ground: true,
            in_water: false,
            weapon_model: 0,
            active_weapon: 0,
            stats,
        }
    }
}

pub fn write_client_data(buf: &mut MessageBuffer, status: &PlayerStatus) -> Result<(), MsgError> {
    let mut bits = ClientDataBits::ITEMS | ClientDataBits::WEAPON;
    if status.view_height != DEFAULT_VIEWHEIGHT as f32 {
        bits |= ClientDataBits::VIEWHEIGHT;
    }
    if status.ideal_pitch != 0.0 {
        bits |= ClientDataBits::IDEALPITCH;
    }
    if status.on_ground {
        bits |= ClientDataBits::ONGROUND;
    }
    if status.in_water {
        bits |= ClientDataBits::INWATER;
    }
    for axis in 0..3 {
        if status.punch_angle[axis] != 0.0 {
            bits |= ClientDataBits::PUNCHES[axis];
        }
        if status.velocity[axis] != 0.0 {
            bits |= ClientDataBits::VELOCITIES[axis];
        }
    }
    if status.stats[STAT_WEAPONFRAME] != 0 {
        bits |= ClientDataBits::WEAPONFRAME;
    }
    if status.stats[STAT_ARMOR] != 0 {
        bits |= ClientDataBits::ARMOR;
    }

    write_op(buf, ServerOp::ClientData)?;
    buf.write_short(bits.bits() as i16)?;
    if bits.contains(ClientDataBits::VIEWHEIGHT) {
        buf.write_char(status.view_height as i8)?;
    }
    if bits.contains(ClientDataBits::IDEALPITCH) {
        buf.write_char(status.ideal_pitch as i8)?;
    }
    for axis in 0..3 {
        if bits.contains(ClientDataBits::PUNCHES[axis]) {
            buf.write_char(status.punch_angle[axis] as i8)?;
        }
        if bits.contains(ClientDataBits::VELOCITIES[axis]) {
            buf.write_char((status.velocity[axis] / 16.0) as i8)?;
        }
    }
    buf.write_long(status.items)?;
    if bits.contains(ClientDataBits::WEAPONFRAME) {
        buf.write_byte(status.stats[STAT_WEAPONFRAME] as u8)?;
    }
    if bits.contains(ClientDataBits::ARMOR) {
        buf.write_byte(status.stats[STAT_ARMOR] as u8)?;
    }
    buf.write_byte(status.weapon_model)?;
    buf.write_short(status.stats[STAT_HEALTH] as i16)?;
    buf.write_byte(status.stats[STAT_AMMO] as u8)?;
    for stat in [STAT_SHELLS, STAT_NAILS, STAT_ROCKETS, STAT_CELLS] {
        buf.write_byte(status.stats[stat] as u8)?;
    }
    buf.write_byte(status.active_weapon)
}

pub fn write_time(buf: &mut MessageBuffer, time: f64) -> Result<(), MsgError> {
    write_op(buf, ServerOp::Time)?;
    buf.write_float(time as f32)
}

pub fn write_signon_num(buf: &mut MessageBuffer, stage: u8) -> Result<(), MsgError> {
    write_op(buf, ServerOp::SignonNum)?;
    buf.write_byte(stage)
}

pub fn write_print(buf: &mut MessageBuffer, text: &str) -> Result<(), MsgError> {
    write_op(buf, ServerOp::Print)?;
    buf.write_string(text)
}

pub fn write_set_view(buf: &mut MessageBuffer, entity: u16) -> Result<(), MsgError> {
    write_op(buf, ServerOp::SetView)?;
    buf.write_short(entity as i16)
}

pub fn write_set_angle(buf: &mut MessageBuffer, angles: Vec3) -> Result<(), MsgError> {
    write_op(buf, ServerOp::SetAngle)?;
    for axis in 0..3 {
        buf.write_angle(angles[axis])?;
    }
    Ok(())
}

pub fn write_light_style(buf: &mut MessageBuffer, index: u8, map: &str) -> Result<(), MsgError> {
    write_op(buf, ServerOp::LightStyle)?;
    buf.write_byte(index)?;
    buf.write_string(map)
}

pub fn write_update_name(buf: &mut MessageBuffer, slot: u8, name: &str) -> Result<(), MsgError> {
    write_op(buf, ServerOp::UpdateName)?;
    buf.write_byte(slot)?;
    buf.write_string(name)
}

pub fn write_update_frags(buf: &mut MessageBuffer, slot: u8, frags: i16) -> Result<(), MsgError> {
    write_op(buf, ServerOp::UpdateFrags)?;
    buf.write_byte(slot)?;
    buf.write_short(frags)
}

pub fn write_update_colors(buf: &mut MessageBuffer, slot: u8, colors: u8) -> Result<(), MsgError> {
    write_op(buf, ServerOp::UpdateColors)?;
    buf.write_byte(slot)?;
    buf.write_byte(colors)
}

pub fn write_cd_track(buf: &mut MessageBuffer, track: u8, looped: u8) -> Result<(), MsgError> {
    write_op(buf, ServerOp::CdTrack)?;
    buf.write_byte(track)?;
    buf.write_byte(looped)
}

/// `svc_sound`; volume and attenuation are only sent when not default.
pub fn write_sound(
    buf: &mut MessageBuffer,
    entity: u16,
    channel: u8,
    sound: u8,
    volume: u8,
    attenuation: f32,
    origin: Vec3,
) -> Result<(), MsgError> {
    let mut mask = SoundBits::empty();
    if volume != 255 {
        mask |= SoundBits::VOLUME;
    }
    if attenuation != 1.0 {
        mask |= SoundBits::ATTENUATION;
    }
    write_op(buf, ServerOp::Sound)?;
    buf.write_byte(mask.bits())?;
    if mask.contains(SoundBits::VOLUME) {
        buf.write_byte(volume)?;
    }
    if mask.contains(SoundBits::ATTENUATION) {
        buf.write_byte((attenuation * 64.0) as u8)?;
    }
    buf.write_short(((entity << 3) | u16::from(channel & 7)) as i16)?;
    buf.write_byte(sound)?;
    write_vec(buf, origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::MessageReader;

    #[test]
    fn test_unchanged_entity_sends_header_only() {
        let base = EntityState {
            model_index: 3,
            origin: Vec3::new(10.0, 20.0, 30.0),
            ..Default::default()
        };
        let mut buf = MessageBuffer::new(16);
        write_entity_update(&mut buf, 5, &base, &base, false).unwrap();
        assert_eq!(buf.as_slice(), &[UpdateBits::SIGNAL.bits() as u8, 5]);
    }

    #[test]
    fn test_small_origin_drift_not_sent() {
        let base = EntityState::default();
        let state = EntityState {
            origin: Vec3::new(0.05, 0.0, 0.0),
            ..base
        };
        assert!(update_bits(1, &state, &base, false).is_empty());
    }

    #[test]
    fn test_high_bits_add_continuation_byte() {
        let base = EntityState::default();
        let state = EntityState {
            model_index: 7,
            ..base
        };
        let bits = update_bits(1, &state, &base, false);
        assert!(bits.contains(UpdateBits::MODEL | UpdateBits::MOREBITS));

        let mut buf = MessageBuffer::new(16);
        write_entity_update(&mut buf, 1, &state, &base, false).unwrap();
        assert_eq!(buf.as_slice(), &[0x81, (UpdateBits::MODEL.bits() >> 8) as u8, 1, 7]);
    }

    #[test]
    fn test_server_info_layout() {
        let mut buf = MessageBuffer::new(128);
        let models = vec!["maps/start.bsp".to_string()];
        write_server_info(&mut buf, 4, 0, "Start", &models, &[]).unwrap();

        let mut reader = MessageReader::new(buf.as_slice());
        assert_eq!(reader.read_byte(), ServerOp::ServerInfo as i32);
        assert_eq!(reader.read_long(), PROTOCOL_VERSION);
        assert_eq!(reader.read_byte(), 4);
        assert_eq!(reader.read_byte(), 0);
        assert_eq!(reader.read_string(), "Start");
        assert_eq!(reader.read_string(), "maps/start.bsp");
        assert_eq!(reader.read_string(), "");
        assert_eq!(reader.read_string(), "");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_client_data_minimal() {
        let mut buf = MessageBuffer::new(64);
        write_client_data(&mut buf, &PlayerStatus::default()).unwrap();
        let mut reader = MessageReader::new(buf.as_slice());
        assert_eq!(reader.read_byte(), ServerOp::ClientData as i32);
        let bits = ClientDataBits::from_bits_retain(reader.read_short() as u16);
        assert_eq!(
            bits,
            ClientDataBits::ITEMS | ClientDataBits::WEAPON | ClientDataBits::ONGROUND
        );
        assert_eq!(reader.read_long(), 0);
        assert_eq!(reader.read_byte(), 0);
        assert_eq!(reader.read_short(), 100);
    }

    #[test]
    fn test_sound_defaults_omitted() {
        let mut buf = MessageBuffer::new(32);
        write_sound(&mut buf, 3, 1, 9, 255, 1.0, Vec3::ZERO).unwrap();
        let mut reader = MessageReader::new(buf.as_slice());
        assert_eq!(reader.read_byte(), ServerOp::Sound as i32);
        assert_eq!(reader.read_byte(), 0);
        assert_eq!(reader.read_short(), (3 << 3) | 1);
        assert_eq!(reader.read_byte(), 9);
    }
}
