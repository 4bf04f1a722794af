use glam::Vec3;

use super::error::ClientError;
use super::loader::ModelInfo;
use crate::msg::MessageReader;
use crate::protocol::{Effects, UpdateBits};

/// Transmitted fields of one entity. As a baseline it supplies the value
/// of every field a fast update omits.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EntityState {
    pub model_index: u8,
    pub frame: u8,
    pub colormap: u8,
    pub skin: u8,
    pub effects: Effects,
    pub origin: Vec3,
    pub angles: Vec3,
}

impl EntityState {
    /// Origin and angle components are interleaved per axis on the wire.
    pub fn read(reader: &mut MessageReader<'_>) -> Self {
        let model_index = reader.read_byte() as u8;
        let frame = reader.read_byte() as u8;
        let colormap = reader.read_byte() as u8;
        let skin = reader.read_byte() as u8;
        let mut origin = Vec3::ZERO;
        let mut angles = Vec3::ZERO;
        for axis in 0..3 {
            origin[axis] = reader.read_coord();
            angles[axis] = reader.read_angle();
        }
        Self {
            model_index,
            frame,
            colormap,
            skin,
            effects: Effects::empty(),
            origin,
            angles,
        }
    }
}

/// One decoded fast update, before it is merged with the baseline.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityUpdate {
    pub bits: UpdateBits,
    pub number: i32,
    pub model: Option<u8>,
    pub frame: Option<u8>,
    pub colormap: Option<u8>,
    pub skin: Option<u8>,
    pub effects: Option<Effects>,
    pub origin: [Option<f32>; 3],
    pub angles: [Option<f32>; 3],
}

impl EntityUpdate {
    /// Reads the update that follows an opcode byte with the high bit set.
    /// `opcode` carries the low seven mask bits.
    pub fn read(opcode: u8, reader: &mut MessageReader<'_>) -> Self {
        let mut bits = UpdateBits::from_bits_retain(u16::from(opcode & 0x7f));
        if bits.contains(UpdateBits::MOREBITS) {
            let more = reader.read_byte() as u8;
            bits |= UpdateBits::from_bits_retain(u16::from(more) << 8);
        }

        let number = if bits.contains(UpdateBits::LONGENTITY) {
            reader.read_short()
        } else {
            reader.read_byte()
        };

        let mut byte_if = |flag: UpdateBits| bits.contains(flag).then(|| reader.read_byte() as u8);
        let model = byte_if(UpdateBits::MODEL);
        let frame = byte_if(UpdateBits::FRAME);
        let colormap = byte_if(UpdateBits::COLORMAP);
        let skin = byte_if(UpdateBits::SKIN);
        let effects = byte_if(UpdateBits::EFFECTS).map(Effects::from_bits_retain);

        let mut origin = [None; 3];
        let mut angles = [None; 3];
        for axis in 0..3 {
            if bits.contains(UpdateBits::ORIGINS[axis]) {
                origin[axis] = Some(reader.read_coord());
            }
            if bits.contains(UpdateBits::ANGLES[axis]) {
                angles[axis] = Some(reader.read_angle());
            }
        }

        Self {
            bits,
            number,
            model,
            frame,
            colormap,
            skin,
            effects,
            origin,
            angles,
        }
    }
}

/// Client view of one server entity. Index 0 of the `msg_` pairs is the
/// newest update, index 1 the one before it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntitySnapshot {
    pub baseline: EntityState,
    pub msg_origins: [Vec3; 2],
    pub msg_angles: [Vec3; 2],
    pub origin: Vec3,
    pub angles: Vec3,
    /// Precache index of the model, when it resolved to a loaded model.
    pub model: Option<usize>,
    pub frame: u8,
    pub colormap: u8,
    pub skin: u8,
    pub effects: Effects,
    pub msg_time: f64,
    pub force_link: bool,
}

impl EntitySnapshot {
    /// Static entities are placed once from their baseline.
    pub fn from_baseline(baseline: EntityState, models: &[Option<ModelInfo>]) -> Self {
        let index = usize::from(baseline.model_index);
        let model = models.get(index).and_then(Option::as_ref).map(|_| index);
        Self {
            baseline,
            msg_origins: [baseline.origin; 2],
            msg_angles: [baseline.angles; 2],
            origin: baseline.origin,
            angles: baseline.angles,
            model,
            frame: baseline.frame,
            colormap: baseline.colormap,
            skin: baseline.skin,
            effects: Effects::empty(),
            msg_time: 0.0,
            force_link: false,
        }
    }

    /// Merges `update` into the snapshot. Fields absent from the mask take
    /// their baseline value. `mtime` holds the two latest server times.
    pub fn apply(
        &mut self,
        update: &EntityUpdate,
        mtime: [f64; 2],
        models: &[Option<ModelInfo>],
        max_clients: usize,
    ) -> Result<(), ClientError> {
        // No update in the previous message: snap instead of lerping.
        let mut force_link = self.msg_time != mtime[1];
        self.msg_time = mtime[0];

        let base = self.baseline;
        let model_index = usize::from(update.model.unwrap_or(base.model_index));
        let model = models
            .get(model_index)
            .and_then(Option::as_ref)
            .map(|_| model_index);
        if model != self.model {
            self.model = model;
            if model.is_none() {
                force_link = true;
            }
        }

        self.frame = update.frame.unwrap_or(base.frame);
        let colormap = update.colormap.unwrap_or(base.colormap);
        if usize::from(colormap) > max_clients {
            return Err(ClientError::BadColormap(i32::from(colormap)));
        }
        self.colormap = colormap;
        self.skin = update.skin.unwrap_or(base.skin);
        self.effects = update.effects.unwrap_or(base.effects);

        self.msg_origins[1] = self.msg_origins[0];
        self.msg_angles[1] = self.msg_angles[0];
        for axis in 0..3 {
            self.msg_origins[0][axis] = update.origin[axis].unwrap_or(base.origin[axis]);
            self.msg_angles[0][axis] = update.angles[axis].unwrap_or(base.angles[axis]);
        }

        if update.bits.contains(UpdateBits::NOLERP) {
            self.force_link = true;
        }
        if force_link {
            self.msg_origins[1] = self.msg_origins[0];
            self.origin = self.msg_origins[0];
            self.msg_angles[1] = self.msg_angles[0];
            self.angles = self.msg_angles[0];
            self.force_link = true;
        }
        Ok(())
    }
}
