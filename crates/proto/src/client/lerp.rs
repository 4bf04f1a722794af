use glam::Vec3;

use super::state::ClientState;
use crate::protocol::MAX_VISEDICTS;

/// Longest interval interpolated between two server messages.
const MAX_LERP_INTERVAL: f64 = 0.1;
/// Moves longer than this on any axis are teleports, not motion.
const TELEPORT_DISTANCE: f32 = 100.0;

/// Interpolates `from` toward `to` along the shorter way around the circle.
fn lerp_angles(from: Vec3, to: Vec3, frac: f32) -> Vec3 {
    let mut out = Vec3::ZERO;
    for axis in 0..3 {
        let mut delta = to[axis] - from[axis];
        if delta > 180.0 {
            delta -= 360.0;
        } else if delta < -180.0 {
            delta += 360.0;
        }
        out[axis] = from[axis] + frac * delta;
    }
    out
}

impl ClientState {
    /// Returns the blend fraction for this frame between the previous and
    /// the latest server message, pulling `time` back in range when it
    /// drifted.
    pub fn lerp_point(&mut self, nolerp: bool) -> f32 {
        if nolerp {
            self.time = self.mtime[0];
            return 1.0;
        }

        let mut interval = self.mtime[0] - self.mtime[1];
        if interval <= 0.0 || interval > MAX_LERP_INTERVAL {
            self.mtime[1] = self.mtime[0] - MAX_LERP_INTERVAL;
            interval = MAX_LERP_INTERVAL;
        }

        let frac = (self.time - self.mtime[1]) / interval;
        if frac < 0.0 {
            if frac < -0.01 {
                self.time = self.mtime[1];
            }
            0.0
        } else if frac > 1.0 {
            if frac > 1.01 {
                self.time = self.mtime[0];
            }
            1.0
        } else {
            frac as f32
        }
    }

    /// Places every entity for this frame and rebuilds the visible list.
    pub fn relink_entities(&mut self, nolerp: bool, demo_playback: bool) {
        let frac = self.lerp_point(nolerp);
        self.visible_entities.clear();

        self.velocity = self.mvelocity[1].lerp(self.mvelocity[0], frac);
        if demo_playback {
            self.view_angles = lerp_angles(self.mview_angles[1], self.mview_angles[0], frac);
        }

        let spin = (100.0 * self.time).rem_euclid(360.0) as f32;
        self.beams.retain(|beam| beam.end_time >= self.time);

        for (num, ent) in self.entities.iter_mut().enumerate().skip(1) {
            let Some(model) = ent.model else {
                continue;
            };
            // Missing from the latest message: the entity is gone.
            if ent.msg_time != self.mtime[0] {
                ent.model = None;
                continue;
            }

            if ent.force_link {
                ent.origin = ent.msg_origins[0];
                ent.angles = ent.msg_angles[0];
            } else {
                let delta = ent.msg_origins[0] - ent.msg_origins[1];
                let f = if delta.abs().max_element() > TELEPORT_DISTANCE {
                    1.0
                } else {
                    frac
                };
                ent.origin = ent.msg_origins[1] + f * delta;
                ent.angles = lerp_angles(ent.msg_angles[1], ent.msg_angles[0], f);
            }

            if self.models.get(model).copied().flatten().is_some_and(|m| m.rotate) {
                ent.angles.y = spin;
            }
            ent.force_link = false;

            if num as i32 == self.view_entity {
                continue;
            }
            if self.visible_entities.len() < MAX_VISEDICTS {
                self.visible_entities.push(num);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::EntitySnapshot;
    use crate::client::loader::ModelInfo;

    fn state_with_entity(origins: [Vec3; 2]) -> ClientState {
        let mut cl = ClientState::new();
        cl.models = vec![None, Some(ModelInfo::default())];
        cl.mtime = [1.1, 1.0];
        cl.view_entity = 1;
        *cl.entity_mut(2) = EntitySnapshot {
            model: Some(1),
            msg_origins: [origins[0], origins[1]],
            msg_time: 1.1,
            ..Default::default()
        };
        cl
    }

    #[test]
    fn test_interval_clamped() {
        let mut cl = ClientState::new();
        cl.mtime = [5.0, 4.0];
        cl.time = 4.95;
        let frac = cl.lerp_point(false);
        assert!((cl.mtime[1] - 4.9).abs() < 1e-9);
        assert!((frac - 0.5).abs() < 1e-4);

        cl.mtime = [5.0, 5.0];
        cl.time = 5.0;
        assert_eq!(cl.lerp_point(false), 1.0);
        assert!((cl.mtime[1] - 4.9).abs() < 1e-9);
    }

    #[test]
    fn test_fraction_clamped_and_time_snapped() {
        let mut cl = ClientState::new();
        cl.mtime = [2.0, 1.95];
        cl.time = 1.5;
        assert_eq!(cl.lerp_point(false), 0.0);
        assert_eq!(cl.time, 1.95);

        cl.mtime = [2.0, 1.95];
        cl.time = 3.0;
        assert_eq!(cl.lerp_point(false), 1.0);
        assert_eq!(cl.time, 2.0);

        // Within the slack the clock is left alone.
        cl.mtime = [2.0, 1.95];
        cl.time = 2.0002;
        assert_eq!(cl.lerp_point(false), 1.0);
        assert_eq!(cl.time, 2.0002);
    }

    #[test]
    fn test_nolerp_snaps() {
        let mut cl = ClientState::new();
        cl.mtime = [2.0, 1.95];
        cl.time = 1.96;
        assert_eq!(cl.lerp_point(true), 1.0);
        assert_eq!(cl.time, 2.0);
    }

    #[test]
    fn test_origin_interpolated() {
        let mut cl = state_with_entity([Vec3::new(10.0, 0.0, 0.0), Vec3::ZERO]);
        cl.time = 1.05;
        cl.relink_entities(false, false);
        let ent = cl.entity(2).unwrap();
        assert!((ent.origin.x - 5.0).abs() < 1e-3);
        assert_eq!(cl.visible_entities, vec![2]);
    }

    #[test]
    fn test_teleport_snaps() {
        let mut cl = state_with_entity([Vec3::new(500.0, 0.0, 0.0), Vec3::ZERO]);
        cl.time = 1.05;
        cl.relink_entities(false, false);
        assert_eq!(cl.entity(2).unwrap().origin.x, 500.0);
    }

    #[test]
    fn test_stale_entity_loses_model() {
        let mut cl = state_with_entity([Vec3::ZERO, Vec3::ZERO]);
        cl.entity_mut(2).msg_time = 0.5;
        cl.time = 1.05;
        cl.relink_entities(false, false);
        assert!(cl.entity(2).unwrap().model.is_none());
        assert!(cl.visible_entities.is_empty());
    }

    #[test]
    fn test_view_entity_not_visible() {
        let mut cl = state_with_entity([Vec3::ZERO, Vec3::ZERO]);
        cl.view_entity = 2;
        cl.time = 1.05;
        cl.relink_entities(false, false);
        assert!(cl.visible_entities.is_empty());
    }

    #[test]
    fn test_angles_take_shortest_path() {
        let out = lerp_angles(Vec3::new(0.0, 170.0, 0.0), Vec3::new(0.0, -170.0, 0.0), 0.5);
        assert!((out.y - 180.0).abs() < 1e-3);

        let mut cl = ClientState::new();
        cl.mtime = [1.1, 1.0];
        cl.time = 1.05;
        cl.mview_angles = [Vec3::new(0.0, 10.0, 0.0), Vec3::new(0.0, 350.0, 0.0)];
        cl.relink_entities(false, true);
        assert!((cl.view_angles.y - 360.0).abs() < 1e-3);
    }
}
