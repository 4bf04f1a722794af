use glam::Vec3;

use crate::client::EntityState;
use crate::config::ServerConfig;

const PLAYER_MODEL: &str = "progs/player.mdl";
const ORBIT_RADIUS: f32 = 128.0;
const ORBIT_SPEED: f32 = 0.5;

/// Circular path for scripted entities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orbit {
    pub center: Vec3,
    pub radius: f32,
    /// Radians per second.
    pub speed: f32,
    pub phase: f32,
}

impl Orbit {
    pub fn position(&self, time: f64) -> (Vec3, f32) {
        let theta = self.phase + self.speed * time as f32;
        let origin = self.center + self.radius * Vec3::new(theta.cos(), theta.sin(), 0.0);
        let yaw = (theta.to_degrees() + 90.0).rem_euclid(360.0);
        (origin, yaw)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServerEntity {
    pub state: EntityState,
    pub baseline: EntityState,
    pub orbit: Option<Orbit>,
}

/// The entities a local server broadcasts. Slot 0 is the world, slots
/// `1..=max_clients` belong to players, scripted entities follow.
#[derive(Debug, Clone, PartialEq)]
pub struct World {
    pub entities: Vec<ServerEntity>,
    pub statics: Vec<EntityState>,
    pub light_styles: Vec<(u8, String)>,
    player_model: u8,
}

impl World {
    pub fn new(config: &ServerConfig, max_clients: usize) -> Self {
        // Precache index 0 is reserved, so names start at 1.
        let model_index = |name: &str| {
            config
                .models
                .iter()
                .position(|m| m == name)
                .map_or(0, |i| (i + 1) as u8)
        };
        let player_model = model_index(PLAYER_MODEL);

        let mut entities = vec![ServerEntity {
            baseline: EntityState {
                model_index: 1,
                ..Default::default()
            },
            state: EntityState {
                model_index: 1,
                ..Default::default()
            },
            orbit: None,
        }];

        for slot in 0..max_clients {
            let state = EntityState {
                colormap: (slot + 1) as u8,
                ..Default::default()
            };
            entities.push(ServerEntity {
                state,
                baseline: state,
                orbit: None,
            });
        }

        let scripted: Vec<u8> = (2..config.models.len())
            .map(|i| (i + 1) as u8)
            .filter(|&index| index != player_model)
            .collect();
        let count = scripted.len().max(1) as f32;
        for (i, &model) in scripted.iter().enumerate() {
            let orbit = Orbit {
                center: Vec3::new(0.0, 0.0, 24.0),
                radius: ORBIT_RADIUS,
                speed: ORBIT_SPEED,
                phase: i as f32 * std::f32::consts::TAU / count,
            };
            let (origin, yaw) = orbit.position(0.0);
            let state = EntityState {
                model_index: model,
                origin,
                angles: Vec3::new(0.0, yaw, 0.0),
                ..Default::default()
            };
            entities.push(ServerEntity {
                state,
                baseline: state,
                orbit: Some(orbit),
            });
        }

        let statics = if player_model == 0 {
            Vec::new()
        } else {
            vec![EntityState {
                model_index: player_model,
                origin: Vec3::new(256.0, 0.0, 24.0),
                angles: Vec3::new(0.0, 180.0, 0.0),
                ..Default::default()
            }]
        };

        Self {
            entities,
            statics,
            light_styles: vec![(0, "m".to_string()), (1, "mmnmmommommnonmmonqnmmo".to_string())],
            player_model,
        }
    }

    pub fn player_model(&self) -> u8 {
        self.player_model
    }

    pub fn player_entity(slot: usize) -> usize {
        slot + 1
    }

    /// Moves scripted entities to where they are at `time`.
    pub fn advance(&mut self, time: f64) {
        for ent in &mut self.entities {
            if let Some(orbit) = ent.orbit {
                let (origin, yaw) = orbit.position(time);
                ent.state.origin = origin;
                ent.state.angles.y = yaw;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let world = World::new(&ServerConfig::default(), 4);
        assert_eq!(world.player_model(), 2);
        // World, four players and the armor.
        assert_eq!(world.entities.len(), 6);
        assert_eq!(world.entities[5].state.model_index, 3);
        assert_eq!(world.entities[3].baseline.colormap, 3);
        assert_eq!(world.statics.len(), 1);
    }

    #[test]
    fn test_orbit_moves() {
        let mut world = World::new(&ServerConfig::default(), 1);
        let start = world.entities[2].state.origin;
        world.advance(1.0);
        let moved = world.entities[2].state.origin;
        assert!(start.distance(moved) > 1.0);
        assert!((moved.truncate().length() - ORBIT_RADIUS).abs() < 1e-3);
    }
}
