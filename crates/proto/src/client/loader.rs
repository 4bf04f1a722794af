use std::collections::HashSet;

/// What the client keeps about a precached model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModelInfo {
    /// The model spins in place (pickup items).
    pub rotate: bool,
}

/// Resolves precache names for the session. Rendering and audio live behind
/// this seam.
pub trait ResourceLoader {
    /// `None` means the model could not be found, which ends the session.
    fn load_model(&mut self, name: &str) -> Option<ModelInfo>;

    /// Missing sounds are tolerated.
    fn load_sound(&mut self, name: &str) -> bool;
}

/// Accepts every name. Rotating models are recognised by the usual item
/// prefixes.
#[derive(Debug, Default)]
pub struct NullLoader;

impl ResourceLoader for NullLoader {
    fn load_model(&mut self, name: &str) -> Option<ModelInfo> {
        Some(ModelInfo {
            rotate: name.starts_with("progs/g_") || name.starts_with("progs/w_"),
        })
    }

    fn load_sound(&mut self, _name: &str) -> bool {
        true
    }
}

/// Loader backed by a fixed set of known model names.
#[derive(Debug, Default)]
pub struct ListLoader {
    models: HashSet<String>,
}

impl ListLoader {
    pub fn new<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            models: models.into_iter().map(Into::into).collect(),
        }
    }
}

impl ResourceLoader for ListLoader {
    fn load_model(&mut self, name: &str) -> Option<ModelInfo> {
        if self.models.contains(name) || name.starts_with('*') {
            Some(ModelInfo::default())
        } else {
            None
        }
    }

    fn load_sound(&mut self, _name: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_loader_misses() {
        let mut loader = ListLoader::new(["maps/e1m1.bsp"]);
        assert!(loader.load_model("maps/e1m1.bsp").is_some());
        assert!(loader.load_model("*1").is_some());
        assert!(loader.load_model("progs/missing.mdl").is_none());
    }

    #[test]
    fn test_null_loader_rotation() {
        let mut loader = NullLoader;
        assert!(loader.load_model("progs/g_shot.mdl").unwrap().rotate);
        assert!(!loader.load_model("progs/player.mdl").unwrap().rotate);
    }
}
