//! Host application scenes
//!
//! Procedures carry a scene mask describing which host modes they may run in;
//! a request arriving outside the mask is rejected before the member is
//! invoked. The host reports scene changes through
//! [`CallContext::set_scene`](crate::context::CallContext::set_scene).

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use itertools::Itertools;
use serde::Serialize;
use strum::IntoEnumIterator;

/// A single host application mode.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::EnumIter, strum::Display, Default,
)]
pub enum GameScene {
    /// Host is starting up; most state is not available yet.
    Boot,
    /// Normal simulation, advancing every tick.
    #[default]
    Running,
    /// Simulation halted by the user.
    Paused,
    /// Halted in the debugger.
    Debug,
}

impl GameScene {
    pub const fn mask(self) -> SceneMask {
        SceneMask(1 << self as u32)
    }
}

/// Bitset of [`GameScene`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SceneMask(u32);

impl SceneMask {
    pub const BOOT: Self = GameScene::Boot.mask();
    pub const RUNNING: Self = GameScene::Running.mask();
    pub const PAUSED: Self = GameScene::Paused.mask();
    pub const DEBUG: Self = GameScene::Debug.mask();
    /// Every scene, the default for services that do not restrict themselves.
    pub const ALL: Self = Self(u32::MAX);

    pub const fn contains(self, scene: GameScene) -> bool {
        self.0 & (1 << scene as u32) != 0
    }
}

impl BitOr for SceneMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SceneMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for SceneMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::ALL {
            return write!(f, "All");
        }
        let scenes = GameScene::iter()
            .filter(|s| self.contains(*s))
            .map(|s| s.to_string())
            .join(" | ");
        if scenes.is_empty() {
            write!(f, "None")
        } else {
            write!(f, "{}", scenes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_scene_masks() {
        assert!(SceneMask::RUNNING.contains(GameScene::Running));
        assert!(!SceneMask::RUNNING.contains(GameScene::Debug));
    }

    #[test]
    fn combined_masks() {
        let mask = SceneMask::RUNNING | SceneMask::PAUSED;
        assert!(mask.contains(GameScene::Running));
        assert!(mask.contains(GameScene::Paused));
        assert!(!mask.contains(GameScene::Boot));
    }

    #[test]
    fn all_contains_everything() {
        for scene in GameScene::iter() {
            assert!(SceneMask::ALL.contains(scene));
        }
    }

    #[test]
    fn display() {
        assert_eq!(SceneMask::ALL.to_string(), "All");
        assert_eq!(
            (SceneMask::RUNNING | SceneMask::DEBUG).to_string(),
            "Running | Debug"
        );
    }
}
