use serde::{Deserialize, Serialize};

/// Closed registry of block kinds.
///
/// Block semantics live in the static property table below, validated once
/// at startup by [`validate_registry`] rather than at every lookup.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum BlockKind {
    #[default]
    Air,
    Grass,
    Dirt,
    Stone,
    Sand,
    Water,
    Wood,
    Leaves,
    Bedrock,
    Snow,
    Gravel,
    Ice,
    Glass,
    Cactus,
}

/// How a block kind is turned into draw geometry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum PrimitiveKind {
    /// Not rendered at all.
    None,
    /// Standard unit cube with per-face culling.
    Cube,
}

/// Static per-kind properties.
#[derive(Clone, Copy, Debug)]
pub struct BlockProps {
    pub solid: bool,
    pub transparent: bool,
    pub renders_as: PrimitiveKind,
    pub color: [f32; 3],
    pub top_color: [f32; 3],
}

impl BlockKind {
    pub const ALL: [BlockKind; 14] = [
        BlockKind::Air,
        BlockKind::Grass,
        BlockKind::Dirt,
        BlockKind::Stone,
        BlockKind::Sand,
        BlockKind::Water,
        BlockKind::Wood,
        BlockKind::Leaves,
        BlockKind::Bedrock,
        BlockKind::Snow,
        BlockKind::Gravel,
        BlockKind::Ice,
        BlockKind::Glass,
        BlockKind::Cactus,
    ];

    pub fn props(self) -> &'static BlockProps {
        const CUBE: PrimitiveKind = PrimitiveKind::Cube;
        macro_rules! props {
            ($solid:expr, $transparent:expr, $renders:expr, $color:expr, $top:expr) => {
                &BlockProps {
                    solid: $solid,
                    transparent: $transparent,
                    renders_as: $renders,
                    color: $color,
                    top_color: $top,
                }
            };
        }
        match self {
            BlockKind::Air => props!(
                false,
                true,
                PrimitiveKind::None,
                [0.0, 0.0, 0.0],
                [0.0, 0.0, 0.0]
            ),
            BlockKind::Grass => props!(
                true,
                false,
                CUBE,
                [0.45, 0.32, 0.22],
                [0.36, 0.70, 0.28]
            ),
            BlockKind::Dirt => props!(
                true,
                false,
                CUBE,
                [0.52, 0.37, 0.26],
                [0.52, 0.37, 0.26]
            ),
            BlockKind::Stone => props!(
                true,
                false,
                CUBE,
                [0.55, 0.55, 0.55],
                [0.55, 0.55, 0.55]
            ),
            BlockKind::Sand => props!(
                true,
                false,
                CUBE,
                [0.89, 0.83, 0.61],
                [0.89, 0.83, 0.61]
            ),
            BlockKind::Water => props!(
                false,
                true,
                CUBE,
                [0.25, 0.46, 0.82],
                [0.25, 0.46, 0.82]
            ),
            BlockKind::Wood => props!(true, false, CUBE, [0.60, 0.40, 0.20], [0.50, 0.33, 0.17]),
            BlockKind::Leaves => props!(true, true, CUBE, [0.30, 0.60, 0.20], [0.30, 0.60, 0.20]),
            BlockKind::Bedrock => props!(
                true,
                false,
                CUBE,
                [0.20, 0.20, 0.20],
                [0.20, 0.20, 0.20]
            ),
            BlockKind::Snow => props!(true, false, CUBE, [0.95, 0.95, 0.98], [0.95, 0.95, 0.98]),
            BlockKind::Gravel => props!(
                true,
                false,
                CUBE,
                [0.50, 0.50, 0.52],
                [0.50, 0.50, 0.52]
            ),
            BlockKind::Ice => props!(true, true, CUBE, [0.70, 0.85, 0.95], [0.70, 0.85, 0.95]),
            BlockKind::Glass => props!(true, true, CUBE, [0.85, 0.92, 0.95], [0.85, 0.92, 0.95]),
            BlockKind::Cactus => props!(true, false, CUBE, [0.20, 0.55, 0.20], [0.25, 0.60, 0.22]),
        }
    }

    pub fn is_solid(self) -> bool {
        self.props().solid
    }

    /// Registry default; the engine-level set is configurable on top of
    /// this (see `EngineConfig::transparent_kinds`).
    pub fn is_transparent(self) -> bool {
        self.props().transparent
    }

    pub fn is_air(self) -> bool {
        self == BlockKind::Air
    }

    pub fn renders_as(self) -> PrimitiveKind {
        self.props().renders_as
    }

    pub fn default_transparent() -> &'static [BlockKind] {
        &[
            BlockKind::Air,
            BlockKind::Water,
            BlockKind::Leaves,
            BlockKind::Ice,
            BlockKind::Glass,
        ]
    }
}

/// Startup consistency check over the whole property table.
///
/// The registry is closed, so anything this accepts can never fail at
/// lookup time later.
pub fn validate_registry() -> Result<(), String> {
    for kind in BlockKind::ALL {
        let props = kind.props();
        if kind.is_air() {
            if props.solid {
                return Err("air must not be solid".to_string());
            }
            if !props.transparent {
                return Err("air must be transparent".to_string());
            }
            if props.renders_as != PrimitiveKind::None {
                return Err("air must not render".to_string());
            }
        } else if props.renders_as == PrimitiveKind::None {
            return Err(format!("{kind:?} is not air but has no primitive"));
        }
    }
    for kind in BlockKind::default_transparent() {
        if !kind.is_transparent() {
            return Err(format!("{kind:?} listed transparent but not flagged"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_consistent() {
        validate_registry().expect("registry must validate");
    }

    #[test]
    fn water_is_transparent_and_not_solid() {
        assert!(BlockKind::Water.is_transparent());
        assert!(!BlockKind::Water.is_solid());
    }

    #[test]
    fn every_non_air_kind_renders() {
        for kind in BlockKind::ALL {
            assert_eq!(kind.renders_as() == PrimitiveKind::None, kind.is_air());
        }
    }
}
