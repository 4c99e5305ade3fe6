use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum Biome {
    #[default]
    Plains,
    Forest,
    Desert,
    Tundra,
    Mountains,
    Ocean,
    Beach,
    River,
}

/// Fixed per-biome feature probabilities, in percent per column.
/// Bounding decoration by a closed table keeps generation deterministic
/// and auditable.
#[derive(Clone, Copy, Debug)]
pub struct FeatureTable {
    pub tree_pct: u32,
    pub cactus_pct: u32,
}

impl Biome {
    pub fn features(self) -> FeatureTable {
        match self {
            Biome::Plains => FeatureTable {
                tree_pct: 2,
                cactus_pct: 0,
            },
            Biome::Forest => FeatureTable {
                tree_pct: 14,
                cactus_pct: 0,
            },
            Biome::Tundra => FeatureTable {
                tree_pct: 1,
                cactus_pct: 0,
            },
            Biome::Mountains => FeatureTable {
                tree_pct: 1,
                cactus_pct: 0,
            },
            Biome::Desert => FeatureTable {
                tree_pct: 0,
                cactus_pct: 2,
            },
            Biome::Ocean | Biome::Beach | Biome::River => FeatureTable {
                tree_pct: 0,
                cactus_pct: 0,
            },
        }
    }
}
