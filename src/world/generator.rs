//! Deterministic terrain generation with FastNoiseLite.
//!
//! Pure with respect to (chunk coordinate, seed), so a reloaded chunk
//! regenerates byte-identical base terrain and persisted deltas stay
//! minimal. Runs on background workers only; the consolidation mode of
//! the pipeline lives in [`crate::world::mesher`] and never touches the
//! noise stack.

use fastnoise_lite::{FastNoiseLite, FractalType, NoiseType};
use glam::IVec3;

use crate::constants::*;
use crate::core::block::BlockKind;
use crate::world::biome::Biome;

/// Generated base terrain for one chunk column.
pub struct GeneratedTerrain {
    pub blocks: Vec<BlockKind>,
}

/// Thread-safe generator with pre-configured noise instances. Workers
/// each own a clone; there is no shared state between them.
pub struct TerrainGenerator {
    noise_continents: FastNoiseLite,
    noise_terrain: FastNoiseLite,
    noise_detail: FastNoiseLite,
    noise_temperature: FastNoiseLite,
    noise_moisture: FastNoiseLite,
    noise_river: FastNoiseLite,
    noise_cave1: FastNoiseLite,
    noise_cave2: FastNoiseLite,
    seed: u32,
}

fn grid_idx(x: i32, y: i32, z: i32) -> usize {
    ((x * CHUNK_SIZE + z) * WORLD_HEIGHT + y) as usize
}

impl TerrainGenerator {
    pub fn new(seed: u32) -> Self {
        TerrainGenerator {
            noise_continents: Self::simplex(seed, 0.002),
            noise_terrain: Self::fbm(seed.wrapping_add(1), 0.008),
            noise_detail: Self::fbm(seed.wrapping_add(2), 0.015),
            noise_temperature: Self::simplex(seed.wrapping_add(3), 0.008),
            noise_moisture: Self::simplex(seed.wrapping_add(4), 0.01),
            noise_river: Self::simplex(seed.wrapping_add(5), 0.06),
            noise_cave1: Self::simplex(seed.wrapping_add(6), 0.05),
            noise_cave2: Self::simplex(seed.wrapping_add(7), 0.035),
            seed,
        }
    }

    fn simplex(seed: u32, frequency: f32) -> FastNoiseLite {
        let mut noise = FastNoiseLite::with_seed(seed as i32);
        noise.set_noise_type(Some(NoiseType::OpenSimplex2));
        noise.set_frequency(Some(frequency));
        noise
    }

    fn fbm(seed: u32, frequency: f32) -> FastNoiseLite {
        let mut noise = FastNoiseLite::with_seed(seed as i32);
        noise.set_noise_type(Some(NoiseType::OpenSimplex2));
        noise.set_fractal_type(Some(FractalType::FBm));
        noise.set_fractal_octaves(Some(4));
        noise.set_fractal_lacunarity(Some(2.0));
        noise.set_fractal_gain(Some(0.5));
        noise.set_frequency(Some(frequency));
        noise
    }

    /// Generate the full block grid for one chunk column.
    ///
    /// Fails only on internal inconsistency (a height outside the world
    /// volume); the world manager retries a bounded number of times and
    /// then renders the chunk as an empty placeholder.
    pub fn generate(&self, cx: i32, cz: i32) -> Result<GeneratedTerrain, String> {
        let mut blocks = vec![BlockKind::Air; CHUNK_VOLUME];
        let base_x = cx * CHUNK_SIZE;
        let base_z = cz * CHUNK_SIZE;

        let mut biome_map = [[Biome::Plains; CHUNK_SIZE as usize]; CHUNK_SIZE as usize];
        let mut height_map = [[0i32; CHUNK_SIZE as usize]; CHUNK_SIZE as usize];
        for lx in 0..CHUNK_SIZE {
            for lz in 0..CHUNK_SIZE {
                let wx = base_x + lx;
                let wz = base_z + lz;
                let height = self.surface_height(wx, wz);
                if !(1..WORLD_HEIGHT).contains(&height) {
                    return Err(format!(
                        "surface height {height} out of range at ({wx}, {wz})"
                    ));
                }
                biome_map[lx as usize][lz as usize] = self.biome_at(wx, wz);
                height_map[lx as usize][lz as usize] = height;
            }
        }

        // Column fill
        for lx in 0..CHUNK_SIZE {
            for lz in 0..CHUNK_SIZE {
                let wx = base_x + lx;
                let wz = base_z + lz;
                let biome = biome_map[lx as usize][lz as usize];
                let surface = height_map[lx as usize][lz as usize];

                for y in 0..surface {
                    let block = self.stratum_block(biome, y, surface, wx, wz);
                    if block != BlockKind::Air {
                        blocks[grid_idx(lx, y, lz)] = block;
                    }
                }
                for y in surface..SEA_LEVEL {
                    let block = if biome == Biome::Tundra && y == SEA_LEVEL - 1 {
                        BlockKind::Ice
                    } else {
                        BlockKind::Water
                    };
                    blocks[grid_idx(lx, y, lz)] = block;
                }
            }
        }

        // Cave carving
        for lx in 0..CHUNK_SIZE {
            for lz in 0..CHUNK_SIZE {
                let wx = base_x + lx;
                let wz = base_z + lz;
                let surface = height_map[lx as usize][lz as usize];
                for y in 1..surface.min(WORLD_HEIGHT - 1) {
                    if self.is_cave(wx, y, wz, surface) {
                        let current = blocks[grid_idx(lx, y, lz)];
                        if !matches!(
                            current,
                            BlockKind::Water | BlockKind::Bedrock | BlockKind::Air
                        ) {
                            blocks[grid_idx(lx, y, lz)] = if y < SEA_LEVEL {
                                BlockKind::Water
                            } else {
                                BlockKind::Air
                            };
                        }
                    }
                }
            }
        }

        self.decorate(&mut blocks, cx, cz, &biome_map, &height_map);

        Ok(GeneratedTerrain { blocks })
    }

    pub fn biome_at(&self, x: i32, z: i32) -> Biome {
        let fx = x as f32;
        let fz = z as f32;

        let continent = self.noise_continents.get_noise_2d(fx, fz);
        let river = 1.0 - self.noise_river.get_noise_2d(fx, fz).abs() * 1.5;

        if river > 0.85 && continent > -0.3 {
            return Biome::River;
        }
        if continent < -0.35 {
            return Biome::Ocean;
        }
        if continent < -0.2 {
            return Biome::Beach;
        }

        let temp = self.noise_temperature.get_noise_2d(fx, fz);
        let moist = self.noise_moisture.get_noise_2d(fx, fz);
        if temp < -0.3 {
            Biome::Tundra
        } else if temp > 0.5 && moist < -0.2 {
            Biome::Desert
        } else if moist > -0.2 {
            Biome::Forest
        } else {
            let mountain = self.noise_terrain.get_noise_2d(fx * 0.6, fz * 0.6);
            if mountain > 0.4 {
                Biome::Mountains
            } else {
                Biome::Plains
            }
        }
    }

    /// Surface height of the column at (x, z), distance-weight blended
    /// over the 3x3 neighborhood to soften biome seams.
    pub fn surface_height(&self, x: i32, z: i32) -> i32 {
        let mut total = 0.0;
        let mut weights = 0.0;
        for dx in -1..=1 {
            for dz in -1..=1 {
                let weight = 1.0 / (1.0 + (dx * dx + dz * dz) as f64);
                total += self.raw_height(x + dx, z + dz) * weight;
                weights += weight;
            }
        }
        ((total / weights) as i32).clamp(1, WORLD_HEIGHT - 20)
    }

    fn raw_height(&self, x: i32, z: i32) -> f64 {
        let biome = self.biome_at(x, z);
        let fx = x as f32;
        let fz = z as f32;

        let continental = self.noise_continents.get_noise_2d(fx, fz) as f64;
        let terrain = self.noise_terrain.get_noise_2d(fx, fz) as f64;
        let detail = self.noise_detail.get_noise_2d(fx, fz) as f64;

        match biome {
            Biome::Ocean => (continental + 1.0) * 0.5 * 15.0 + 35.0 + detail * 3.0,
            Biome::River => (SEA_LEVEL - 3) as f64 + detail * 2.0,
            Biome::Beach => SEA_LEVEL as f64 + terrain * 2.0 + detail,
            Biome::Plains => 66.0 + terrain * 4.0 + detail * 2.0,
            Biome::Forest => 68.0 + terrain * 8.0 + detail * 3.0,
            Biome::Desert => 65.0 + terrain * 5.0 + detail * 2.0,
            Biome::Tundra => 68.0 + terrain * 6.0 + detail * 2.0,
            Biome::Mountains => {
                let peaks = self.noise_terrain.get_noise_2d(fx + 1000.0, fz + 1000.0) as f64;
                80.0 + (terrain + 1.0) * 0.5 * 60.0 * (0.75 + peaks * 0.25) + detail * 5.0
            }
        }
    }

    fn is_cave(&self, x: i32, y: i32, z: i32, surface: i32) -> bool {
        if y <= 5 || y >= surface - 8 {
            return false;
        }
        let fx = x as f32;
        let fy = y as f32;
        let fz = z as f32;
        let cave1 = self.noise_cave1.get_noise_3d(fx, fy * 0.5, fz);
        let cave2 = self.noise_cave2.get_noise_3d(fx, fy * 0.6, fz);
        if cave1 > 0.7 && cave2 > 0.7 {
            return true;
        }

        // Spaghetti tunnels: narrow winding passages where two offset
        // noise fields both pass near zero.
        let spag1 = self.noise_cave1.get_noise_3d(fx * 1.6 + 500.0, fy * 1.6, fz * 1.6);
        let spag2 = self.noise_cave2.get_noise_3d(fx * 1.6 + 500.0, fy * 1.6, fz * 1.6);
        spag1.abs() < 0.12 && spag2.abs() < 0.12
    }

    fn stratum_block(&self, biome: Biome, y: i32, surface: i32, wx: i32, wz: i32) -> BlockKind {
        if y == 0 {
            return BlockKind::Bedrock;
        }
        if y <= 4 {
            let chance = (5 - y) as u32 * 20;
            if self.position_hash_3d(wx, y, wz) % 100 < chance {
                return BlockKind::Bedrock;
            }
        }

        let depth = surface - y;
        let dirt_depth = 3 + (self.position_hash(wx, wz) % 3) as i32;

        match biome {
            Biome::Ocean | Biome::River => {
                if depth > 4 {
                    BlockKind::Stone
                } else if depth > 1 {
                    BlockKind::Gravel
                } else {
                    BlockKind::Sand
                }
            }
            Biome::Beach => {
                if depth > 6 {
                    BlockKind::Stone
                } else {
                    BlockKind::Sand
                }
            }
            Biome::Desert => {
                if depth > 10 {
                    BlockKind::Stone
                } else {
                    BlockKind::Sand
                }
            }
            Biome::Tundra => {
                if depth > dirt_depth + 2 {
                    BlockKind::Stone
                } else if depth > 1 {
                    BlockKind::Dirt
                } else {
                    BlockKind::Snow
                }
            }
            Biome::Mountains => {
                if y > 140 && depth <= 1 {
                    BlockKind::Snow
                } else if depth > dirt_depth || y > 110 {
                    BlockKind::Stone
                } else if depth > 1 {
                    BlockKind::Dirt
                } else {
                    BlockKind::Grass
                }
            }
            Biome::Plains | Biome::Forest => {
                if depth > dirt_depth {
                    BlockKind::Stone
                } else if depth > 1 {
                    BlockKind::Dirt
                } else {
                    BlockKind::Grass
                }
            }
        }
    }

    fn decorate(
        &self,
        blocks: &mut [BlockKind],
        cx: i32,
        cz: i32,
        biome_map: &[[Biome; CHUNK_SIZE as usize]; CHUNK_SIZE as usize],
        height_map: &[[i32; CHUNK_SIZE as usize]; CHUNK_SIZE as usize],
    ) {
        let base_x = cx * CHUNK_SIZE;
        let base_z = cz * CHUNK_SIZE;
        // Keep canopies inside the chunk; features are chunk-local.
        let margin = 3;

        for lx in margin..(CHUNK_SIZE - margin) {
            for lz in margin..(CHUNK_SIZE - margin) {
                let wx = base_x + lx;
                let wz = base_z + lz;
                let biome = biome_map[lx as usize][lz as usize];
                let surface = height_map[lx as usize][lz as usize];
                if surface <= SEA_LEVEL {
                    continue;
                }
                let features = biome.features();
                let roll = self.position_hash(wx, wz) % 100;

                if roll < features.tree_pct {
                    let ground = blocks[grid_idx(lx, surface - 1, lz)];
                    if matches!(ground, BlockKind::Grass | BlockKind::Dirt)
                        && self.tree_fits(blocks, lx, surface, lz)
                    {
                        self.place_tree(blocks, lx, surface, lz);
                    }
                } else if roll < features.tree_pct + features.cactus_pct {
                    if blocks[grid_idx(lx, surface - 1, lz)] == BlockKind::Sand {
                        self.place_cactus(blocks, lx, surface, lz, wx, wz);
                    }
                }
            }
        }
    }

    fn tree_fits(&self, blocks: &[BlockKind], lx: i32, y: i32, lz: i32) -> bool {
        for dx in -3..=3 {
            for dz in -3..=3 {
                let nx = lx + dx;
                let nz = lz + dz;
                if !(0..CHUNK_SIZE).contains(&nx) || !(0..CHUNK_SIZE).contains(&nz) {
                    continue;
                }
                for dy in 0..8 {
                    let ny = y + dy;
                    if ny >= WORLD_HEIGHT {
                        continue;
                    }
                    if blocks[grid_idx(nx, ny, nz)] == BlockKind::Wood {
                        return false;
                    }
                }
            }
        }
        true
    }

    fn place_tree(&self, blocks: &mut [BlockKind], lx: i32, y: i32, lz: i32) {
        let trunk = 5;
        for dy in 0..trunk {
            if y + dy < WORLD_HEIGHT {
                blocks[grid_idx(lx, y + dy, lz)] = BlockKind::Wood;
            }
        }
        for dy in 3..=trunk {
            let radius = if dy >= trunk - 1 { 1 } else { 2 };
            for dx in -radius..=radius {
                for dz in -radius..=radius {
                    let nx = lx + dx;
                    let ny = y + dy;
                    let nz = lz + dz;
                    if !(0..CHUNK_SIZE).contains(&nx)
                        || !(0..CHUNK_SIZE).contains(&nz)
                        || ny >= WORLD_HEIGHT
                    {
                        continue;
                    }
                    if blocks[grid_idx(nx, ny, nz)] == BlockKind::Air
                        && (dx.abs() != radius
                            || dz.abs() != radius
                            || self.position_hash(nx, nz) % 2 == 0)
                    {
                        blocks[grid_idx(nx, ny, nz)] = BlockKind::Leaves;
                    }
                }
            }
        }
        if y + trunk < WORLD_HEIGHT {
            blocks[grid_idx(lx, y + trunk, lz)] = BlockKind::Leaves;
        }
    }

    fn place_cactus(&self, blocks: &mut [BlockKind], lx: i32, y: i32, lz: i32, wx: i32, wz: i32) {
        let height = 2 + (self.position_hash(wx, wz) % 2) as i32;
        for dy in 0..height {
            if y + dy < WORLD_HEIGHT {
                blocks[grid_idx(lx, y + dy, lz)] = BlockKind::Cactus;
            }
        }
    }

    /// Find a dry column near the origin; used by the demo binary.
    pub fn find_spawn(&self) -> IVec3 {
        for radius in 0..64 {
            for dx in -radius..=radius {
                for dz in -radius..=radius {
                    let height = self.surface_height(dx, dz);
                    let biome = self.biome_at(dx, dz);
                    if height > SEA_LEVEL && !matches!(biome, Biome::Ocean | Biome::River) {
                        return IVec3::new(dx, height + 1, dz);
                    }
                }
            }
        }
        IVec3::new(0, 80, 0)
    }

    fn position_hash(&self, x: i32, z: i32) -> u32 {
        let mut hash = self.seed;
        hash = hash.wrapping_add(x as u32).wrapping_mul(73856093);
        hash = hash.wrapping_add(z as u32).wrapping_mul(19349663);
        hash ^ (hash >> 16)
    }

    fn position_hash_3d(&self, x: i32, y: i32, z: i32) -> u32 {
        let mut hash = self.seed;
        hash = hash.wrapping_add(x as u32).wrapping_mul(73856093);
        hash = hash.wrapping_add(y as u32).wrapping_mul(19349663);
        hash = hash.wrapping_add(z as u32).wrapping_mul(83492791);
        hash ^ (hash >> 16)
    }
}

impl Clone for TerrainGenerator {
    fn clone(&self) -> Self {
        TerrainGenerator::new(self.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_deterministic() {
        let a = TerrainGenerator::new(42).generate(0, 0).unwrap();
        let b = TerrainGenerator::new(42).generate(0, 0).unwrap();
        assert_eq!(a.blocks, b.blocks);
    }

    #[test]
    fn different_seeds_differ() {
        let a = TerrainGenerator::new(1).generate(0, 0).unwrap();
        let b = TerrainGenerator::new(2).generate(0, 0).unwrap();
        assert_ne!(a.blocks, b.blocks);
    }

    #[test]
    fn bottom_layer_is_bedrock() {
        let terrain = TerrainGenerator::new(7).generate(0, 0).unwrap();
        for x in 0..CHUNK_SIZE {
            for z in 0..CHUNK_SIZE {
                assert_eq!(terrain.blocks[grid_idx(x, 0, z)], BlockKind::Bedrock);
            }
        }
    }

    #[test]
    fn columns_have_a_surface() {
        let generator = TerrainGenerator::new(7);
        let terrain = generator.generate(2, -3).unwrap();
        // Every column holds something besides air at or below sea level.
        for x in 0..CHUNK_SIZE {
            for z in 0..CHUNK_SIZE {
                let any = (0..SEA_LEVEL).any(|y| terrain.blocks[grid_idx(x, y, z)] != BlockKind::Air);
                assert!(any, "column ({x}, {z}) is empty");
            }
        }
    }

    #[test]
    fn underground_has_carved_voids() {
        let generator = TerrainGenerator::new(7);
        let mut found = false;
        'scan: for cx in 0..4 {
            for cz in 0..4 {
                let terrain = generator.generate(cx, cz).unwrap();
                for x in 0..CHUNK_SIZE {
                    for z in 0..CHUNK_SIZE {
                        // Deep enough that air can only mean a cave.
                        for y in 10..40 {
                            if terrain.blocks[grid_idx(x, y, z)] == BlockKind::Air {
                                found = true;
                                break 'scan;
                            }
                        }
                    }
                }
            }
        }
        assert!(found, "no caves in a 4x4 chunk area");
    }

    #[test]
    fn spawn_is_above_sea_level() {
        let spawn = TerrainGenerator::new(2147).find_spawn();
        assert!(spawn.y > SEA_LEVEL);
    }
}
