//! Chunked voxel storage with deterministic on-demand terrain.
//!
//! Chunks are 16x16 columns of `height` layers, indexed `lx + lz*16 + y*256`.
//! Reads of chunks never written fall through to the generator without
//! materialising them, so observation stays side-effect free.

use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogBundle;
use crate::geom::Vec3;
use crate::rng::hash2;

pub const CHUNK_EDGE: i32 = 16;

/// Pure terrain function `(x, y, z) -> block id`.
pub trait BlockGenerator: Send + Sync + Debug {
    fn block_at(&self, x: i32, y: i32, z: i32) -> u16;
    fn biome_at(&self, x: i32, z: i32) -> &'static str;
}

pub fn chunk_coords(x: i32, z: i32) -> (i32, i32) {
    (x.div_euclid(CHUNK_EDGE), z.div_euclid(CHUNK_EDGE))
}

pub fn chunk_index(x: i32, y: i32, z: i32) -> usize {
    let lx = x.rem_euclid(CHUNK_EDGE) as usize;
    let lz = z.rem_euclid(CHUNK_EDGE) as usize;
    lx + lz * 16 + (y.max(0) as usize) * 256
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub cx: i32,
    pub cz: i32,
    pub blocks: Vec<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkStore {
    height: i32,
    chunks: BTreeMap<(i32, i32), Chunk>,
}

impl ChunkStore {
    pub fn new(height: i32) -> Self {
        Self {
            height: height.max(1),
            chunks: BTreeMap::new(),
        }
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    pub fn loaded_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_loaded(&self, cx: i32, cz: i32) -> bool {
        self.chunks.contains_key(&(cx, cz))
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    pub fn insert_chunk(&mut self, chunk: Chunk) {
        self.chunks.insert((chunk.cx, chunk.cz), chunk);
    }

    pub fn get(&self, generator: &dyn BlockGenerator, pos: Vec3) -> u16 {
        if pos.y < 0 || pos.y >= self.height {
            return 0;
        }
        let key = chunk_coords(pos.x, pos.z);
        match self.chunks.get(&key) {
            Some(chunk) => chunk
                .blocks
                .get(chunk_index(pos.x, pos.y, pos.z))
                .copied()
                .unwrap_or(0),
            None => generator.block_at(pos.x, pos.y, pos.z),
        }
    }

    /// Materialises the chunk; returns true when it was newly generated.
    pub fn ensure_chunk(&mut self, generator: &dyn BlockGenerator, cx: i32, cz: i32) -> bool {
        if self.chunks.contains_key(&(cx, cz)) {
            return false;
        }
        let height = self.height;
        let mut blocks = vec![0_u16; 256 * height as usize];
        for y in 0..height {
            for lz in 0..CHUNK_EDGE {
                for lx in 0..CHUNK_EDGE {
                    let x = cx * CHUNK_EDGE + lx;
                    let z = cz * CHUNK_EDGE + lz;
                    blocks[chunk_index(x, y, z)] = generator.block_at(x, y, z);
                }
            }
        }
        self.chunks.insert((cx, cz), Chunk { cx, cz, blocks });
        true
    }

    /// Writes a block, returning the previous value; out-of-height writes are ignored.
    pub fn set(&mut self, generator: &dyn BlockGenerator, pos: Vec3, block: u16) -> Option<u16> {
        if pos.y < 0 || pos.y >= self.height {
            return None;
        }
        let (cx, cz) = chunk_coords(pos.x, pos.z);
        self.ensure_chunk(generator, cx, cz);
        let chunk = self.chunks.get_mut(&(cx, cz))?;
        let slot = chunk.blocks.get_mut(chunk_index(pos.x, pos.y, pos.z))?;
        let previous = *slot;
        *slot = block;
        Some(previous)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TerrainPalette {
    air: u16,
    stone: u16,
    dirt: u16,
    sand: u16,
    gravel: u16,
    log: u16,
    coal_ore: u16,
    iron_ore: u16,
    copper_ore: u16,
    crystal_ore: u16,
}

/// Default terrain: biome regions, ore and terrain clusters, sparse sprinkles, clear spawn.
#[derive(Debug, Clone)]
pub struct TerrainGenerator {
    seed: i64,
    biome_region_size: i32,
    spawn_clear_radius: i32,
    ore_scale_permille: u64,
    sprinkle: [u64; 3],
    palette: TerrainPalette,
}

impl TerrainGenerator {
    pub fn new(
        seed: i64,
        world_type: &str,
        biome_region_size: i32,
        spawn_clear_radius: i32,
        sprinkle_permille: [u32; 3],
        catalog: &CatalogBundle,
    ) -> Self {
        let ore_scale_permille = match world_type {
            "MINE_L1" => 1500,
            "MINE_L2" => 2000,
            "MINE_L3" => 2500,
            _ => 1000,
        };
        Self {
            seed,
            biome_region_size: biome_region_size.max(1),
            spawn_clear_radius,
            ore_scale_permille,
            sprinkle: sprinkle_permille.map(|v| u64::from(v.min(1000))),
            palette: TerrainPalette {
                air: 0,
                stone: catalog.block_or_air("STONE"),
                dirt: catalog.block_or_air("DIRT"),
                sand: catalog.block_or_air("SAND"),
                gravel: catalog.block_or_air("GRAVEL"),
                log: catalog.block_or_air("LOG"),
                coal_ore: catalog.block_or_air("COAL_ORE"),
                iron_ore: catalog.block_or_air("IRON_ORE"),
                copper_ore: catalog.block_or_air("COPPER_ORE"),
                crystal_ore: catalog.block_or_air("CRYSTAL_ORE"),
            },
        }
    }

    fn ore_prob(&self, base: u64) -> u64 {
        ((base * self.ore_scale_permille + 500) / 1000).min(1000)
    }

    fn cluster(&self, salt: i64, x: i32, z: i32, grid: i32, radius: i32, prob: u64) -> bool {
        in_cluster(self.seed + salt, x, z, grid, radius, prob)
    }

    fn surface_block(&self, x: i32, z: i32) -> u16 {
        let p = self.palette;
        if within_spawn_clear(x, z, self.spawn_clear_radius) {
            return p.air;
        }
        if self.cluster(101, x, z, 192, 2, self.ore_prob(200)) {
            return p.crystal_ore;
        }
        if self.cluster(102, x, z, 128, 3, self.ore_prob(450)) {
            return p.iron_ore;
        }
        if self.cluster(103, x, z, 128, 3, self.ore_prob(450)) {
            return p.copper_ore;
        }
        if self.cluster(104, x, z, 64, 4, self.ore_prob(650)) {
            return p.coal_ore;
        }

        let biome = self.biome_at(x, z);
        let clustered = match biome {
            "FOREST" => [
                (201, 48, 4, 450, p.log),
                (202, 32, 4, 500, p.stone),
                (203, 48, 3, 350, p.dirt),
                (204, 96, 2, 180, p.gravel),
            ]
            .into_iter()
            .find(|(salt, grid, radius, prob, _)| self.cluster(*salt, x, z, *grid, *radius, *prob))
            .map(|(.., block)| block),
            "DESERT" => [
                (301, 48, 3, 550, p.sand),
                (302, 32, 4, 450, p.stone),
                (303, 96, 2, 200, p.gravel),
            ]
            .into_iter()
            .find(|(salt, grid, radius, prob, _)| self.cluster(*salt, x, z, *grid, *radius, *prob))
            .map(|(.., block)| block),
            _ => [
                (401, 48, 3, 400, p.dirt),
                (402, 32, 4, 500, p.stone),
                (403, 96, 2, 180, p.gravel),
            ]
            .into_iter()
            .find(|(salt, grid, radius, prob, _)| self.cluster(*salt, x, z, *grid, *radius, *prob))
            .map(|(.., block)| block),
        };
        if let Some(block) = clustered {
            return block;
        }

        let roll = hash2(self.seed + 999, i64::from(x), i64::from(z)) % 1000;
        let [stone, dirt, log] = self.sprinkle;
        if roll < stone {
            p.stone
        } else if roll < stone + dirt {
            if biome == "DESERT" {
                p.sand
            } else {
                p.dirt
            }
        } else if roll < stone + dirt + log && biome == "FOREST" {
            p.log
        } else {
            p.air
        }
    }
}

impl BlockGenerator for TerrainGenerator {
    fn block_at(&self, x: i32, y: i32, z: i32) -> u16 {
        if y != 0 {
            return self.palette.air;
        }
        self.surface_block(x, z)
    }

    fn biome_at(&self, x: i32, z: i32) -> &'static str {
        let rx = x.div_euclid(self.biome_region_size);
        let rz = z.div_euclid(self.biome_region_size);
        match hash2(self.seed, i64::from(rx), i64::from(rz)) % 3 {
            0 => "PLAINS",
            1 => "FOREST",
            _ => "DESERT",
        }
    }
}

pub fn within_spawn_clear(x: i32, z: i32, radius: i32) -> bool {
    if radius <= 0 {
        return false;
    }
    let (x, z, r) = (i64::from(x), i64::from(z), i64::from(radius));
    x * x + z * z <= r * r
}

pub fn in_cluster(seed: i64, x: i32, z: i32, grid: i32, radius: i32, prob_permille: u64) -> bool {
    if grid <= 0 || radius <= 0 || prob_permille == 0 {
        return false;
    }
    let gx = x.div_euclid(grid);
    let gz = z.div_euclid(grid);
    let r2 = i64::from(radius) * i64::from(radius);
    for dz in -1..=1 {
        for dx in -1..=1 {
            let cgx = gx + dx;
            let cgz = gz + dz;
            let h = hash2(seed, i64::from(cgx), i64::from(cgz));
            if h % 1000 >= prob_permille {
                continue;
            }
            let ox = ((h >> 10) % grid as u64) as i32;
            let oz = ((h >> 20) % grid as u64) as i32;
            let ddx = i64::from(x - (cgx * grid + ox));
            let ddz = i64::from(z - (cgz * grid + oz));
            if ddx * ddx + ddz * ddz <= r2 {
                return true;
            }
        }
    }
    false
}

/// Generator returning AIR everywhere; handy for tests that build their own terrain.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatGenerator;

impl BlockGenerator for FlatGenerator {
    fn block_at(&self, _x: i32, _y: i32, _z: i32) -> u16 {
        0
    }

    fn biome_at(&self, _x: i32, _z: i32) -> &'static str {
        "PLAINS"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terrain(seed: i64) -> TerrainGenerator {
        TerrainGenerator::new(seed, "OVERWORLD", 64, 6, [12, 4, 2], &CatalogBundle::builtin())
    }

    #[test]
    fn spawn_area_is_clear_and_upper_layers_are_air() {
        let gen = terrain(42);
        for x in -4..=4 {
            for z in -4..=4 {
                assert_eq!(gen.block_at(x, 0, z), 0);
            }
        }
        assert_eq!(gen.block_at(100, 1, 100), 0);
    }

    #[test]
    fn terrain_is_deterministic_per_seed() {
        let a = terrain(7);
        let b = terrain(7);
        let c = terrain(8);
        let sample = |g: &TerrainGenerator| {
            (0..64)
                .map(|i| g.block_at(i * 13 - 400, 0, i * 7 + 90))
                .collect::<Vec<_>>()
        };
        assert_eq!(sample(&a), sample(&b));
        assert_ne!(sample(&a), sample(&c));
    }

    #[test]
    fn set_materialises_chunk_and_returns_previous() {
        let gen = FlatGenerator;
        let mut store = ChunkStore::new(2);
        let pos = Vec3::new(-1, 1, 17);
        assert_eq!(store.get(&gen, pos), 0);
        assert!(!store.is_loaded(-1, 1));
        assert_eq!(store.set(&gen, pos, 5), Some(0));
        assert!(store.is_loaded(-1, 1));
        assert_eq!(store.get(&gen, pos), 5);
        assert_eq!(store.set(&gen, Vec3::new(0, 2, 0), 5), None);
        assert_eq!(chunk_index(-1, 1, 17), 15 + 16 + 256);
    }
}
