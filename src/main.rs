//! Headless world-engine demo.
//!
//! Runs the full chunk lifecycle without a renderer: a viewer wanders
//! across the terrain, places and breaks blocks, and the engine streams
//! chunks, consolidates edits and flushes deltas underneath it.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use glam::{IVec3, Vec3};
use rand::RngExt;
use tracing::info;

use voxelworld::config::{EngineConfig, PersistenceConfig};
use voxelworld::constants::TICK_HZ;
use voxelworld::core::block::BlockKind;
use voxelworld::world::generator::TerrainGenerator;
use voxelworld::world::manager::WorldManager;

#[derive(Parser, Debug)]
#[command(name = "voxelworld", about = "Headless voxel world engine demo")]
struct Args {
    /// World seed.
    #[arg(long, default_value_t = 2147)]
    seed: u32,

    /// Chunk radius kept loaded around the viewer.
    #[arg(long, default_value_t = 3)]
    render_distance: i32,

    /// Simulation length in frames (60 per second).
    #[arg(long, default_value_t = 600)]
    frames: u64,

    /// Delta store directory; defaults to the per-user data dir.
    #[arg(long)]
    save_dir: Option<PathBuf>,

    /// Keep deltas across sessions instead of wiping at startup.
    #[arg(long, default_value_t = false)]
    persist: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = EngineConfig {
        seed: args.seed,
        render_distance: args.render_distance,
        persistence: PersistenceConfig {
            store_dir: args.save_dir,
            cross_session: args.persist,
        },
        ..EngineConfig::default()
    };

    let spawn = TerrainGenerator::new(args.seed).find_spawn();
    info!(seed = args.seed, ?spawn, "starting world demo");

    let mut world = match WorldManager::new(config) {
        Ok(world) => world,
        Err(message) => {
            tracing::error!("engine startup failed: {message}");
            std::process::exit(1);
        }
    };

    let mut rng = rand::rng();
    let mut viewer = Vec3::new(spawn.x as f32, spawn.y as f32 + 2.0, spawn.z as f32);
    let mut heading: f32 = rng.random_range(0.0..std::f32::consts::TAU);
    let frame_budget = Duration::from_secs(1) / TICK_HZ;
    let mut placed = 0u64;
    let mut removed = 0u64;

    for frame in 0..args.frames {
        let started = Instant::now();

        // Wander: drift the heading, walk a couple of blocks per second.
        heading += rng.random_range(-0.1..0.1);
        viewer.x += heading.cos() * 0.05;
        viewer.z += heading.sin() * 0.05;

        world.update(viewer);

        // A few scripted edits per second, near the viewer.
        if frame % 20 == 0 {
            let pos = IVec3::new(
                viewer.x as i32 + rng.random_range(-6..=6),
                rng.random_range(60..90),
                viewer.z as i32 + rng.random_range(-6..=6),
            );
            if rng.random_bool(0.5) {
                if world.set_block(pos, BlockKind::Glass) {
                    placed += 1;
                }
            } else if world.remove_block(pos) {
                removed += 1;
            }
        }

        if frame % TICK_HZ as u64 == 0 {
            let stats = world.stats();
            info!(
                frame,
                ready = stats.ready,
                loading = stats.loading,
                consolidating = stats.consolidating,
                pending = stats.pending_edits,
                flushing = stats.flushes_in_flight,
                "tick"
            );
        }

        if let Some(remaining) = frame_budget.checked_sub(started.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    // Flush everything and wait for the store to drain.
    world.unload_all();
    let deadline = Instant::now() + Duration::from_secs(10);
    while world.stats().flushes_in_flight > 0 && Instant::now() < deadline {
        world.store().poll();
        std::thread::sleep(Duration::from_millis(10));
    }

    info!(placed, removed, "world demo finished");
}
