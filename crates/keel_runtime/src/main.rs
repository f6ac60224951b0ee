//! Keel Engine Runtime
//!
//! Minimal binary that boots the storage engine and drives a bounded
//! proof-of-concept loop: a parallel read phase records deferred structural
//! commands while value systems run through exclusive query iteration, then
//! the frame's commands are applied at the phase boundary and query caches
//! refresh before the next frame.

use anyhow::Result;
use glam::Vec3;
use keel_core::config::StorageSettings;
use keel_core::ecs::{
    ArchetypeRegistry, Component, ComponentCommands, ComponentType, QueryRegistry,
    SystemDescriptor, SystemRegistry,
};
use keel_core::{define_component, spawn};
use keel_metrics::FrameTimer;
use tracing::{info, warn};

const SETTINGS_PATH: &str = "keel.settings.json";
const FRAMES: u64 = 240;
const WORLD_RADIUS: f32 = 200.0;

#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct Position([f32; 3]);
define_component!(Position, 2, "Position");

#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct Velocity([f32; 3]);
define_component!(Velocity, 3, "Velocity");

#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct Lifetime {
    frames_left: i32,
}
define_component!(Lifetime, 5, "Lifetime");

#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct Fading {
    alpha: f32,
}
define_component!(Fading, 7, "Fading");

fn load_settings() -> StorageSettings {
    match std::fs::read_to_string(SETTINGS_PATH) {
        Ok(text) => match serde_json::from_str(&text) {
            Ok(settings) => {
                info!(path = SETTINGS_PATH, "loaded storage settings");
                settings
            }
            Err(err) => {
                warn!(%err, path = SETTINGS_PATH, "settings unreadable, using defaults");
                StorageSettings::default()
            }
        },
        Err(_) => StorageSettings::default(),
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Keel Engine v{}", keel_core::VERSION);

    let settings = load_settings();
    let mut registry = ArchetypeRegistry::new(&settings)?;
    let mut commands = ComponentCommands::from_settings(&settings)?;
    let mut queries = QueryRegistry::new();
    let mut systems = SystemRegistry::new();

    Position::ensure_registered();
    Velocity::ensure_registered();
    Lifetime::ensure_registered();
    Fading::ensure_registered();

    // Statically-known component access per system; write conflicts are
    // rejected at registration.
    let integrate = systems.register(
        SystemDescriptor::new("integrate")
            .reads([ComponentType::of::<Velocity>()])
            .writes([ComponentType::of::<Position>()]),
        &registry,
        &mut queries,
    )?;
    let age = systems.register(
        SystemDescriptor::new("age").writes([ComponentType::of::<Lifetime>()]),
        &registry,
        &mut queries,
    )?;
    let expire = systems.register(
        SystemDescriptor::new("expire").reads([ComponentType::of::<Lifetime>()]),
        &registry,
        &mut queries,
    )?;
    let bounds = systems.register(
        SystemDescriptor::new("bounds").reads([ComponentType::of::<Position>()]),
        &registry,
        &mut queries,
    )?;

    // Seed the world: movers with lifetimes, plus some inert scenery that
    // shares the Position column but matches fewer queries.
    for i in 0..1024u32 {
        let angle = i as f32 * 0.37;
        let speed = 0.5 + (i % 7) as f32 * 0.4;
        spawn!(
            registry,
            Position([angle.cos() * 3.0, angle.sin() * 3.0, 0.0]),
            Velocity([angle.cos() * speed, angle.sin() * speed, 0.0]),
            Lifetime {
                frames_left: 60 + (i % 180) as i32,
            },
        );
    }
    for i in 0..256u32 {
        spawn!(
            registry,
            Position([(i % 16) as f32 * 8.0, (i / 16) as f32 * 8.0, 0.0]),
        );
    }
    info!(
        entities = registry.entity_count(),
        archetypes = registry.archetype_count(),
        "world seeded"
    );

    let mut timer = FrameTimer::new(60);
    for frame in 0..FRAMES {
        timer.begin();

        // Caches go stale only when the archetype count grew last frame.
        queries.refresh(&registry);

        // Read phase: systems run in parallel, reading chunk memory and
        // recording structural changes. Nothing moves under them.
        let expire_query = queries.get(systems.query_of(expire).unwrap());
        let bounds_query = queries.get(systems.query_of(bounds).unwrap());
        rayon::scope(|scope| {
            let registry = &registry;
            let commands = &commands;
            scope.spawn(move |_| {
                // Expired entities are destroyed; dying ones start fading.
                for view in expire_query.chunks(registry) {
                    let lifetimes = view.column::<Lifetime>();
                    for (entity, lifetime) in view.entities().iter().zip(lifetimes) {
                        if lifetime.frames_left <= 0 {
                            commands.destroy_entity(*entity);
                        } else if lifetime.frames_left == 30 {
                            commands.add_component(*entity, Fading { alpha: 1.0 });
                        }
                    }
                }
            });
            scope.spawn(move |_| {
                // Anything that wandered out of the world dies too.
                for view in bounds_query.chunks(registry) {
                    let positions = view.column::<Position>();
                    for (entity, position) in view.entities().iter().zip(positions) {
                        if Vec3::from_array(position.0).length_squared()
                            > WORLD_RADIUS * WORLD_RADIUS
                        {
                            commands.destroy_entity(*entity);
                        }
                    }
                }
            });
        });

        // Write phase: value updates through exclusive iteration. The same
        // borrow that permits writes forbids concurrent readers.
        let integrate_query = queries.get(systems.query_of(integrate).unwrap());
        integrate_query.for_each_chunk_mut(&mut registry, |mut view| {
            let (velocities, positions) = view.column_pair_mut::<Velocity, Position>();
            for (position, velocity) in positions.iter_mut().zip(velocities) {
                position.0[0] += velocity.0[0];
                position.0[1] += velocity.0[1];
                position.0[2] += velocity.0[2];
            }
        });
        let age_query = queries.get(systems.query_of(age).unwrap());
        age_query.for_each_chunk_mut(&mut registry, |mut view| {
            for lifetime in view.column_mut::<Lifetime>() {
                lifetime.frames_left -= 1;
            }
        });

        // Phase boundary: replay this frame's structural changes serially.
        registry.apply(&mut commands);

        timer.end();
        if frame % 60 == 59 {
            info!(
                frame,
                entities = registry.entity_count(),
                archetypes = registry.archetype_count(),
                frame_ms = timer.frame_time_ms(),
                "frame stats"
            );
        }
    }

    info!(
        entities = registry.entity_count(),
        archetypes = registry.archetype_count(),
        chunks = registry.pool().chunk_count(),
        cold_allocs = registry.pool().cold_allocations(),
        "run complete"
    );
    for (name, value) in registry.counters().snapshot() {
        info!(counter = name, value, "storage counter");
    }

    Ok(())
}
