//! Ring-toss demo driving the asset registry for a few frames

use std::cell::Cell;
use std::process::ExitCode;
use std::rc::Rc;

use ringtoss::prelude::*;

/// Texture data as the game sees it
#[derive(Debug, Clone)]
struct Texture {
    width: u32,
    height: u32,
}

/// Decoded sound effect
#[derive(Debug, Clone)]
struct AudioClip {
    duration_ms: u32,
}

/// A ring landed on a peg
#[derive(Debug)]
struct RingLanded {
    peg: u32,
    points: u32,
}

/// A ring missed every peg
#[derive(Debug)]
struct RingMissed;

const RINGS: usize = 5;
const FRAMES: usize = 4;

fn stock_backend() -> InMemoryBackend {
    let mut backend = InMemoryBackend::with_latency(2);
    backend.register_asset(
        "textures/ring",
        Texture {
            width: 256,
            height: 256,
        },
    );
    backend.register_asset(
        "textures/peg",
        Texture {
            width: 128,
            height: 512,
        },
    );
    backend.register_asset("audio/clink", AudioClip { duration_ms: 340 });
    backend.register_asset("audio/whoosh", AudioClip { duration_ms: 520 });
    backend.register_prefab("prefabs/ring");
    backend.register_scene("Game");
    backend
}

fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut registry = AssetRegistry::new(stock_backend(), config.registry);
    let mut bus = MessageBus::with_config(&config.events);

    let score = Rc::new(Cell::new(0));
    let tally = Rc::clone(&score);
    bus.add_listener::<RingLanded>(move |msg: &RingLanded| {
        tally.set(tally.get() + msg.points);
        log::info!("Ring landed on peg {} for {} points", msg.peg, msg.points);
    });
    bus.add_listener::<RingMissed>(|_: &RingMissed| log::info!("Ring missed"));

    // Kick off background loads; they finish over the next frames
    for key in ["textures/ring", "textures/peg"] {
        registry.load_asset_async::<Texture, _, _>(
            key,
            |key, texture| log::info!("Loaded `{key}` ({}x{})", texture.width, texture.height),
            |key, err| log::warn!("Could not load `{key}`: {err}"),
        )?;
    }
    registry.load_asset_async::<AudioClip, _, _>(
        "audio/clink",
        |key, clip| log::info!("Loaded `{key}` ({} ms)", clip.duration_ms),
        |key, err| log::warn!("Could not load `{key}`: {err}"),
    )?;
    registry.load_scene_async(
        "Game",
        SceneLoadParams::default(),
        |key, scene| log::info!("Scene `{key}` ready (id {})", scene.id()),
        |key, err| log::error!("Scene `{key}` failed: {err}"),
    )?;

    for frame in 0..FRAMES {
        let routed = registry.update();
        log::debug!("Frame {frame}: routed {routed} operation(s)");
    }

    // The whoosh was never requested in the background; block on it
    if let Some(clip) = registry.load_asset::<AudioClip>("audio/whoosh")? {
        log::info!("Whoosh ready ({} ms)", clip.duration_ms);
    }

    for throw in 0..RINGS {
        let Some(ring) = registry.instantiate("prefabs/ring", InstantiateParams::default())? else {
            continue;
        };
        log::debug!("Spawned ring {}", ring.id().raw());

        let peg = u32::try_from(throw).unwrap_or(0);
        if throw % 3 == 2 {
            bus.enqueue(RingMissed);
        } else {
            bus.enqueue(RingLanded {
                peg,
                points: 10 * (peg + 1),
            });
        }
    }
    bus.update();

    log::info!(
        "{} ring(s) on the field, score {}",
        registry.get_instances("prefabs/ring")?.len(),
        score.get()
    );

    let released = registry.release_instances("prefabs/ring")?;
    log::info!("Cleared {released} ring(s)");

    if registry.unload_scene("Game", true)?.is_some() {
        log::info!("Scene `Game` unloaded");
    }

    registry.shutdown();
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => match AppConfig::load(&path) {
            Ok(config) => {
                log::info!("Loaded config from {path}");
                config
            }
            Err(e) => {
                eprintln!("Config error: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => AppConfig::default(),
    };

    if let Err(e) = run(config) {
        eprintln!("Demo error: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
