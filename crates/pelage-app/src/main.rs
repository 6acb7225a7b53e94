use anyhow::Result;
use pelage_core::{
    Argb32, ColorSink, CreatureId, CreatureSpec, CreatureWorld, MemoryWorld, PresentationSession,
    RenderError, Style, TintConfig, TintSession,
};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Render sink standing in for the host's model tinting; it just remembers
/// the last color applied per creature.
#[derive(Default)]
struct DemoSink {
    colors: HashMap<CreatureId, u32>,
}

impl ColorSink for DemoSink {
    fn apply(&mut self, id: CreatureId, color: Argb32) -> Result<(), RenderError> {
        self.colors.insert(id, color.value());
        Ok(())
    }
}

fn main() -> Result<()> {
    init_tracing();

    let mut config = TintConfig::load_or_default(Path::new("pelage.json"));
    config.rng_seed.get_or_insert(0xFACA_DEAF_0123_4567);
    info!(seed = ?config.rng_seed, "starting tint engine demo");

    let mut world = MemoryWorld::new();
    let creatures = seed_menagerie(&mut world);

    let mut session = TintSession::new(config.clone());
    let mut presentation = PresentationSession::new(config, DemoSink::default());

    for &id in &creatures {
        session.on_spawn(&mut world, id);
        presentation.on_spawn(&world, id);
    }

    // let a chick roll a tint, then replace it with an adult the way the host
    // simulation does on maturity; the beacon should carry the color across
    let chick = world.spawn(
        CreatureSpec::new("game", "chick")
            .at(5.0, 0.0, 5.0)
            .variant("age", "baby"),
    );
    session.on_spawn(&mut world, chick);
    let rolled = world.tint(chick);

    for _ in 0..8 {
        world.advance_clock(250);
        session.advance(&mut world);
        presentation.advance(&world);
    }

    world.remove(chick);
    let grown = world.spawn(
        CreatureSpec::new("game", "chicken-hen")
            .at(5.0, 0.0, 5.0)
            .variant("age", "adult"),
    );
    session.on_spawn(&mut world, grown);
    match (rolled, world.tint(grown)) {
        (Some(before), Some(after)) if before.color == after.color => {
            info!(argb = after.color.value(), "age-up handoff carried the rolled color");
        }
        (_, after) => {
            info!(?after, "age-up handoff missed; sweep will keep the tint valid");
        }
    }

    // run the world for a few simulated seconds so the sweep and the
    // presentation reapply both get to fire
    for _ in 0..40 {
        world.advance_clock(250);
        session.advance(&mut world);
        presentation.advance(&world);
    }

    let mut histogram: HashMap<&'static str, u32> = HashMap::new();
    for id in world.creatures() {
        if world.is_player(id) {
            continue;
        }
        let label = match world.tint(id).map(|tint| tint.style) {
            Some(Style::SoftHue) => "soft_hue",
            Some(Style::Gray) => "gray",
            Some(Style::Dark) => "dark",
            Some(Style::White) => "white",
            Some(Style::Mutant) => "mutant",
            None => "missing",
        };
        *histogram.entry(label).or_default() += 1;
    }

    info!(
        creatures = world.len(),
        beacons = session.beacon_count(),
        rendered = presentation.sink().colors.len(),
        ?histogram,
        "demo finished"
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn seed_menagerie(world: &mut MemoryWorld) -> Vec<CreatureId> {
    let mut ids = Vec::new();

    for (x, z) in [(0.0, 0.0), (4.0, 2.0), (2.0, 6.0)] {
        ids.push(world.spawn(
            CreatureSpec::new("game", "chicken-hen")
                .at(x, 0.0, z)
                .variant("age", "adult"),
        ));
    }
    for (x, z) in [(1.0, 1.0), (3.0, 4.0)] {
        ids.push(world.spawn(
            CreatureSpec::new("game", "chick")
                .at(x, 0.0, z)
                .variant("age", "baby"),
        ));
    }

    for (path, x, z) in [
        ("wolf-male", 60.0, 0.0),
        ("wolf-female", 63.0, 2.0),
        ("wolf-pup", 61.0, 1.0),
    ] {
        ids.push(world.spawn(CreatureSpec::new("game", path).at(x, 0.0, z)));
    }

    for (x, z) in [(120.0, 0.0), (124.0, 3.0)] {
        ids.push(world.spawn(
            CreatureSpec::new("game", "bear-polar")
                .at(x, 0.0, z)
                .variant("type", "polar")
                .variant("age", "adult"),
        ));
    }

    // a truly parentless juvenile, far from everything
    ids.push(world.spawn(
        CreatureSpec::new("game", "fox-kit")
            .at(300.0, 0.0, 300.0)
            .variant("age", "baby"),
    ));

    ids.push(world.spawn(
        CreatureSpec::new("game", "humanoid")
            .at(10.0, 0.0, 10.0)
            .player(),
    ));

    ids
}
