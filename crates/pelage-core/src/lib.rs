//! Creature tint genetics: persistent style/color assignment, breeding color
//! inheritance with mutation, juvenile age-up handoff beacons, arctic palette
//! enforcement, and the periodic reconciliation sweep that repairs missing or
//! rule-violating tints.
//!
//! The host simulation owns creatures; this crate only reads their variants
//! and positions and read-writes their tint through the [`CreatureWorld`]
//! capability surface. [`MemoryWorld`] is a self-contained host used by the
//! demo binary and the test suites.

use ordered_float::OrderedFloat;
use pelage_index::{NeighborhoodIndex, UniformGridIndex};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap, new_key_type};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, error, warn};

new_key_type! {
    /// Stable handle for creatures backed by a generational slot map.
    pub struct CreatureId;
}

/// Convenience alias for associating side data with creatures.
pub type CreatureMap<T> = SecondaryMap<CreatureId, T>;

/// Radius in world units searched for same-family adults during inheritance.
pub const PARENT_SEARCH_RADIUS: f64 = 16.0;
/// Period of the beacon prune/refresh callback.
pub const BEACON_PERIOD_MS: u64 = 1_000;
/// How long a recorded beacon stays consumable.
pub const BEACON_KEEP_MS: u64 = 4_000;
/// Squared radius inside which a new creature may adopt a beacon.
pub const BEACON_RADIUS_SQ: f64 = 2.5 * 2.5;
/// Period of the reconciliation sweep.
pub const SWEEP_PERIOD_MS: u64 = 5_000;
/// Period of the presentation-side color reapply.
pub const REAPPLY_PERIOD_MS: u64 = 500;

/// Channels closer than this are treated as equal (neutral gray test).
const NEUTRAL_EPSILON: f32 = 1e-4;
/// Minimum parent channel range used when scaling overshoot noise.
const CHANNEL_RANGE_FLOOR: f32 = 0.05;
/// Hard ceiling on the orphan fallback mutation chance, whatever the config says.
const ORPHAN_MUTATION_CAP: f64 = 0.10;
/// Post-mutation drift runs hotter than regular generational drift.
const POST_MUTATION_DRIFT_SCALE: f32 = 1.4;
/// SoftHue channels are floored at this fraction of the gray band minimum.
const SOFT_HUE_FLOOR_SCALE: f32 = 0.9;

fn clamp01(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn rand_range<R: Rng + ?Sized>(rng: &mut R, lo: f32, hi: f32) -> f32 {
    lo + rng.random::<f32>() * (hi - lo)
}

/// Coarse tint category carried alongside the packed color.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Style {
    SoftHue,
    Gray,
    Dark,
    White,
    Mutant,
}

/// Color mutation archetypes, in weight-vector index order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Purple,
    Blue,
    Pink,
    Green,
    DeepBlack,
    PureWhite,
}

impl MutationKind {
    /// All kinds, indexed the same way as the configured weight vector.
    pub const ALL: [Self; 6] = [
        Self::Purple,
        Self::Blue,
        Self::Pink,
        Self::Green,
        Self::DeepBlack,
        Self::PureWhite,
    ];
}

/// Packed opaque color, alpha fixed at 255.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Argb32(pub u32);

impl Argb32 {
    /// Pack three normalized channels, clamping each into `[0, 1]` and
    /// quantizing to 8 bits. Out-of-range inputs are clamped, never rejected.
    #[must_use]
    pub fn pack(r: f32, g: f32, b: f32) -> Self {
        let quantize = |value: f32| (clamp01(value) * 255.0) as u32;
        Self(0xFF00_0000 | (quantize(r) << 16) | (quantize(g) << 8) | quantize(b))
    }

    /// Unpack to normalized channels; round-trip error is at most 1/255 each.
    #[must_use]
    pub fn unpack(self) -> [f32; 3] {
        [
            ((self.0 >> 16) & 0xFF) as f32 / 255.0,
            ((self.0 >> 8) & 0xFF) as f32 / 255.0,
            (self.0 & 0xFF) as f32 / 255.0,
        ]
    }

    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn alpha(self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// True when all three channels are equal within tolerance.
    #[must_use]
    pub fn is_neutral(self) -> bool {
        let [r, g, b] = self.unpack();
        (r - g).abs() < NEUTRAL_EPSILON && (g - b).abs() < NEUTRAL_EPSILON
    }
}

/// Infer a style label from a color produced by blending.
#[must_use]
pub fn classify(color: Argb32, config: &TintConfig) -> Style {
    let [r, g, b] = color.unpack();
    if (r - g).abs() < NEUTRAL_EPSILON && (g - b).abs() < NEUTRAL_EPSILON {
        if r <= config.dark.max {
            Style::Dark
        } else if r >= config.white.min {
            Style::White
        } else {
            Style::Gray
        }
    } else {
        Style::SoftHue
    }
}

/// World-space position of a creature.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    #[must_use]
    pub fn distance_sq(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }
}

/// The persisted style/color pair attached to a creature.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tint {
    pub style: Style,
    pub color: Argb32,
}

/// Species code as the host names creatures, e.g. `game` / `chicken-hen`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CreatureCode {
    pub domain: String,
    pub path: String,
}

impl CreatureCode {
    #[must_use]
    pub fn new(domain: &str, path: &str) -> Self {
        Self {
            domain: domain.to_string(),
            path: path.to_string(),
        }
    }

    /// Canonical family key: juveniles and adults of one animal family map to
    /// the same key regardless of their per-lifestage naming.
    #[must_use]
    pub fn family_key(&self) -> String {
        let path = self.path.to_ascii_lowercase();
        let root = match path.find('-') {
            Some(idx) if idx > 0 => &path[..idx],
            _ => path.as_str(),
        };
        format!("{}:{}", self.domain, canonical_family(root, &path))
    }
}

/// Collapse life-stage and gender name roots onto one family root.
fn canonical_family(root: &str, path: &str) -> String {
    if root == "hen"
        || root == "rooster"
        || root == "chick"
        || path.contains("chicken")
        || path.contains("hen-")
        || path.contains("rooster")
    {
        return "chicken".to_string();
    }
    if root == "duckling" || path.contains("duck") {
        return "duck".to_string();
    }
    if root == "gosling" || path.contains("goose") {
        return "goose".to_string();
    }
    if root == "poult" || path.contains("turkey") {
        return "turkey".to_string();
    }
    if root == "kid" || path.contains("goat") {
        return "goat".to_string();
    }
    if root == "calf" || path.contains("cow") || path.contains("cattle") || path.contains("bull") {
        return "cow".to_string();
    }
    if root == "lamb" || path.contains("sheep") || path.contains("ram") || path.contains("ewe") {
        return "sheep".to_string();
    }
    if root == "fawn" || path.contains("deer") {
        return "deer".to_string();
    }
    if root == "piglet" || path.contains("pig") {
        return "pig".to_string();
    }
    if root == "pup" || path.contains("wolf") {
        return "wolf".to_string();
    }
    if root == "kit" || path.contains("fox") {
        return "fox".to_string();
    }
    if root == "cub" || path.contains("bear") {
        return "bear".to_string();
    }
    root.to_string()
}

/// A `[min, max]` scalar band for the neutral styles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ChannelBand {
    pub min: f32,
    pub max: f32,
}

impl ChannelBand {
    #[must_use]
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }
}

/// Jitter descriptor for the SoftHue style.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SoftHueJitter {
    pub hue_jitter_deg: f32,
    pub sat_min: f32,
    pub sat_max: f32,
    pub light_min: f32,
    pub light_max: f32,
}

/// Errors raised while reading or writing the tint config snapshot.
#[derive(Debug, Error)]
pub enum TintConfigError {
    #[error("failed to read tint config: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse tint config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Process-wide tint configuration, loaded once per session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TintConfig {
    /// Spawn style weights, consumed as raw cumulative thresholds. They are
    /// not renormalized: if they sum below 1 the White bucket absorbs the
    /// remainder, and if they sum above 1 the later buckets starve.
    pub weight_soft_hue: f64,
    pub weight_gray: f64,
    pub weight_dark: f64,
    pub weight_white: f64,

    /// Arctic neutral distribution.
    pub arctic_dark_chance: f64,
    pub arctic_white_chance: f64,

    /// Neutral value bands. White extends past 1.0; packing quantizes down.
    pub gray: ChannelBand,
    pub dark: ChannelBand,
    pub white: ChannelBand,

    pub soft_hue: SoftHueJitter,

    /// Breeding genetics (authoritative side only).
    pub enable_breeding_mutations: bool,
    pub breeding_mutation_chance: f64,

    /// Orphan juvenile fallback; off by default.
    pub enable_orphan_fallback_mutation: bool,
    pub orphan_fallback_mutation_chance: f64,

    pub breed_mix_noise: f32,
    pub breed_overshoot: f32,
    pub breed_drift: f32,
    pub breed_low_clamp: f32,
    pub breed_high_clamp: f32,

    /// Mutation vividness and compounding.
    pub mutation_intensity: f32,
    pub mutant_amplify: f32,
    pub inherit_mutant_bias: f32,

    /// Cumulative weights matching [`MutationKind::ALL`] order.
    pub mutation_weights: [f64; 6],
    pub allow_arctic_mutations: bool,

    /// Kill switches.
    pub server_disable_all: bool,
    pub client_disable_all: bool,

    /// Optional RNG seed for reproducible sessions.
    pub rng_seed: Option<u64>,
}

impl Default for TintConfig {
    fn default() -> Self {
        Self {
            weight_soft_hue: 0.45,
            weight_gray: 0.30,
            weight_dark: 0.15,
            weight_white: 0.10,
            arctic_dark_chance: 0.22,
            arctic_white_chance: 0.18,
            gray: ChannelBand::new(0.70, 1.05),
            dark: ChannelBand::new(0.36, 0.62),
            white: ChannelBand::new(1.05, 1.18),
            soft_hue: SoftHueJitter {
                hue_jitter_deg: 16.0,
                sat_min: 0.06,
                sat_max: 0.22,
                light_min: 0.55,
                light_max: 1.05,
            },
            enable_breeding_mutations: true,
            breeding_mutation_chance: 0.025,
            enable_orphan_fallback_mutation: false,
            orphan_fallback_mutation_chance: 0.001,
            breed_mix_noise: 0.20,
            breed_overshoot: 0.05,
            breed_drift: 0.035,
            breed_low_clamp: 0.08,
            breed_high_clamp: 1.30,
            mutation_intensity: 1.08,
            mutant_amplify: 0.10,
            inherit_mutant_bias: 0.05,
            mutation_weights: [1.0 / 6.0; 6],
            allow_arctic_mutations: true,
            server_disable_all: false,
            client_disable_all: false,
            rng_seed: None,
        }
    }
}

impl TintConfig {
    /// Coerce malformed values into the safe ranges. Malformed config is
    /// never an error: probabilities snap into `[0, 1]`, non-finite values
    /// become inert, inverted bands are reordered.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        fn chance(value: f64) -> f64 {
            if value.is_finite() {
                value.clamp(0.0, 1.0)
            } else {
                0.0
            }
        }
        fn weight(value: f64) -> f64 {
            if value.is_finite() && value > 0.0 {
                value
            } else {
                0.0
            }
        }
        fn band(value: ChannelBand, fallback: ChannelBand) -> ChannelBand {
            if !value.min.is_finite() || !value.max.is_finite() {
                return fallback;
            }
            if value.min > value.max {
                return ChannelBand::new(value.max, value.min);
            }
            value
        }

        let defaults = Self::default();
        self.weight_soft_hue = weight(self.weight_soft_hue);
        self.weight_gray = weight(self.weight_gray);
        self.weight_dark = weight(self.weight_dark);
        self.weight_white = weight(self.weight_white);
        self.arctic_dark_chance = chance(self.arctic_dark_chance);
        self.arctic_white_chance = chance(self.arctic_white_chance);
        self.breeding_mutation_chance = chance(self.breeding_mutation_chance);
        self.orphan_fallback_mutation_chance = chance(self.orphan_fallback_mutation_chance);
        for entry in &mut self.mutation_weights {
            *entry = weight(*entry);
        }
        self.gray = band(self.gray, defaults.gray);
        self.dark = band(self.dark, defaults.dark);
        self.white = band(self.white, defaults.white);
        if !self.breed_low_clamp.is_finite()
            || !self.breed_high_clamp.is_finite()
            || self.breed_low_clamp > self.breed_high_clamp
        {
            self.breed_low_clamp = defaults.breed_low_clamp;
            self.breed_high_clamp = defaults.breed_high_clamp;
        }
        if !self.mutation_intensity.is_finite() || self.mutation_intensity <= 0.0 {
            self.mutation_intensity = 1.0;
        }
        self
    }

    /// Orphan fallback mutation chance after coercion and the hard cap.
    #[must_use]
    pub fn effective_fallback_chance(&self) -> f64 {
        let raw = self.orphan_fallback_mutation_chance;
        let chance = if raw.is_finite() {
            raw.clamp(0.0, 1.0)
        } else {
            0.0
        };
        chance.min(ORPHAN_MUTATION_CAP)
    }

    /// Returns the configured RNG, seeding from entropy if no seed is set.
    #[must_use]
    pub fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::seed_from_u64(rand::random()),
        }
    }

    /// Read a config snapshot from disk.
    pub fn load(path: &Path) -> Result<Self, TintConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str::<Self>(&raw)?.sanitized())
    }

    /// Write the config snapshot to disk.
    pub fn store(&self, path: &Path) -> Result<(), TintConfigError> {
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw)?;
        Ok(())
    }

    /// Load a snapshot, falling back to defaults on any failure; the
    /// effective config is written back so the file gains new fields.
    #[must_use]
    pub fn load_or_default(path: &Path) -> Self {
        let config = match Self::load(path) {
            Ok(config) => config,
            Err(TintConfigError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                Self::default()
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "falling back to default tint config");
                Self::default()
            }
        };
        if let Err(err) = config.store(path) {
            debug!(path = %path.display(), %err, "could not write tint config snapshot");
        }
        config
    }
}

/// HSL to RGB, hue in degrees, all outputs in `[0, 1]`.
fn hsl_to_rgb(hue_deg: f32, sat: f32, light: f32) -> [f32; 3] {
    let c = (1.0 - (2.0 * light - 1.0).abs()) * sat;
    let h = (hue_deg.rem_euclid(360.0)) / 60.0;
    let x = c * (1.0 - ((h % 2.0) - 1.0).abs());
    let m = light - c / 2.0;

    let (r, g, b) = match h {
        h if h < 1.0 => (c, x, 0.0),
        h if h < 2.0 => (x, c, 0.0),
        h if h < 3.0 => (0.0, c, x),
        h if h < 4.0 => (0.0, x, c),
        h if h < 5.0 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    [clamp01(r + m), clamp01(g + m), clamp01(b + m)]
}

/// Weighted spawn style draw. Arctic variants use the neutral distribution;
/// everything else walks the four raw cumulative weights with White as the
/// catch-all bucket.
fn pick_style<R: Rng + ?Sized>(arctic: bool, config: &TintConfig, rng: &mut R) -> Style {
    if arctic {
        let roll = rng.random::<f64>();
        if roll < config.arctic_white_chance {
            return Style::White;
        }
        if roll - config.arctic_white_chance < config.arctic_dark_chance {
            return Style::Dark;
        }
        return Style::Gray;
    }

    let mut roll = rng.random::<f64>();
    if roll < config.weight_soft_hue {
        return Style::SoftHue;
    }
    roll -= config.weight_soft_hue;
    if roll < config.weight_gray {
        return Style::Gray;
    }
    roll -= config.weight_gray;
    if roll < config.weight_dark {
        return Style::Dark;
    }
    Style::White
}

/// Draw one scalar from the style's band and pack it on all three channels.
fn neutral_color<R: Rng + ?Sized>(style: Style, config: &TintConfig, rng: &mut R) -> Argb32 {
    let band = match style {
        Style::White => config.white,
        Style::Dark => config.dark,
        _ => config.gray,
    };
    let value = clamp01(rand_range(rng, band.min, band.max));
    Argb32::pack(value, value, value)
}

/// Generate a spawn color for the picked style. Arctic variants always take
/// the neutral path. SoftHue floors every channel at near-neutral-gray so
/// muted wildlife coloring never reads as near-black.
fn spawn_color<R: Rng + ?Sized>(
    style: Style,
    arctic: bool,
    config: &TintConfig,
    rng: &mut R,
) -> Argb32 {
    if arctic || matches!(style, Style::Gray | Style::Dark | Style::White) {
        return neutral_color(style, config, rng);
    }

    let jitter = &config.soft_hue;
    let mut hue = rand_range(rng, -jitter.hue_jitter_deg, jitter.hue_jitter_deg);
    if hue < 0.0 {
        hue += 360.0;
    }
    let sat = rand_range(rng, jitter.sat_min, jitter.sat_max);
    let light = rand_range(rng, jitter.light_min, jitter.light_max).min(config.white.max);
    let [r, g, b] = hsl_to_rgb(hue, sat, light);

    let floor = config.gray.min * SOFT_HUE_FLOOR_SCALE;
    Argb32::pack(r.max(floor), g.max(floor), b.max(floor))
}

/// Mix two parent colors with noisy interpolation plus per-channel overshoot.
/// A single parent blends with itself, reproducing it with overshoot noise only.
fn blend_with_noise<R: Rng + ?Sized>(
    a: Argb32,
    b: Argb32,
    config: &TintConfig,
    rng: &mut R,
) -> Argb32 {
    let pa = a.unpack();
    let pb = b.unpack();
    let t = (0.5 + (rng.random::<f32>() - 0.5) * 2.0 * config.breed_mix_noise).clamp(0.0, 1.0);

    let mut out = [0.0f32; 3];
    for channel in 0..3 {
        let mixed = lerp(pa[channel], pb[channel], t);
        out[channel] = overshoot_channel(mixed, pa[channel], pb[channel], config.breed_overshoot, rng);
    }
    Argb32::pack(out[0], out[1], out[2])
}

/// Perturbation proportional to the parents' channel range, letting offspring
/// occasionally exceed both parents. Clamping happens when the result packs.
fn overshoot_channel<R: Rng + ?Sized>(
    child: f32,
    p1: f32,
    p2: f32,
    overshoot: f32,
    rng: &mut R,
) -> f32 {
    let range = (p1.max(p2) - p1.min(p2)).max(CHANNEL_RANGE_FLOOR);
    child + (rng.random::<f32>() - 0.5) * 2.0 * overshoot * range
}

/// Per-generation multiplicative drift. The channel value itself is clamped
/// into the breed band, which extends past 1.0; final packing quantizes down.
fn drift_color<R: Rng + ?Sized>(
    color: Argb32,
    drift: f32,
    config: &TintConfig,
    rng: &mut R,
) -> Argb32 {
    let [r, g, b] = color.unpack();
    let mut shift = |value: f32| {
        let factor = 1.0 + (rng.random::<f32>() - 0.5) * 2.0 * drift;
        (value * factor)
            .min(config.breed_high_clamp)
            .max(config.breed_low_clamp)
    };
    let (r, g, b) = (shift(r), shift(g), shift(b));
    Argb32::pack(r, g, b)
}

/// Push channels away from their mean, with a small multiplicative jitter.
/// Used at full strength on mutant offspring and at the inherit-bias strength
/// on non-mutant offspring of a mutant parent.
fn amplify_contrast<R: Rng + ?Sized>(color: Argb32, amount: f32, rng: &mut R) -> Argb32 {
    if amount <= 0.0 {
        return color;
    }
    let [r, g, b] = color.unpack();
    let mean = (r + g + b) / 3.0;
    let jitter = amount * 0.25;
    let mut push = |value: f32| {
        let spread = mean + (value - mean) * (1.0 + amount);
        clamp01(spread * (1.0 + (rng.random::<f32>() - 0.5) * 2.0 * jitter))
    };
    let (r, g, b) = (push(r), push(g), push(b));
    Argb32::pack(r, g, b)
}

/// Walk the weight vector as a cumulative distribution; a degenerate vector
/// falls through to the first kind.
fn pick_mutation<R: Rng + ?Sized>(config: &TintConfig, rng: &mut R) -> MutationKind {
    let mut roll = rng.random::<f64>();
    for (kind, weight) in MutationKind::ALL.iter().zip(config.mutation_weights) {
        roll -= weight;
        if roll <= 0.0 {
            return *kind;
        }
    }
    MutationKind::Purple
}

fn mutated_channel<R: Rng + ?Sized>(rng: &mut R, neutral: f32, lo: f32, hi: f32) -> f32 {
    clamp01(neutral * rand_range(rng, lo, hi))
}

/// Apply a mutation transform relative to the baseline's mean luminance, then
/// run one extra drift pass so mutant lines intensify across generations.
fn apply_mutation<R: Rng + ?Sized>(
    color: Argb32,
    kind: MutationKind,
    config: &TintConfig,
    rng: &mut R,
) -> Argb32 {
    let [r0, g0, b0] = color.unpack();
    let neutral = config.gray.min.max((r0 + g0 + b0) / 3.0);
    let i = config.mutation_intensity;

    let (r, g, b) = match kind {
        MutationKind::DeepBlack => {
            let value = rand_range(rng, 0.15, 0.28);
            (value, value, value)
        }
        MutationKind::PureWhite => {
            let ceiling = (config.white.max + 0.12).min(config.breed_high_clamp);
            let value = clamp01(rand_range(rng, config.white.min + 0.08, ceiling));
            (value, value, value)
        }
        MutationKind::Purple => (
            mutated_channel(rng, neutral, 1.15 * i, 1.35 * i),
            mutated_channel(rng, neutral, 0.55 / i, 0.80 / i),
            mutated_channel(rng, neutral, 1.20 * i, 1.40 * i),
        ),
        MutationKind::Blue => (
            mutated_channel(rng, neutral, 0.55 / i, 0.80 / i),
            mutated_channel(rng, neutral, 0.85 / i, 0.98 / i),
            mutated_channel(rng, neutral, 1.25 * i, 1.45 * i),
        ),
        MutationKind::Pink => (
            mutated_channel(rng, neutral, 1.25 * i, 1.45 * i),
            mutated_channel(rng, neutral, 0.85 / i, 0.98 / i),
            mutated_channel(rng, neutral, 1.05 * i, 1.20 * i),
        ),
        MutationKind::Green => (
            mutated_channel(rng, neutral, 0.55 / i, 0.80 / i),
            mutated_channel(rng, neutral, 1.25 * i, 1.45 * i),
            mutated_channel(rng, neutral, 0.85 / i, 0.98 / i),
        ),
    };

    drift_color(
        Argb32::pack(r, g, b),
        config.breed_drift * POST_MUTATION_DRIFT_SCALE,
        config,
        rng,
    )
}

/// Arctic variants carry only neutral styles unless they are sanctioned mutants.
fn clamp_arctic_style(style: Style) -> Style {
    match style {
        Style::Dark | Style::White => style,
        _ => Style::Gray,
    }
}

/// Errors surfaced by a creature world while servicing tint operations.
#[derive(Debug, Error)]
pub enum WorldError {
    #[error("unknown creature: {0:?}")]
    UnknownCreature(CreatureId),
}

/// The narrow capability surface the engine needs from its host simulation.
///
/// Hosts expose creature enumeration, variant/position reads, tint
/// read-write (writes must mark the value dirty for replication), a player
/// filter, and a millisecond clock. The default radius query is a linear
/// scan; hosts with a spatial index should override [`Self::neighbors_within`].
pub trait CreatureWorld {
    /// Snapshot of every currently loaded creature handle.
    fn creatures(&self) -> Vec<CreatureId>;

    fn contains(&self, id: CreatureId) -> bool;

    /// Player creatures are excluded from every operation in this system.
    fn is_player(&self, id: CreatureId) -> bool;

    fn code(&self, id: CreatureId) -> Option<&CreatureCode>;

    /// Variant lookup; absent variants read as the empty string.
    fn variant(&self, id: CreatureId, name: &str) -> &str;

    fn position(&self, id: CreatureId) -> Option<Position>;

    fn tint(&self, id: CreatureId) -> Option<Tint>;

    fn has_tint(&self, id: CreatureId) -> bool {
        self.tint(id).is_some()
    }

    /// Persist a tint and mark it dirty for replication.
    fn write_tint(&mut self, id: CreatureId, tint: Tint) -> Result<(), WorldError>;

    fn clear_tint(&mut self, id: CreatureId);

    /// Milliseconds elapsed on the simulation clock.
    fn elapsed_ms(&self) -> u64;

    /// Visit creatures within `radius_sq` of `center` with their squared
    /// distance.
    fn neighbors_within(
        &self,
        center: Position,
        radius_sq: f64,
        visit: &mut dyn FnMut(CreatureId, f64),
    ) {
        for id in self.creatures() {
            if let Some(position) = self.position(id) {
                let dist_sq = position.distance_sq(center);
                if dist_sq <= radius_sq {
                    visit(id, dist_sq);
                }
            }
        }
    }
}

const LIFECYCLE_VARIANTS: [&str; 4] = ["age", "stage", "lifestage", "lifeStage"];

const JUVENILE_HINTS: [&str; 33] = [
    "baby",
    "juvenile",
    "child",
    "young",
    "adolescent",
    "foal",
    "whelp",
    "gosling",
    "kitten",
    "puppy",
    "calf",
    "cub",
    "kit",
    "fawn",
    "lamb",
    "kid",
    "pup",
    "offspring",
    "cygnet",
    "joey",
    "piglet",
    "cria",
    "eyas",
    "leveret",
    "chick",
    "puggle",
    "squab",
    "owlet",
    "spiderling",
    "hatchling",
    "duckling",
    "poult",
    "pullet",
];

/// A creature reads as juvenile when any lifecycle variant is present and not
/// "adult", or when its species path carries a known juvenile name root.
pub fn looks_like_juvenile<W: CreatureWorld + ?Sized>(world: &W, id: CreatureId) -> bool {
    for name in LIFECYCLE_VARIANTS {
        let value = world.variant(id, name);
        if !value.is_empty() && !value.eq_ignore_ascii_case("adult") {
            return true;
        }
    }
    let Some(code) = world.code(id) else {
        return false;
    };
    let path = code.path.to_ascii_lowercase();
    JUVENILE_HINTS.iter().any(|hint| path.contains(hint))
}

/// Adult when any lifecycle variant says so; with no lifecycle variants at
/// all, adult means simply "not juvenile-looking".
fn is_adult<W: CreatureWorld + ?Sized>(world: &W, id: CreatureId) -> bool {
    let mut any_lifecycle = false;
    for name in LIFECYCLE_VARIANTS {
        let value = world.variant(id, name);
        if value.eq_ignore_ascii_case("adult") {
            return true;
        }
        if !value.is_empty() {
            any_lifecycle = true;
        }
    }
    !any_lifecycle && !looks_like_juvenile(world, id)
}

fn is_arctic_variant(value: &str) -> bool {
    value.eq_ignore_ascii_case("arctic")
        || value.eq_ignore_ascii_case("polar")
        || value.eq_ignore_ascii_case("panda")
}

fn is_arctic<W: CreatureWorld + ?Sized>(world: &W, id: CreatureId) -> bool {
    is_arctic_variant(world.variant(id, "type"))
}

/// Up to the two nearest same-family adults within the parent search radius.
fn nearby_adults<W: CreatureWorld + ?Sized>(world: &W, child: CreatureId) -> Vec<CreatureId> {
    let Some(center) = world.position(child) else {
        return Vec::new();
    };
    let Some(code) = world.code(child) else {
        return Vec::new();
    };
    let family = code.family_key();

    let mut candidates: Vec<(OrderedFloat<f64>, CreatureId)> = Vec::new();
    world.neighbors_within(
        center,
        PARENT_SEARCH_RADIUS * PARENT_SEARCH_RADIUS,
        &mut |other, dist_sq| {
            if other == child || world.is_player(other) {
                return;
            }
            let Some(other_code) = world.code(other) else {
                return;
            };
            if other_code.family_key() != family {
                return;
            }
            if !is_adult(world, other) {
                return;
            }
            candidates.push((OrderedFloat(dist_sq), other));
        },
    );
    candidates.sort_unstable_by_key(|&(dist, _)| dist);
    candidates.truncate(2);
    candidates.into_iter().map(|(_, id)| id).collect()
}

/// Transient handoff record bridging a juvenile's rolled color to the adult
/// creature instance that replaces it on maturity.
#[derive(Debug, Clone)]
pub struct Beacon {
    pub species_key: String,
    pub position: Position,
    pub style: Style,
    pub color: Argb32,
    pub expires_ms: u64,
}

/// Time- and space-indexed store of age-up handoff beacons.
///
/// Refresh appends without dedup, so a juvenile may be represented by several
/// live beacons at once; consumption tolerates that and the prune pass drains
/// the backlog as entries expire.
#[derive(Debug, Default)]
pub struct BeaconRegistry {
    beacons: Vec<Beacon>,
}

impl BeaconRegistry {
    #[must_use]
    pub fn len(&self) -> usize {
        self.beacons.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty()
    }

    pub fn record(&mut self, beacon: Beacon) {
        self.beacons.push(beacon);
    }

    /// Drop every beacon whose expiry has passed.
    pub fn prune(&mut self, now_ms: u64) {
        self.beacons.retain(|beacon| beacon.expires_ms > now_ms);
    }

    /// Find, remove, and return the first live same-species beacon within the
    /// handoff radius, scanning in reverse-insertion order.
    pub fn consume(&mut self, species_key: &str, position: Position, now_ms: u64) -> Option<Tint> {
        for idx in (0..self.beacons.len()).rev() {
            let beacon = &self.beacons[idx];
            if beacon.expires_ms <= now_ms {
                continue;
            }
            if beacon.species_key != species_key {
                continue;
            }
            if beacon.position.distance_sq(position) > BEACON_RADIUS_SQ {
                continue;
            }
            let beacon = self.beacons.remove(idx);
            return Some(Tint {
                style: beacon.style,
                color: beacon.color,
            });
        }
        None
    }
}

/// Authoritative-side tint session: owns the config, the shared RNG stream,
/// the beacon registry, the periodic timers, and the once-per-session failure
/// log flag. All state lives here rather than in globals so tests can build
/// independent instances.
pub struct TintSession {
    config: TintConfig,
    rng: SmallRng,
    beacons: BeaconRegistry,
    last_beacon_ms: u64,
    last_sweep_ms: u64,
    logged_failure: bool,
}

impl TintSession {
    #[must_use]
    pub fn new(config: TintConfig) -> Self {
        let config = config.sanitized();
        let rng = config.seeded_rng();
        Self {
            config,
            rng,
            beacons: BeaconRegistry::default(),
            last_beacon_ms: 0,
            last_sweep_ms: 0,
            logged_failure: false,
        }
    }

    #[must_use]
    pub fn config(&self) -> &TintConfig {
        &self.config
    }

    #[must_use]
    pub fn beacon_count(&self) -> usize {
        self.beacons.len()
    }

    pub fn beacons_mut(&mut self) -> &mut BeaconRegistry {
        &mut self.beacons
    }

    /// Spawn event hook: run the assignment pipeline, then the arctic guard.
    pub fn on_spawn<W: CreatureWorld>(&mut self, world: &mut W, id: CreatureId) {
        if !world.contains(id) || world.is_player(id) {
            return;
        }
        if let Err(err) = self.ensure_tint(world, id) {
            self.note_failure("spawn", &err);
        }
    }

    /// Load event hook; identical pipeline, kept separate for event wiring.
    pub fn on_loaded<W: CreatureWorld>(&mut self, world: &mut W, id: CreatureId) {
        if !world.contains(id) || world.is_player(id) {
            return;
        }
        if let Err(err) = self.ensure_tint(world, id) {
            self.note_failure("load", &err);
        }
    }

    /// Drive the periodic callbacks from the world clock. Each fires as a
    /// discrete, non-reentrant step; the kill switch skips them entirely.
    pub fn advance<W: CreatureWorld>(&mut self, world: &mut W) {
        let now = world.elapsed_ms();
        if now.saturating_sub(self.last_beacon_ms) >= BEACON_PERIOD_MS {
            self.last_beacon_ms = now;
            if !self.config.server_disable_all {
                self.refresh_beacons(world);
            }
        }
        if now.saturating_sub(self.last_sweep_ms) >= SWEEP_PERIOD_MS {
            self.last_sweep_ms = now;
            if !self.config.server_disable_all {
                self.run_sweep(world);
            }
        }
    }

    /// Prune expired beacons, then record one for every loaded non-player
    /// juvenile that already has a resolved tint.
    pub fn refresh_beacons<W: CreatureWorld>(&mut self, world: &W) {
        if self.config.server_disable_all {
            return;
        }
        let now = world.elapsed_ms();
        self.beacons.prune(now);
        for id in world.creatures() {
            if world.is_player(id) || !looks_like_juvenile(world, id) {
                continue;
            }
            let Some(tint) = world.tint(id) else {
                continue;
            };
            let Some(code) = world.code(id) else {
                continue;
            };
            let Some(position) = world.position(id) else {
                continue;
            };
            self.beacons.record(Beacon {
                species_key: code.family_key(),
                position,
                style: tint.style,
                color: tint.color,
                expires_ms: now + BEACON_KEEP_MS,
            });
        }
    }

    /// Reconciliation backstop: every loaded non-player creature leaves this
    /// pass with a valid tint, and arctic creatures with a compliant one.
    pub fn run_sweep<W: CreatureWorld>(&mut self, world: &mut W) {
        if self.config.server_disable_all {
            return;
        }
        for id in world.creatures() {
            if !world.contains(id) || world.is_player(id) {
                continue;
            }
            if let Err(err) = self.ensure_tint(world, id) {
                self.note_failure("sweep", &err);
            }
        }
    }

    /// The assignment pipeline: beacon consumption, then breeding inheritance
    /// for juveniles, then the orphan fallback, then the spawn assigner, and
    /// finally the arctic guard. Stages after the first to produce a tint are
    /// skipped.
    fn ensure_tint<W: CreatureWorld>(
        &mut self,
        world: &mut W,
        id: CreatureId,
    ) -> Result<(), WorldError> {
        if self.config.server_disable_all {
            world.clear_tint(id);
            return Ok(());
        }

        if !world.has_tint(id) {
            let family = world.code(id).map(CreatureCode::family_key);
            if let (Some(family), Some(position)) = (family, world.position(id)) {
                if let Some(tint) = self.beacons.consume(&family, position, world.elapsed_ms()) {
                    world.write_tint(id, tint)?;
                }
            }
        }

        if !world.has_tint(id) && looks_like_juvenile(world, id) {
            if let Some(tint) = self.breeding_inheritance(world, id) {
                world.write_tint(id, tint)?;
            }
        }

        if !world.has_tint(id) {
            if let Some(tint) = self.orphan_fallback(world, id) {
                world.write_tint(id, tint)?;
            }
        }

        if !world.has_tint(id) {
            let arctic = is_arctic(world, id);
            let style = pick_style(arctic, &self.config, &mut self.rng);
            let color = spawn_color(style, arctic, &self.config, &mut self.rng);
            world.write_tint(id, Tint { style, color })?;
        }

        self.enforce_arctic_rule(world, id)
    }

    /// Blend the nearest adults' colors with drift and the mutation roll.
    fn breeding_inheritance<W: CreatureWorld>(
        &mut self,
        world: &W,
        child: CreatureId,
    ) -> Option<Tint> {
        let parents = nearby_adults(world, child);
        let tints: Vec<Tint> = parents.iter().filter_map(|&parent| world.tint(parent)).collect();
        let first = *tints.first()?;
        let second = tints.get(1).copied().unwrap_or(first);

        let mut color = blend_with_noise(first.color, second.color, &self.config, &mut self.rng);
        color = drift_color(color, self.config.breed_drift, &self.config, &mut self.rng);

        let parent_mutant = tints.iter().any(|tint| tint.style == Style::Mutant);

        let mut style;
        if self.config.enable_breeding_mutations
            && self.rng.random::<f64>() < self.config.breeding_mutation_chance
        {
            let kind = pick_mutation(&self.config, &mut self.rng);
            color = apply_mutation(color, kind, &self.config, &mut self.rng);
            if parent_mutant {
                color = amplify_contrast(color, self.config.mutant_amplify, &mut self.rng);
            }
            style = Style::Mutant;
        } else {
            if parent_mutant {
                color = amplify_contrast(color, self.config.inherit_mutant_bias, &mut self.rng);
            }
            style = classify(color, &self.config);
        }

        if is_arctic(world, child) && !(style == Style::Mutant && self.config.allow_arctic_mutations)
        {
            style = clamp_arctic_style(style);
            color = neutral_color(style, &self.config, &mut self.rng);
        }

        Some(Tint { style, color })
    }

    /// Fresh spawn-style tint for truly parentless juveniles, with a second,
    /// independently-capped mutation chance. Gated on the explicit enable
    /// flag and on genuinely finding no adults nearby.
    fn orphan_fallback<W: CreatureWorld>(&mut self, world: &W, child: CreatureId) -> Option<Tint> {
        if !looks_like_juvenile(world, child) {
            return None;
        }
        if !self.config.enable_orphan_fallback_mutation {
            return None;
        }
        if !nearby_adults(world, child).is_empty() {
            return None;
        }

        let arctic = is_arctic(world, child);
        let base_style = pick_style(arctic, &self.config, &mut self.rng);
        let mut color = spawn_color(base_style, arctic, &self.config, &mut self.rng);

        let chance = self.config.effective_fallback_chance();
        let mut mutated = false;
        let mut style;
        if self.config.enable_breeding_mutations && self.rng.random::<f64>() < chance {
            let kind = pick_mutation(&self.config, &mut self.rng);
            color = apply_mutation(color, kind, &self.config, &mut self.rng);
            mutated = true;
            style = Style::Mutant;
        } else {
            style = classify(color, &self.config);
        }

        if arctic && !(mutated && self.config.allow_arctic_mutations) {
            style = clamp_arctic_style(style);
            color = neutral_color(style, &self.config, &mut self.rng);
        }

        Some(Tint { style, color })
    }

    /// Neutral-palette guardrail for arctic variants. Sanctioned mutants and
    /// already-neutral colors pass through untouched, so the guard is
    /// idempotent; anything else is rerolled from the arctic distribution.
    fn enforce_arctic_rule<W: CreatureWorld>(
        &mut self,
        world: &mut W,
        id: CreatureId,
    ) -> Result<(), WorldError> {
        if !is_arctic(world, id) {
            return Ok(());
        }
        let Some(tint) = world.tint(id) else {
            return Ok(());
        };
        if tint.style == Style::Mutant && self.config.allow_arctic_mutations {
            return Ok(());
        }
        if tint.color.is_neutral() {
            return Ok(());
        }

        let roll = self.rng.random::<f64>();
        let style = if roll < self.config.arctic_white_chance {
            Style::White
        } else if roll < self.config.arctic_white_chance + self.config.arctic_dark_chance {
            Style::Dark
        } else {
            Style::Gray
        };
        let color = neutral_color(style, &self.config, &mut self.rng);
        world.write_tint(id, Tint { style, color })
    }

    /// One faulty creature must not abort the rest of a callback: failures
    /// are reported once per session, then suppressed.
    fn note_failure(&mut self, stage: &'static str, err: &WorldError) {
        if self.logged_failure {
            return;
        }
        self.logged_failure = true;
        error!(stage, %err, "tint pipeline failure; suppressing further reports this session");
    }
}

/// Render-side color application failure. Never propagated past the session.
#[derive(Debug, Error)]
#[error("render color rejected: {0}")]
pub struct RenderError(pub &'static str);

/// Presentation-side sink accepting the final packed color per creature.
pub trait ColorSink {
    fn apply(&mut self, id: CreatureId, color: Argb32) -> Result<(), RenderError>;
}

/// Presentation-side session. Externally-owned render state can be reset by
/// unrelated systems, so replicated tints are re-applied periodically; this
/// side never mutates tint state.
pub struct PresentationSession<S: ColorSink> {
    config: TintConfig,
    sink: S,
    last_apply_ms: u64,
    logged_failure: bool,
}

impl<S: ColorSink> PresentationSession<S> {
    #[must_use]
    pub fn new(config: TintConfig, sink: S) -> Self {
        Self {
            config: config.sanitized(),
            sink,
            last_apply_ms: 0,
            logged_failure: false,
        }
    }

    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Apply every replicated tint, e.g. once when the level finishes loading.
    pub fn apply_all<W: CreatureWorld>(&mut self, world: &W) {
        if self.config.client_disable_all {
            return;
        }
        for id in world.creatures() {
            self.apply_one(world, id);
        }
    }

    pub fn on_spawn<W: CreatureWorld>(&mut self, world: &W, id: CreatureId) {
        if self.config.client_disable_all {
            return;
        }
        self.apply_one(world, id);
    }

    /// Periodic reapply on the presentation clock.
    pub fn advance<W: CreatureWorld>(&mut self, world: &W) {
        let now = world.elapsed_ms();
        if now.saturating_sub(self.last_apply_ms) < REAPPLY_PERIOD_MS {
            return;
        }
        self.last_apply_ms = now;
        self.apply_all(world);
    }

    fn apply_one<W: CreatureWorld>(&mut self, world: &W, id: CreatureId) {
        if world.is_player(id) {
            return;
        }
        let Some(tint) = world.tint(id) else {
            return;
        };
        if let Err(err) = self.sink.apply(id, tint.color) {
            if !self.logged_failure {
                self.logged_failure = true;
                warn!(%err, "color sink rejected a creature; suppressing further reports this session");
            }
        }
    }
}

/// Blueprint for spawning a creature into a [`MemoryWorld`].
#[derive(Debug, Clone)]
pub struct CreatureSpec {
    pub code: CreatureCode,
    pub position: Position,
    pub variants: Vec<(String, String)>,
    pub player: bool,
}

impl CreatureSpec {
    #[must_use]
    pub fn new(domain: &str, path: &str) -> Self {
        Self {
            code: CreatureCode::new(domain, path),
            position: Position::default(),
            variants: Vec::new(),
            player: false,
        }
    }

    #[must_use]
    pub fn at(mut self, x: f64, y: f64, z: f64) -> Self {
        self.position = Position::new(x, y, z);
        self
    }

    #[must_use]
    pub fn variant(mut self, name: &str, value: &str) -> Self {
        self.variants.push((name.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn player(mut self) -> Self {
        self.player = true;
        self
    }
}

#[derive(Debug, Clone)]
struct CreatureRecord {
    code: CreatureCode,
    position: Position,
    variants: HashMap<String, String>,
    player: bool,
    tint: Option<Tint>,
    dirty: bool,
}

/// Self-contained in-memory creature world. Implements the full capability
/// surface, backs radius queries with a uniform grid index, and exposes the
/// mutation hooks the demo binary and tests drive the engine with.
#[derive(Debug)]
pub struct MemoryWorld {
    creatures: SlotMap<CreatureId, CreatureRecord>,
    index: UniformGridIndex,
    index_ids: Vec<CreatureId>,
    clock_ms: u64,
}

impl Default for MemoryWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWorld {
    #[must_use]
    pub fn new() -> Self {
        Self {
            creatures: SlotMap::with_key(),
            index: UniformGridIndex::default(),
            index_ids: Vec::new(),
            clock_ms: 0,
        }
    }

    pub fn spawn(&mut self, spec: CreatureSpec) -> CreatureId {
        let CreatureSpec {
            code,
            position,
            variants,
            player,
        } = spec;
        let id = self.creatures.insert(CreatureRecord {
            code,
            position,
            variants: variants.into_iter().collect(),
            player,
            tint: None,
            dirty: false,
        });
        self.reindex();
        id
    }

    pub fn remove(&mut self, id: CreatureId) -> bool {
        let removed = self.creatures.remove(id).is_some();
        if removed {
            self.reindex();
        }
        removed
    }

    pub fn set_position(&mut self, id: CreatureId, position: Position) {
        if let Some(record) = self.creatures.get_mut(id) {
            record.position = position;
            self.reindex();
        }
    }

    pub fn set_variant(&mut self, id: CreatureId, name: &str, value: &str) {
        if let Some(record) = self.creatures.get_mut(id) {
            record
                .variants
                .insert(name.to_string(), value.to_string());
        }
    }

    /// Advance the simulation clock; all periodic callbacks key off this.
    pub fn advance_clock(&mut self, delta_ms: u64) {
        self.clock_ms = self.clock_ms.saturating_add(delta_ms);
    }

    /// Take-and-clear the replication dirty flag for one creature.
    pub fn take_dirty(&mut self, id: CreatureId) -> bool {
        self.creatures
            .get_mut(id)
            .is_some_and(|record| std::mem::take(&mut record.dirty))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.creatures.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.creatures.is_empty()
    }

    fn reindex(&mut self) {
        self.index_ids.clear();
        let mut positions = Vec::with_capacity(self.creatures.len());
        for (id, record) in &self.creatures {
            self.index_ids.push(id);
            positions.push([record.position.x, record.position.y, record.position.z]);
        }
        if let Err(err) = self.index.rebuild(&positions) {
            error!(%err, "failed to rebuild creature index");
        }
    }
}

impl CreatureWorld for MemoryWorld {
    fn creatures(&self) -> Vec<CreatureId> {
        self.creatures.keys().collect()
    }

    fn contains(&self, id: CreatureId) -> bool {
        self.creatures.contains_key(id)
    }

    fn is_player(&self, id: CreatureId) -> bool {
        self.creatures.get(id).is_some_and(|record| record.player)
    }

    fn code(&self, id: CreatureId) -> Option<&CreatureCode> {
        self.creatures.get(id).map(|record| &record.code)
    }

    fn variant(&self, id: CreatureId, name: &str) -> &str {
        self.creatures
            .get(id)
            .and_then(|record| record.variants.get(name))
            .map_or("", String::as_str)
    }

    fn position(&self, id: CreatureId) -> Option<Position> {
        self.creatures.get(id).map(|record| record.position)
    }

    fn tint(&self, id: CreatureId) -> Option<Tint> {
        self.creatures.get(id).and_then(|record| record.tint)
    }

    fn write_tint(&mut self, id: CreatureId, tint: Tint) -> Result<(), WorldError> {
        let record = self
            .creatures
            .get_mut(id)
            .ok_or(WorldError::UnknownCreature(id))?;
        record.tint = Some(tint);
        record.dirty = true;
        Ok(())
    }

    fn clear_tint(&mut self, id: CreatureId) {
        if let Some(record) = self.creatures.get_mut(id) {
            if record.tint.take().is_some() {
                record.dirty = true;
            }
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.clock_ms
    }

    fn neighbors_within(
        &self,
        center: Position,
        radius_sq: f64,
        visit: &mut dyn FnMut(CreatureId, f64),
    ) {
        self.index.within(
            [center.x, center.y, center.z],
            radius_sq,
            &mut |slot, dist_sq| {
                if let Some(&id) = self.index_ids.get(slot) {
                    visit(id, dist_sq.into_inner());
                }
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(seed: u64) -> SmallRng {
        SmallRng::seed_from_u64(seed)
    }

    #[test]
    fn pack_clamps_and_fixes_alpha() {
        let color = Argb32::pack(1.5, -0.3, 0.5);
        assert_eq!(color.alpha(), 255);
        let [r, g, b] = color.unpack();
        assert!((r - 1.0).abs() < 1e-6);
        assert!(g.abs() < 1e-6);
        assert!((b - 0.5).abs() <= 1.0 / 255.0);
    }

    #[test]
    fn pack_unpack_round_trip_within_one_step() {
        let mut rng = seeded(11);
        for _ in 0..256 {
            let (r, g, b) = (
                rng.random::<f32>(),
                rng.random::<f32>(),
                rng.random::<f32>(),
            );
            let [ur, ug, ub] = Argb32::pack(r, g, b).unpack();
            assert!((ur - r).abs() <= 1.0 / 255.0);
            assert!((ug - g).abs() <= 1.0 / 255.0);
            assert!((ub - b).abs() <= 1.0 / 255.0);
        }
    }

    #[test]
    fn classify_splits_neutral_bands() {
        let config = TintConfig::default();
        assert_eq!(classify(Argb32::pack(0.5, 0.5, 0.5), &config), Style::Dark);
        assert_eq!(classify(Argb32::pack(0.8, 0.8, 0.8), &config), Style::Gray);
        assert_eq!(
            classify(Argb32::pack(0.6, 0.8, 0.7), &config),
            Style::SoftHue
        );

        let mut bright_white = TintConfig::default();
        bright_white.white = ChannelBand::new(0.90, 1.10);
        assert_eq!(
            classify(Argb32::pack(0.95, 0.95, 0.95), &bright_white),
            Style::White
        );
    }

    #[test]
    fn spawn_styles_track_configured_weights() {
        let config = TintConfig::default();
        let mut rng = seeded(42);
        let mut counts = [0u32; 4];
        const DRAWS: u32 = 20_000;
        for _ in 0..DRAWS {
            match pick_style(false, &config, &mut rng) {
                Style::SoftHue => counts[0] += 1,
                Style::Gray => counts[1] += 1,
                Style::Dark => counts[2] += 1,
                Style::White => counts[3] += 1,
                Style::Mutant => unreachable!("spawn draw never yields mutant"),
            }
        }
        let expected = [0.45, 0.30, 0.15, 0.10];
        for (count, expect) in counts.iter().zip(expected) {
            let freq = f64::from(*count) / f64::from(DRAWS);
            assert!(
                (freq - expect).abs() < 0.02,
                "frequency {freq} too far from {expect}"
            );
        }
    }

    #[test]
    fn arctic_spawn_styles_track_configured_chances() {
        let config = TintConfig::default();
        let mut rng = seeded(43);
        let mut counts = [0u32; 3];
        const DRAWS: u32 = 20_000;
        for _ in 0..DRAWS {
            match pick_style(true, &config, &mut rng) {
                Style::White => counts[0] += 1,
                Style::Dark => counts[1] += 1,
                Style::Gray => counts[2] += 1,
                other => unreachable!("arctic draw yielded {other:?}"),
            }
        }
        let expected = [0.18, 0.22, 0.60];
        for (count, expect) in counts.iter().zip(expected) {
            let freq = f64::from(*count) / f64::from(DRAWS);
            assert!(
                (freq - expect).abs() < 0.02,
                "frequency {freq} too far from {expect}"
            );
        }
    }

    #[test]
    fn underweight_vector_lets_white_absorb_remainder() {
        let mut config = TintConfig::default();
        config.weight_soft_hue = 0.1;
        config.weight_gray = 0.1;
        config.weight_dark = 0.1;
        config.weight_white = 0.0;
        let mut rng = seeded(44);
        let mut white = 0u32;
        const DRAWS: u32 = 20_000;
        for _ in 0..DRAWS {
            if pick_style(false, &config, &mut rng) == Style::White {
                white += 1;
            }
        }
        let freq = f64::from(white) / f64::from(DRAWS);
        assert!(
            (freq - 0.7).abs() < 0.02,
            "white bucket should absorb the unassigned 0.7, got {freq}"
        );
    }

    #[test]
    fn neutral_white_band_saturates_to_pure_white() {
        let config = TintConfig::default();
        let mut rng = seeded(45);
        for _ in 0..32 {
            let color = neutral_color(Style::White, &config, &mut rng);
            assert_eq!(color.value(), 0xFFFF_FFFF);
        }
    }

    #[test]
    fn soft_hue_color_never_drops_below_gray_floor() {
        let config = TintConfig::default();
        let floor = config.gray.min * 0.9 - 1.0 / 255.0;
        let mut rng = seeded(46);
        for _ in 0..256 {
            let color = spawn_color(Style::SoftHue, false, &config, &mut rng);
            for channel in color.unpack() {
                assert!(channel >= floor, "channel {channel} below floor {floor}");
            }
        }
    }

    #[test]
    fn arctic_spawn_color_is_always_neutral() {
        let config = TintConfig::default();
        let mut rng = seeded(47);
        for _ in 0..64 {
            let color = spawn_color(Style::SoftHue, true, &config, &mut rng);
            assert!(color.is_neutral());
        }
    }

    #[test]
    fn identical_parents_blend_without_bias() {
        let config = TintConfig::default();
        let parent = Argb32::pack(0.6, 0.6, 0.6);
        let mut rng = seeded(48);
        let mut sums = [0.0f64; 3];
        const DRAWS: usize = 4_000;
        for _ in 0..DRAWS {
            let blended = blend_with_noise(parent, parent, &config, &mut rng);
            let drifted = drift_color(blended, config.breed_drift, &config, &mut rng);
            for (sum, channel) in sums.iter_mut().zip(drifted.unpack()) {
                *sum += f64::from(channel);
            }
        }
        for sum in sums {
            let mean = sum / DRAWS as f64;
            assert!(
                (mean - 0.6).abs() < 0.01,
                "mean {mean} drifted away from the parent value"
            );
        }
    }

    #[test]
    fn overshoot_spread_is_bounded_by_config() {
        let config = TintConfig::default();
        let parent = Argb32::pack(0.6, 0.6, 0.6);
        let mut rng = seeded(49);
        // identical parents: range floor 0.05 * overshoot 0.05 => ±0.0025,
        // then drift ±0.035 multiplicative, plus a quantization step each way
        let bound = 0.6 * config.breed_drift + 0.0025 + 2.0 / 255.0;
        for _ in 0..2_000 {
            let blended = blend_with_noise(parent, parent, &config, &mut rng);
            let drifted = drift_color(blended, config.breed_drift, &config, &mut rng);
            for channel in drifted.unpack() {
                assert!(
                    (channel - 0.6).abs() <= bound + 1e-4,
                    "channel {channel} outside spread bound"
                );
            }
        }
    }

    #[test]
    fn drift_respects_low_clamp() {
        let mut config = TintConfig::default();
        config.breed_low_clamp = 0.25;
        let near_black = Argb32::pack(0.02, 0.02, 0.02);
        let mut rng = seeded(50);
        let drifted = drift_color(near_black, config.breed_drift, &config, &mut rng);
        for channel in drifted.unpack() {
            assert!(channel >= 0.25 - 1.0 / 255.0);
        }
    }

    #[test]
    fn degenerate_mutation_weights_fall_back_to_first_kind() {
        let mut config = TintConfig::default();
        config.mutation_weights = [0.0; 6];
        let mut rng = seeded(51);
        for _ in 0..16 {
            assert_eq!(pick_mutation(&config, &mut rng), MutationKind::Purple);
        }
    }

    #[test]
    fn mutation_kinds_shape_channels_as_advertised() {
        let config = TintConfig::default();
        let base = Argb32::pack(0.8, 0.8, 0.8);
        let mut rng = seeded(52);
        for _ in 0..64 {
            let [r, g, b] = apply_mutation(base, MutationKind::Purple, &config, &mut rng).unpack();
            assert!(r > g && b > g, "purple should suppress green: {r} {g} {b}");

            let [r, g, b] = apply_mutation(base, MutationKind::Green, &config, &mut rng).unpack();
            assert!(g > r && g > b, "green should dominate: {r} {g} {b}");

            let [r, g, b] = apply_mutation(base, MutationKind::Blue, &config, &mut rng).unpack();
            assert!(b > r && b > g, "blue should dominate: {r} {g} {b}");

            let channels = apply_mutation(base, MutationKind::DeepBlack, &config, &mut rng).unpack();
            assert!(channels.iter().all(|&c| c < 0.35), "deep black too bright");

            let channels = apply_mutation(base, MutationKind::PureWhite, &config, &mut rng).unpack();
            assert!(channels.iter().all(|&c| c > 0.9), "pure white too dark");
        }
    }

    #[test]
    fn amplify_contrast_pushes_channels_apart() {
        let color = Argb32::pack(0.9, 0.5, 0.9);
        let mut rng = seeded(53);
        let [r, g, b] = amplify_contrast(color, 0.10, &mut rng).unpack();
        assert!(r - g > 0.9 - 0.5 - 0.05, "contrast should not shrink");
        assert!(b > g);
    }

    #[test]
    fn fallback_chance_is_coerced_and_capped() {
        let mut config = TintConfig::default();
        config.orphan_fallback_mutation_chance = 2.0;
        assert!((config.effective_fallback_chance() - 0.10).abs() < 1e-12);
        config.orphan_fallback_mutation_chance = -1.0;
        assert_eq!(config.effective_fallback_chance(), 0.0);
        config.orphan_fallback_mutation_chance = f64::NAN;
        assert_eq!(config.effective_fallback_chance(), 0.0);
        config.orphan_fallback_mutation_chance = 0.05;
        assert!((config.effective_fallback_chance() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn sanitize_coerces_malformed_probabilities() {
        let mut config = TintConfig::default();
        config.weight_gray = f64::NAN;
        config.breeding_mutation_chance = 7.0;
        config.gray = ChannelBand::new(1.0, 0.5);
        config.breed_low_clamp = 2.0;
        config.breed_high_clamp = 0.1;
        config.mutation_intensity = f32::NAN;

        let config = config.sanitized();
        assert_eq!(config.weight_gray, 0.0);
        assert_eq!(config.breeding_mutation_chance, 1.0);
        assert!(config.gray.min <= config.gray.max);
        assert!(config.breed_low_clamp <= config.breed_high_clamp);
        assert_eq!(config.mutation_intensity, 1.0);
    }

    #[test]
    fn family_key_collapses_lifestage_roots() {
        let hen = CreatureCode::new("game", "chicken-hen");
        let rooster = CreatureCode::new("game", "rooster-brown");
        let chick = CreatureCode::new("game", "chick");
        assert_eq!(hen.family_key(), "game:chicken");
        assert_eq!(rooster.family_key(), "game:chicken");
        assert_eq!(chick.family_key(), "game:chicken");

        assert_eq!(
            CreatureCode::new("game", "calf-female").family_key(),
            "game:cow"
        );
        assert_eq!(
            CreatureCode::new("game", "piglet-wild").family_key(),
            "game:pig"
        );
        assert_eq!(
            CreatureCode::new("game", "bear-cub").family_key(),
            "game:bear"
        );
        assert_eq!(
            CreatureCode::new("game", "lynx-male").family_key(),
            "game:lynx"
        );
        assert_ne!(
            CreatureCode::new("mod", "lynx-male").family_key(),
            CreatureCode::new("game", "lynx-male").family_key()
        );
    }

    #[test]
    fn juvenile_detection_uses_variants_then_path_hints() {
        let mut world = MemoryWorld::new();
        let tagged = world.spawn(CreatureSpec::new("game", "lynx-male").variant("age", "baby"));
        let adult = world.spawn(CreatureSpec::new("game", "lynx-male").variant("age", "adult"));
        let hinted = world.spawn(CreatureSpec::new("game", "bear-cub"));
        let plain = world.spawn(CreatureSpec::new("game", "lynx-male"));

        assert!(looks_like_juvenile(&world, tagged));
        assert!(!looks_like_juvenile(&world, adult));
        assert!(looks_like_juvenile(&world, hinted));
        assert!(!looks_like_juvenile(&world, plain));

        assert!(is_adult(&world, adult));
        assert!(!is_adult(&world, tagged));
        assert!(!is_adult(&world, hinted));
        // no lifecycle variants at all: adult iff not juvenile-looking
        assert!(is_adult(&world, plain));
    }

    #[test]
    fn nearby_adults_orders_by_distance_and_takes_two() {
        let mut world = MemoryWorld::new();
        let child = world.spawn(
            CreatureSpec::new("game", "chick")
                .at(0.0, 0.0, 0.0)
                .variant("age", "baby"),
        );
        let far = world.spawn(
            CreatureSpec::new("game", "chicken-hen")
                .at(10.0, 0.0, 0.0)
                .variant("age", "adult"),
        );
        let near = world.spawn(
            CreatureSpec::new("game", "chicken-hen")
                .at(2.0, 0.0, 0.0)
                .variant("age", "adult"),
        );
        let mid = world.spawn(
            CreatureSpec::new("game", "rooster-brown")
                .at(5.0, 0.0, 0.0)
                .variant("age", "adult"),
        );
        // outside the radius, and a different family inside it
        world.spawn(
            CreatureSpec::new("game", "chicken-hen")
                .at(30.0, 0.0, 0.0)
                .variant("age", "adult"),
        );
        world.spawn(
            CreatureSpec::new("game", "wolf-male")
                .at(1.0, 0.0, 0.0)
                .variant("age", "adult"),
        );

        let parents = nearby_adults(&world, child);
        assert_eq!(parents, vec![near, mid]);
        let _ = far;
    }

    #[test]
    fn beacon_consumption_prefers_reverse_insertion_order() {
        let mut registry = BeaconRegistry::default();
        let position = Position::new(0.0, 0.0, 0.0);
        registry.record(Beacon {
            species_key: "game:chicken".to_string(),
            position,
            style: Style::Gray,
            color: Argb32::pack(0.7, 0.7, 0.7),
            expires_ms: 4_000,
        });
        registry.record(Beacon {
            species_key: "game:chicken".to_string(),
            position,
            style: Style::Dark,
            color: Argb32::pack(0.4, 0.4, 0.4),
            expires_ms: 4_000,
        });

        let adopted = registry.consume("game:chicken", position, 0).expect("match");
        assert_eq!(adopted.style, Style::Dark);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn beacon_matching_respects_species_radius_and_expiry() {
        let mut registry = BeaconRegistry::default();
        let origin = Position::new(0.0, 0.0, 0.0);
        registry.record(Beacon {
            species_key: "game:chicken".to_string(),
            position: origin,
            style: Style::Gray,
            color: Argb32::pack(0.8, 0.8, 0.8),
            expires_ms: 4_000,
        });

        assert!(registry.consume("game:wolf", origin, 0).is_none());
        assert!(
            registry
                .consume("game:chicken", Position::new(3.0, 0.0, 0.0), 0)
                .is_none()
        );
        assert!(registry.consume("game:chicken", origin, 4_001).is_none());
        assert!(registry.consume("game:chicken", origin, 3_999).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn beacon_prune_drops_expired_entries() {
        let mut registry = BeaconRegistry::default();
        for expiry in [1_000, 2_000, 3_000] {
            registry.record(Beacon {
                species_key: "game:fox".to_string(),
                position: Position::default(),
                style: Style::SoftHue,
                color: Argb32::pack(0.8, 0.7, 0.6),
                expires_ms: expiry,
            });
        }
        registry.prune(2_000);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn memory_world_marks_tint_writes_dirty() {
        let mut world = MemoryWorld::new();
        let id = world.spawn(CreatureSpec::new("game", "fox-male"));
        assert!(!world.take_dirty(id));

        let tint = Tint {
            style: Style::Gray,
            color: Argb32::pack(0.8, 0.8, 0.8),
        };
        world.write_tint(id, tint).expect("write");
        assert!(world.take_dirty(id));
        assert!(!world.take_dirty(id));
        assert_eq!(world.tint(id), Some(tint));

        world.clear_tint(id);
        assert!(world.take_dirty(id));
        assert!(world.tint(id).is_none());

        world.remove(id);
        assert!(world.write_tint(id, tint).is_err());
    }

    #[test]
    fn hsl_conversion_hits_reference_points() {
        let [r, g, b] = hsl_to_rgb(0.0, 0.0, 0.75);
        assert!((r - 0.75).abs() < 1e-6 && (g - 0.75).abs() < 1e-6 && (b - 0.75).abs() < 1e-6);

        let [r, g, b] = hsl_to_rgb(120.0, 1.0, 0.5);
        assert!(r < 1e-6 && (g - 1.0).abs() < 1e-6 && b < 1e-6);

        let [r, g, b] = hsl_to_rgb(-30.0, 0.5, 0.5);
        let [r2, g2, b2] = hsl_to_rgb(330.0, 0.5, 0.5);
        assert!((r - r2).abs() < 1e-6 && (g - g2).abs() < 1e-6 && (b - b2).abs() < 1e-6);
    }
}
