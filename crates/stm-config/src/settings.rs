//! Run-time switches for the operator executors.
//!
//! `STM_DETERMINISTIC` turns on reproducible runs. Under it the CPU executor
//! reduces every `(batch, channel)` plane on the calling thread in plane
//! order, and benchmark inputs are drawn from `STM_DETERMINISTIC_SEED`
//! (default 42). `STM_DETERMINISTIC_REDUCTION` overrides the reduction half
//! on its own.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use rand::{rngs::StdRng, SeedableRng};

pub const DETERMINISTIC: &str = "STM_DETERMINISTIC";
pub const DETERMINISTIC_SEED: &str = "STM_DETERMINISTIC_SEED";
pub const DETERMINISTIC_REDUCTION: &str = "STM_DETERMINISTIC_REDUCTION";

pub const DEFAULT_SEED: u64 = 42;

/// How the CPU executor may split a reduction across threads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReductionOrder {
    /// Planes may be spread over the rayon pool.
    #[default]
    Free,
    /// Planes are reduced one after another on the calling thread.
    Fixed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSettings {
    pub reduction: ReductionOrder,
    /// Seed for generated inputs; `None` draws from entropy.
    pub input_seed: Option<u64>,
}

fn parse_switch(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

impl RunSettings {
    /// Reads the switches through `lookup`. Unparseable values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let deterministic = lookup(DETERMINISTIC)
            .and_then(|v| parse_switch(&v))
            .unwrap_or(false);
        let fixed = lookup(DETERMINISTIC_REDUCTION)
            .and_then(|v| parse_switch(&v))
            .unwrap_or(deterministic);
        let seed = lookup(DETERMINISTIC_SEED)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_SEED);
        Self {
            reduction: if fixed {
                ReductionOrder::Fixed
            } else {
                ReductionOrder::Free
            },
            input_seed: deterministic.then_some(seed),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Seed for the input stream called `label`, if runs are seeded.
    pub fn seed_for(&self, label: &str) -> Option<u64> {
        self.input_seed.map(|base| {
            let mut hasher = DefaultHasher::new();
            base.hash(&mut hasher);
            label.hash(&mut hasher);
            hasher.finish()
        })
    }
}

static SETTINGS: OnceLock<RunSettings> = OnceLock::new();

/// Settings for this process, read from the environment on first use.
pub fn settings() -> &'static RunSettings {
    SETTINGS.get_or_init(RunSettings::from_env)
}

/// Fixes the settings before the first executor reads them. Returns the
/// settings actually in force, which are the earlier ones if already read.
pub fn pin(settings: RunSettings) -> &'static RunSettings {
    SETTINGS.get_or_init(|| settings)
}

/// True when host reductions must keep a single-threaded plane order.
pub fn lock_reduction_order() -> bool {
    settings().reduction == ReductionOrder::Fixed
}

fn seeded_rng(explicit: Option<u64>, label: &str, settings: &RunSettings) -> StdRng {
    match explicit.or_else(|| settings.seed_for(label)) {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// RNG for generated operator inputs. An explicit seed wins; otherwise the
/// stream is derived from `label` when runs are seeded.
pub fn rng_from_optional(seed: Option<u64>, label: &str) -> StdRng {
    seeded_rng(seed, label, settings())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn draw(mut rng: StdRng) -> Vec<u32> {
        (0..4).map(|_| rng.gen()).collect()
    }

    #[test]
    fn unset_environment_leaves_reductions_free() {
        let settings = RunSettings::from_lookup(lookup(&[]));
        assert_eq!(settings, RunSettings::default());
        assert_eq!(settings.seed_for("input"), None);
    }

    #[test]
    fn deterministic_runs_fix_the_reduction_order() {
        let settings = RunSettings::from_lookup(lookup(&[(DETERMINISTIC, "On")]));
        assert_eq!(settings.reduction, ReductionOrder::Fixed);
        assert_eq!(settings.input_seed, Some(DEFAULT_SEED));
    }

    #[test]
    fn reduction_switch_overrides_the_master_switch() {
        let settings = RunSettings::from_lookup(lookup(&[
            (DETERMINISTIC, "1"),
            (DETERMINISTIC_REDUCTION, "off"),
            (DETERMINISTIC_SEED, "1337"),
        ]));
        assert_eq!(settings.reduction, ReductionOrder::Free);
        assert_eq!(settings.input_seed, Some(1337));

        let settings = RunSettings::from_lookup(lookup(&[(DETERMINISTIC_REDUCTION, "yes")]));
        assert_eq!(settings.reduction, ReductionOrder::Fixed);
        assert_eq!(settings.input_seed, None);
    }

    #[test]
    fn garbage_values_count_as_unset() {
        let settings = RunSettings::from_lookup(lookup(&[
            (DETERMINISTIC, "maybe"),
            (DETERMINISTIC_SEED, "-3"),
        ]));
        assert_eq!(settings, RunSettings::default());
        let settings = RunSettings::from_lookup(lookup(&[
            (DETERMINISTIC, "true"),
            (DETERMINISTIC_SEED, "x"),
        ]));
        assert_eq!(settings.input_seed, Some(DEFAULT_SEED));
    }

    #[test]
    fn seeded_runs_give_each_input_its_own_stream() {
        let settings = RunSettings {
            reduction: ReductionOrder::Fixed,
            input_seed: Some(7),
        };
        assert_eq!(
            draw(seeded_rng(None, "input", &settings)),
            draw(seeded_rng(None, "input", &settings))
        );
        assert_ne!(
            draw(seeded_rng(None, "input", &settings)),
            draw(seeded_rng(None, "bias", &settings))
        );
    }

    #[test]
    fn explicit_seed_ignores_label_and_settings() {
        let unseeded = RunSettings::default();
        let seeded = RunSettings {
            reduction: ReductionOrder::Free,
            input_seed: Some(99),
        };
        assert_eq!(
            draw(seeded_rng(Some(5), "input", &unseeded)),
            draw(seeded_rng(Some(5), "bias", &seeded))
        );
    }
}
