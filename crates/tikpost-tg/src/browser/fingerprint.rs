use rand::prelude::*;
use std::ops::RangeInclusive;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

const VIEWPORT_WIDTH: RangeInclusive<u32> = 1200..=1400;
const VIEWPORT_HEIGHT: RangeInclusive<u32> = 800..=1000;
const DEVICE_SCALE_FACTORS: &[f64] = &[1.0, 1.5, 2.0];
const LATITUDE: RangeInclusive<f64> = 50.0..=60.0;
const LONGITUDE: RangeInclusive<f64> = 30.0..=40.0;
const ACCURACY_METERS: RangeInclusive<u32> = 10..=100;

/// Randomized identity of the browser. It's generated once per browser
/// launch and shared by all tasks until the browser is restarted.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Fingerprint {
    pub(crate) user_agent: String,
    pub(crate) viewport: Viewport,
    pub(crate) device_scale_factor: f64,
    pub(crate) geolocation: Geolocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Viewport {
    pub(crate) width: u32,
    pub(crate) height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Geolocation {
    pub(crate) latitude: f64,
    pub(crate) longitude: f64,
    pub(crate) accuracy: u32,
}

impl Fingerprint {
    pub(crate) fn random() -> Self {
        Self::random_with(&mut rand::thread_rng())
    }

    pub(crate) fn random_with(rng: &mut impl Rng) -> Self {
        Self {
            user_agent: (*pick(rng, USER_AGENTS)).to_owned(),
            viewport: Viewport {
                width: rng.gen_range(VIEWPORT_WIDTH),
                height: rng.gen_range(VIEWPORT_HEIGHT),
            },
            device_scale_factor: *pick(rng, DEVICE_SCALE_FACTORS),
            geolocation: Geolocation {
                latitude: rng.gen_range(LATITUDE),
                longitude: rng.gen_range(LONGITUDE),
                accuracy: rng.gen_range(ACCURACY_METERS),
            },
        }
    }
}

fn pick<'a, T>(rng: &mut impl Rng, items: &'a [T]) -> &'a T {
    // The slices are non-empty constants
    &items[rng.gen_range(0..items.len())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;

    #[test]
    fn values_stay_within_ranges() {
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..1000 {
            let fp = Fingerprint::random_with(&mut rng);

            assert!(USER_AGENTS.contains(&fp.user_agent.as_str()));
            assert!(VIEWPORT_WIDTH.contains(&fp.viewport.width));
            assert!(VIEWPORT_HEIGHT.contains(&fp.viewport.height));
            assert!(DEVICE_SCALE_FACTORS.contains(&fp.device_scale_factor));
            assert!(LATITUDE.contains(&fp.geolocation.latitude));
            assert!(LONGITUDE.contains(&fp.geolocation.longitude));
            assert!(ACCURACY_METERS.contains(&fp.geolocation.accuracy));
        }
    }

    #[test]
    fn same_seed_gives_same_fingerprint() {
        let first = Fingerprint::random_with(&mut StdRng::seed_from_u64(7));
        let second = Fingerprint::random_with(&mut StdRng::seed_from_u64(7));
        assert_eq!(first, second);
    }
}
