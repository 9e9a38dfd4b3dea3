use glam::IVec3;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Block-level view of the world for open-sky searches.
pub trait SkyExposure: Send + Sync {
    /// True when nothing solid sits above `(x, y, z)`.
    fn sky_visible(&self, x: i32, y: i32, z: i32) -> bool;
}

/// Horizontal distance from `origin` to the nearest column open to the sky
/// at the same height, searching out to `max_radius` blocks.
pub fn distance_to_open_sky(world: &dyn SkyExposure, origin: IVec3, max_radius: i32) -> Option<f32> {
    if world.sky_visible(origin.x, origin.y, origin.z) {
        return Some(0.0);
    }

    let mut best = f32::INFINITY;
    let mut radius = 1;
    // Ring r is at least r away, so stop once no ring can beat the best hit
    while radius <= max_radius && (radius as f32) < best {
        let ring = ring_offsets(radius);
        let nearest = ring
            .par_iter()
            .filter(|(dx, dz)| world.sky_visible(origin.x + dx, origin.y, origin.z + dz))
            .map(|(dx, dz)| ((dx * dx + dz * dz) as f32).sqrt())
            .reduce(|| f32::INFINITY, f32::min);
        best = best.min(nearest);
        radius += 1;
    }

    best.is_finite().then_some(best)
}

/// Offsets on the square ring at Chebyshev distance `radius`.
fn ring_offsets(radius: i32) -> Vec<(i32, i32)> {
    let mut offsets = Vec::with_capacity((radius as usize) * 8);
    for d in -radius..=radius {
        offsets.push((d, -radius));
        offsets.push((d, radius));
    }
    for d in (-radius + 1)..radius {
        offsets.push((-radius, d));
        offsets.push((radius, d));
    }
    offsets
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyScanResult {
    pub origin: IVec3,
    /// `None` when no open column was found within range.
    pub distance: Option<f32>,
}

/// Runs at most one open-sky search at a time on the rayon pool. The result
/// is picked up on a later tick with [`SkyDistanceScanner::take_result`].
#[derive(Debug, Clone, Default)]
pub struct SkyDistanceScanner {
    searching: Arc<AtomicBool>,
    result: Arc<Mutex<Option<SkyScanResult>>>,
}

impl SkyDistanceScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_searching(&self) -> bool {
        self.searching.load(Ordering::Acquire)
    }

    /// Start a search unless one is already running. Returns whether a search
    /// was started.
    pub fn request(&self, world: Arc<dyn SkyExposure>, origin: IVec3, max_radius: i32) -> bool {
        if self
            .searching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let searching = Arc::clone(&self.searching);
        let result = Arc::clone(&self.result);
        rayon::spawn(move || {
            let distance = distance_to_open_sky(world.as_ref(), origin, max_radius);
            if let Ok(mut slot) = result.lock() {
                *slot = Some(SkyScanResult { origin, distance });
            }
            searching.store(false, Ordering::Release);
        });
        true
    }

    pub fn take_result(&self) -> Option<SkyScanResult> {
        self.result.lock().ok().and_then(|mut slot| slot.take())
    }
}
