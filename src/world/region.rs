use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordinates of a map region: a fixed-size square tile of the world,
/// and the unit of weather-state ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MapRegionKey {
    pub x: i32,
    pub z: i32,
}

impl MapRegionKey {
    pub fn new(x: i32, z: i32) -> Self {
        MapRegionKey { x, z }
    }

    /// Pack both coordinates into one table index (x in the high half).
    pub fn index(self) -> u64 {
        ((self.x as u32 as u64) << 32) | (self.z as u32 as u64)
    }

    pub fn from_index(index: u64) -> Self {
        MapRegionKey {
            x: (index >> 32) as u32 as i32,
            z: index as u32 as i32,
        }
    }

    /// Region containing the world-space block position `(x, z)`.
    pub fn containing(x: f64, z: f64, region_size: u32) -> Self {
        let size = region_size as f64;
        MapRegionKey {
            x: (x / size).floor() as i32,
            z: (z / size).floor() as i32,
        }
    }

    /// World-space centre of this region.
    pub fn center(self, region_size: u32) -> (f64, f64) {
        let size = region_size as f64;
        ((self.x as f64 + 0.5) * size, (self.z as f64 + 0.5) * size)
    }

    /// Parse `"X,Z"` as used on the command line.
    pub fn parse(s: &str) -> Option<Self> {
        let (x, z) = s.split_once(',')?;
        Some(MapRegionKey {
            x: x.trim().parse().ok()?,
            z: z.trim().parse().ok()?,
        })
    }
}

impl fmt::Display for MapRegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Bounds of the region grid covering the world map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionGrid {
    pub region_size: u32,
    pub regions_x: i32,
    pub regions_z: i32,
}

impl RegionGrid {
    /// Grid covering a `map_size_x` by `map_size_z` block map.
    /// A partial region at the far edge still counts as a region.
    pub fn new(map_size_x: u32, map_size_z: u32, region_size: u32) -> Self {
        let size = region_size.max(1);
        RegionGrid {
            region_size: size,
            regions_x: map_size_x.div_ceil(size).max(1) as i32,
            regions_z: map_size_z.div_ceil(size).max(1) as i32,
        }
    }

    pub fn contains(&self, key: MapRegionKey) -> bool {
        (0..self.regions_x).contains(&key.x) && (0..self.regions_z).contains(&key.z)
    }

    pub fn region_count(&self) -> usize {
        self.regions_x as usize * self.regions_z as usize
    }

    /// All region keys, row by row.
    pub fn keys(&self) -> impl Iterator<Item = MapRegionKey> + '_ {
        (0..self.regions_z)
            .flat_map(move |z| (0..self.regions_x).map(move |x| MapRegionKey::new(x, z)))
    }

    /// The (up to) four regions whose centres surround `(x, z)`, with
    /// bilinear weights from the point's offset to those centres.
    ///
    /// Order is `(x0, z0), (x0+1, z0), (x0, z0+1), (x0+1, z0+1)`. Regions off
    /// the grid are dropped and the remaining weights renormalised, so a
    /// point at a region centre yields `[1, 0, 0, 0]` and edge points blend
    /// only with their on-map neighbours.
    pub fn bilinear_neighbours(&self, x: f64, z: f64) -> Vec<(MapRegionKey, f32)> {
        let size = self.region_size as f64;
        let fx = x / size - 0.5;
        let fz = z / size - 0.5;
        let x0 = fx.floor();
        let z0 = fz.floor();
        let tx = (fx - x0) as f32;
        let tz = (fz - z0) as f32;
        let (x0, z0) = (x0 as i32, z0 as i32);

        let corners = [
            (MapRegionKey::new(x0, z0), (1.0 - tx) * (1.0 - tz)),
            (MapRegionKey::new(x0 + 1, z0), tx * (1.0 - tz)),
            (MapRegionKey::new(x0, z0 + 1), (1.0 - tx) * tz),
            (MapRegionKey::new(x0 + 1, z0 + 1), tx * tz),
        ];

        let mut kept: Vec<(MapRegionKey, f32)> =
            corners.into_iter().filter(|(k, _)| self.contains(*k)).collect();
        let total: f32 = kept.iter().map(|(_, w)| *w).sum();
        if kept.is_empty() || !(total > 0.0) {
            let nearest = MapRegionKey::new(
                (x / size).floor().clamp(0.0, (self.regions_x - 1) as f64) as i32,
                (z / size).floor().clamp(0.0, (self.regions_z - 1) as f64) as i32,
            );
            return vec![(nearest, 1.0)];
        }
        if total != 1.0 {
            for (_, w) in &mut kept {
                *w /= total;
            }
        }
        kept
    }
}
