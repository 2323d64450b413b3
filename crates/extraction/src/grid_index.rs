//! Spatial index over a message's native grid points.
//!
//! ICON grids are either regular lat/lon (EU, D2) or unstructured
//! icosahedral (global); both arrive here as a flat list of `(lat, lon)`
//! pairs. Points are projected onto the unit sphere and stored in a static
//! 3-D k-d tree. Straight-line chord length on the unit sphere grows
//! monotonically with great-circle distance, so neighbour order is exact
//! near the poles and across the antimeridian. Reported distances are
//! haversine kilometres.
//!
//! Latitudes are converted from geodetic (WGS84) to geocentric before
//! projecting, so the great circle is measured between true directions
//! from the Earth's centre and row spacing follows the ellipsoid.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BinaryHeap, HashSet};
use std::hash::{Hash, Hasher};

use icon_common::GeoPoint;

/// Mean Earth radius in kilometres (IUGG).
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// First eccentricity squared of the WGS84 ellipsoid.
const WGS84_E2: f64 = 0.006_694_379_990_14;

/// One neighbour returned by [`GridIndex::nearest`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbour {
    /// Index into the coordinate list the index was built from (and into
    /// every value array sharing that layout).
    pub index: usize,
    /// Great-circle distance in kilometres.
    pub distance_km: f64,
}

/// Static nearest-neighbour index. Read-only once built, so it can be shared
/// between any number of concurrent readers without locking.
#[derive(Debug, Clone)]
pub struct GridIndex {
    coords: Vec<(f64, f64)>,
    xyz: Vec<[f64; 3]>,
    /// Original indices of the distinct, finite points in k-d order.
    order: Vec<u32>,
    /// Split axis of the node stored at the same position in `order`.
    axes: Vec<u8>,
    fingerprint: u64,
}

impl GridIndex {
    /// Build the index. O(N log N).
    ///
    /// Non-finite coordinates are skipped and repeated coordinates collapse
    /// onto their first occurrence.
    pub fn build(coords: &[(f64, f64)]) -> Self {
        let xyz: Vec<[f64; 3]> = coords.iter().map(|&(lat, lon)| to_unit_vector(lat, lon)).collect();

        let mut seen = HashSet::with_capacity(coords.len());
        let mut order: Vec<u32> = Vec::with_capacity(coords.len());
        for (i, &(lat, lon)) in coords.iter().enumerate() {
            if !lat.is_finite() || !lon.is_finite() {
                continue;
            }
            let lon = GeoPoint::new(lat, lon).normalized().lon;
            if seen.insert((lat.to_bits(), lon.to_bits())) {
                order.push(i as u32);
            }
        }

        let mut axes = vec![0u8; order.len()];
        build_subtree(&xyz, &mut order, &mut axes);

        Self {
            coords: coords.to_vec(),
            xyz,
            order,
            axes,
            fingerprint: layout_fingerprint(coords),
        }
    }

    /// Number of coordinates the index was built from (including skipped ones).
    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Number of distinct, searchable points.
    pub fn distinct_points(&self) -> usize {
        self.order.len()
    }

    pub fn layout_fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn coordinate(&self, index: usize) -> Option<(f64, f64)> {
        self.coords.get(index).copied()
    }

    /// The `k` grid points closest to `point`, nearest first.
    ///
    /// Returns fewer than `k` entries when the grid has fewer distinct
    /// points (`k` is capped at [`GridIndex::distinct_points`]), and nothing for an empty grid or `k == 0`. Equal distances are
    /// ordered by index so results are reproducible.
    pub fn nearest(&self, point: GeoPoint, k: usize) -> Vec<Neighbour> {
        if k == 0 || self.order.is_empty() || !point.lat.is_finite() || !point.lon.is_finite() {
            return Vec::new();
        }

        let k = k.min(self.order.len());
        let query = to_unit_vector(point.lat, point.lon);
        let mut heap = BinaryHeap::with_capacity(k + 1);
        self.search(0, self.order.len(), &query, k, &mut heap);

        let mut found = heap.into_vec();
        found.sort();
        found
            .into_iter()
            .map(|candidate| {
                let (lat, lon) = self.coords[candidate.index];
                Neighbour {
                    index: candidate.index,
                    distance_km: haversine_km(point.lat, point.lon, lat, lon),
                }
            })
            .collect()
    }

    fn search(
        &self,
        lo: usize,
        hi: usize,
        query: &[f64; 3],
        k: usize,
        heap: &mut BinaryHeap<Candidate>,
    ) {
        if lo >= hi {
            return;
        }

        let mid = lo + (hi - lo) / 2;
        let index = self.order[mid] as usize;
        let node = &self.xyz[index];
        offer(
            heap,
            Candidate {
                chord2: chord_squared(query, node),
                index,
            },
            k,
        );

        if hi - lo == 1 {
            return;
        }

        let axis = self.axes[mid] as usize;
        let diff = query[axis] - node[axis];
        let (near, far) = if diff < 0.0 {
            ((lo, mid), (mid + 1, hi))
        } else {
            ((mid + 1, hi), (lo, mid))
        };

        self.search(near.0, near.1, query, k, heap);

        let must_visit_far = match heap.peek() {
            Some(worst) => heap.len() < k || diff * diff <= worst.chord2,
            None => true,
        };
        if must_visit_far {
            self.search(far.0, far.1, query, k, heap);
        }
    }
}

/// Hash of a coordinate list; equal layouts share one [`GridIndex`].
pub fn layout_fingerprint(coords: &[(f64, f64)]) -> u64 {
    let mut hasher = DefaultHasher::new();
    coords.len().hash(&mut hasher);
    for &(lat, lon) in coords {
        lat.to_bits().hash(&mut hasher);
        lon.to_bits().hash(&mut hasher);
    }
    hasher.finish()
}

/// Great-circle distance between two lat/lon points in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (geocentric(lat1), geocentric(lat2));
    let dphi = phi2 - phi1;
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

/// Geocentric latitude in radians for a geodetic latitude in degrees.
fn geocentric(lat: f64) -> f64 {
    let phi = lat.to_radians();
    ((1.0 - WGS84_E2) * phi.sin()).atan2(phi.cos())
}

fn to_unit_vector(lat: f64, lon: f64) -> [f64; 3] {
    let (phi, lambda) = (geocentric(lat), lon.to_radians());
    [phi.cos() * lambda.cos(), phi.cos() * lambda.sin(), phi.sin()]
}

fn chord_squared(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}

/// Arrange `order` into implicit k-d layout: each slice's median sits at
/// `len / 2`, smaller coordinates on the split axis to its left.
fn build_subtree(xyz: &[[f64; 3]], order: &mut [u32], axes: &mut [u8]) {
    if order.len() <= 1 {
        return;
    }

    let axis = widest_axis(xyz, order);
    let mid = order.len() / 2;
    order.select_nth_unstable_by(mid, |a, b| {
        xyz[*a as usize][axis]
            .total_cmp(&xyz[*b as usize][axis])
            .then(a.cmp(b))
    });
    axes[mid] = axis as u8;

    let (left, right) = order.split_at_mut(mid);
    let (left_axes, right_axes) = axes.split_at_mut(mid);
    build_subtree(xyz, left, left_axes);
    build_subtree(xyz, &mut right[1..], &mut right_axes[1..]);
}

fn widest_axis(xyz: &[[f64; 3]], order: &[u32]) -> usize {
    let mut min = [f64::INFINITY; 3];
    let mut max = [f64::NEG_INFINITY; 3];
    for &i in order {
        let p = &xyz[i as usize];
        for axis in 0..3 {
            min[axis] = min[axis].min(p[axis]);
            max[axis] = max[axis].max(p[axis]);
        }
    }
    (0..3)
        .max_by(|&a, &b| (max[a] - min[a]).total_cmp(&(max[b] - min[b])))
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    chord2: f64,
    index: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.chord2
            .total_cmp(&other.chord2)
            .then(self.index.cmp(&other.index))
    }
}

/// Keep the `k` smallest candidates in a max-heap.
fn offer(heap: &mut BinaryHeap<Candidate>, candidate: Candidate, k: usize) {
    if heap.len() < k {
        heap.push(candidate);
    } else if let Some(worst) = heap.peek() {
        if candidate < *worst {
            heap.pop();
            heap.push(candidate);
        }
    }
}
