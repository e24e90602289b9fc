use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::f64::consts::PI;

use itertools::{Itertools, MinMaxResult};
use ndarray::Array3;

use crate::volume::dims;

/// Wraps `value` into `[start, start + range)`
pub fn wrap(value: f64, start: f64, range: f64) -> f64 {
    (value - start).rem_euclid(range) + start
}

/// Unwrapped phase and its periodic extent
#[derive(Debug, Clone)]
pub struct Unwrapped {
    pub phase: Array3<f64>,
    /// `max(ceil(max - min), 2π)` over the support
    pub extent: f64,
}

/// Voxel waiting in the flood fill queue, ordered by modulus
struct Candidate {
    quality: f64,
    index: [usize; 3],
}
impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.quality.total_cmp(&other.quality) == Ordering::Equal
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
        self.quality.total_cmp(&other.quality)
    }
}

fn neighbours(index: [usize; 3], shape: [usize; 3]) -> impl Iterator<Item = [usize; 3]> {
    (0..3).flat_map(move |axis| {
        let lower = (index[axis] > 0).then(|| {
            let mut n = index;
            n[axis] -= 1;
            n
        });
        let upper = (index[axis] + 1 < shape[axis]).then(|| {
            let mut n = index;
            n[axis] += 1;
            n
        });
        lower.into_iter().chain(upper)
    })
}

/// Quality guided unwrapping of `phase` over the voxels of `support`
///
/// The fill starts from the strongest voxel of each connected component of the
/// support and always grows from the strongest unwrapped voxel, neighbouring
/// differences are wrapped into `[-π, π)`. Voxels outside of the support keep
/// their wrapped phase.
pub fn unwrap(phase: &Array3<f64>, modulus: &Array3<f64>, support: &Array3<bool>) -> Unwrapped {
    let shape = dims(phase);
    let mut unwrapped = phase.clone();
    let mut visited = Array3::from_elem(phase.dim(), false);

    let mut seeds: Vec<([usize; 3], f64)> = support
        .indexed_iter()
        .filter(|(_, &s)| s)
        .map(|((i, j, k), _)| ([i, j, k], modulus[[i, j, k]]))
        .collect();
    seeds.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut queue = BinaryHeap::new();
    for (seed, quality) in seeds {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;
        queue.push(Candidate {
            quality,
            index: seed,
        });
        while let Some(Candidate { index, .. }) = queue.pop() {
            for next in neighbours(index, shape) {
                if visited[next] || !support[next] {
                    continue;
                }
                let step = wrap(phase[next] - phase[index], -PI, 2. * PI);
                unwrapped[next] = unwrapped[index] + step;
                visited[next] = true;
                queue.push(Candidate {
                    quality: modulus[next],
                    index: next,
                });
            }
        }
    }

    let extent = match unwrapped
        .iter()
        .zip(support.iter())
        .filter_map(|(&p, &s)| s.then_some(p))
        .minmax_by(f64::total_cmp)
    {
        MinMaxResult::MinMax(min, max) => (max - min).ceil().max(2. * PI),
        _ => 2. * PI,
    };
    Unwrapped {
        phase: unwrapped,
        extent,
    }
}
