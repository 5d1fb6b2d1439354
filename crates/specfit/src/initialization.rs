use rayon::prelude::*;
use specfit_image::ImageSize;

use crate::samples::SampleTable;
use crate::settings::WeightInitialization;
use crate::weights::WeightMap;

const MAX_KMEANS_ITERATIONS: usize = 32;

/// Seed the weight map before the first basis update.
pub fn initial_weights(
    method: WeightInitialization,
    samples: &SampleTable,
    size: ImageSize,
    count: usize,
) -> WeightMap {
    match method {
        WeightInitialization::Uniform => WeightMap::uniform(size, count),
        WeightInitialization::KMeans => kmeans_weights(samples, size, count),
    }
}

/// Average cosine-normalized reflectance `L / (E n·l)` of every observed texel.
pub fn average_reflectance(samples: &SampleTable) -> Vec<Option<[f64; 3]>> {
    samples
        .as_slice()
        .par_iter()
        .map(|texel| {
            let mut sum = [0.0; 3];
            let mut weight = 0.0;
            for s in texel {
                for (c, acc) in sum.iter_mut().enumerate() {
                    let incident = s.incident(c);
                    if incident > 0.0 {
                        *acc += s.weight * s.radiance[c] / incident;
                    }
                }
                weight += s.weight;
            }
            (weight > 0.0).then(|| sum.map(|v| v / weight))
        })
        .collect()
}

fn distance2(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a.iter().zip(b).map(|(a, b)| (a - b) * (a - b)).sum()
}

fn nearest(centers: &[[f64; 3]], p: &[f64; 3]) -> usize {
    centers
        .iter()
        .enumerate()
        .map(|(i, c)| (i, distance2(c, p)))
        .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best })
        .0
}

/// Cluster the average reflectance into `count` groups and assign one-hot weights.
///
/// Seeding is deterministic: the first observed texel, then repeatedly the
/// texel farthest from every chosen center. Unobserved texels get uniform weights.
pub fn kmeans_weights(samples: &SampleTable, size: ImageSize, count: usize) -> WeightMap {
    let features = average_reflectance(samples);
    let points: Vec<(usize, [f64; 3])> = features
        .iter()
        .enumerate()
        .filter_map(|(t, f)| f.map(|f| (t, f)))
        .collect();

    let mut weights = WeightMap::uniform(size, count);
    let Some(&(_, first)) = points.first() else {
        return weights;
    };

    let mut centers = vec![first];
    while centers.len() < count {
        let far = points
            .iter()
            .map(|(_, p)| (p, distance2(&centers[nearest(&centers, p)], p)))
            .fold((&first, -1.0), |best, cur| if cur.1 > best.1 { cur } else { best });
        centers.push(*far.0);
    }

    let mut labels = vec![usize::MAX; points.len()];
    for iteration in 0..MAX_KMEANS_ITERATIONS {
        let new_labels: Vec<usize> = points.par_iter().map(|(_, p)| nearest(&centers, p)).collect();
        if new_labels == labels {
            log::debug!("k-means converged after {iteration} iterations");
            break;
        }
        labels = new_labels;

        let mut sums = vec![([0.0; 3], 0usize); count];
        for ((_, p), &k) in points.iter().zip(&labels) {
            sums[k].0.iter_mut().zip(p).for_each(|(s, v)| *s += v);
            sums[k].1 += 1;
        }
        for (center, (sum, n)) in centers.iter_mut().zip(&sums) {
            if *n > 0 {
                *center = sum.map(|v| v / *n as f64);
            }
        }
    }

    for ((t, _), &k) in points.iter().zip(&labels) {
        let w = weights.texel_mut(*t);
        w.fill(0.0);
        w[k] = 1.0;
    }
    weights
}
