pub type Point = [f32; 6];

#[derive(Clone, Debug)]
pub struct Clustering {
    pub centroids: Vec<Point>,
    /// Cluster of each input point, same order as the input.
    pub assignments: Vec<usize>,
}

pub fn distance(a: &Point, b: &Point) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Index of the nearest centroid, lowest index on ties.
pub fn nearest(point: &Point, centroids: &[Point]) -> Option<(usize, f32)> {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, distance(point, c)))
        .fold(None, |best, (i, d)| match best {
            Some((_, bd)) if bd <= d => best,
            _ => Some((i, d)),
        })
}

/// Deterministic Lloyd k-means seeded by farthest-point traversal from the first point.
///
/// Fewer than `k` clusters come back when the points have fewer than `k` distinct values.
/// A cluster that loses all its members keeps its previous centroid.
pub fn kmeans(points: &[Point], k: usize, iterations: usize) -> Clustering {
    if points.is_empty() || k == 0 {
        return Clustering {
            centroids: Vec::new(),
            assignments: Vec::new(),
        };
    }

    let mut centroids = vec![points[0]];
    let mut closest: Vec<f32> = points.iter().map(|p| distance(p, &points[0])).collect();
    while centroids.len() < k {
        let Some((far, &d)) = closest
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, &f32)>, (i, d)| match best {
                Some((_, bd)) if *bd >= *d => best,
                _ => Some((i, d)),
            })
        else {
            break;
        };
        if d <= 0.0 {
            break;
        }
        let seed = points[far];
        for (c, p) in closest.iter_mut().zip(points) {
            *c = c.min(distance(p, &seed));
        }
        centroids.push(seed);
    }

    let mut assignments = vec![usize::MAX; points.len()];
    for _ in 0..iterations.max(1) {
        let mut changed = false;
        for (slot, p) in assignments.iter_mut().zip(points) {
            let cluster = nearest(p, &centroids).map_or(0, |(i, _)| i);
            if *slot != cluster {
                *slot = cluster;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![[0.0f32; 6]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for (&cluster, p) in assignments.iter().zip(points) {
            counts[cluster] += 1;
            for (s, v) in sums[cluster].iter_mut().zip(p) {
                *s += v;
            }
        }
        for ((centroid, sum), count) in centroids.iter_mut().zip(&sums).zip(&counts) {
            if *count > 0 {
                *centroid = sum.map(|s| s / *count as f32);
            }
        }
    }

    Clustering {
        centroids,
        assignments,
    }
}
