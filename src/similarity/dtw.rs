use ndarray::Array1;

/// Half-width of the Sakoe-Chiba band around the slope-adjusted diagonal.
///
/// Never narrower than the length ratio of the two sequences, otherwise the band could leave
/// no monotonic path between the corners.
pub fn band_half_width(n: usize, m: usize, ratio: f32) -> Option<usize> {
    if n < 2 || m < 2 {
        return None;
    }
    let longer = n.max(m);
    let shorter = n.min(m);
    let width = (ratio * longer as f32).ceil() as usize;
    Some(width.max(longer.div_ceil(shorter)) + 1)
}

/// Length-normalized DTW alignment cost between sequences of `n` and `m` frames.
///
/// `cost(i, j)` is the distance between frame `i` of the first sequence and frame `j` of the
/// second. Steps are diagonal, horizontal and vertical; the path joins both pairs of endpoints.
/// The accumulated cost is divided by `max(n, m)`. Empty inputs cost infinity.
///
/// Only two rows of the accumulator are kept, each as wide as the band, so a banded call uses
/// O(n·w) time and O(w) space.
pub fn dtw_cost<F>(n: usize, m: usize, band: Option<usize>, cost: F) -> f32
where
    F: Fn(usize, usize) -> f32,
{
    if n == 0 || m == 0 {
        return f32::INFINITY;
    }

    let mut total = accumulate(n, m, band, &cost);
    if !total.is_finite() && band.is_some() {
        log::debug!("dtw band left no path for {n}x{m}, retrying unbanded");
        total = accumulate(n, m, None, &cost);
    }
    total / n.max(m) as f32
}

fn accumulate<F>(n: usize, m: usize, band: Option<usize>, cost: &F) -> f32
where
    F: Fn(usize, usize) -> f32,
{
    let slope = if n > 1 {
        (m - 1) as f32 / (n - 1) as f32
    } else {
        0.0
    };
    let span = band.map_or(m, |w| (2 * w + 1).min(m));
    let mut prev = Array1::<f32>::from_elem(span, f32::INFINITY);
    let mut curr = Array1::<f32>::from_elem(span, f32::INFINITY);
    let mut prev_lo = 0;

    for i in 0..n {
        let (lo, hi) = match band {
            Some(w) => {
                let center = i as f32 * slope;
                let lo = ((center - w as f32).ceil().max(0.0) as usize).min(m - 1);
                let hi = ((center + w as f32).floor() as usize).min(m - 1).min(lo + span - 1);
                (lo, hi)
            }
            None => (0, m - 1),
        };

        curr.fill(f32::INFINITY);
        for j in lo..=hi {
            let best = if i == 0 && j == 0 {
                0.0
            } else {
                let mut best = f32::INFINITY;
                if i > 0 {
                    if j > 0 {
                        best = best.min(cell(&prev, prev_lo, j - 1));
                    }
                    best = best.min(cell(&prev, prev_lo, j));
                }
                if j > lo {
                    best = best.min(curr[j - 1 - lo]);
                }
                best
            };
            if best.is_finite() {
                curr[j - lo] = best + cost(i, j);
            }
        }

        if i == n - 1 {
            return cell(&curr, lo, m - 1);
        }
        std::mem::swap(&mut prev, &mut curr);
        prev_lo = lo;
    }
    f32::INFINITY
}

/// Column `j` of a band row that starts at column `lo`; outside the row is unreachable.
fn cell(row: &Array1<f32>, lo: usize, j: usize) -> f32 {
    j.checked_sub(lo)
        .and_then(|k| row.get(k).copied())
        .unwrap_or(f32::INFINITY)
}
