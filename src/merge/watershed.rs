use std::cmp::Reverse;
use std::collections::BinaryHeap;

use image::RgbImage;

use crate::merge::markers::{MarkerGrid, BOUNDARY, UNKNOWN};

const IN_QUEUE: i32 = -2;

/// `(priority, insertion order, pixel index)`, smallest first.
type Frontier = BinaryHeap<Reverse<(u8, u64, usize)>>;

/// Largest per-channel difference between two pixels.
fn channel_distance(surface: &[u8], a: usize, b: usize) -> u8 {
    surface[a * 3..a * 3 + 3]
        .iter()
        .zip(&surface[b * 3..b * 3 + 3])
        .map(|(x, y)| x.abs_diff(*y))
        .max()
        .unwrap_or(0)
}

fn neighbors(idx: usize, width: usize, height: usize) -> impl Iterator<Item = usize> {
    let (row, col) = (idx / width, idx % width);
    [
        (col > 0).then(|| idx - 1),
        (col + 1 < width).then(|| idx + 1),
        (row > 0).then(|| idx - width),
        (row + 1 < height).then(|| idx + width),
    ]
    .into_iter()
    .flatten()
}

/// Grows every positive marker into the unknown pixels, cheapest colour
/// step first. Equal priorities are served in insertion order. A pixel
/// whose labeled neighbours disagree becomes [`BOUNDARY`].
///
/// `surface` must have the marker grid's extent.
pub fn flood(markers: &mut MarkerGrid, surface: &RgbImage) {
    let (width, height) = (markers.width as usize, markers.height as usize);
    let pixels = surface.as_raw();
    let data = &mut markers.data;

    let mut queue = Frontier::new();
    let mut order = 0u64;
    let mut push = |queue: &mut Frontier, priority: u8, idx: usize| {
        queue.push(Reverse((priority, order, idx)));
        order += 1;
    };

    for idx in 0..data.len() {
        if data[idx] != UNKNOWN {
            continue;
        }
        let priority = neighbors(idx, width, height)
            .filter(|&n| data[n] > 0)
            .map(|n| channel_distance(pixels, idx, n))
            .min();
        if let Some(priority) = priority {
            data[idx] = IN_QUEUE;
            push(&mut queue, priority, idx);
        }
    }

    while let Some(Reverse((_, _, idx))) = queue.pop() {
        let mut label = UNKNOWN;
        for n in neighbors(idx, width, height) {
            let other = data[n];
            if other <= 0 {
                continue;
            }
            if label == UNKNOWN {
                label = other;
            } else if label != other {
                label = BOUNDARY;
                break;
            }
        }
        if label == UNKNOWN {
            label = BOUNDARY;
        }
        data[idx] = label;
        if label == BOUNDARY {
            continue;
        }

        for n in neighbors(idx, width, height) {
            if data[n] == UNKNOWN {
                data[n] = IN_QUEUE;
                push(&mut queue, channel_distance(pixels, n, idx), n);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::markers::BACKGROUND;
    use image::Rgb;
    use pretty_assertions::assert_eq;

    fn grid(width: u32, height: u32, f: impl Fn(u32, u32) -> i32) -> MarkerGrid {
        let data = (0..height).flat_map(|y| (0..width).map(move |x| (x, y))).map(|(x, y)| f(x, y)).collect();
        MarkerGrid::from_raw(width, height, data).unwrap()
    }

    #[test]
    fn regions_meet_at_the_strongest_edge() {
        // seeds in the outer columns, a bright ridge in column 5
        let mut markers = grid(10, 5, |x, _| match x {
            0 => 2,
            9 => 3,
            _ => UNKNOWN,
        });
        let surface = RgbImage::from_fn(10, 5, |x, _| if x == 5 { Rgb([200, 200, 200]) } else { Rgb([0, 0, 0]) });
        flood(&mut markers, &surface);

        for row in markers.as_raw().chunks(10) {
            assert_eq!(row, &[2, 2, 2, 2, 2, BOUNDARY, 3, 3, 3, 3]);
        }
    }

    #[test]
    fn background_and_seed_are_split_by_a_boundary_line() {
        let mut markers = grid(6, 1, |x, _| match x {
            0 => 2,
            5 => BACKGROUND,
            _ => UNKNOWN,
        });
        // dark plant on the left, bright soil from column 3 on
        let surface = RgbImage::from_fn(6, 1, |x, _| if x >= 3 { Rgb([180, 150, 90]) } else { Rgb([20, 90, 20]) });
        flood(&mut markers, &surface);
        assert_eq!(markers.as_raw(), &[2, 2, 2, BOUNDARY, BACKGROUND, BACKGROUND]);
    }

    #[test]
    fn isolated_unknown_pixels_stay_unknown() {
        let mut markers = grid(3, 1, |x, _| if x == 0 { BACKGROUND } else if x == 1 { BOUNDARY } else { UNKNOWN });
        flood(&mut markers, &RgbImage::new(3, 1));
        assert_eq!(markers.as_raw(), &[BACKGROUND, BOUNDARY, UNKNOWN]);
    }
}
