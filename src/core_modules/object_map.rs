// THEORY:
// The object map turns the filter's luma mask into connected components. It is a
// single raster pass with on-the-fly label unification, followed by a compaction
// pass that makes the labels dense.
//
// Key architectural principles & algorithm steps:
// 1.  **Run Labels**: Scanning left to right, a selected pixel continues the label
//     of its left neighbour, or starts a fresh label when the left neighbour is
//     background.
// 2.  **Upward Bridging**: The three neighbours in the row above (top-left, top,
//     top-right) are consulted. Any labelled neighbour whose label differs from
//     the pixel's current label means two components just met. The current label
//     is merged into the neighbour's, and the pixel adopts it.
// 3.  **Bounded Backward Merge**: A merge rewrites earlier occurrences of the old
//     label by walking backwards in scan order. Two 8-adjacent pixels are never
//     more than `width + 1` positions apart in scan order, so a component never
//     has a bigger gap. The walk stops once it has seen `width + 1` positions in
//     a row without the old label.
// 4.  **Compaction**: The surviving labels are sorted numerically and remapped to
//     exactly `1..=N`. Background stays 0.

use crate::core_modules::pixel::{FrameLayout, SELECTED_PIXEL_VALUE};

/// A `width * height` grid of component labels, 0 meaning background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMap {
    pub width: usize,
    pub height: usize,
    pub labels: Vec<u32>,
}

impl ObjectMap {
    #[inline]
    pub fn label(&self, x: usize, y: usize) -> u32 {
        self.labels[y * self.width + x]
    }
}

pub mod labeler {
    use super::*;
    use std::collections::HashMap;

    /// Labels the selected pixels of a filtered frame.
    pub fn build_object_map(frame: &[u8], layout: &FrameLayout) -> ObjectMap {
        let mask: Vec<bool> = layout
            .luma_plane(frame)
            .into_iter()
            .map(|luma| luma == SELECTED_PIXEL_VALUE)
            .collect();
        label_mask(&mask, layout.width, layout.height)
    }

    /// Single-pass 8-connected labeling of a dense boolean mask.
    pub fn label_mask(mask: &[bool], width: usize, height: usize) -> ObjectMap {
        let mut labels = vec![0u32; width * height];
        let mut next_label = 0u32;

        for y in 0..height {
            for x in 0..width {
                let index = y * width + x;
                if !mask[index] {
                    continue;
                }

                let mut label = if x > 0 && labels[index - 1] != 0 {
                    labels[index - 1]
                } else {
                    next_label += 1;
                    next_label
                };

                if y > 0 {
                    let above = index - width;
                    let candidates = [
                        (x > 0).then(|| above - 1),
                        Some(above),
                        (x + 1 < width).then(|| above + 1),
                    ];
                    for neighbour in candidates.into_iter().flatten() {
                        let found = labels[neighbour];
                        if found != 0 && found != label {
                            relabel_backwards(&mut labels, index, label, found, width);
                            label = found;
                        }
                    }
                }

                labels[index] = label;
            }
        }

        ObjectMap {
            width,
            height,
            labels,
        }
    }

    /// Rewrites `old` to `new` for every position before `from`.
    fn relabel_backwards(labels: &mut [u32], from: usize, old: u32, new: u32, width: usize) {
        let max_gap = width + 1;
        let mut gap = 0;
        for position in (0..from).rev() {
            if labels[position] == old {
                labels[position] = new;
                gap = 0;
            } else {
                gap += 1;
                if gap > max_gap {
                    break;
                }
            }
        }
    }

    /// Remaps the labels in place to the dense range `1..=N` and returns `N`.
    /// Order follows the numeric value of the provisional labels.
    pub fn compact(map: &mut ObjectMap) -> usize {
        let mut distinct: Vec<u32> = map.labels.iter().copied().filter(|&l| l != 0).collect();
        distinct.sort_unstable();
        distinct.dedup();

        let remap: HashMap<u32, u32> = distinct
            .iter()
            .enumerate()
            .map(|(index, &label)| (label, index as u32 + 1))
            .collect();

        for label in map.labels.iter_mut().filter(|l| **l != 0) {
            if let Some(&dense) = remap.get(label) {
                *label = dense;
            }
        }

        distinct.len()
    }
}

#[cfg(test)]
mod tests {
    use super::labeler::*;
    use super::*;
    use crate::core_modules::pixel::PixelFormat;
    use std::collections::BTreeSet;

    fn mask_from(rows: &[&str]) -> (Vec<bool>, usize, usize) {
        let width = rows[0].len();
        let mask = rows
            .iter()
            .flat_map(|row| row.chars().map(|c| c == '#'))
            .collect();
        (mask, width, rows.len())
    }

    fn labelled(rows: &[&str]) -> (ObjectMap, usize) {
        let (mask, width, height) = mask_from(rows);
        let mut map = label_mask(&mask, width, height);
        let count = compact(&mut map);
        (map, count)
    }

    fn assert_dense(map: &ObjectMap, count: usize) {
        let present: BTreeSet<u32> = map.labels.iter().copied().filter(|&l| l != 0).collect();
        let expected: BTreeSet<u32> = (1..=count as u32).collect();
        assert_eq!(present, expected);
    }

    #[test]
    fn separate_blobs_get_dense_labels() {
        let (map, count) = labelled(&[
            "##....##", //
            "##....##",
            "........",
            "...##...",
        ]);
        assert_eq!(count, 3);
        assert_dense(&map, count);
        assert_eq!(map.label(0, 0), map.label(1, 1));
        assert_ne!(map.label(0, 0), map.label(6, 0));
        assert_ne!(map.label(3, 3), map.label(6, 1));
    }

    #[test]
    fn u_shape_merges_into_one() {
        let (map, count) = labelled(&[
            "#...#", //
            "#...#",
            "#...#",
            "#####",
        ]);
        assert_eq!(count, 1);
        assert!(map.labels.iter().all(|&l| l == 0 || l == 1));
    }

    #[test]
    fn top_right_diagonal_connects() {
        let (map, count) = labelled(&[
            "..#", //
            ".#.",
            "#..",
        ]);
        assert_eq!(count, 1);
        assert_eq!(map.label(0, 2), map.label(2, 0));
    }

    #[test]
    fn top_left_diagonal_connects() {
        let (_, count) = labelled(&[
            "#..", //
            ".#.",
            "..#",
        ]);
        assert_eq!(count, 1);
    }

    #[test]
    fn w_shape_merges_three_arms() {
        let (map, count) = labelled(&[
            "#.#.#", //
            "#.#.#",
            ".#.#.",
        ]);
        assert_eq!(count, 1);
        assert_dense(&map, count);
    }

    #[test]
    fn frame_border_lines_form_one_component() {
        // Single pixel wide lines touching all four edges.
        let (map, count) = labelled(&[
            "########", //
            "#......#",
            "#......#",
            "#......#",
            "########",
        ]);
        assert_eq!(count, 1);
        assert_eq!(map.label(0, 4), map.label(7, 0));
    }

    #[test]
    fn long_spiral_merges_across_rows() {
        let (map, count) = labelled(&[
            "#######", //
            "......#",
            "#####.#",
            "#...#.#",
            "#.#.#.#",
            "#.#...#",
            "#.#####",
        ]);
        assert_eq!(count, 2);
        assert_dense(&map, count);
        assert_eq!(map.label(0, 0), map.label(2, 6));
        assert_ne!(map.label(0, 2), map.label(0, 0));
    }

    #[test]
    fn corner_pixels_stay_separate() {
        let (map, count) = labelled(&[
            "#..#", //
            "....",
            "#..#",
        ]);
        assert_eq!(count, 4);
        assert_dense(&map, count);
    }

    #[test]
    fn builds_from_selected_luma() {
        let layout = FrameLayout::new(PixelFormat::Yuy2, 6, 2).unwrap();
        let mut frame = layout.new_empty_frame();
        layout.set_luma(&mut frame, 1, 0, SELECTED_PIXEL_VALUE);
        layout.set_luma(&mut frame, 2, 1, SELECTED_PIXEL_VALUE);
        layout.set_luma(&mut frame, 5, 1, 0xFE);

        let mut map = build_object_map(&frame, &layout);
        assert_eq!(compact(&mut map), 1);
        assert_eq!(map.label(5, 1), 0);
    }

    #[test]
    fn empty_mask_has_no_objects() {
        let (map, count) = labelled(&["....", "...."]);
        assert_eq!(count, 0);
        assert!(map.labels.iter().all(|&l| l == 0));
    }
}
