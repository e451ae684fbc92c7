//! Connected-component labelling over a binary mask.
//!
//! Breadth-first region growing with 4-connectivity. Regions are numbered in
//! raster order of their first pixel, which is the scan order the segmenter
//! reports candidates in.

use std::collections::VecDeque;

use crate::geometry::Rect;

pub(crate) const UNLABELLED: u32 = u32::MAX;

#[derive(Clone, Debug)]
pub(crate) struct Region {
    pub pixel_count: u64,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
    sum_x: u64,
    sum_y: u64,
    pub touches_border: bool,
}

impl Region {
    fn seed(x: u32, y: u32) -> Self {
        Self {
            pixel_count: 0,
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            sum_x: 0,
            sum_y: 0,
            touches_border: false,
        }
    }

    fn add(&mut self, x: u32, y: u32, width: u32, height: u32) {
        self.pixel_count += 1;
        self.sum_x += x as u64;
        self.sum_y += y as u64;
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
            self.touches_border = true;
        }
    }

    /// Pixel-extent bounding box (`w = max_x - min_x + 1`).
    pub fn bounds(&self) -> Rect {
        Rect {
            x: self.min_x as i32,
            y: self.min_y as i32,
            w: self.max_x - self.min_x + 1,
            h: self.max_y - self.min_y + 1,
        }
    }

    /// Centroid in pixel-centre coordinates.
    pub fn centroid(&self) -> (f32, f32) {
        let n = self.pixel_count.max(1) as f64;
        (
            (self.sum_x as f64 / n + 0.5) as f32,
            (self.sum_y as f64 / n + 0.5) as f32,
        )
    }
}

pub(crate) struct Components {
    /// Region index per pixel, `UNLABELLED` outside the mask.
    pub labels: Vec<u32>,
    pub regions: Vec<Region>,
}

pub(crate) fn label(mask: &[bool], width: u32, height: u32) -> Components {
    let (w, h) = (width as usize, height as usize);
    debug_assert_eq!(mask.len(), w * h);

    let mut labels = vec![UNLABELLED; mask.len()];
    let mut regions = Vec::new();
    let mut queue = VecDeque::new();

    for start in 0..mask.len() {
        if !mask[start] || labels[start] != UNLABELLED {
            continue;
        }
        let id = regions.len() as u32;
        let mut region = Region::seed((start % w) as u32, (start / w) as u32);
        labels[start] = id;
        queue.push_back(start);

        while let Some(idx) = queue.pop_front() {
            let (x, y) = (idx % w, idx / w);
            region.add(x as u32, y as u32, width, height);

            let mut visit = |n: usize| {
                if mask[n] && labels[n] == UNLABELLED {
                    labels[n] = id;
                    queue.push_back(n);
                }
            };
            if x > 0 {
                visit(idx - 1);
            }
            if x + 1 < w {
                visit(idx + 1);
            }
            if y > 0 {
                visit(idx - w);
            }
            if y + 1 < h {
                visit(idx + w);
            }
        }
        regions.push(region);
    }

    Components { labels, regions }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from(rows: &[&str]) -> (Vec<bool>, u32, u32) {
        let h = rows.len() as u32;
        let w = rows[0].len() as u32;
        let mask = rows
            .iter()
            .flat_map(|row| row.chars().map(|c| c == '#'))
            .collect();
        (mask, w, h)
    }

    #[test]
    fn labels_regions_in_raster_order() {
        let (mask, w, h) = mask_from(&[
            "......##",
            ".##...##",
            ".##.....",
            "........",
        ]);
        let comps = label(&mask, w, h);
        assert_eq!(comps.regions.len(), 2);
        // top-right block is seeded first in raster order
        assert_eq!(comps.regions[0].min_x, 6);
        assert!(comps.regions[0].touches_border);
        assert_eq!(comps.regions[1].bounds(), Rect::new(1, 1, 2, 2).unwrap());
        assert!(!comps.regions[1].touches_border);
        assert_eq!(comps.regions[1].pixel_count, 4);
        assert_eq!(comps.regions[1].centroid(), (2.0, 2.0));
    }

    #[test]
    fn diagonal_pixels_are_separate() {
        let (mask, w, h) = mask_from(&["#.", ".#"]);
        assert_eq!(label(&mask, w, h).regions.len(), 2);
    }

    #[test]
    fn empty_mask_has_no_regions() {
        let (mask, w, h) = mask_from(&["...", "..."]);
        let comps = label(&mask, w, h);
        assert!(comps.regions.is_empty());
        assert!(comps.labels.iter().all(|&l| l == UNLABELLED));
    }
}
