//! MaxRects rectangle packing
//!
//! Greedy packer with the best-short-side-fit heuristic. Each page keeps a
//! list of free rectangles; placements split intersecting free rectangles
//! into up to four residuals, and contained free rectangles are pruned.

use std::collections::HashMap;

use image::{imageops, RgbaImage};
use serde::Serialize;

use crate::cancel::CancelToken;

/// One rectangle to place: an image key and its target extent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackItem {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackedRect {
    pub name: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackedPage {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub rects: Vec<PackedRect>,
    /// usedArea / (width x height).
    pub efficiency: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackResult {
    pub pages: Vec<PackedPage>,
    /// Items whose target exceeds the page extent on some axis.
    pub oversized: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreeRect {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
}

impl FreeRect {
    fn contains(&self, other: &FreeRect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x + other.w <= self.x + self.w
            && other.y + other.h <= self.y + self.h
    }

    fn intersects(&self, other: &FreeRect) -> bool {
        self.x < other.x + other.w
            && other.x < self.x + self.w
            && self.y < other.y + other.h
            && other.y < self.y + self.h
    }
}

struct PageState {
    free: Vec<FreeRect>,
}

impl PageState {
    /// The free list extends one padding step past the page so edge items do
    /// not pay for trailing padding.
    fn new(page_size: u32, padding: u32) -> Self {
        Self {
            free: vec![FreeRect {
                x: 0,
                y: 0,
                w: page_size + padding,
                h: page_size + padding,
            }],
        }
    }

    /// Best-short-side-fit search over the free list for a padded request.
    fn find_position(&self, w: u32, h: u32) -> Option<(u32, u32)> {
        let mut best: Option<(u32, u32, u32, u32)> = None; // (short, long, x, y)
        for rect in &self.free {
            if rect.w < w || rect.h < h {
                continue;
            }
            let leftover_w = rect.w - w;
            let leftover_h = rect.h - h;
            let short = leftover_w.min(leftover_h);
            let long = leftover_w.max(leftover_h);
            let better = match best {
                None => true,
                Some((bs, bl, _, _)) => short < bs || (short == bs && long < bl),
            };
            if better {
                best = Some((short, long, rect.x, rect.y));
            }
        }
        best.map(|(_, _, x, y)| (x, y))
    }

    /// Splits every intersecting free rectangle around the placed rect and
    /// prunes contained leftovers.
    fn place(&mut self, placed: FreeRect) {
        let mut next = Vec::with_capacity(self.free.len() + 4);
        for rect in &self.free {
            if !rect.intersects(&placed) {
                next.push(*rect);
                continue;
            }
            // Top strip.
            if placed.y > rect.y {
                next.push(FreeRect {
                    x: rect.x,
                    y: rect.y,
                    w: rect.w,
                    h: placed.y - rect.y,
                });
            }
            // Bottom strip.
            if placed.y + placed.h < rect.y + rect.h {
                next.push(FreeRect {
                    x: rect.x,
                    y: placed.y + placed.h,
                    w: rect.w,
                    h: rect.y + rect.h - (placed.y + placed.h),
                });
            }
            // Left strip.
            if placed.x > rect.x {
                next.push(FreeRect {
                    x: rect.x,
                    y: rect.y,
                    w: placed.x - rect.x,
                    h: rect.h,
                });
            }
            // Right strip.
            if placed.x + placed.w < rect.x + rect.w {
                next.push(FreeRect {
                    x: placed.x + placed.w,
                    y: rect.y,
                    w: rect.x + rect.w - (placed.x + placed.w),
                    h: rect.h,
                });
            }
        }

        // Prune rectangles contained in another. O(n^2) but required for
        // correctness at 2k-4k page sizes.
        let mut keep = vec![true; next.len()];
        for i in 0..next.len() {
            if !keep[i] {
                continue;
            }
            for j in 0..next.len() {
                if i == j || !keep[j] {
                    continue;
                }
                if next[j].contains(&next[i]) {
                    keep[i] = false;
                    break;
                }
            }
        }
        self.free = next
            .into_iter()
            .zip(keep)
            .filter_map(|(r, k)| k.then_some(r))
            .collect();
    }
}

/// Packs `items` onto `page_size`^2 pages with `padding` pixels reserved to
/// the right and below every placement.
///
/// Items are sorted by decreasing target height; each page is filled until
/// insertion fails for every remaining item, then a new page opens.
pub fn pack_items(
    items: &[PackItem],
    page_size: u32,
    padding: u32,
    cancel: &CancelToken,
) -> PackResult {
    let mut oversized: Vec<String> = Vec::new();
    let mut remaining: Vec<&PackItem> = Vec::new();
    for item in items {
        if item.width > page_size || item.height > page_size {
            oversized.push(item.name.clone());
        } else {
            remaining.push(item);
        }
    }
    remaining.sort_by(|a, b| b.height.cmp(&a.height));

    let mut pages = Vec::new();
    while !remaining.is_empty() {
        if cancel.is_cancelled() {
            return PackResult {
                pages: Vec::new(),
                oversized,
            };
        }

        let mut state = PageState::new(page_size, padding);
        let mut rects = Vec::new();
        let mut used_area = 0u64;
        let mut unplaced = Vec::new();

        for item in remaining.drain(..) {
            let padded_w = item.width + padding;
            let padded_h = item.height + padding;
            match state.find_position(padded_w, padded_h) {
                Some((x, y)) => {
                    state.place(FreeRect {
                        x,
                        y,
                        w: padded_w,
                        h: padded_h,
                    });
                    used_area += item.width as u64 * item.height as u64;
                    rects.push(PackedRect {
                        name: item.name.clone(),
                        x,
                        y,
                        width: item.width,
                        height: item.height,
                    });
                }
                None => unplaced.push(item),
            }
        }

        if rects.is_empty() {
            // Nothing fits even on an empty page.
            oversized.extend(unplaced.into_iter().map(|i| i.name.clone()));
            break;
        }

        let page_area = page_size as u64 * page_size as u64;
        pages.push(PackedPage {
            name: format!("page_{}.png", pages.len()),
            width: page_size,
            height: page_size,
            rects,
            efficiency: used_area as f32 / page_area as f32,
        });
        remaining = unplaced;
    }

    PackResult { pages, oversized }
}

/// Draws each packed rect's image onto its page. Rects whose image is not in
/// `images` are left blank.
pub fn composite_pages(
    result: &PackResult,
    images: &HashMap<String, RgbaImage>,
) -> Vec<(String, RgbaImage)> {
    result
        .pages
        .iter()
        .map(|page| {
            let mut canvas = RgbaImage::new(page.width, page.height);
            for rect in &page.rects {
                if let Some(image) = images.get(&rect.name) {
                    imageops::overlay(&mut canvas, image, rect.x as i64, rect.y as i64);
                }
            }
            (page.name.clone(), canvas)
        })
        .collect()
}
