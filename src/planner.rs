//! Optimisation planning
//!
//! Turns merged asset stats into an ordered task list: buffered targets,
//! clamped to the physical extent, resizes first in natural-numeric order,
//! straight copies last. The planner never reads pixel data.

use std::cmp::Ordering;

use serde::Serialize;

use crate::{index::ImageIndex, report::GlobalAssetStat};

/// One planned output image.
#[derive(Debug, Clone, Serialize)]
pub struct OptimisationTask {
    pub image_key: String,
    /// Path of the file inside the optimised output, always `.png`.
    pub output_path: String,
    pub physical: (u32, u32),
    pub target: (u32, u32),
    pub is_resize: bool,
    /// Area saved relative to the physical image, in percent.
    pub reduction_pct: f32,
}

fn buffered(value: u32, buffer_pct: f32) -> u32 {
    (value as f64 * (1.0 + buffer_pct as f64 / 100.0)).ceil() as u32
}

/// Compares strings segment-wise, digit runs as numbers.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ai = a.chars().peekable();
    let mut bi = b.chars().peekable();
    loop {
        match (ai.peek().copied(), bi.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) => {
                if ca.is_ascii_digit() && cb.is_ascii_digit() {
                    let mut na = 0u64;
                    while let Some(c) = ai.peek().copied().filter(char::is_ascii_digit) {
                        na = na.saturating_mul(10).saturating_add(c as u64 - '0' as u64);
                        ai.next();
                    }
                    let mut nb = 0u64;
                    while let Some(c) = bi.peek().copied().filter(char::is_ascii_digit) {
                        nb = nb.saturating_mul(10).saturating_add(c as u64 - '0' as u64);
                        bi.next();
                    }
                    match na.cmp(&nb) {
                        Ordering::Equal => {}
                        other => return other,
                    }
                } else {
                    match ca.cmp(&cb) {
                        Ordering::Equal => {
                            ai.next();
                            bi.next();
                        }
                        other => return other,
                    }
                }
            }
        }
    }
}

fn output_path(key: &str) -> String {
    format!("{}.png", crate::index::strip_extension(key))
}

/// Builds the task list for every image with a merged stat.
pub fn plan(
    stats: &[GlobalAssetStat],
    index: &ImageIndex,
    buffer_pct: f32,
) -> Vec<OptimisationTask> {
    let mut tasks: Vec<OptimisationTask> = stats
        .iter()
        .filter_map(|stat| {
            let asset = index.get(&stat.image_key)?;
            let (pw, ph) = asset.physical;
            let tw = buffered(stat.max_render_width, buffer_pct).min(pw).max(1);
            let th = buffered(stat.max_render_height, buffer_pct).min(ph).max(1);
            let target = (tw, th);
            let physical_area = pw as f64 * ph as f64;
            let reduction = if physical_area > 0.0 {
                100.0 * (1.0 - (tw as f64 * th as f64) / physical_area)
            } else {
                0.0
            };
            Some(OptimisationTask {
                image_key: stat.image_key.clone(),
                output_path: output_path(&stat.image_key),
                physical: asset.physical,
                target,
                is_resize: target != asset.physical,
                reduction_pct: reduction as f32,
            })
        })
        .collect();

    tasks.sort_by(|a, b| {
        b.is_resize
            .cmp(&a.is_resize)
            .then_with(|| natural_cmp(&a.image_key, &b.image_key))
    });
    tasks
}
