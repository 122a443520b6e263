//! Report aggregation
//!
//! Folds per-animation analyses into one global table of maxima per image,
//! with the source-priority and tie-break rules centralised in
//! [`prefer_candidate`], then merges tables across skeletons.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::{
    index::ImageIndex,
    skeleton::{
        analyser::{AnimationAnalysis, SkeletonAnalysis, SETUP_POSE},
        DEFAULT_SKIN,
    },
};

/// Final per-image statistic across all animations and skeletons.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalAssetStat {
    /// Index key of the resolved asset.
    pub image_key: String,
    pub physical: (u32, u32),
    pub canonical: Option<(u32, u32)>,
    pub max_render_width: u32,
    pub max_render_height: u32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub source_animation: String,
    pub source_skeleton: String,
    pub frame_index: u32,
    pub skin: String,
    /// User override percentage, when one applies to this image.
    pub override_pct: Option<f32>,
    /// Canonical dimensions disagree with the decoded pixels.
    pub dimension_mismatch: bool,
}

impl GlobalAssetStat {
    fn area(&self) -> u64 {
        self.max_render_width as u64 * self.max_render_height as u64
    }
}

/// An index entry no usage resolved to and no atlas page backs.
#[derive(Debug, Clone, Serialize)]
pub struct UnusedAsset {
    pub image_key: String,
    pub physical: (u32, u32),
    pub source_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    /// Per-animation results across all skeletons, in input order.
    pub animations: Vec<AnimationAnalysis>,
    pub stats: Vec<GlobalAssetStat>,
    pub unused: Vec<UnusedAsset>,
    /// Attachment paths with no index entry.
    pub missing_images: Vec<String>,
    pub skin_names: Vec<String>,
    pub event_names: Vec<String>,
    pub control_bones: Vec<String>,
    pub is_canonical_data_missing: bool,
}

fn ceil_scaled(size: u32, scale: f32) -> u32 {
    (size as f64 * scale as f64).ceil() as u32
}

fn apply_override(raw: u32, pct: Option<f32>) -> u32 {
    match pct {
        Some(p) => (raw as f64 * p as f64 / 100.0).ceil() as u32,
        None => raw,
    }
}

/// Decides whether `new` replaces `old` in a per-skeleton table.
///
/// Rules, in order: a non-setup observation always beats a setup-pose one
/// and is never beaten by one; otherwise larger area wins; on equal area a
/// non-default skin is preferred over `default`; otherwise the earlier
/// record stays.
fn prefer_candidate(old: &GlobalAssetStat, new: &GlobalAssetStat) -> bool {
    let old_setup = old.source_animation == SETUP_POSE;
    let new_setup = new.source_animation == SETUP_POSE;
    if old_setup != new_setup {
        return old_setup;
    }
    if new.area() != old.area() {
        return new.area() > old.area();
    }
    new.skin != DEFAULT_SKIN && old.skin == DEFAULT_SKIN
}

/// Aggregates one skeleton's animation analyses into per-image stats.
/// Returns the stats in first-seen order plus unresolved attachment paths.
fn aggregate_skeleton(
    analysis: &SkeletonAnalysis,
    index: &ImageIndex,
    overrides: &HashMap<String, f32>,
) -> (Vec<GlobalAssetStat>, Vec<String>) {
    let mut order: Vec<String> = Vec::new();
    let mut stats: HashMap<String, GlobalAssetStat> = HashMap::new();
    let mut missing: Vec<String> = Vec::new();
    let mut missing_seen: HashSet<String> = HashSet::new();

    for animation in &analysis.animations {
        for usage in &animation.usages {
            if usage.ignored {
                continue;
            }
            let asset = match index.find_image(&usage.image_key) {
                Some(asset) => asset,
                None => {
                    if missing_seen.insert(usage.image_key.clone()) {
                        missing.push(usage.image_key.clone());
                    }
                    continue;
                }
            };

            let (eff_w, eff_h) = asset.effective();
            let override_pct = overrides.get(&asset.key).copied();
            let candidate = GlobalAssetStat {
                image_key: asset.key.clone(),
                physical: asset.physical,
                canonical: asset.canonical,
                max_render_width: apply_override(
                    ceil_scaled(eff_w, usage.scale_x),
                    override_pct,
                ),
                max_render_height: apply_override(
                    ceil_scaled(eff_h, usage.scale_y),
                    override_pct,
                ),
                scale_x: usage.scale_x,
                scale_y: usage.scale_y,
                source_animation: animation.animation.clone(),
                source_skeleton: analysis.skeleton.clone(),
                frame_index: usage.frame_index,
                skin: usage.skin.clone(),
                override_pct,
                dimension_mismatch: asset.dimension_mismatch(),
            };

            match stats.get_mut(&candidate.image_key) {
                None => {
                    order.push(candidate.image_key.clone());
                    stats.insert(candidate.image_key.clone(), candidate);
                }
                Some(current) => {
                    if prefer_candidate(current, &candidate) {
                        *current = candidate;
                    }
                }
            }
        }
    }

    let ordered = order
        .into_iter()
        .filter_map(|key| stats.remove(&key))
        .collect();
    (ordered, missing)
}

/// Merges pre-aggregated per-skeleton stats. Across skeletons only the area
/// rule applies; ties keep the earlier record.
fn merge_stats(tables: Vec<Vec<GlobalAssetStat>>) -> Vec<GlobalAssetStat> {
    let mut order: Vec<String> = Vec::new();
    let mut merged: HashMap<String, GlobalAssetStat> = HashMap::new();

    for table in tables {
        for stat in table {
            match merged.get_mut(&stat.image_key) {
                None => {
                    order.push(stat.image_key.clone());
                    merged.insert(stat.image_key.clone(), stat);
                }
                Some(current) => {
                    if stat.area() > current.area() {
                        *current = stat;
                    }
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| merged.remove(&key))
        .collect()
}

/// Builds the full report over every skeleton analysis and the image index.
pub fn build_report(
    analyses: &[SkeletonAnalysis],
    index: &ImageIndex,
    overrides: &HashMap<String, f32>,
) -> AnalysisReport {
    let mut tables = Vec::with_capacity(analyses.len());
    let mut missing_images: Vec<String> = Vec::new();
    let mut missing_seen: HashSet<String> = HashSet::new();

    for analysis in analyses {
        let (table, missing) = aggregate_skeleton(analysis, index, overrides);
        tables.push(table);
        for key in missing {
            if missing_seen.insert(key.clone()) {
                missing_images.push(key);
            }
        }
    }
    let stats = merge_stats(tables);

    let used: HashSet<&str> = stats.iter().map(|s| s.image_key.as_str()).collect();
    let unused: Vec<UnusedAsset> = index
        .assets()
        .filter(|asset| !used.contains(asset.key.as_str()))
        .filter(|asset| !index.is_page_backing(&asset.key))
        .map(|asset| UnusedAsset {
            image_key: asset.key.clone(),
            physical: asset.physical,
            source_path: asset.source_path.clone(),
        })
        .collect();

    let mut skin_names: Vec<String> = Vec::new();
    let mut event_names: Vec<String> = Vec::new();
    let mut control_bones: Vec<String> = Vec::new();
    for analysis in analyses {
        skin_names.extend(analysis.skin_names.iter().cloned());
        event_names.extend(analysis.event_names.iter().cloned());
        control_bones.extend(analysis.control_bones.iter().cloned());
    }
    skin_names.sort();
    skin_names.dedup();
    event_names.sort();
    event_names.dedup();
    control_bones.sort();
    control_bones.dedup();

    AnalysisReport {
        animations: analyses
            .iter()
            .flat_map(|a| a.animations.iter().cloned())
            .collect(),
        stats,
        unused,
        missing_images,
        skin_names,
        event_names,
        control_bones,
        is_canonical_data_missing: analyses.iter().any(|a| a.canonical_data_missing),
    }
}
