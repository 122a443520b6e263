//! Scale analysis for skeleton documents
//!
//! Walks every animation of a skeleton (plus the synthetic setup pose),
//! propagates scale through the bone hierarchy at sampled times, and records
//! the maximum render scale each attachment image reaches.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::skeleton::{Animation, SkeletonDocument, DEFAULT_SKIN};

/// Name of the synthetic animation carrying setup-pose usage.
pub const SETUP_POSE: &str = "Setup Pose";

/// Fixed sampling rate for animation timelines, in Hz.
pub const SAMPLE_RATE: f32 = 30.0;

/// Two scale magnitudes closer than this are considered tied.
const SCALE_TIE_EPSILON: f32 = 1e-4;

/// Maximum observed render scale for one (slot, image) pair within one
/// animation.
#[derive(Debug, Clone, Serialize)]
pub struct FoundAssetUsage {
    /// Slash-joined bone names from the root down to the slot's bone.
    pub bone_path: String,
    pub slot: String,
    /// Raw image lookup key (resolved through the index later).
    pub image_key: String,
    /// Largest |scale| on each axis, attachment scale included.
    pub scale_x: f32,
    pub scale_y: f32,
    /// Frame (at 30 Hz) of the sample that produced the maximum.
    pub frame_index: u32,
    /// Skin that drove the maximum.
    pub skin: String,
    /// True when a scale timeline affects this bone in this animation.
    pub scale_affected: bool,
    /// True when the driving skin is not `default` but the attachment also
    /// appears in `default`.
    pub show_skin_label: bool,
    /// True when a local per-animation override excludes this usage from
    /// global maxima.
    pub ignored: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnimationAnalysis {
    pub skeleton: String,
    pub animation: String,
    pub usages: Vec<FoundAssetUsage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkeletonAnalysis {
    pub skeleton: String,
    /// Setup pose first, then animations in input order.
    pub animations: Vec<AnimationAnalysis>,
    pub skin_names: Vec<String>,
    pub event_names: Vec<String>,
    pub control_bones: Vec<String>,
    pub canonical_data_missing: bool,
}

/// Per-bone maximum over the sampled timeline, absolute values.
#[derive(Debug, Clone, Copy)]
struct BoneScaleMax {
    x: f32,
    y: f32,
    frame: u32,
    affected: bool,
}

/// Builds the local-override composite key for one usage.
pub fn local_override_key(skeleton: &str, animation: &str, image_key: &str) -> String {
    format!("{}/{}/{}", skeleton, animation, image_key)
}

/// Analyses every animation of `doc`, including the synthetic setup pose.
pub fn analyse_skeleton(
    doc: &SkeletonDocument,
    local_overrides: &HashSet<String>,
) -> SkeletonAnalysis {
    let setup = setup_cumulative(doc);

    let mut animations = Vec::with_capacity(doc.animations.len() + 1);
    animations.push(analyse_setup_pose(doc, &setup, local_overrides));
    for anim in &doc.animations {
        animations.push(analyse_animation(doc, anim, &setup, local_overrides));
    }

    let mut skin_names: Vec<String> = doc.skins.iter().map(|s| s.name.clone()).collect();
    skin_names.sort();
    let mut event_names = doc.events.clone();
    event_names.sort();
    let mut control_bones = doc.control_bones();
    control_bones.sort();

    SkeletonAnalysis {
        skeleton: doc.name.clone(),
        animations,
        skin_names,
        event_names,
        control_bones,
        canonical_data_missing: doc.canonical_data_missing(),
    }
}

/// Signed cumulative setup scale per bone (parent chain product).
fn setup_cumulative(doc: &SkeletonDocument) -> Vec<(f32, f32)> {
    fn compute(
        idx: usize,
        doc: &SkeletonDocument,
        memo: &mut Vec<Option<(f32, f32)>>,
    ) -> (f32, f32) {
        if let Some(v) = memo[idx] {
            return v;
        }
        let bone = &doc.bones[idx];
        let parent = match bone.parent {
            Some(p) => compute(p, doc, memo),
            None => (1.0, 1.0),
        };
        let v = (parent.0 * bone.scale_x, parent.1 * bone.scale_y);
        memo[idx] = Some(v);
        v
    }

    let mut memo = vec![None; doc.bones.len()];
    (0..doc.bones.len())
        .map(|i| compute(i, doc, &mut memo))
        .collect()
}

/// Linear/stepped evaluation of a scale timeline at time `t`.
fn evaluate_scale(keys: &[crate::skeleton::ScaleKey], t: f32) -> (f32, f32) {
    match keys {
        [] => (1.0, 1.0),
        [only] => (only.x, only.y),
        _ => {
            let first = &keys[0];
            if t <= first.time {
                return (first.x, first.y);
            }
            let last = &keys[keys.len() - 1];
            if t >= last.time {
                return (last.x, last.y);
            }
            let next = keys.partition_point(|k| k.time <= t);
            let k0 = &keys[next - 1];
            let k1 = &keys[next];
            if k0.stepped {
                return (k0.x, k0.y);
            }
            let span = k1.time - k0.time;
            if span <= f32::EPSILON {
                return (k1.x, k1.y);
            }
            let alpha = (t - k0.time) / span;
            (
                k0.x + (k1.x - k0.x) * alpha,
                k0.y + (k1.y - k0.y) * alpha,
            )
        }
    }
}

/// Sample grid: the fixed 30 Hz lattice over the scale-key horizon, plus the
/// exact time of every scale key.
fn sample_times(anim: &Animation) -> Vec<f32> {
    let horizon = anim.scale_duration();
    let steps = (horizon * SAMPLE_RATE).floor() as u32;
    let mut times: Vec<f32> = (0..=steps).map(|i| i as f32 / SAMPLE_RATE).collect();
    for (_, keys) in &anim.scale_timelines {
        times.extend(keys.iter().map(|k| k.time));
    }
    times.sort_by(f32::total_cmp);
    times.dedup_by(|a, b| (*a - *b).abs() < 1e-6);
    times
}

/// True per bone when the bone itself or any ancestor has a scale timeline.
fn scale_affected_set(doc: &SkeletonDocument, anim: &Animation) -> Vec<bool> {
    let keyed: HashSet<usize> = anim.scale_timelines.iter().map(|(b, _)| *b).collect();
    doc.bones
        .iter()
        .enumerate()
        .map(|(idx, _)| {
            let mut current = Some(idx);
            while let Some(i) = current {
                if keyed.contains(&i) {
                    return true;
                }
                current = doc.bones[i].parent;
            }
            false
        })
        .collect()
}

/// Cumulative scale of `bone` at time `t`: parent chain x setup x animated.
fn cumulative_at(
    doc: &SkeletonDocument,
    anim: &Animation,
    bone: usize,
    t: f32,
    cache: &mut Vec<Option<(f32, f32)>>,
) -> (f32, f32) {
    if let Some(v) = cache[bone] {
        return v;
    }
    let parent = match doc.bones[bone].parent {
        Some(p) => cumulative_at(doc, anim, p, t, cache),
        None => (1.0, 1.0),
    };
    let (ax, ay) = match anim.scale_timeline(bone) {
        Some(keys) => evaluate_scale(keys, t),
        None => (1.0, 1.0),
    };
    let v = (
        parent.0 * doc.bones[bone].scale_x * ax,
        parent.1 * doc.bones[bone].scale_y * ay,
    );
    cache[bone] = Some(v);
    v
}

/// Folds the sampled cumulative scales into a per-bone maximum record.
fn bone_scale_maxima(
    doc: &SkeletonDocument,
    anim: &Animation,
    setup: &[(f32, f32)],
) -> Vec<BoneScaleMax> {
    let affected = scale_affected_set(doc, anim);
    let mut best: Vec<BoneScaleMax> = setup
        .iter()
        .zip(affected.iter())
        .map(|((x, y), affected)| BoneScaleMax {
            x: x.abs(),
            y: y.abs(),
            frame: 0,
            affected: *affected,
        })
        .collect();

    if anim.scale_timelines.is_empty() {
        return best;
    }

    let mut started = vec![false; doc.bones.len()];
    for t in sample_times(anim) {
        let frame = (t * SAMPLE_RATE).round() as u32;
        let mut cache = vec![None; doc.bones.len()];
        for bone in 0..doc.bones.len() {
            if !affected[bone] {
                continue;
            }
            let (cx, cy) = cumulative_at(doc, anim, bone, t, &mut cache);
            let magnitude = cx.abs().max(cy.abs());
            let record = &mut best[bone];
            if !started[bone] || magnitude > record.x.max(record.y) {
                *record = BoneScaleMax {
                    x: cx.abs(),
                    y: cy.abs(),
                    frame,
                    affected: true,
                };
                started[bone] = true;
            }
        }
    }
    best
}

/// Candidate attachments used by one animation: timeline names, then setup
/// attachments of implicitly active slots. First occurrence wins.
fn collect_candidates(doc: &SkeletonDocument, anim: &Animation) -> Vec<(usize, String)> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for (slot, keys) in &anim.attachment_timelines {
        for key in keys {
            if let Some(name) = &key.name {
                if seen.insert((*slot, name.clone())) {
                    out.push((*slot, name.clone()));
                }
            }
        }
    }

    let timeline_slots: HashSet<usize> =
        anim.attachment_timelines.iter().map(|(s, _)| *s).collect();
    for (idx, slot) in doc.slots.iter().enumerate() {
        if timeline_slots.contains(&idx) {
            continue;
        }
        let active =
            anim.animated_slots.contains(&idx) || anim.animated_bones.contains(&slot.bone);
        if !active {
            continue;
        }
        if let Some(name) = &slot.attachment {
            if seen.insert((idx, name.clone())) {
                out.push((idx, name.clone()));
            }
        }
    }
    out
}

/// Resolves candidates through every skin and keeps, per (slot, image), the
/// record with the largest max-axis magnitude. Ties prefer the default skin.
fn build_usages(
    doc: &SkeletonDocument,
    animation_name: &str,
    candidates: &[(usize, String)],
    bone_max: &[BoneScaleMax],
    local_overrides: &HashSet<String>,
) -> Vec<FoundAssetUsage> {
    let mut order: Vec<(usize, String)> = Vec::new();
    let mut winners: HashMap<(usize, String), FoundAssetUsage> = HashMap::new();
    let mut seen_in_default: HashSet<(usize, String)> = HashSet::new();

    for (slot_idx, attachment_name) in candidates {
        for skin in &doc.skins {
            let def = match skin.find(*slot_idx, attachment_name) {
                Some(def) => def,
                None => continue,
            };
            if !def.kind.is_textured() {
                continue;
            }

            let image_key = def.image_key(attachment_name);
            let bone = doc.slots[*slot_idx].bone;
            let max = bone_max[bone];
            let usage = FoundAssetUsage {
                bone_path: doc.bone_path(bone),
                slot: doc.slots[*slot_idx].name.clone(),
                image_key: image_key.clone(),
                scale_x: max.x * def.scale_x.abs(),
                scale_y: max.y * def.scale_y.abs(),
                frame_index: max.frame,
                skin: skin.name.clone(),
                scale_affected: max.affected,
                show_skin_label: false,
                ignored: local_overrides.contains(&local_override_key(
                    &doc.name,
                    animation_name,
                    &image_key,
                )),
            };

            let composite = (*slot_idx, image_key);
            if skin.name == DEFAULT_SKIN {
                seen_in_default.insert(composite.clone());
            }

            match winners.get_mut(&composite) {
                None => {
                    order.push(composite.clone());
                    winners.insert(composite, usage);
                }
                Some(current) => {
                    let new_mag = usage.scale_x.max(usage.scale_y);
                    let cur_mag = current.scale_x.max(current.scale_y);
                    let tied = (new_mag - cur_mag).abs() < SCALE_TIE_EPSILON;
                    if (!tied && new_mag > cur_mag)
                        || (tied && usage.skin == DEFAULT_SKIN && current.skin != DEFAULT_SKIN)
                    {
                        *current = usage;
                    }
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|composite| {
            let mut usage = winners.remove(&composite)?;
            usage.show_skin_label =
                usage.skin != DEFAULT_SKIN && seen_in_default.contains(&composite);
            Some(usage)
        })
        .collect()
}

fn analyse_animation(
    doc: &SkeletonDocument,
    anim: &Animation,
    setup: &[(f32, f32)],
    local_overrides: &HashSet<String>,
) -> AnimationAnalysis {
    let bone_max = bone_scale_maxima(doc, anim, setup);
    let candidates = collect_candidates(doc, anim);
    AnimationAnalysis {
        skeleton: doc.name.clone(),
        animation: anim.name.clone(),
        usages: build_usages(doc, &anim.name, &candidates, &bone_max, local_overrides),
    }
}

/// The setup pose as a pseudo-animation: every slot's setup attachment at
/// setup cumulative scale.
fn analyse_setup_pose(
    doc: &SkeletonDocument,
    setup: &[(f32, f32)],
    local_overrides: &HashSet<String>,
) -> AnimationAnalysis {
    let bone_max: Vec<BoneScaleMax> = setup
        .iter()
        .map(|(x, y)| BoneScaleMax {
            x: x.abs(),
            y: y.abs(),
            frame: 0,
            affected: false,
        })
        .collect();

    let candidates: Vec<(usize, String)> = doc
        .slots
        .iter()
        .enumerate()
        .filter_map(|(idx, slot)| slot.attachment.clone().map(|name| (idx, name)))
        .collect();

    AnimationAnalysis {
        skeleton: doc.name.clone(),
        animation: SETUP_POSE.to_string(),
        usages: build_usages(doc, SETUP_POSE, &candidates, &bone_max, local_overrides),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::parse_skeleton;
    use serde_json::json;

    fn doc_from(value: serde_json::Value) -> crate::skeleton::SkeletonDocument {
        parse_skeleton("test", &value.to_string()).unwrap()
    }

    fn no_overrides() -> HashSet<String> {
        HashSet::new()
    }

    #[test]
    fn unscaled_single_attachment() {
        let doc = doc_from(json!({
            "bones": [{"name": "root"}],
            "slots": [{"name": "body", "bone": "root", "attachment": "hero"}],
            "skins": {"default": {"body": {"hero": {"width": 512, "height": 512}}}},
            "animations": {
                "idle": {"slots": {"body": {"attachment": [{"time": 0, "name": "hero"}]}}}
            }
        }));
        let analysis = analyse_skeleton(&doc, &no_overrides());

        assert_eq!(analysis.animations.len(), 2);
        assert_eq!(analysis.animations[0].animation, SETUP_POSE);
        let idle = &analysis.animations[1];
        assert_eq!(idle.animation, "idle");
        assert_eq!(idle.usages.len(), 1);
        let usage = &idle.usages[0];
        assert_eq!(usage.image_key, "hero");
        assert_eq!(usage.scale_x, 1.0);
        assert_eq!(usage.scale_y, 1.0);
        assert_eq!(usage.frame_index, 0);
        assert!(!usage.scale_affected);
    }

    #[test]
    fn parent_scale_keyframe_peaks_at_last_frame() {
        let doc = doc_from(json!({
            "bones": [{"name": "root"}, {"name": "arm", "parent": "root"}],
            "slots": [{"name": "hand", "bone": "arm", "attachment": "hand"}],
            "skins": {"default": {"hand": {"hand": {"width": 100, "height": 100}}}},
            "animations": {
                "grow": {
                    "slots": {"hand": {"attachment": [{"time": 0, "name": "hand"}]}},
                    "bones": {
                        "root": {"scale": [
                            {"time": 0, "x": 1, "y": 1},
                            {"time": 1, "x": 2, "y": 2}
                        ]}
                    }
                }
            }
        }));
        let analysis = analyse_skeleton(&doc, &no_overrides());
        let usage = &analysis.animations[1].usages[0];
        assert!((usage.scale_x - 2.0).abs() < 1e-6);
        assert!((usage.scale_y - 2.0).abs() < 1e-6);
        assert_eq!(usage.frame_index, 30);
        assert!(usage.scale_affected);
        assert_eq!(usage.bone_path, "root/arm");
    }

    #[test]
    fn stepped_curve_holds_until_next_key() {
        let doc = doc_from(json!({
            "bones": [{"name": "root"}],
            "slots": [],
            "skins": {},
            "animations": {
                "step": {
                    "bones": {"root": {"scale": [
                        {"time": 0, "x": 1, "y": 1, "curve": "stepped"},
                        {"time": 1, "x": 4, "y": 4}
                    ]}}
                }
            }
        }));
        let keys = doc.animations[0].scale_timeline(0).unwrap();
        assert_eq!(evaluate_scale(keys, 0.5), (1.0, 1.0));
        assert_eq!(evaluate_scale(keys, 1.0), (4.0, 4.0));

        let setup = vec![(1.0, 1.0)];
        let maxima = bone_scale_maxima(&doc, &doc.animations[0], &setup);
        assert_eq!(maxima[0].x, 4.0);
        assert_eq!(maxima[0].frame, 30);
    }

    #[test]
    fn setup_cumulative_exact_without_timelines() {
        let doc = doc_from(json!({
            "bones": [
                {"name": "root", "scaleX": 2.0, "scaleY": 0.5},
                {"name": "arm", "parent": "root", "scaleX": -1.5}
            ],
            "slots": [{"name": "hand", "bone": "arm", "attachment": "hand"}],
            "skins": {"default": {"hand": {"hand": {}}}},
            "animations": {
                "idle": {"slots": {"hand": {"attachment": [{"time": 0, "name": "hand"}]}}}
            }
        }));
        let analysis = analyse_skeleton(&doc, &no_overrides());
        let usage = &analysis.animations[1].usages[0];
        // |2.0 * -1.5| on X, |0.5 * 1.0| on Y, sign is a flip only.
        assert!((usage.scale_x - 3.0).abs() < 1e-6);
        assert!((usage.scale_y - 0.5).abs() < 1e-6);
        assert!(!usage.scale_affected);
    }

    #[test]
    fn implicit_slot_activation_through_bone_timeline() {
        let doc = doc_from(json!({
            "bones": [{"name": "root"}],
            "slots": [{"name": "body", "bone": "root", "attachment": "hero"}],
            "skins": {"default": {"body": {"hero": {}}}},
            "animations": {
                // No attachment timeline, but the slot's bone is keyed.
                "sway": {"bones": {"root": {"scale": [{"time": 0, "x": 1.5, "y": 1.5}]}}}
            }
        }));
        let analysis = analyse_skeleton(&doc, &no_overrides());
        let sway = &analysis.animations[1];
        assert_eq!(sway.usages.len(), 1);
        assert!((sway.usages[0].scale_x - 1.5).abs() < 1e-6);
    }

    #[test]
    fn larger_skin_scale_wins_and_is_labelled() {
        let doc = doc_from(json!({
            "bones": [{"name": "root"}],
            "slots": [{"name": "body", "bone": "root", "attachment": "hero"}],
            "skins": {
                "default": {"body": {"hero": {"path": "hero"}}},
                "giant": {"body": {"hero": {"path": "hero", "scaleX": 2.0, "scaleY": 2.0}}}
            },
            "animations": {
                "idle": {"slots": {"body": {"attachment": [{"time": 0, "name": "hero"}]}}}
            }
        }));
        let analysis = analyse_skeleton(&doc, &no_overrides());
        let usage = &analysis.animations[1].usages[0];
        assert_eq!(usage.skin, "giant");
        assert!(usage.show_skin_label);
        assert!((usage.scale_x - 2.0).abs() < 1e-6);
    }

    #[test]
    fn equal_scales_prefer_default_skin() {
        let doc = doc_from(json!({
            "bones": [{"name": "root"}],
            "slots": [{"name": "body", "bone": "root", "attachment": "hero"}],
            "skins": {
                "alt": {"body": {"hero": {"path": "hero"}}},
                "default": {"body": {"hero": {"path": "hero"}}}
            },
            "animations": {
                "idle": {"slots": {"body": {"attachment": [{"time": 0, "name": "hero"}]}}}
            }
        }));
        let analysis = analyse_skeleton(&doc, &no_overrides());
        let usage = &analysis.animations[1].usages[0];
        assert_eq!(usage.skin, DEFAULT_SKIN);
        assert!(!usage.show_skin_label);
    }

    #[test]
    fn clipping_attachments_are_not_usages() {
        let doc = doc_from(json!({
            "bones": [{"name": "root"}],
            "slots": [{"name": "mask", "bone": "root", "attachment": "mask"}],
            "skins": {"default": {"mask": {"mask": {"type": "clipping"}}}},
            "animations": {
                "idle": {"slots": {"mask": {"attachment": [{"time": 0, "name": "mask"}]}}}
            }
        }));
        let analysis = analyse_skeleton(&doc, &no_overrides());
        assert!(analysis.animations.iter().all(|a| a.usages.is_empty()));
    }

    #[test]
    fn local_override_marks_usage_ignored() {
        let doc = doc_from(json!({
            "bones": [{"name": "root"}],
            "slots": [{"name": "body", "bone": "root", "attachment": "hero"}],
            "skins": {"default": {"body": {"hero": {}}}},
            "animations": {
                "idle": {"slots": {"body": {"attachment": [{"time": 0, "name": "hero"}]}}}
            }
        }));
        let mut overrides = HashSet::new();
        overrides.insert(local_override_key("test", "idle", "hero"));
        let analysis = analyse_skeleton(&doc, &overrides);
        assert!(analysis.animations[1].usages[0].ignored);
        assert!(!analysis.animations[0].usages[0].ignored);
    }

    #[test]
    fn sample_grid_includes_key_times_off_lattice() {
        let doc = doc_from(json!({
            "bones": [{"name": "root"}],
            "slots": [],
            "skins": {},
            "animations": {
                "spike": {
                    "bones": {"root": {"scale": [
                        {"time": 0, "x": 1, "y": 1},
                        {"time": 0.045, "x": 5, "y": 5},
                        {"time": 0.09, "x": 1, "y": 1}
                    ]}}
                }
            }
        }));
        // 0.045 sits between lattice points 1/30 and 2/30; the exact key
        // time must still be sampled so the peak is not missed.
        let setup = vec![(1.0, 1.0)];
        let maxima = bone_scale_maxima(&doc, &doc.animations[0], &setup);
        assert!((maxima[0].x - 5.0).abs() < 1e-6);
        assert_eq!(maxima[0].frame, 1); // round(0.045 * 30)
    }
}
