//! Skeleton JSON parsing
//!
//! Builds a [`SkeletonDocument`] from the JSON-like project tree. The schema
//! is open (exporters add keys freely), so parsing walks `serde_json::Value`
//! and only rejects input that breaks the structural invariants: unknown
//! bone/slot references and parent cycles.

use std::collections::HashSet;

use serde_json::Value;

use crate::skeleton::{
    Animation, AttachmentDef, AttachmentKey, AttachmentKind, Bone, ScaleKey, SkeletonError,
    SkeletonDocument, Skin, Slot,
};

/// Parses one skeleton document. `name` identifies the source (file stem).
pub fn parse_skeleton(name: &str, text: &str) -> Result<SkeletonDocument, SkeletonError> {
    let doc: Value = serde_json::from_str(text)?;
    let root = doc
        .as_object()
        .ok_or_else(|| SkeletonError::Malformed("document root is not an object".to_string()))?;

    let bones = parse_bones(root.get("bones"))?;
    validate_forest(&bones)?;
    let bone_lookup = SkeletonDocument::build_bone_lookup(&bones);

    let slots = parse_slots(root.get("slots"), &bones, &bone_lookup)?;
    let skins = parse_skins(root.get("skins"), &slots)?;
    let animations = parse_animations(root.get("animations"), &bone_lookup, &slots)?;

    let events = match root.get("events").and_then(Value::as_object) {
        Some(map) => map.keys().cloned().collect(),
        None => Vec::new(),
    };

    let images_path = root
        .get("skeleton")
        .and_then(|s| s.get("images"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(SkeletonDocument {
        name: name.to_string(),
        bones,
        slots,
        skins,
        animations,
        events,
        images_path,
        bone_lookup,
    })
}

fn get_f32(obj: &Value, key: &str, default: f32) -> f32 {
    obj.get(key).and_then(Value::as_f64).map_or(default, |v| v as f32)
}

fn get_dimension(obj: &Value, key: &str) -> Option<u32> {
    obj.get(key)
        .and_then(Value::as_f64)
        .filter(|v| *v > 0.0)
        .map(|v| v.round() as u32)
}

fn parse_bones(value: Option<&Value>) -> Result<Vec<Bone>, SkeletonError> {
    let list = value
        .and_then(Value::as_array)
        .ok_or_else(|| SkeletonError::Malformed("missing 'bones' array".to_string()))?;

    // Two passes so parents may be declared in any order.
    let names: Vec<String> = list
        .iter()
        .map(|b| {
            b.get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| SkeletonError::Malformed("bone without a name".to_string()))
        })
        .collect::<Result<_, _>>()?;

    let mut bones = Vec::with_capacity(list.len());
    for (entry, name) in list.iter().zip(names.iter()) {
        let parent = match entry.get("parent").and_then(Value::as_str) {
            Some(parent_name) => Some(
                names
                    .iter()
                    .position(|n| n == parent_name)
                    .ok_or_else(|| {
                        SkeletonError::Malformed(format!(
                            "bone '{}' references unknown parent '{}'",
                            name, parent_name
                        ))
                    })?,
            ),
            None => None,
        };
        bones.push(Bone {
            name: name.clone(),
            parent,
            scale_x: get_f32(entry, "scaleX", 1.0),
            scale_y: get_f32(entry, "scaleY", 1.0),
        });
    }
    Ok(bones)
}

/// The bone graph must be a forest: walking any parent chain terminates.
fn validate_forest(bones: &[Bone]) -> Result<(), SkeletonError> {
    for (start, bone) in bones.iter().enumerate() {
        let mut current = bone.parent;
        let mut steps = 0usize;
        while let Some(idx) = current {
            steps += 1;
            if steps > bones.len() {
                return Err(SkeletonError::Malformed(format!(
                    "bone '{}' is part of a parent cycle",
                    bones[start].name
                )));
            }
            current = bones[idx].parent;
        }
    }
    Ok(())
}

fn parse_slots(
    value: Option<&Value>,
    bones: &[Bone],
    bone_lookup: &std::collections::HashMap<String, usize>,
) -> Result<Vec<Slot>, SkeletonError> {
    let list = value
        .and_then(Value::as_array)
        .ok_or_else(|| SkeletonError::Malformed("missing 'slots' array".to_string()))?;

    let mut slots = Vec::with_capacity(list.len());
    for entry in list {
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| SkeletonError::Malformed("slot without a name".to_string()))?;
        let bone_name = entry
            .get("bone")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SkeletonError::Malformed(format!("slot '{}' has no bone", name))
            })?;
        let bone = *bone_lookup.get(bone_name).ok_or_else(|| {
            SkeletonError::Malformed(format!(
                "slot '{}' references unknown bone '{}'",
                name, bone_name
            ))
        })?;
        debug_assert!(bone < bones.len());
        slots.push(Slot {
            name: name.to_string(),
            bone,
            attachment: entry
                .get("attachment")
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }
    Ok(slots)
}

fn parse_attachment(value: &Value) -> AttachmentDef {
    AttachmentDef {
        path: value.get("path").and_then(Value::as_str).map(str::to_string),
        scale_x: get_f32(value, "scaleX", 1.0),
        scale_y: get_f32(value, "scaleY", 1.0),
        width: get_dimension(value, "width"),
        height: get_dimension(value, "height"),
        kind: AttachmentKind::from_type_field(value.get("type").and_then(Value::as_str)),
    }
}

fn parse_skin_attachments(
    skin_name: &str,
    value: &Value,
    slots: &[Slot],
) -> Result<Vec<(usize, Vec<(String, AttachmentDef)>)>, SkeletonError> {
    let map = value.as_object().ok_or_else(|| {
        SkeletonError::Malformed(format!("skin '{}' is not an object", skin_name))
    })?;

    let mut attachments = Vec::new();
    for (slot_name, slot_value) in map {
        let slot = slots
            .iter()
            .position(|s| &s.name == slot_name)
            .ok_or_else(|| {
                SkeletonError::Malformed(format!(
                    "skin '{}' references unknown slot '{}'",
                    skin_name, slot_name
                ))
            })?;
        let defs = slot_value.as_object().ok_or_else(|| {
            SkeletonError::Malformed(format!(
                "skin '{}' slot '{}' is not an object",
                skin_name, slot_name
            ))
        })?;
        let parsed: Vec<(String, AttachmentDef)> = defs
            .iter()
            .map(|(att_name, att_value)| (att_name.clone(), parse_attachment(att_value)))
            .collect();
        attachments.push((slot, parsed));
    }
    Ok(attachments)
}

/// Accepts both skin layouts: the map form (`{"default": {...}}`) and the
/// list form (`[{"name": "default", "attachments": {...}}]`).
fn parse_skins(value: Option<&Value>, slots: &[Slot]) -> Result<Vec<Skin>, SkeletonError> {
    let value = value
        .ok_or_else(|| SkeletonError::Malformed("missing 'skins'".to_string()))?;

    let mut skins = Vec::new();
    match value {
        Value::Object(map) => {
            for (name, attachments) in map {
                skins.push(Skin {
                    name: name.clone(),
                    attachments: parse_skin_attachments(name, attachments, slots)?,
                });
            }
        }
        Value::Array(list) => {
            for entry in list {
                let name = entry
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        SkeletonError::Malformed("skin entry without a name".to_string())
                    })?;
                let attachments = match entry.get("attachments") {
                    Some(a) => parse_skin_attachments(name, a, slots)?,
                    None => Vec::new(),
                };
                skins.push(Skin {
                    name: name.to_string(),
                    attachments,
                });
            }
        }
        _ => {
            return Err(SkeletonError::Malformed(
                "'skins' is neither an object nor an array".to_string(),
            ))
        }
    }
    Ok(skins)
}

fn parse_scale_keys(value: &Value) -> Vec<ScaleKey> {
    let mut keys: Vec<ScaleKey> = value
        .as_array()
        .map(|list| {
            list.iter()
                .map(|k| ScaleKey {
                    time: get_f32(k, "time", 0.0),
                    x: get_f32(k, "x", 1.0),
                    y: get_f32(k, "y", 1.0),
                    stepped: k.get("curve").and_then(Value::as_str) == Some("stepped"),
                })
                .collect()
        })
        .unwrap_or_default();
    keys.sort_by(|a, b| a.time.total_cmp(&b.time));
    keys
}

fn parse_attachment_keys(value: &Value) -> Vec<AttachmentKey> {
    let mut keys: Vec<AttachmentKey> = value
        .as_array()
        .map(|list| {
            list.iter()
                .map(|k| AttachmentKey {
                    time: get_f32(k, "time", 0.0),
                    name: k.get("name").and_then(Value::as_str).map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default();
    keys.sort_by(|a, b| a.time.total_cmp(&b.time));
    keys
}

fn parse_animations(
    value: Option<&Value>,
    bone_lookup: &std::collections::HashMap<String, usize>,
    slots: &[Slot],
) -> Result<Vec<Animation>, SkeletonError> {
    let map = value
        .and_then(Value::as_object)
        .ok_or_else(|| SkeletonError::Malformed("missing 'animations' object".to_string()))?;

    let mut animations = Vec::with_capacity(map.len());
    for (anim_name, anim_value) in map {
        let mut attachment_timelines = Vec::new();
        let mut scale_timelines = Vec::new();
        let mut animated_bones = HashSet::new();
        let mut animated_slots = HashSet::new();

        if let Some(slot_map) = anim_value.get("slots").and_then(Value::as_object) {
            for (slot_name, timelines) in slot_map {
                let slot = slots
                    .iter()
                    .position(|s| &s.name == slot_name)
                    .ok_or_else(|| {
                        SkeletonError::Malformed(format!(
                            "animation '{}' references unknown slot '{}'",
                            anim_name, slot_name
                        ))
                    })?;
                animated_slots.insert(slot);
                if let Some(keys) = timelines.get("attachment") {
                    attachment_timelines.push((slot, parse_attachment_keys(keys)));
                }
            }
        }

        if let Some(bone_map) = anim_value.get("bones").and_then(Value::as_object) {
            for (bone_name, timelines) in bone_map {
                let bone = *bone_lookup.get(bone_name).ok_or_else(|| {
                    SkeletonError::Malformed(format!(
                        "animation '{}' references unknown bone '{}'",
                        anim_name, bone_name
                    ))
                })?;
                animated_bones.insert(bone);
                if let Some(keys) = timelines.get("scale") {
                    let keys = parse_scale_keys(keys);
                    if !keys.is_empty() {
                        scale_timelines.push((bone, keys));
                    }
                }
            }
        }

        animations.push(Animation {
            name: anim_name.clone(),
            attachment_timelines,
            scale_timelines,
            animated_bones,
            animated_slots,
        });
    }
    Ok(animations)
}
