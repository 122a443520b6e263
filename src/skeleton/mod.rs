//! Skeleton document handling
//!
//! This module provides the in-memory model of a Spine-style skeleton project
//! (bones, slots, skins, animations), the JSON parser that builds it, and the
//! analyser that derives per-attachment maximum render scales.

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

pub mod analyser;
pub mod parser;

pub use analyser::{analyse_skeleton, AnimationAnalysis, FoundAssetUsage, SkeletonAnalysis};
pub use parser::parse_skeleton;

/// Name of the default skin, preferred on analysis tie-breaks.
pub const DEFAULT_SKIN: &str = "default";

/// Prefix marking rig-control bones listed separately in reports.
pub const CONTROL_BONE_PREFIX: &str = "ctrl_";

/// Error type for skeleton operations
#[derive(Debug)]
pub enum SkeletonError {
    Json(serde_json::Error),
    Malformed(String),
}

impl From<serde_json::Error> for SkeletonError {
    fn from(err: serde_json::Error) -> Self {
        SkeletonError::Json(err)
    }
}

impl fmt::Display for SkeletonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkeletonError::Json(err) => write!(f, "JSON error: {}", err),
            SkeletonError::Malformed(msg) => write!(f, "Malformed skeleton: {}", msg),
        }
    }
}

/// One logical skeleton project.
#[derive(Debug, Clone)]
pub struct SkeletonDocument {
    /// Identifier, taken from the source file name.
    pub name: String,
    /// Bones in input order. The parent graph is a forest.
    pub bones: Vec<Bone>,
    pub slots: Vec<Slot>,
    /// Skins in input order, `default` usually first.
    pub skins: Vec<Skin>,
    pub animations: Vec<Animation>,
    pub events: Vec<String>,
    /// The `skeleton.images` hint, when present.
    pub images_path: Option<String>,
    bone_lookup: HashMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct Bone {
    pub name: String,
    pub parent: Option<usize>,
    pub scale_x: f32,
    pub scale_y: f32,
}

#[derive(Debug, Clone)]
pub struct Slot {
    pub name: String,
    pub bone: usize,
    /// Setup-pose attachment name.
    pub attachment: Option<String>,
}

/// Closed set of attachment kinds. Only `Region` and `Mesh` carry textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Region,
    Mesh,
    Clipping,
    Path,
    BoundingBox,
}

impl AttachmentKind {
    pub fn from_type_field(value: Option<&str>) -> Self {
        match value.unwrap_or("region") {
            "mesh" | "linkedmesh" | "weightedmesh" => AttachmentKind::Mesh,
            "clipping" => AttachmentKind::Clipping,
            "path" => AttachmentKind::Path,
            "boundingbox" => AttachmentKind::BoundingBox,
            _ => AttachmentKind::Region,
        }
    }

    pub fn is_textured(self) -> bool {
        matches!(self, AttachmentKind::Region | AttachmentKind::Mesh)
    }
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachmentKind::Region => write!(f, "region"),
            AttachmentKind::Mesh => write!(f, "mesh"),
            AttachmentKind::Clipping => write!(f, "clipping"),
            AttachmentKind::Path => write!(f, "path"),
            AttachmentKind::BoundingBox => write!(f, "boundingbox"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttachmentDef {
    /// Image lookup key. Falls back to the attachment name when absent.
    pub path: Option<String>,
    pub scale_x: f32,
    pub scale_y: f32,
    /// Canonical sprite extent declared by the skeleton.
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub kind: AttachmentKind,
}

impl AttachmentDef {
    /// The raw lookup key this attachment resolves through the image index.
    pub fn image_key(&self, attachment_name: &str) -> String {
        crate::index::normalise_key(self.path.as_deref().unwrap_or(attachment_name))
    }
}

/// A named override of slot->attachment bindings, in input order.
#[derive(Debug, Clone)]
pub struct Skin {
    pub name: String,
    /// (slot index, attachments in input order).
    pub attachments: Vec<(usize, Vec<(String, AttachmentDef)>)>,
}

impl Skin {
    pub fn find(&self, slot: usize, attachment_name: &str) -> Option<&AttachmentDef> {
        self.attachments
            .iter()
            .find(|(s, _)| *s == slot)
            .and_then(|(_, defs)| {
                defs.iter()
                    .find(|(name, _)| name == attachment_name)
                    .map(|(_, def)| def)
            })
    }
}

/// One key on a bone scale timeline. Any curve other than `"stepped"` is
/// interpolated linearly.
#[derive(Debug, Clone, Copy)]
pub struct ScaleKey {
    pub time: f32,
    pub x: f32,
    pub y: f32,
    pub stepped: bool,
}

/// One key on a slot attachment timeline.
#[derive(Debug, Clone)]
pub struct AttachmentKey {
    pub time: f32,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Animation {
    pub name: String,
    /// (slot index, keys) for every slot with an attachment timeline.
    pub attachment_timelines: Vec<(usize, Vec<AttachmentKey>)>,
    /// (bone index, keys) for every bone with a scale timeline.
    pub scale_timelines: Vec<(usize, Vec<ScaleKey>)>,
    /// Bones touched by any timeline kind in this animation.
    pub animated_bones: HashSet<usize>,
    /// Slots touched by any timeline kind in this animation.
    pub animated_slots: HashSet<usize>,
}

impl Animation {
    pub fn scale_timeline(&self, bone: usize) -> Option<&[ScaleKey]> {
        self.scale_timelines
            .iter()
            .find(|(b, _)| *b == bone)
            .map(|(_, keys)| keys.as_slice())
    }

    /// Sampling horizon: the latest scale key time in this animation.
    pub fn scale_duration(&self) -> f32 {
        self.scale_timelines
            .iter()
            .flat_map(|(_, keys)| keys.iter().map(|k| k.time))
            .fold(0.0, f32::max)
    }
}

impl SkeletonDocument {
    pub(crate) fn build_bone_lookup(bones: &[Bone]) -> HashMap<String, usize> {
        bones
            .iter()
            .enumerate()
            .map(|(i, b)| (b.name.clone(), i))
            .collect()
    }

    pub fn bone_index(&self, name: &str) -> Option<usize> {
        self.bone_lookup.get(name).copied()
    }

    pub fn slot_index(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.name == name)
    }

    /// The slash-joined chain of bone names from the root down to `bone`.
    pub fn bone_path(&self, bone: usize) -> String {
        let mut chain = Vec::new();
        let mut current = Some(bone);
        while let Some(idx) = current {
            chain.push(self.bones[idx].name.as_str());
            current = self.bones[idx].parent;
        }
        chain.reverse();
        chain.join("/")
    }

    /// Bones whose name marks them as rig controls.
    pub fn control_bones(&self) -> Vec<String> {
        self.bones
            .iter()
            .filter(|b| b.name.starts_with(CONTROL_BONE_PREFIX))
            .map(|b| b.name.clone())
            .collect()
    }

    /// Canonical `(width, height)` entries this skeleton contributes to the
    /// image index, keyed by lowercase attachment path without extension.
    pub fn canonical_dimensions(&self) -> Vec<(String, (u32, u32))> {
        let mut entries = Vec::new();
        for skin in &self.skins {
            for (_, defs) in &skin.attachments {
                for (name, def) in defs {
                    if !def.kind.is_textured() {
                        continue;
                    }
                    if let (Some(w), Some(h)) = (def.width, def.height) {
                        let key =
                            crate::index::strip_extension(&def.image_key(name)).to_string();
                        entries.push((key, (w, h)));
                    }
                }
            }
        }
        entries
    }

    /// True when any region or mesh attachment lacks canonical dimensions.
    pub fn canonical_data_missing(&self) -> bool {
        self.skins.iter().any(|skin| {
            skin.attachments.iter().any(|(_, defs)| {
                defs.iter().any(|(_, def)| {
                    def.kind.is_textured() && (def.width.is_none() || def.height.is_none())
                })
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_kind_defaults_to_region() {
        assert_eq!(AttachmentKind::from_type_field(None), AttachmentKind::Region);
        assert_eq!(
            AttachmentKind::from_type_field(Some("mesh")),
            AttachmentKind::Mesh
        );
        assert!(!AttachmentKind::from_type_field(Some("clipping")).is_textured());
    }

    #[test]
    fn image_key_falls_back_to_attachment_name() {
        let def = AttachmentDef {
            path: None,
            scale_x: 1.0,
            scale_y: 1.0,
            width: None,
            height: None,
            kind: AttachmentKind::Region,
        };
        assert_eq!(def.image_key("Images\\Hero"), "images/hero");

        let with_path = AttachmentDef {
            path: Some("weapons/sword".to_string()),
            ..def
        };
        assert_eq!(with_path.image_key("hero"), "weapons/sword");
    }
}
