//! Image index and key canonicalisation
//!
//! Maintains the lookup table from normalised image keys to decoded asset
//! records, and resolves the loose attachment paths skeletons use into
//! concrete index entries.

use std::{
    collections::{HashMap, HashSet},
    hash::Hasher,
};

use log::warn;
use serde::Serialize;
use twox_hash::XxHash64;

/// Extensions tried when an attachment path has none.
pub const IMAGE_EXTENSIONS: [&str; 4] = [".png", ".jpg", ".jpeg", ".webp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AssetKind {
    Loose,
    AtlasExtracted,
}

/// One decoded image known to the session.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    /// Normalised lookup key (slash-delimited, lowercase).
    pub key: String,
    pub blob: Vec<u8>,
    /// Pixel extent measured from the decoded image.
    pub physical: (u32, u32),
    /// Intrinsic extent adopted from a skeleton definition, when one matches.
    pub canonical: Option<(u32, u32)>,
    /// Original (un-normalised) source path.
    pub source_path: String,
    pub kind: AssetKind,
    pub content_hash: u64,
}

impl ImageAsset {
    /// The dimensions analysis works with: canonical when a skeleton declared
    /// them, physical otherwise.
    pub fn effective(&self) -> (u32, u32) {
        self.canonical.unwrap_or(self.physical)
    }

    pub fn dimension_mismatch(&self) -> bool {
        self.canonical.is_some_and(|c| c != self.physical)
    }
}

/// Lookup table from normalised key to asset, plus the set of atlas page
/// names so backing textures are never counted as unused.
#[derive(Debug, Default)]
pub struct ImageIndex {
    assets: HashMap<String, ImageAsset>,
    /// Keys in first-insertion order, for deterministic enumeration.
    ordered_keys: Vec<String>,
    page_names: HashSet<String>,
}

/// Normalises a path for use as an index key: forward slashes, trimmed,
/// lowercase.
pub fn normalise_key(path: &str) -> String {
    path.replace('\\', "/").trim().to_lowercase()
}

/// Strips a single trailing image extension, if present.
pub fn strip_extension(key: &str) -> &str {
    for ext in IMAGE_EXTENSIONS {
        if let Some(stem) = key.strip_suffix(ext) {
            return stem;
        }
    }
    key
}

/// Returns the path component after the last slash.
pub fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

pub fn hash_blob(blob: &[u8]) -> u64 {
    let mut hasher = XxHash64::default();
    hasher.write(blob);
    hasher.finish()
}

impl ImageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn clear(&mut self) {
        self.assets.clear();
        self.ordered_keys.clear();
        self.page_names.clear();
    }

    /// Inserts or replaces an asset under its normalised key.
    pub fn insert(&mut self, asset: ImageAsset) {
        if let Some(existing) = self.assets.get(&asset.key) {
            if existing.content_hash == asset.content_hash {
                return;
            }
        } else {
            self.ordered_keys.push(asset.key.clone());
        }
        self.assets.insert(asset.key.clone(), asset);
    }

    pub fn get(&self, key: &str) -> Option<&ImageAsset> {
        self.assets.get(key)
    }

    /// Keys in first-insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.ordered_keys.iter().map(String::as_str)
    }

    pub fn assets(&self) -> impl Iterator<Item = &ImageAsset> {
        self.ordered_keys.iter().filter_map(|k| self.assets.get(k))
    }

    /// Marks a sanitised atlas page filename as a backing texture.
    pub fn register_page(&mut self, page_name: &str) {
        self.page_names.insert(normalise_key(page_name));
    }

    /// True when the key names an atlas page, with or without a directory
    /// prefix.
    pub fn is_page_backing(&self, key: &str) -> bool {
        self.page_names.contains(key) || self.page_names.contains(basename(key))
    }

    /// Adopts canonical dimensions for the asset matching `path_key`
    /// (lowercase attachment path, extension already stripped). The first
    /// definition wins.
    pub fn adopt_canonical(&mut self, path_key: &str, width: u32, height: u32) {
        let found = self.find_image(path_key).map(|a| a.key.clone());
        if let Some(key) = found {
            if let Some(asset) = self.assets.get_mut(&key) {
                if asset.canonical.is_none() {
                    asset.canonical = Some((width, height));
                }
            }
        }
    }

    /// Resolves an attachment path to an asset.
    ///
    /// Precedence: exact normalised key, then the key with each known image
    /// extension appended, then a `/`-suffix match across the whole index
    /// (shortest matching key wins, closest to the top of the tree).
    pub fn find_image(&self, requested: &str) -> Option<&ImageAsset> {
        let key = normalise_key(requested);
        if key.is_empty() {
            return None;
        }

        if let Some(asset) = self.assets.get(&key) {
            return Some(asset);
        }

        for ext in IMAGE_EXTENSIONS {
            if let Some(asset) = self.assets.get(&format!("{}{}", key, ext)) {
                return Some(asset);
            }
        }

        let mut matches: Vec<&str> = self
            .ordered_keys
            .iter()
            .map(String::as_str)
            .filter(|candidate| {
                if candidate.ends_with(&format!("/{}", key)) {
                    return true;
                }
                IMAGE_EXTENSIONS
                    .iter()
                    .any(|ext| candidate.ends_with(&format!("/{}{}", key, ext)))
            })
            .collect();

        if matches.len() > 1 {
            matches.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
            warn!(
                "Ambiguous image lookup for '{}': {} candidates, using '{}'",
                requested,
                matches.len(),
                matches[0]
            );
        }

        matches.first().and_then(|k| self.assets.get(*k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(key: &str, physical: (u32, u32)) -> ImageAsset {
        ImageAsset {
            key: key.to_string(),
            blob: Vec::new(),
            physical,
            canonical: None,
            source_path: key.to_string(),
            kind: AssetKind::Loose,
            content_hash: 0,
        }
    }

    fn index_with(keys: &[&str]) -> ImageIndex {
        let mut index = ImageIndex::new();
        for key in keys {
            index.insert(asset(key, (16, 16)));
        }
        index
    }

    #[test]
    fn normalise_handles_backslashes_and_case() {
        assert_eq!(normalise_key("  Images\\Hero.PNG "), "images/hero.png");
    }

    #[test]
    fn exact_match_takes_priority() {
        let index = index_with(&["hero.png", "a/hero.png"]);
        assert_eq!(index.find_image("hero.png").unwrap().key, "hero.png");
    }

    #[test]
    fn extension_is_appended_before_suffix_search() {
        let index = index_with(&["hero.webp", "deep/dir/hero.png"]);
        assert_eq!(index.find_image("hero").unwrap().key, "hero.webp");
    }

    #[test]
    fn suffix_match_prefers_shortest_key() {
        let index = index_with(&["a/b/c/hero.png", "x/hero.png"]);
        assert_eq!(index.find_image("hero").unwrap().key, "x/hero.png");
    }

    #[test]
    fn suffix_match_requires_full_component() {
        let index = index_with(&["superhero.png"]);
        assert!(index.find_image("hero").is_none());
    }

    #[test]
    fn canonical_adoption_first_wins() {
        let mut index = index_with(&["hero.png"]);
        index.adopt_canonical("hero", 100, 200);
        index.adopt_canonical("hero", 7, 7);
        let asset = index.get("hero.png").unwrap();
        assert_eq!(asset.canonical, Some((100, 200)));
        assert_eq!(asset.effective(), (100, 200));
        assert!(asset.dimension_mismatch());
    }

    #[test]
    fn page_backing_matches_basename() {
        let mut index = ImageIndex::new();
        index.register_page("sprites.png");
        assert!(index.is_page_backing("sprites.png"));
        assert!(index.is_page_backing("textures/sprites.png"));
        assert!(!index.is_page_backing("other.png"));
    }

    #[test]
    fn reinsert_identical_blob_is_a_no_op() {
        let mut index = ImageIndex::new();
        index.insert(asset("hero.png", (16, 16)));
        index.insert(asset("hero.png", (16, 16)));
        assert_eq!(index.len(), 1);
        assert_eq!(index.keys().count(), 1);
    }
}
