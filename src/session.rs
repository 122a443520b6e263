//! Optimiser session
//!
//! Owns the ingested state (skeleton documents + image index) and exposes the
//! invoker commands: ingest, clear, analyse, plan, resample, pack. Analysis
//! is pure over the current snapshot; mutation happens only during ingest.

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use log::{info, warn};
use rayon::prelude::*;

use crate::{
    atlas::{self, packer, parser as atlas_parser, unpacker, AtlasError},
    cancel::CancelToken,
    imageio,
    index::{self, AssetKind, ImageAsset, ImageIndex},
    planner::{self, OptimisationTask},
    report::{self, AnalysisReport},
    resampler,
    skeleton::{self, SkeletonDocument},
};

/// One ingested file: a relative path and its raw bytes.
#[derive(Debug, Clone)]
pub struct FileAsset {
    pub path: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    Ingesting,
    Ready,
}

/// Error type for session operations
#[derive(Debug)]
pub enum SessionError {
    Cancelled,
    Atlas(AtlasError),
}

impl From<AtlasError> for SessionError {
    fn from(err: AtlasError) -> Self {
        SessionError::Atlas(err)
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Cancelled => write!(f, "Operation cancelled"),
            SessionError::Atlas(err) => write!(f, "Atlas error: {}", err),
        }
    }
}

/// The result of packing optimised images onto fresh atlas pages.
pub struct RepackOutput {
    pub result: packer::PackResult,
    /// Composited page images, `(page name, pixels)`.
    pub pages: Vec<(String, image::RgbaImage)>,
    /// Manifest describing the packed pages.
    pub manifest: String,
}

#[derive(Debug, Default)]
pub struct Session {
    state: SessionState,
    skeletons: Vec<SkeletonDocument>,
    index: ImageIndex,
    /// Per-image override percentages, keyed by index key.
    pub overrides: HashMap<String, f32>,
    /// Composite `skeleton/animation/image` keys.
    pub local_overrides: HashSet<String>,
    pub safety_buffer: f32,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Empty
    }
}

fn file_stem(path: &str) -> &str {
    let base = path.rsplit(['/', '\\']).next().unwrap_or(path);
    base.rsplit_once('.').map_or(base, |(stem, _)| stem)
}

fn extension(path: &str) -> String {
    let base = path.rsplit(['/', '\\']).next().unwrap_or(path);
    base.rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn index(&self) -> &ImageIndex {
        &self.index
    }

    pub fn skeletons(&self) -> &[SkeletonDocument] {
        &self.skeletons
    }

    /// Resets all state back to [`SessionState::Empty`].
    pub fn clear(&mut self) {
        self.skeletons.clear();
        self.index.clear();
        self.overrides.clear();
        self.local_overrides.clear();
        self.state = SessionState::Empty;
    }

    /// Merges a batch of files into the session. Images are indexed first so
    /// atlas manifests and skeletons in the same batch can resolve them.
    /// Unparseable sources are skipped with a warning; the rest survive.
    pub fn ingest(&mut self, assets: Vec<FileAsset>) {
        self.state = SessionState::Ingesting;

        let mut atlases: Vec<FileAsset> = Vec::new();
        let mut skeleton_files: Vec<FileAsset> = Vec::new();

        for asset in assets {
            match extension(&asset.path).as_str() {
                "png" | "jpg" | "jpeg" | "webp" => self.ingest_image(asset),
                "atlas" => atlases.push(asset),
                "json" => skeleton_files.push(asset),
                other => {
                    if !other.is_empty() {
                        info!("Ignoring unsupported file: {}", asset.path);
                    }
                }
            }
        }

        for atlas in atlases {
            if let Err(e) = self.ingest_atlas(&atlas) {
                warn!("Skipping atlas {}: {}", atlas.path, e);
            }
        }

        for file in skeleton_files {
            let text = String::from_utf8_lossy(&file.bytes);
            match skeleton::parse_skeleton(file_stem(&file.path), &text) {
                Ok(doc) => {
                    info!(
                        "Ingested skeleton '{}': {} bones, {} animations",
                        doc.name,
                        doc.bones.len(),
                        doc.animations.len()
                    );
                    self.skeletons.push(doc);
                }
                Err(e) => warn!("Rejecting skeleton {}: {}", file.path, e),
            }
        }

        // Canonical dimensions re-apply every batch: an image may arrive
        // after the skeleton that declares its extent.
        let entries: Vec<_> = self
            .skeletons
            .iter()
            .flat_map(|doc| doc.canonical_dimensions())
            .collect();
        for (key, (w, h)) in entries {
            self.index.adopt_canonical(&key, w, h);
        }

        self.state = SessionState::Ready;
    }

    fn ingest_image(&mut self, asset: FileAsset) {
        let physical = match imageio::measure(&asset.bytes) {
            Ok(dims) => dims,
            Err(e) => {
                warn!("Skipping undecodable image {}: {}", asset.path, e);
                return;
            }
        };
        self.index.insert(ImageAsset {
            key: index::normalise_key(&asset.path),
            content_hash: index::hash_blob(&asset.bytes),
            blob: asset.bytes,
            physical,
            canonical: None,
            source_path: asset.path,
            kind: AssetKind::Loose,
        });
    }

    /// Parses one atlas manifest and unpacks its regions into the index.
    /// Every page image must already be resolvable or the atlas is skipped.
    fn ingest_atlas(&mut self, file: &FileAsset) -> Result<(), AtlasError> {
        let text = String::from_utf8_lossy(&file.bytes);
        let metadata = atlas_parser::parse_atlas(&text)?;
        let page_names = metadata.page_names();

        let mut pages: Vec<(String, image::RgbaImage)> = Vec::with_capacity(page_names.len());
        for page_name in &page_names {
            let asset = self
                .index
                .find_image(page_name)
                .ok_or_else(|| AtlasError::MissingPage(page_name.clone()))?;
            pages.push((page_name.clone(), imageio::decode_rgba(&asset.blob)?));
        }

        for (page_name, page_image) in &pages {
            self.index.register_page(page_name);
            for (file_name, sprite) in unpacker::unpack_page(&metadata, page_name, page_image)? {
                let blob = imageio::encode_png(&sprite)?;
                self.index.insert(ImageAsset {
                    key: index::normalise_key(&file_name),
                    content_hash: index::hash_blob(&blob),
                    physical: sprite.dimensions(),
                    blob,
                    canonical: None,
                    source_path: format!("{}:{}", file.path, file_name),
                    kind: AssetKind::AtlasExtracted,
                });
            }
        }
        info!(
            "Ingested atlas {}: {} regions over {} pages",
            file.path,
            metadata.regions.len(),
            page_names.len()
        );
        Ok(())
    }

    /// Analyses the current snapshot into a merged report. Pure.
    pub fn analyse(&self) -> AnalysisReport {
        let analyses: Vec<_> = self
            .skeletons
            .iter()
            .map(|doc| skeleton::analyse_skeleton(doc, &self.local_overrides))
            .collect();
        report::build_report(&analyses, &self.index, &self.overrides)
    }

    /// Plans optimisation tasks for the given safety buffer percentage. Pure.
    pub fn plan(&self, buffer_pct: f32) -> Vec<OptimisationTask> {
        let report = self.analyse();
        planner::plan(&report.stats, &self.index, buffer_pct)
    }

    /// Produces the output blob for one task. A resampler failure falls back
    /// to the original blob unchanged.
    pub fn resample(&self, task: &OptimisationTask) -> Option<Vec<u8>> {
        let asset = self.index.get(&task.image_key)?;
        if !task.is_resize {
            return Some(asset.blob.clone());
        }
        match resampler::resample(&asset.blob, task.target.0, task.target.1, false) {
            Ok(blob) => Some(blob),
            Err(e) => {
                warn!(
                    "Resampling {} failed ({}), emitting original",
                    task.image_key, e
                );
                Some(asset.blob.clone())
            }
        }
    }

    /// Resamples a batch in parallel, reusing results for identical inputs.
    /// Returns `(output path, blob)` pairs in task order, or `Cancelled` with
    /// all partial output discarded.
    pub fn resample_batch(
        &self,
        tasks: &[OptimisationTask],
        cancel: &CancelToken,
    ) -> Result<Vec<(String, Vec<u8>)>, SessionError> {
        // Identical source pixels at an identical target only pay once.
        let mut job_of_task: Vec<usize> = Vec::with_capacity(tasks.len());
        let mut job_keys: HashMap<(u64, (u32, u32)), usize> = HashMap::new();
        let mut jobs: Vec<&OptimisationTask> = Vec::new();
        for task in tasks {
            let hash = self
                .index
                .get(&task.image_key)
                .map(|a| a.content_hash)
                .unwrap_or_default();
            let job = *job_keys
                .entry((hash, task.target))
                .or_insert_with(|| {
                    jobs.push(task);
                    jobs.len() - 1
                });
            job_of_task.push(job);
        }

        let outputs: Vec<Option<Vec<u8>>> = jobs
            .par_iter()
            .map(|&task| {
                if cancel.is_cancelled() {
                    return None;
                }
                self.resample(task)
            })
            .collect();

        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        Ok(tasks
            .iter()
            .zip(job_of_task)
            .filter_map(|(task, job)| {
                outputs[job]
                    .clone()
                    .map(|blob| (task.output_path.clone(), blob))
            })
            .collect())
    }

    /// Packs task targets onto fresh atlas pages and composites the packed
    /// images. On cancellation the caller keeps its previous result.
    pub fn pack(
        &self,
        tasks: &[OptimisationTask],
        outputs: &[(String, Vec<u8>)],
        page_size: u32,
        padding: u32,
        cancel: &CancelToken,
    ) -> Result<RepackOutput, SessionError> {
        let items: Vec<packer::PackItem> = tasks
            .iter()
            .map(|task| packer::PackItem {
                name: task.output_path.clone(),
                width: task.target.0,
                height: task.target.1,
            })
            .collect();

        let result = packer::pack_items(&items, page_size, padding, cancel);
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        for name in &result.oversized {
            warn!("Task {} exceeds the page size, skipped", name);
        }

        let mut images: HashMap<String, image::RgbaImage> = HashMap::new();
        for (path, blob) in outputs {
            match imageio::decode_rgba(blob) {
                Ok(image) => {
                    images.insert(path.clone(), image);
                }
                Err(e) => warn!("Cannot decode packed image {}: {}", path, e),
            }
        }

        let pages = packer::composite_pages(&result, &images);
        let manifest = atlas::parser::write_manifest(&result.pages);
        Ok(RepackOutput {
            result,
            pages,
            manifest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imageio::encode_png;
    use image::{Rgba, RgbaImage};
    use serde_json::json;

    fn png_asset(path: &str, w: u32, h: u32) -> FileAsset {
        FileAsset {
            path: path.to_string(),
            bytes: encode_png(&RgbaImage::new(w, h)).unwrap(),
        }
    }

    fn skeleton_asset(path: &str, value: serde_json::Value) -> FileAsset {
        FileAsset {
            path: path.to_string(),
            bytes: value.to_string().into_bytes(),
        }
    }

    fn hero_project() -> Vec<FileAsset> {
        vec![
            png_asset("hero.png", 512, 512),
            skeleton_asset(
                "hero.json",
                json!({
                    "bones": [{"name": "root"}],
                    "slots": [{"name": "body", "bone": "root", "attachment": "hero"}],
                    "skins": {"default": {"body": {"hero": {"width": 512, "height": 512}}}},
                    "animations": {
                        "idle": {"slots": {"body": {"attachment": [{"time": 0, "name": "hero"}]}}}
                    }
                }),
            ),
        ]
    }

    #[test]
    fn ingest_then_analyse_end_to_end() {
        let mut session = Session::new();
        assert_eq!(session.state(), SessionState::Empty);
        session.ingest(hero_project());
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.skeletons().len(), 1);

        let report = session.analyse();
        assert_eq!(report.stats.len(), 1);
        assert_eq!(report.stats[0].max_render_width, 512);

        let tasks = session.plan(0.0);
        assert_eq!(tasks.len(), 1);
        assert!(!tasks[0].is_resize);
        assert_eq!(tasks[0].reduction_pct, 0.0);
    }

    #[test]
    fn bad_skeleton_is_rejected_others_survive() {
        let mut session = Session::new();
        let mut assets = hero_project();
        assets.push(FileAsset {
            path: "broken.json".to_string(),
            bytes: b"{not json".to_vec(),
        });
        session.ingest(assets);
        assert_eq!(session.skeletons().len(), 1);
    }

    #[test]
    fn atlas_with_missing_page_is_skipped() {
        let mut session = Session::new();
        session.ingest(vec![FileAsset {
            path: "chars.atlas".to_string(),
            bytes: b"ghost.png\nsword\n  xy: 0, 0\n  size: 4, 4\n".to_vec(),
        }]);
        // Nothing indexed, nothing registered.
        assert!(session.index().is_empty());
    }

    #[test]
    fn atlas_regions_become_extracted_assets() {
        let mut page = RgbaImage::new(8, 8);
        page.put_pixel(4, 0, Rgba([9, 9, 9, 255]));
        let mut session = Session::new();
        session.ingest(vec![
            FileAsset {
                path: "sprites.png".to_string(),
                bytes: encode_png(&page).unwrap(),
            },
            FileAsset {
                path: "sprites.atlas".to_string(),
                bytes: b"sprites.png\nsword\n  xy: 0, 0\n  size: 4, 4\nshield\n  xy: 4, 0\n  size: 4, 4\n"
                    .to_vec(),
            },
        ]);

        let sword = session.index().get("sword.png").unwrap();
        assert_eq!(sword.kind, AssetKind::AtlasExtracted);
        assert_eq!(sword.physical, (4, 4));
        let shield = session.index().get("shield.png").unwrap();
        let pixels = imageio::decode_rgba(&shield.blob).unwrap();
        assert_eq!(pixels.get_pixel(0, 0), &Rgba([9, 9, 9, 255]));

        // The page itself never shows up as unused.
        session.ingest(vec![skeleton_asset(
            "empty.json",
            json!({"bones": [{"name": "root"}], "slots": [], "skins": {}, "animations": {}}),
        )]);
        let report = session.analyse();
        assert!(!report
            .unused
            .iter()
            .any(|u| u.image_key == "sprites.png"));
    }

    #[test]
    fn resample_batch_respects_cancellation() {
        let mut session = Session::new();
        session.ingest(hero_project());
        let tasks = session.plan(0.0);

        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(
            session.resample_batch(&tasks, &token),
            Err(SessionError::Cancelled)
        ));
    }

    #[test]
    fn duplicate_content_resamples_once_but_outputs_twice() {
        let mut session = Session::new();
        let blob = encode_png(&RgbaImage::new(64, 64)).unwrap();
        session.ingest(vec![
            FileAsset {
                path: "a.png".to_string(),
                bytes: blob.clone(),
            },
            FileAsset {
                path: "b.png".to_string(),
                bytes: blob,
            },
            skeleton_asset(
                "two.json",
                json!({
                    "bones": [{"name": "root"}],
                    "slots": [
                        {"name": "s1", "bone": "root", "attachment": "a"},
                        {"name": "s2", "bone": "root", "attachment": "b"}
                    ],
                    "skins": {"default": {
                        "s1": {"a": {}},
                        "s2": {"b": {}}
                    }},
                    "animations": {
                        "idle": {"slots": {
                            "s1": {"attachment": [{"time": 0, "name": "a"}]},
                            "s2": {"attachment": [{"time": 0, "name": "b"}]}
                        }}
                    }
                }),
            ),
        ]);

        let tasks = session.plan(0.0);
        assert_eq!(tasks.len(), 2);
        let outputs = session
            .resample_batch(&tasks, &CancelToken::new())
            .unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].1, outputs[1].1);
    }

    #[test]
    fn pack_produces_pages_and_manifest() {
        let mut session = Session::new();
        session.ingest(hero_project());
        let tasks = session.plan(0.0);
        let outputs = session
            .resample_batch(&tasks, &CancelToken::new())
            .unwrap();

        let repack = session
            .pack(&tasks, &outputs, 1024, 2, &CancelToken::new())
            .unwrap();
        assert_eq!(repack.result.pages.len(), 1);
        assert_eq!(repack.pages.len(), 1);

        let parsed = atlas_parser::parse_atlas(&repack.manifest).unwrap();
        assert_eq!(parsed.regions.len(), 1);
        assert_eq!(parsed.regions[0].name, "hero.png");
    }
}
