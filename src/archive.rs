//! Optimised image archive
//!
//! Writes the final image set as a ZIP with a single `images_optimized/` root
//! folder, optionally running each PNG through an oxipng pass first.

use std::{
    fmt, fs,
    io::{self, Write},
    path::Path,
};

use log::warn;

pub const ARCHIVE_ROOT: &str = "images_optimized";

/// Error type for archive operations
#[derive(Debug)]
pub enum ArchiveError {
    Io(io::Error),
    Zip(zip::result::ZipError),
}

impl From<io::Error> for ArchiveError {
    fn from(err: io::Error) -> Self {
        ArchiveError::Io(err)
    }
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(err: zip::result::ZipError) -> Self {
        ArchiveError::Zip(err)
    }
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveError::Io(err) => write!(f, "I/O error: {}", err),
            ArchiveError::Zip(err) => write!(f, "ZIP error: {}", err),
        }
    }
}

/// Runs a blob through oxipng. Falls back to the input on failure.
pub fn optimise_png(blob: &[u8], max_compression: bool) -> Vec<u8> {
    let preset = if max_compression { 6 } else { 2 };
    let options = oxipng::Options::from_preset(preset);
    match oxipng::optimize_from_memory(blob, &options) {
        Ok(optimised) => optimised,
        Err(e) => {
            warn!("PNG optimisation failed, keeping original: {}", e);
            blob.to_vec()
        }
    }
}

/// Writes `(relative path, blob)` entries under `images_optimized/` into a
/// ZIP archive at `path`.
pub fn write_archive(
    path: &Path,
    outputs: &[(String, Vec<u8>)],
    optimise: bool,
) -> Result<(), ArchiveError> {
    let file = fs::File::create(path)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for (rel_path, blob) in outputs {
        let entry = format!("{}/{}", ARCHIVE_ROOT, rel_path.trim_start_matches('/'));
        writer.start_file(entry, options)?;
        if optimise {
            writer.write_all(&optimise_png(blob, false))?;
        } else {
            writer.write_all(blob)?;
        }
    }
    writer.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imageio::encode_png;
    use image::RgbaImage;
    use std::io::Read;

    #[test]
    fn archive_places_files_under_the_root_folder() {
        let dir = std::env::temp_dir().join("spine_optimiser_archive_test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.zip");

        let blob = encode_png(&RgbaImage::new(2, 2)).unwrap();
        let outputs = vec![
            ("hero.png".to_string(), blob.clone()),
            ("fx/glow.png".to_string(), blob.clone()),
        ];
        write_archive(&path, &outputs, false).unwrap();

        let file = fs::File::open(&path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"images_optimized/hero.png".to_string()));
        assert!(names.contains(&"images_optimized/fx/glow.png".to_string()));

        let mut entry = archive.by_name("images_optimized/hero.png").unwrap();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, blob);

        drop(entry);
        drop(archive);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn optimise_png_falls_back_on_garbage_input() {
        let garbage = vec![1, 2, 3, 4];
        assert_eq!(optimise_png(&garbage, false), garbage);
    }
}
