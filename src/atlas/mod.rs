//! Texture atlas handling
//!
//! This module provides parsing of the textual atlas manifest, extraction of
//! sub-regions from atlas pages back into standalone images, and repacking of
//! optimised images onto new pages.

use std::{fmt, io};

use image::ImageError;

pub mod packer;
pub mod parser;
pub mod unpacker;

pub use packer::{pack_items, PackItem, PackResult, PackedPage, PackedRect};
pub use parser::{parse_atlas, sanitise_page_name};
pub use unpacker::extract_region;

/// One sub-rectangle of an atlas page, in logical (unrotated) orientation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtlasRegion {
    /// Sanitised page filename this region lives on.
    pub page_name: String,
    pub name: String,
    pub x: u32,
    pub y: u32,
    /// Logical sprite extent. When `rotated` is set the pixels on the page
    /// occupy a height-by-width rectangle instead.
    pub width: u32,
    pub height: u32,
    pub original_width: u32,
    pub original_height: u32,
    pub offset_x: i32,
    pub offset_y: i32,
    /// Stored rotated 90° counter-clockwise on the page.
    pub rotated: bool,
    pub index: i32,
}

impl AtlasRegion {
    /// Footprint of the region on the page.
    pub fn stored_size(&self) -> (u32, u32) {
        if self.rotated {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

/// Parsed atlas manifest: regions in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AtlasMetadata {
    pub regions: Vec<AtlasRegion>,
}

impl AtlasMetadata {
    /// Page names in first-declaration order.
    pub fn page_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for region in &self.regions {
            if !names.contains(&region.page_name) {
                names.push(region.page_name.clone());
            }
        }
        names
    }

    pub fn regions_of_page<'a>(&'a self, page: &'a str) -> impl Iterator<Item = &'a AtlasRegion> {
        self.regions.iter().filter(move |r| r.page_name == page)
    }
}

/// Error type for atlas operations
#[derive(Debug)]
pub enum AtlasError {
    Io(io::Error),
    Image(ImageError),
    Malformed(String),
    MissingPage(String),
    RegionOutOfBounds(String),
}

impl From<io::Error> for AtlasError {
    fn from(err: io::Error) -> Self {
        AtlasError::Io(err)
    }
}

impl From<ImageError> for AtlasError {
    fn from(err: ImageError) -> Self {
        AtlasError::Image(err)
    }
}

impl fmt::Display for AtlasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtlasError::Io(err) => write!(f, "I/O error: {}", err),
            AtlasError::Image(err) => write!(f, "Image error: {}", err),
            AtlasError::Malformed(msg) => write!(f, "Malformed atlas: {}", msg),
            AtlasError::MissingPage(page) => write!(f, "Missing atlas page image: {}", page),
            AtlasError::RegionOutOfBounds(name) => {
                write!(f, "Region '{}' exceeds its page bounds", name)
            }
        }
    }
}
