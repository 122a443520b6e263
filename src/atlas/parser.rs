//! Atlas manifest parsing and writing
//!
//! The manifest is line-oriented ASCII: blank lines delimit page blocks, the
//! first line of a block is the page filename, and each region is a name line
//! followed by indented `key: value` properties.

use crate::atlas::{AtlasError, AtlasMetadata, AtlasRegion, PackedPage};
use crate::index::IMAGE_EXTENSIONS;

/// Heals page filenames: strips trailing image extensions repeatedly (so
/// `foo.png.png` becomes `foo`), then re-appends a single extension — the
/// one detected, or `.png` when there was none.
pub fn sanitise_page_name(raw: &str) -> String {
    let mut stem = raw.trim();
    let mut detected: Option<&str> = None;
    loop {
        let mut stripped = false;
        for ext in IMAGE_EXTENSIONS {
            if let Some(rest) = strip_suffix_ignore_case(stem, ext) {
                stem = rest;
                detected = Some(ext);
                stripped = true;
                break;
            }
        }
        if !stripped {
            break;
        }
    }
    format!("{}{}", stem, detected.unwrap_or(".png"))
}

fn strip_suffix_ignore_case<'a>(value: &'a str, suffix: &str) -> Option<&'a str> {
    if value.len() >= suffix.len()
        && value[value.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
    {
        Some(&value[..value.len() - suffix.len()])
    } else {
        None
    }
}

/// Property keys understood on regions. Anything else is ignored, as are the
/// page header properties (`size`, `format`, `filter`, `repeat`, ...).
const REGION_KEYS: [&str; 6] = ["rotate", "xy", "size", "orig", "offset", "index"];

#[derive(Debug, Default)]
struct PendingRegion {
    name: String,
    rotated: bool,
    x: u32,
    y: u32,
    stored_w: u32,
    stored_h: u32,
    orig: Option<(u32, u32)>,
    offset_x: i32,
    offset_y: i32,
    index: i32,
}

impl PendingRegion {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            index: -1,
            ..Self::default()
        }
    }

    /// Emits the region in logical orientation: `width`/`height` are the
    /// unrotated sprite's, the `rotated` flag drives downstream rendering.
    fn finish(self, page_name: &str) -> AtlasRegion {
        let (width, height) = if self.rotated {
            (self.stored_h, self.stored_w)
        } else {
            (self.stored_w, self.stored_h)
        };
        let (original_width, original_height) = self.orig.unwrap_or((width, height));
        AtlasRegion {
            page_name: page_name.to_string(),
            name: self.name,
            x: self.x,
            y: self.y,
            width,
            height,
            original_width,
            original_height,
            offset_x: self.offset_x,
            offset_y: self.offset_y,
            rotated: self.rotated,
            index: self.index,
        }
    }
}

fn parse_pair(value: &str, context: &str) -> Result<(i64, i64), AtlasError> {
    let mut parts = value.split(',').map(str::trim);
    let a = parts
        .next()
        .and_then(|p| p.parse::<i64>().ok())
        .ok_or_else(|| AtlasError::Malformed(format!("bad pair in {}: '{}'", context, value)))?;
    let b = parts
        .next()
        .and_then(|p| p.parse::<i64>().ok())
        .ok_or_else(|| AtlasError::Malformed(format!("bad pair in {}: '{}'", context, value)))?;
    Ok((a, b))
}

/// Parses the textual atlas manifest. Newlines may be LF or CRLF.
pub fn parse_atlas(text: &str) -> Result<AtlasMetadata, AtlasError> {
    let mut regions = Vec::new();
    let mut page_name: Option<String> = None;
    let mut pending: Option<PendingRegion> = None;

    for raw_line in text.lines() {
        let line = raw_line.trim();

        if line.is_empty() {
            // Blank line closes the current page block.
            if let (Some(page), Some(region)) = (&page_name, pending.take()) {
                regions.push(region.finish(page));
            }
            page_name = None;
            continue;
        }

        if page_name.is_none() {
            page_name = Some(sanitise_page_name(line));
            continue;
        }

        match line.split_once(':') {
            Some((key, value)) => {
                let key = key.trim();
                let value = value.trim();
                let region = match pending.as_mut() {
                    Some(region) if REGION_KEYS.contains(&key) => region,
                    // Page-level or unrecognised properties are ignored.
                    _ => continue,
                };
                match key {
                    "rotate" => region.rotated = value == "true" || value == "90",
                    "xy" => {
                        let (x, y) = parse_pair(value, "xy")?;
                        region.x = x.max(0) as u32;
                        region.y = y.max(0) as u32;
                    }
                    "size" => {
                        let (w, h) = parse_pair(value, "size")?;
                        region.stored_w = w.max(0) as u32;
                        region.stored_h = h.max(0) as u32;
                    }
                    "orig" => {
                        let (w, h) = parse_pair(value, "orig")?;
                        region.orig = Some((w.max(0) as u32, h.max(0) as u32));
                    }
                    "offset" => {
                        let (x, y) = parse_pair(value, "offset")?;
                        region.offset_x = x as i32;
                        region.offset_y = y as i32;
                    }
                    "index" => {
                        region.index = value.parse::<i32>().map_err(|_| {
                            AtlasError::Malformed(format!("bad index: '{}'", value))
                        })?;
                    }
                    _ => unreachable!(),
                }
            }
            None => {
                // A bare line starts the next region.
                if let (Some(page), Some(region)) = (&page_name, pending.take()) {
                    regions.push(region.finish(page));
                }
                pending = Some(PendingRegion::new(line));
            }
        }
    }

    if let (Some(page), Some(region)) = (&page_name, pending.take()) {
        regions.push(region.finish(page));
    }

    Ok(AtlasMetadata { regions })
}

/// Serialises packed pages back to the manifest grammar. Parsing the result
/// yields metadata identical to the pack layout, up to field ordering.
pub fn write_manifest(pages: &[PackedPage]) -> String {
    let mut out = String::new();
    for page in pages {
        out.push('\n');
        out.push_str(&page.name);
        out.push('\n');
        out.push_str(&format!("size: {},{}\n", page.width, page.height));
        out.push_str("format: RGBA8888\n");
        out.push_str("filter: Nearest,Nearest\n");
        out.push_str("repeat: none\n");
        for rect in &page.rects {
            out.push_str(&format!("{}\n", rect.name));
            out.push_str("  rotate: false\n");
            out.push_str(&format!("  xy: {}, {}\n", rect.x, rect.y));
            out.push_str(&format!("  size: {}, {}\n", rect.width, rect.height));
            out.push_str(&format!("  orig: {}, {}\n", rect.width, rect.height));
            out.push_str("  offset: 0, 0\n");
            out.push_str("  index: -1\n");
        }
    }
    out
}
