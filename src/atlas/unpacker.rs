//! Atlas region extraction
//!
//! Restores standalone sprites from atlas pages. Pixels are copied exactly;
//! no filtering is introduced. Rotated regions are restored with a 90°
//! clockwise mapping: canvas top -> source left, canvas left -> source bottom.

use image::RgbaImage;

use crate::atlas::{AtlasError, AtlasMetadata, AtlasRegion};

/// Extracts one region from its decoded page into a logical-size image.
pub fn extract_region(page: &RgbaImage, region: &AtlasRegion) -> Result<RgbaImage, AtlasError> {
    let (stored_w, stored_h) = region.stored_size();
    if region.x + stored_w > page.width() || region.y + stored_h > page.height() {
        return Err(AtlasError::RegionOutOfBounds(region.name.clone()));
    }

    let mut out = RgbaImage::new(region.width.max(1), region.height.max(1));
    if region.width == 0 || region.height == 0 {
        return Ok(out);
    }

    if region.rotated {
        for cy in 0..region.height {
            for cx in 0..region.width {
                let sx = region.x + cy;
                let sy = region.y + (stored_h - 1) - cx;
                out.put_pixel(cx, cy, *page.get_pixel(sx, sy));
            }
        }
    } else {
        for cy in 0..region.height {
            for cx in 0..region.width {
                out.put_pixel(cx, cy, *page.get_pixel(region.x + cx, region.y + cy));
            }
        }
    }
    Ok(out)
}

/// Output filename for an extracted region: the region name with a `.png`
/// extension appended if absent.
pub fn region_file_name(region: &AtlasRegion) -> String {
    let name = &region.name;
    if name
        .rsplit('/')
        .next()
        .is_some_and(|base| base.contains('.'))
    {
        name.clone()
    } else {
        format!("{}.png", name)
    }
}

/// Extracts every region of one page, in declaration order.
pub fn unpack_page(
    metadata: &AtlasMetadata,
    page_name: &str,
    page: &RgbaImage,
) -> Result<Vec<(String, RgbaImage)>, AtlasError> {
    let mut out = Vec::new();
    for region in metadata.regions_of_page(page_name) {
        let image = extract_region(page, region)?;
        out.push((region_file_name(region), image));
    }
    Ok(out)
}
