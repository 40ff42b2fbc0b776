use std::path::{Path, PathBuf};

/// Width of the zero-padded tile index embedded in every filename.
pub const TILE_ID_WIDTH: usize = 5;

/// Zero-padded tile index (`7` -> `"00007"`).
pub fn tile_suffix(tile_id: usize) -> String {
    format!("{:0width$}", tile_id, width = TILE_ID_WIDTH)
}

/// `<prefix>_NNNNN.<extension>`
pub fn tile_file_name(prefix: &str, tile_id: usize, extension: &str) -> String {
    format!("{}_{}.{}", prefix, tile_suffix(tile_id), extension)
}

/// Parse the tile index from a file stem such as `bbox_00042`.
///
/// The index is the last `_`-separated token of the stem.
pub fn parse_tile_id(path: &Path) -> Option<usize> {
    let stem = path.file_stem()?.to_str()?;
    let token = stem.rsplit('_').next()?;
    if token.is_empty() || !token.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

/// Sub-folders created by the acquisition pipeline under its output directory.
pub const ACQUISITION_FOLDERS: [&str; 3] = ["input", "output", "geojson"];

/// `out_dir/input/image_NNNNN.tif`
pub fn image_path(out_dir: &Path, tile_id: usize) -> PathBuf {
    out_dir.join("input").join(tile_file_name("image", tile_id, "tif"))
}

/// `out_dir/geojson/bbox_NNNNN.geojson`
pub fn bbox_path(out_dir: &Path, tile_id: usize) -> PathBuf {
    out_dir
        .join("geojson")
        .join(tile_file_name("bbox", tile_id, "geojson"))
}

/// `out_dir/<class>/<class>_NNNNN.tif`
pub fn mask_path(out_dir: &Path, class_name: &str, tile_id: usize) -> PathBuf {
    out_dir
        .join(class_name)
        .join(tile_file_name(class_name, tile_id, "tif"))
}

/// Reference image for a bbox file: `<bbox dir>/../input/image_NNNNN.tif`.
pub fn reference_image_for_bbox(bbox_file: &Path, tile_id: usize) -> PathBuf {
    let root = bbox_file
        .parent()
        .and_then(|p| p.parent())
        .unwrap_or_else(|| Path::new("."));
    image_path(root, tile_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_suffix() {
        assert_eq!(tile_suffix(0), "00000");
        assert_eq!(tile_suffix(7), "00007");
        assert_eq!(tile_suffix(123456), "123456");
    }

    #[test]
    fn test_paths() {
        let root = Path::new("/data/sr_seg");
        assert_eq!(
            image_path(root, 3),
            PathBuf::from("/data/sr_seg/input/image_00003.tif")
        );
        assert_eq!(
            bbox_path(root, 3),
            PathBuf::from("/data/sr_seg/geojson/bbox_00003.geojson")
        );
        assert_eq!(
            mask_path(root, "roads", 12),
            PathBuf::from("/data/sr_seg/roads/roads_00012.tif")
        );
    }

    #[test]
    fn test_parse_tile_id() {
        assert_eq!(parse_tile_id(Path::new("geojson/bbox_00042.geojson")), Some(42));
        assert_eq!(parse_tile_id(Path::new("image_00000.tif")), Some(0));
        assert_eq!(parse_tile_id(Path::new("bbox_final.geojson")), None);
        assert_eq!(parse_tile_id(Path::new("bbox_.geojson")), None);
    }

    #[test]
    fn test_reference_image_for_bbox() {
        let bbox = bbox_path(Path::new("/data/sr_seg"), 9);
        assert_eq!(
            reference_image_for_bbox(&bbox, 9),
            PathBuf::from("/data/sr_seg/input/image_00009.tif")
        );
    }
}
