use std::path::Path;

use crate::{clip::ClipFile, error::SegmentError};

/// Container extensions accepted as clips, compared case-insensitively.
pub const CLIP_EXTENSIONS: [&str; 5] = ["m4v", "mov", "mp4", "hevc", "avi"];

/// Whether a file name looks like a source clip. Names ending in `_s.<ext>`
/// mark derivative files and are skipped.
pub fn is_clip_name(file_name: &str) -> bool {
    if file_name.starts_with('.') {
        return false;
    }
    let Some((stem, ext)) = file_name.rsplit_once('.') else {
        return false;
    };
    if !CLIP_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)) {
        return false;
    }
    !stem.ends_with("_s")
}

/// Lists the clips directly inside `folder`, sorted by file name.
pub fn scan_folder(folder: &Path) -> Result<Vec<ClipFile>, SegmentError> {
    let enumeration_error = |source| SegmentError::DirectoryEnumeration {
        path: folder.to_path_buf(),
        source,
    };

    let mut names = Vec::new();
    for entry in std::fs::read_dir(folder).map_err(enumeration_error)? {
        let entry = entry.map_err(enumeration_error)?;
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if is_clip_name(&name) {
            names.push(name);
        }
    }
    names.sort();
    log::info!("found {} clips in {}", names.len(), folder.display());

    Ok(names
        .into_iter()
        .map(|name| ClipFile::new(folder, name))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_clip_name() {
        assert!(is_clip_name("2023_05_02_143015.MP4"));
        assert!(is_clip_name("a.m4v"));
        assert!(is_clip_name("a.MoV"));
        assert!(is_clip_name("a.hevc"));
        assert!(is_clip_name("a.avi"));
        assert!(!is_clip_name("a.mkv"));
        assert!(!is_clip_name("noext"));
        assert!(!is_clip_name(".hidden.mp4"));
        assert!(!is_clip_name("2023_05_02_143015_s.mp4"));
        assert!(is_clip_name("2023_05_02_143015_s2.mp4"));
    }

    #[test]
    fn test_scan_folder_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.mp4", "a.MOV", "c_s.mp4", "notes.txt", ".x.mp4"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.mp4")).unwrap();

        let clips = scan_folder(dir.path()).unwrap();
        let names: Vec<&str> = clips.iter().map(|c| c.file_name()).collect();
        assert_eq!(names, vec!["a.MOV", "b.mp4"]);
        assert!(clips.iter().all(|c| c.folder() == dir.path()));
    }

    #[test]
    fn test_scan_missing_folder_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = scan_folder(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, SegmentError::DirectoryEnumeration { .. }));
    }
}
