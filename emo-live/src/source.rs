//! Frame sources backed by still images on disk.

use std::path::{Path, PathBuf};

use image::DynamicImage;
use tracing::{debug, info};

use emo_core::{CaptureError, FrameSource};

const EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Replays a single image or every image in a directory, in a loop.
///
/// The source counts as streaming while it has at least one file.
#[derive(Debug)]
pub struct ImageFileSource {
    files: Vec<PathBuf>,
    next: usize,
}

impl ImageFileSource {
    /// Open `path`, which may be an image file or a directory of images.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let files = if path.is_dir() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(path)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| is_image(p))
                .collect();
            files.sort();
            files
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no image source at {}", path.display()),
            ));
        };

        info!("image source: {} file(s) from {}", files.len(), path.display());
        Ok(Self { files, next: 0 })
    }

    /// Number of files in the rotation.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageFileSource {
    fn is_streaming(&self) -> bool {
        !self.files.is_empty()
    }

    fn grab(&mut self) -> Result<DynamicImage, CaptureError> {
        if self.files.is_empty() {
            return Err(CaptureError::SourceInactive);
        }
        let path = &self.files[self.next % self.files.len()];
        self.next = (self.next + 1) % self.files.len();
        debug!("grabbing {}", path.display());
        image::open(path).map_err(|e| CaptureError::Grab(format!("{}: {e}", path.display())))
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("emo-live-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_png(path: &Path, shade: u8) {
        RgbImage::from_pixel(4, 3, Rgb([shade, shade, shade]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn cycles_through_directory() {
        let dir = scratch_dir("cycle");
        write_png(&dir.join("b.png"), 200);
        write_png(&dir.join("a.png"), 10);
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let mut src = ImageFileSource::open(&dir).unwrap();
        assert_eq!(src.len(), 2);
        assert!(src.is_streaming());

        let shades: Vec<u8> = (0..3)
            .map(|_| src.grab().unwrap().to_rgb8().get_pixel(0, 0)[0])
            .collect();
        assert_eq!(shades, vec![10, 200, 10]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn empty_directory_is_not_streaming() {
        let dir = scratch_dir("empty");
        let mut src = ImageFileSource::open(&dir).unwrap();
        assert!(!src.is_streaming());
        assert!(matches!(src.grab(), Err(CaptureError::SourceInactive)));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_path_is_an_error() {
        let missing = std::env::temp_dir().join("emo-live-definitely-missing.png");
        assert!(ImageFileSource::open(&missing).is_err());
    }

    #[test]
    fn unreadable_file_reports_grab_error() {
        let dir = scratch_dir("broken");
        let path = dir.join("broken.jpg");
        std::fs::write(&path, b"not a jpeg").unwrap();

        let mut src = ImageFileSource::open(&path).unwrap();
        assert!(matches!(src.grab(), Err(CaptureError::Grab(_))));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
