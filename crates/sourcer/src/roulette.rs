//! Round-robin directory sourcer.
//!
//! Scans the given directories once, keeps every regular file whose
//! magic bytes identify a known image format, and hands them out in
//! order, wrapping around at the end.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use regscore_core::capability::SourcedImage;

use crate::serve::{Sourcer, SourcerFailure};

/// Bytes read from each file to identify its format.
const SNIFF_BYTES: u64 = 512;

#[derive(Debug, thiserror::Error)]
pub enum RouletteError {
    #[error("Reading directory '{path}': {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No image files found in the given directories")]
    Empty,
}

#[derive(Debug, Clone)]
struct ImageFile {
    path: PathBuf,
    mime: &'static str,
}

#[derive(Debug)]
pub struct RouletteSourcer {
    files: Vec<ImageFile>,
    cursor: usize,
}

impl RouletteSourcer {
    /// Collect images from `dirs`, in argument order, sorted by file name
    /// within each directory.
    pub fn from_dirs<P: AsRef<Path>>(dirs: &[P]) -> Result<Self, RouletteError> {
        let mut files = Vec::new();

        for dir in dirs {
            let dir = dir.as_ref();
            let read_dir_err = |source| RouletteError::ReadDir {
                path: dir.to_path_buf(),
                source,
            };

            let mut paths = Vec::new();
            for entry in std::fs::read_dir(dir).map_err(read_dir_err)? {
                let entry = entry.map_err(read_dir_err)?;
                if entry.file_type().map_err(read_dir_err)?.is_file() {
                    paths.push(entry.path());
                }
            }
            paths.sort();

            for path in paths {
                match sniff_mime(&path) {
                    Ok(Some(mime)) => files.push(ImageFile { path, mime }),
                    Ok(None) => {
                        tracing::warn!(path = %path.display(), "Skipping file of unknown type");
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable file");
                    }
                }
            }
        }

        if files.is_empty() {
            return Err(RouletteError::Empty);
        }

        tracing::info!(count = files.len(), "Picked up image files");
        Ok(Self { files, cursor: 0 })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Sourcer for RouletteSourcer {
    fn get_image(&mut self) -> Result<SourcedImage, SourcerFailure> {
        let chosen = self.files[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.files.len();

        tracing::info!(path = %chosen.path.display(), mime = chosen.mime, "Chosen file");

        let data = std::fs::read(&chosen.path)
            .map_err(|e| format!("reading '{}': {e}", chosen.path.display()))?;
        let name = chosen
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(SourcedImage::new(data, name, chosen.mime))
    }
}

/// Identify an image format from the file's leading bytes.
fn sniff_mime(path: &Path) -> io::Result<Option<&'static str>> {
    let mut head = Vec::new();
    File::open(path)?.take(SNIFF_BYTES).read_to_end(&mut head)?;
    Ok(image::guess_format(&head).ok().map(|format| format.to_mime_type()))
}
