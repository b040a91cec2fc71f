use std::path::PathBuf;

use crate::error::{VideoError, VideoResult};

/// Resolves reference image names to filesystem paths. The image files
/// themselves are owned by the surrounding application; this service only
/// reads them as keyframe sources.
pub trait ImageStore: Send + Sync {
    /// Resolve an image name to its path in the store. Existence is checked
    /// by the caller; this only validates the name and maps it to a path.
    fn get_path(&self, image_name: &str) -> VideoResult<PathBuf>;
}

/// Flat-directory image store.
pub struct DiskImageStore {
    root: PathBuf,
}

impl DiskImageStore {
    pub fn new(root: PathBuf) -> Self {
        DiskImageStore { root }
    }
}

impl ImageStore for DiskImageStore {
    fn get_path(&self, image_name: &str) -> VideoResult<PathBuf> {
        // Names are bare filenames; anything that could walk out of the
        // store directory is rejected.
        if image_name.is_empty()
            || image_name == "."
            || image_name == ".."
            || image_name.contains('/')
            || image_name.contains('\\')
        {
            return Err(VideoError::validation(format!(
                "Reference image '{image_name}' is invalid"
            )));
        }
        Ok(self.root.join(image_name))
    }
}
