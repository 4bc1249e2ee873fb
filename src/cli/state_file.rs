//! Two-line hint file (device name, upstream name) written after a successful
//! connect so a later `disconnect` knows what to tear down. Every operation
//! is best effort; the file is never trusted for status.

use std::path::Path;

use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedInterfaces {
    pub device: String,
    pub upstream: String,
}

pub fn load(path: &Path) -> Option<SavedInterfaces> {
    let content = std::fs::read_to_string(path).ok()?;
    let mut lines = content.lines().map(str::trim);
    let device = lines.next().filter(|l| !l.is_empty())?;
    let upstream = lines.next().filter(|l| !l.is_empty())?;
    Some(SavedInterfaces {
        device: device.to_string(),
        upstream: upstream.to_string(),
    })
}

pub fn save(path: &Path, device: &str, upstream: &str) {
    if let Err(e) = std::fs::write(path, format!("{}\n{}\n", device, upstream)) {
        debug!("Could not write {}: {}", path.display(), e);
    }
}

pub fn clear(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            debug!("Could not remove {}: {}", path.display(), e);
        }
    }
}
