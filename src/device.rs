use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;

/// A device node and the camera index it maps to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    index: u32,
    path: PathBuf,
}

impl Node {
    pub fn new<P: Into<PathBuf>>(index: u32, path: P) -> Self {
        Node {
            index,
            path: path.into(),
        }
    }

    /// Returns the camera index (`3` for `/dev/video3`)
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Returns the absolute path of the device node
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Returns the camera index of a node file name, `None` if it does not belong to `stem`
fn parse_index(file_name: &str, stem: &str) -> Option<u32> {
    let digits = file_name.strip_prefix(stem)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Returns the device nodes currently present, ordered by index
///
/// Nodes are looked up next to the configured prefix, so with the default `/dev/video` this
/// lists `/dev/video0`, `/dev/video1` and so on.
///
/// # Example
///
/// ```
/// use uvccam::{device, Config};
/// for node in device::enum_devices(&Config::default()) {
///     println!("{} {}", node.index(), node.path().display());
/// }
/// ```
pub fn enum_devices(config: &Config) -> Vec<Node> {
    let mut devices = Vec::new();

    let prefix = &config.device_prefix;
    let (dir, stem) = match (prefix.parent(), prefix.file_name().and_then(|s| s.to_str())) {
        (Some(dir), Some(stem)) => (dir, stem),
        _ => return devices,
    };

    let entries = fs::read_dir(dir);
    if let Ok(entries) = entries {
        for dentry in entries {
            let dentry = match dentry {
                Ok(dentry) => dentry,
                Err(_) => continue,
            };

            let file_name = dentry.file_name();
            let file_name = match file_name.to_str() {
                Some(name) => name,
                None => continue,
            };

            if let Some(index) = parse_index(file_name, stem) {
                devices.push(Node::new(index, dentry.path()));
            }
        }
    }

    devices.sort_by_key(|node| node.index);
    devices
}

/// Whether the device node of a camera index exists
pub fn exists(config: &Config, index: u32) -> bool {
    config.device_path(index).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_node_names() {
        assert_eq!(parse_index("video0", "video"), Some(0));
        assert_eq!(parse_index("video12", "video"), Some(12));
        assert_eq!(parse_index("video", "video"), None);
        assert_eq!(parse_index("video-codec", "video"), None);
        assert_eq!(parse_index("media0", "video"), None);
    }

    #[test]
    fn missing_directory_lists_nothing() {
        let config = Config::default().with_device_prefix("/nonexistent/uvccam/video");
        assert!(enum_devices(&config).is_empty());
        assert!(!exists(&config, 0));
    }
}
