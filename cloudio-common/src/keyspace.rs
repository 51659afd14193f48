//! Folder emulation over a flat key space.
//!
//! S3 and GCS only know objects. A "folder" `a` exists when some key
//! starts with `a/`; a "file" `a` exists when the key `a` itself exists.
//! Both can hold at once and both are reported.
//!
//! A [`KeySpace`] is built from the result of a single prefix listing and
//! answers every question about the requested path from that snapshot.

use std::collections::HashSet;

use crate::error::{StorageError, StorageResult};
use crate::path::BucketKey;

#[derive(Debug, Clone, Default)]
pub struct KeySpace {
    is_file: bool,
    is_dir: bool,
    /// Keys below the requested path with `key/` removed, in listing order.
    relative_keys: Vec<String>,
    /// First segment of every relative key, deduplicated; folders end in `/`.
    children: Vec<String>,
    /// Full keys that belong to the requested path.
    owned_keys: Vec<String>,
}

impl KeySpace {
    /// Analyse `keys`, the result of listing `location.key` as a string
    /// prefix. Keys that share the string prefix but not the path segment
    /// (`ab/c` when asking for `a`) are discarded.
    pub fn analyse<I>(location: &BucketKey, keys: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut space = KeySpace::default();

        if location.whole_bucket {
            space.is_dir = true;
            for key in keys.into_iter().filter(|k| !k.is_empty()) {
                space.relative_keys.push(key.clone());
                space.owned_keys.push(key);
            }
        } else {
            let prefix = format!("{}/", location.key);
            for key in keys {
                if key == location.key {
                    space.is_file = true;
                    space.owned_keys.push(key);
                    continue;
                }
                let Some(relative) = key.strip_prefix(&prefix) else {
                    continue;
                };
                // A `key/` placeholder marks a folder but lists nothing.
                space.is_dir = true;
                if !relative.is_empty() {
                    space.relative_keys.push(relative.to_string());
                }
                space.owned_keys.push(key);
            }
        }

        space.children = first_segments(&space.relative_keys);
        space
    }

    pub fn is_file(&self) -> bool {
        self.is_file
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    pub fn exists(&self) -> bool {
        self.is_file || self.is_dir
    }

    pub fn children(&self) -> &[String] {
        &self.children
    }

    pub fn relative_keys(&self) -> &[String] {
        &self.relative_keys
    }

    pub fn owned_keys(&self) -> &[String] {
        &self.owned_keys
    }

    /// Fail unless the analysed path is a directory.
    pub fn require_dir(&self, path: &str) -> StorageResult<()> {
        if !self.exists() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        if !self.is_dir {
            return Err(StorageError::NotADirectory(path.to_string()));
        }
        Ok(())
    }

    /// Directory entries relative to the analysed path.
    ///
    /// Non-recursive listings are one level deep. Recursive listings hold
    /// every file key and, unless `exclude_folders`, every intermediate
    /// folder once, ahead of its first descendant.
    pub fn listing(&self, recursive: bool, exclude_folders: bool) -> Vec<String> {
        if !recursive {
            return self
                .children
                .iter()
                .filter(|c| !(exclude_folders && c.ends_with('/')))
                .cloned()
                .collect();
        }

        let mut entries = Vec::with_capacity(self.relative_keys.len());
        let mut seen_dirs: HashSet<&str> = HashSet::new();
        for relative in &self.relative_keys {
            if !exclude_folders {
                for (idx, _) in relative.match_indices('/') {
                    let dir = &relative[..=idx];
                    if seen_dirs.insert(dir) {
                        entries.push(dir.to_string());
                    }
                }
            }
            if !relative.ends_with('/') {
                entries.push(relative.clone());
            }
        }
        entries
    }
}

fn first_segments(relative_keys: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut children = Vec::new();
    for relative in relative_keys {
        let child = match relative.split_once('/') {
            Some(("", _)) => continue,
            Some((first, _)) => format!("{}/", first),
            None => relative.clone(),
        };
        if seen.insert(child.clone()) {
            children.push(child);
        }
    }
    children
}
