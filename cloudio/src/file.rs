//! Open modes and file handles.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::runtime::Runtime;
use tracing::debug;

use cloudio_common::{Metadata, StorageError, StoragePath, StorageResult};

use crate::backend::{PathStatus, StorageBackend};

/// The primary intent of an open mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Append,
    Exclusive,
}

impl Access {
    fn as_char(self) -> char {
        match self {
            Access::Read => 'r',
            Access::Write => 'w',
            Access::Append => 'a',
            Access::Exclusive => 'x',
        }
    }
}

/// A parsed mode string such as `"rb"`, `"w"`, `"a+"` or `"xb"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    access: Access,
    binary: bool,
    update: bool,
}

impl OpenMode {
    pub fn parse(mode: &str) -> StorageResult<Self> {
        let mut access = None;
        let mut binary = false;
        let mut text = false;
        let mut update = false;

        for c in mode.chars() {
            let next = match c {
                'r' => Access::Read,
                'w' => Access::Write,
                'a' => Access::Append,
                'x' => Access::Exclusive,
                'b' if !binary && !text => {
                    binary = true;
                    continue;
                }
                't' if !binary && !text => {
                    text = true;
                    continue;
                }
                'b' | 't' => {
                    return Err(StorageError::invalid_mode(
                        mode,
                        "binary and text flags may each appear once and not together",
                    ))
                }
                '+' if !update => {
                    update = true;
                    continue;
                }
                '+' => return Err(StorageError::invalid_mode(mode, "'+' may appear only once")),
                other => {
                    return Err(StorageError::invalid_mode(
                        mode,
                        format!("unexpected character '{}'", other),
                    ))
                }
            };
            if access.replace(next).is_some() {
                return Err(StorageError::invalid_mode(
                    mode,
                    "must contain exactly one of 'r', 'w', 'a', 'x'",
                ));
            }
        }

        let access = access.ok_or_else(|| {
            StorageError::invalid_mode(mode, "must contain exactly one of 'r', 'w', 'a', 'x'")
        })?;
        Ok(Self {
            access,
            binary,
            update,
        })
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn is_readable(&self) -> bool {
        self.access == Access::Read || self.update
    }

    pub fn is_writable(&self) -> bool {
        self.access != Access::Read || self.update
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }
}

impl FromStr for OpenMode {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.access.as_char())?;
        if self.binary {
            write!(f, "b")?;
        }
        if self.update {
            write!(f, "+")?;
        }
        Ok(())
    }
}

/// Handle returned by [`crate::CloudInterface::open`].
///
/// Writes are buffered in full and the whole object is stored again on
/// every `write`, since object stores have no partial writes.
pub struct CloudFile {
    backend: Arc<dyn StorageBackend>,
    runtime: Arc<Runtime>,
    path: StoragePath,
    mode: OpenMode,
    status: PathStatus,
    base: Bytes,
    written: BytesMut,
}

impl CloudFile {
    pub(crate) fn open(
        backend: Arc<dyn StorageBackend>,
        runtime: Arc<Runtime>,
        path: StoragePath,
        mode: OpenMode,
    ) -> StorageResult<Self> {
        let status = runtime.block_on(backend.stat(&path))?;

        match mode.access() {
            Access::Read if !status.is_file => {
                return Err(StorageError::NotFound(path.to_string()));
            }
            Access::Exclusive if status.exists() => {
                return Err(StorageError::AlreadyExists(path.to_string()));
            }
            _ => {}
        }

        let base = if mode.access() == Access::Append && status.is_file {
            runtime.block_on(backend.read(&path))?
        } else {
            Bytes::new()
        };

        Ok(Self {
            backend,
            runtime,
            path,
            mode,
            status,
            base,
            written: BytesMut::new(),
        })
    }

    pub fn path(&self) -> &StoragePath {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Whole content of the file.
    pub fn read(&self) -> StorageResult<Bytes> {
        if !self.mode.is_readable() {
            return Err(StorageError::invalid_mode(
                &self.mode.to_string(),
                "mode does not permit reading",
            ));
        }
        if !self.status.is_file {
            return Err(StorageError::NotFound(self.path.to_string()));
        }
        self.runtime.block_on(self.backend.read(&self.path))
    }

    /// Content decoded as UTF-8.
    pub fn read_to_string(&self) -> StorageResult<String> {
        let data = self.read()?;
        String::from_utf8(data.to_vec()).map_err(|_| StorageError::Decode {
            path: self.path.to_string(),
            encoding: "utf-8",
        })
    }

    pub fn write(&mut self, content: impl AsRef<[u8]>) -> StorageResult<()> {
        self.write_with_metadata(content, &Metadata::new())
    }

    pub fn write_with_metadata(
        &mut self,
        content: impl AsRef<[u8]>,
        metadata: &Metadata,
    ) -> StorageResult<()> {
        self.check_writable()?;
        if self.written.is_empty() && self.status.is_file && self.base.is_empty() {
            debug!(path = %self.path, "Overwriting file");
        }

        self.written.extend_from_slice(content.as_ref());
        let mut data = BytesMut::with_capacity(self.base.len() + self.written.len());
        data.extend_from_slice(&self.base);
        data.extend_from_slice(&self.written);

        self.runtime
            .block_on(self.backend.write(&self.path, data.freeze(), metadata))?;
        self.status.is_file = true;
        Ok(())
    }

    /// Replace the file with the content of a local file, letting the
    /// backend stream it where it can.
    pub fn upload_from(&mut self, local: &Path) -> StorageResult<()> {
        self.check_writable()?;
        if self.base.is_empty() && self.written.is_empty() {
            self.runtime
                .block_on(self.backend.upload_file(&self.path, local))?;
        } else {
            let extra = std::fs::read(local)?;
            self.write(extra)?;
        }
        self.status.is_file = true;
        Ok(())
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.mode.is_writable() {
            Ok(())
        } else {
            Err(StorageError::invalid_mode(
                &self.mode.to_string(),
                "mode does not permit writing",
            ))
        }
    }
}

impl fmt::Debug for CloudFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudFile")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("status", &self.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_modes() {
        let rb = OpenMode::parse("rb").unwrap();
        assert_eq!(rb.access(), Access::Read);
        assert!(rb.is_readable() && !rb.is_writable() && rb.is_binary());

        let w = OpenMode::parse("w").unwrap();
        assert!(w.is_writable() && !w.is_readable() && !w.is_binary());

        let a_plus: OpenMode = "a+".parse().unwrap();
        assert!(a_plus.is_readable() && a_plus.is_writable());

        assert_eq!(OpenMode::parse("r+b").unwrap(), OpenMode::parse("rb+").unwrap());
        assert_eq!(OpenMode::parse("xt").unwrap().access(), Access::Exclusive);
    }

    #[test]
    fn test_parse_invalid_modes() {
        for mode in ["", "b", "rw", "rbt", "r++", "q", "wbb"] {
            let err = OpenMode::parse(mode).unwrap_err();
            assert!(matches!(err, StorageError::InvalidMode { .. }), "{mode}");
        }
    }

    #[test]
    fn test_display_normalizes() {
        assert_eq!(OpenMode::parse("b+r").unwrap().to_string(), "rb+");
        assert_eq!(OpenMode::parse("wt").unwrap().to_string(), "w");
    }
}
