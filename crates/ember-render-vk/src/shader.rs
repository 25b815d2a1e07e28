// SPDX-License-Identifier: CEPL-1.0
//! SPIR-V bytecode loading.
//!
//! Missing or malformed bytecode is never fatal: the stage is left empty,
//! no pipeline gets built, and frames are cleared without drawing.

use ash::util::read_spv;
use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub const VERTEX_FILE: &str = "triangle.vert.spv";
pub const FRAGMENT_FILE: &str = "triangle.frag.spv";

static BUILTIN_VERTEX: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.vert.spv"));
static BUILTIN_FRAGMENT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.frag.spv"));

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{name} is not valid SPIR-V: {source}")]
    Decode {
        name: String,
        source: std::io::Error,
    },
}

/// Read a SPIR-V file into 32-bit words. Checks size and magic number,
/// fixing endianness if needed.
pub fn load_spirv(path: &Path) -> Result<Vec<u32>, ShaderError> {
    let mut file = File::open(path).map_err(|source| ShaderError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    read_spv(&mut file).map_err(|source| ShaderError::Decode {
        name: path.display().to_string(),
        source,
    })
}

fn decode_builtin(name: &str, bytes: &[u8]) -> Result<Vec<u32>, ShaderError> {
    read_spv(&mut Cursor::new(bytes)).map_err(|source| ShaderError::Decode {
        name: name.to_owned(),
        source,
    })
}

/// Bytecode for the two stages of the triangle pipeline. Kept in memory so
/// swapchain rebuilds never go back to disk.
#[derive(Clone, Debug, Default)]
pub struct ShaderSet {
    pub vertex: Option<Vec<u32>>,
    pub fragment: Option<Vec<u32>>,
}

impl ShaderSet {
    /// Shaders compiled into the binary by the build script.
    pub fn builtin() -> Self {
        Self {
            vertex: stage_or_warn(decode_builtin(VERTEX_FILE, BUILTIN_VERTEX)),
            fragment: stage_or_warn(decode_builtin(FRAGMENT_FILE, BUILTIN_FRAGMENT)),
        }
    }

    /// Load `triangle.vert.spv` and `triangle.frag.spv` from `dir`.
    pub fn from_dir(dir: &Path) -> Self {
        let set = Self {
            vertex: stage_or_warn(load_spirv(&dir.join(VERTEX_FILE))),
            fragment: stage_or_warn(load_spirv(&dir.join(FRAGMENT_FILE))),
        };
        if set.is_complete() {
            info!("shaders loaded from {}", dir.display());
        }
        set
    }

    pub fn load(dir: Option<&Path>) -> Self {
        match dir {
            Some(dir) => Self::from_dir(dir),
            None => Self::builtin(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.vertex.is_some() && self.fragment.is_some()
    }
}

fn stage_or_warn(res: Result<Vec<u32>, ShaderError>) -> Option<Vec<u32>> {
    match res {
        Ok(words) => Some(words),
        Err(e) => {
            warn!("shader stage unavailable: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ember-shader-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn builtin_shaders_are_valid_spirv() {
        let set = ShaderSet::builtin();
        assert!(set.is_complete());
        assert_eq!(set.vertex.unwrap()[0], SPIRV_MAGIC);
        assert_eq!(set.fragment.unwrap()[0], SPIRV_MAGIC);
    }

    #[test]
    fn missing_file_reports_path() {
        let path = scratch_dir("missing").join("nope.spv");
        match load_spirv(&path) {
            Err(ShaderError::Open { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn truncated_bytecode_is_rejected() {
        let path = scratch_dir("truncated").join("bad.spv");
        fs::write(&path, [0x03, 0x02, 0x23]).unwrap();
        assert!(matches!(load_spirv(&path), Err(ShaderError::Decode { .. })));
    }

    #[test]
    fn directory_with_one_stage_is_incomplete() {
        let dir = scratch_dir("partial");
        fs::write(dir.join(VERTEX_FILE), BUILTIN_VERTEX).unwrap();
        let _ = fs::remove_file(dir.join(FRAGMENT_FILE));

        let set = ShaderSet::from_dir(&dir);
        assert!(set.vertex.is_some());
        assert!(set.fragment.is_none());
        assert!(!set.is_complete());
    }

    #[test]
    fn no_directory_means_builtin() {
        assert!(ShaderSet::load(None).is_complete());
    }
}
