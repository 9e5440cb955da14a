//! Crate error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::BackendError;

/// Errors raised while baking or selecting IBL resources.
#[derive(Error, Debug)]
pub enum IblError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("failed to load HDR panorama {path}: {source}")]
    HdrLoad {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("failed to write image {path}: {source}")]
    ImageWrite {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("invalid bake configuration: {0}")]
    Config(String),
    #[error("failed to parse bake configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{what} index {index} out of range (valid: 0..{len})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },
    #[error("pre-filter map has {allocated} mip levels but {requested} were requested")]
    MipLevelMismatch { allocated: u32, requested: u32 },
    #[error("no HDR sources to bake")]
    NoSources,
}

pub type IblResult<T> = Result<T, IblError>;
