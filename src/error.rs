// THEORY:
// Errors in this crate are reserved for conditions the host must hear about,
// such as a frame layout that can never be processed or a buffer of the wrong
// size. Everything that happens routinely while tracking (no object, no hull, an
// unusable merge point) is an `Option`, because most frames after a trigger
// legitimately contain nothing.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("invalid frame dimensions {width}x{height} for {format}")]
    InvalidDimensions {
        width: usize,
        height: usize,
        format: &'static str,
    },
    #[error("stride {stride} is narrower than a {row_bytes} byte row")]
    StrideTooSmall { stride: usize, row_bytes: usize },
    #[error("frame buffer holds {actual} bytes, layout needs {expected}")]
    FrameSizeMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Config(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, VisionError>;
