pub mod frames;
pub mod geometry;
pub mod point;

pub use frames::*;
pub use geometry::*;
pub use point::*;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Device error: {0}")]
    DeviceError(String),

    #[error("Missing normals: {0}")]
    MissingNormals(String),

    #[error("No correspondences: {0}")]
    NoCorrespondences(String),

    #[error("Singular system: {0}")]
    Singular(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn device(msg: impl Into<String>) -> Self {
        Self::DeviceError(msg.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
