//! Crate-specific errors.

use std::path::PathBuf;
use thiserror::Error;

/// Crate-specific errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The input list was empty, or expanded to nothing.
    #[error("there is no file to read")]
    EmptyInput,

    /// A path does not exist on the file system.
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    /// A path exists but is not a recognized point-cloud input.
    #[error("unknown file type: {0}")]
    UnknownFileType(PathBuf),

    /// The retained headers do not all share the same signature.
    #[error("impossible to mix different file formats")]
    MixedFormats,

    /// A virtual point-cloud manifest must be the only input.
    #[error("virtual point cloud file detected mixed with other content")]
    VpcMixedWithOtherInputs,

    /// The manifest does not match the expected STAC shape.
    #[error("malformed virtual point cloud file: {0}")]
    MalformedVpc(String),

    /// Only STAC 1.0.0 manifests are understood.
    #[error("unsupported STAC version: {0}")]
    UnsupportedStacVersion(String),

    /// Chunking by size and chunking by query are mutually exclusive.
    #[error("impossible to set chunk size with queries")]
    ChunkSizeWithQueries,

    /// A stage descriptor named a stage the engine does not know.
    #[error("unsupported stage: {0}")]
    UnknownStage(String),

    /// A pipeline that pulls points has no reader.
    #[error("the pipeline must have a reader stage")]
    MissingReader,

    /// Two reader descriptors in one pipeline.
    #[error("the pipeline can only have a single reader stage")]
    DuplicateReader,

    /// A stage that needs points appeared before the reader.
    #[error("the stage {0} processes the point cloud but is not preceded by a reader stage")]
    ReaderMissingBefore(String),

    /// A `connect` entry referenced a uid that is not in the pipeline.
    #[error("cannot find stage with uid {0}")]
    ConnectionNotFound(String),

    /// A `connect` entry resolved to a stage of an incompatible type.
    #[error("the stage {uid} cannot be connected to {name}")]
    InvalidConnection {
        /// The uid named by the `connect` entry.
        uid: String,
        /// The name of the stage it resolved to.
        name: String,
    },

    /// A filter expression could not be parsed.
    #[error("invalid filter condition: {0}")]
    InvalidFilter(String),

    /// An attribute with this name but a different definition already exists.
    #[error("cannot add a second attribute '{0}'")]
    DuplicateAttribute(String),

    /// X, Y, Z and the flags byte cannot be edited or removed.
    #[error("the attribute {0} is reserved and cannot be modified")]
    ReservedAttribute(String),

    /// A stage output path collides with one of the input files.
    #[error("cannot override a file used as a source of point cloud: {0}")]
    OutputIsInput(PathBuf),

    /// The collection has no usable coordinate reference system.
    #[error("invalid CRS, cannot write a virtual point cloud file")]
    InvalidCrs,

    /// The file is not a readable las file.
    #[error("invalid las file: {0}")]
    InvalidLasFile(String),

    /// The file is not a readable pcd file.
    #[error("invalid pcd file: {0}")]
    InvalidPcdFile(String),

    /// Compressed point payloads are delegated to an external codec.
    #[error("compressed point data requires an external laz codec: {0}")]
    CompressedPoints(PathBuf),

    /// The user signalled cancellation through the progress channel.
    #[error("processing interrupted by the user")]
    Interrupted,

    /// A stage failed while processing a chunk.
    #[error("in stage {stage}: {source}")]
    Stage {
        /// The name of the stage that failed.
        stage: String,
        /// The underlying error.
        source: Box<Error>,
    },

    /// Wrapper around [std::io::Error].
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Wrapper around [serde_json::Error].
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Wrapper around [std::num::TryFromIntError].
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),
}

impl Error {
    /// Wraps this error with the name of the stage that produced it.
    pub(crate) fn in_stage(self, stage: &str) -> Error {
        match self {
            Error::Stage { .. } => self,
            other => Error::Stage {
                stage: stage.to_string(),
                source: Box::new(other),
            },
        }
    }
}
