use std::path::PathBuf;

use thiserror::Error;

/// Why a clip could not take part in segmentation. Never fatal to a scan.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("no usable capture timestamp for {0}")]
    Unresolvable(String),

    #[error("media probe failed: {0}")]
    Media(String),

    #[error("non-positive duration for {0}")]
    EmptyClip(String),
}

#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("failed to enumerate {path}: {source}")]
    DirectoryEnumeration {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompositionError {
    #[error("journey has no clips")]
    Empty,

    #[error("no exportable tracks in journey")]
    NoExportableTracks,

    #[error("failed to read tracks of {path}: {reason}")]
    Probe { path: PathBuf, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("output path or container not set")]
    OutputNotConfigured,

    #[error("failed to open source: {0}")]
    SourceOpenFailed(String),

    #[error("failed to open destination: {0}")]
    DestinationOpenFailed(String),

    #[error("no usable video or audio track: {0}")]
    TrackSetupFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),
}

#[derive(Error, Debug)]
pub enum NameStoreError {
    #[error("naming store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("naming store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("naming store lock poisoned")]
    Poisoned,
}

#[derive(Error, Debug)]
#[error("failed to delete {path}: {source}")]
pub struct DeleteError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("an export is already running for {0}")]
    AlreadyRunning(PathBuf),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}
