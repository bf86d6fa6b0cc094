use std::path::PathBuf;

use thiserror::Error;

/// Failures with meaning to the user, as opposed to I/O plumbing which is
/// carried by `anyhow` context chains.
#[derive(Error, Debug)]
pub enum ModError {
    #[error("character id {0:?} is not a known three-letter code")]
    InvalidCharacterId(String),

    #[error("mesh and color slot are mutually exclusive: {0}")]
    ConflictingClassification(&'static str),

    #[error("no character pattern found in any of {assets} assets")]
    CharacterNotFound { assets: usize },

    #[error("no color slot pattern found (character {character}, {assets} assets scanned)")]
    SlotNotFound { character: String, assets: usize },

    #[error("mod {0:?} is not staged")]
    NotStaged(String),

    #[error("registry entry {index} is corrupt: {reason}")]
    CorruptRecord { index: usize, reason: String },

    #[error("archive {archive:?} has no usable container: {reason}")]
    MissingContainerFile { archive: PathBuf, reason: String },
}
