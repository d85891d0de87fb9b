use thiserror::Error;

use pkl_linker::{LinkError, ObjectHandle};

#[derive(Debug, Error)]
pub enum NetMapError {
    #[error("net object index {index} is outside every package block (max {max})")]
    IndexOutOfRange { index: u32, max: u32 },

    #[error("package map must be computed before index conversion")]
    NotComputed,

    #[error("class {0} is not a live object")]
    UnknownClass(ObjectHandle),

    #[error("class {0} is its own ancestor")]
    CyclicClass(ObjectHandle),

    #[error("manifest serialization error: {0}")]
    Serialization(String),

    #[error("manifest deserialization error: {0}")]
    Deserialization(String),

    #[error(transparent)]
    Link(#[from] LinkError),
}

pub type NetMapResult<T> = Result<T, NetMapError>;
