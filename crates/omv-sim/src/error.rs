use std::path::PathBuf;

use omv_core::{ArenaError, FramebufferError, RegistryError};

/// Errors that can stop a simulation run.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// I/O error reading the script or writing frames.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Writing an output file failed.
    #[error("Cannot write {path}: {message}")]
    Output { path: PathBuf, message: String },

    /// The frame region could not be allocated.
    #[error("Frame region error: {0}")]
    Arena(#[from] ArenaError),

    /// The frame buffer pool rejected its configuration.
    #[error("Frame buffer error: {0}")]
    Framebuffer(#[from] FramebufferError),

    /// The frame buffer could not be registered.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Command-line settings that cannot work together.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The device stopped answering a command.
    #[error("Debug command {opcode:#04x} stalled after {received} of {expected} bytes")]
    Stalled {
        opcode: u8,
        received: usize,
        expected: usize,
    },
}
