//! Imaging/debug core: frame buffer pool, JPEG publish buffer and the USB
//! debug command channel.
//!
//! Hardware-facing collaborators (transport, codec, cache, interpreter hooks)
//! come in through the traits in `omv-hal`.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arena;
pub mod config;
pub mod error;
pub mod framebuffer;
pub mod jpeg;
pub mod lock;
pub mod queue;
pub mod textbuf;
pub mod usbdbg;

pub use error::{ArenaError, ControlError, FramebufferError, RegistryError};
