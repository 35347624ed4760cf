//! Start-up table of the device's frame buffer pools.
//!
//! Built once during bring-up and then passed by reference to the capture
//! drivers and the debug channel.

use heapless::Vec;
use omv_hal::{CacheMaintenance, NoCache};

use super::Framebuffer;
use crate::error::RegistryError;

/// Identifies one pool in a [`FramebufferRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FramebufferId(pub u8);

impl FramebufferId {
    /// The pool fed by the primary camera interface.
    pub const MAIN: FramebufferId = FramebufferId(0);
}

pub struct FramebufferRegistry<const N: usize, C: CacheMaintenance = NoCache> {
    entries: Vec<(FramebufferId, Framebuffer<C>), N>,
}

impl<const N: usize, C: CacheMaintenance> Default for FramebufferRegistry<N, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, C: CacheMaintenance> FramebufferRegistry<N, C> {
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn register(&mut self, id: FramebufferId, fb: Framebuffer<C>) -> Result<(), RegistryError> {
        if self.entries.iter().any(|(existing, _)| *existing == id) {
            return Err(RegistryError::Duplicate(id));
        }
        self.entries
            .push((id, fb))
            .map_err(|_| RegistryError::Full)?;
        log::debug!("registered framebuffer {:?}", id);
        Ok(())
    }

    pub fn get(&self, id: FramebufferId) -> Option<&Framebuffer<C>> {
        self.entries
            .iter()
            .find(|(existing, _)| *existing == id)
            .map(|(_, fb)| fb)
    }

    pub fn get_mut(&mut self, id: FramebufferId) -> Option<&mut Framebuffer<C>> {
        self.entries
            .iter_mut()
            .find(|(existing, _)| *existing == id)
            .map(|(_, fb)| fb)
    }

    pub fn ids(&self) -> impl Iterator<Item = FramebufferId> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
