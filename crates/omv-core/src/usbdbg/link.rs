//! Debug protocol framing over a CDC port.
//!
//! Each command starts with a [`USBDBG_HEADER_SIZE`] byte header:
//! `0x30`, the opcode, then the data length as a little-endian `u32`. The
//! link gathers header bytes, hands them to [`UsbDebug::control`] and then
//! pumps the data phase through the port as space and data become
//! available. The only state the link keeps is a partially received header
//! and the time of the last progress; the phase itself lives in the
//! controller. A header or data phase that makes no progress for
//! [`DATA_TIMEOUT_MS`] is dropped.

use omv_hal::{CdcPort, DebugTarget, Profiler};

use super::{DataPhase, UsbDebug};
use crate::config::{BOOTLOADER_BAUDRATE, DATA_TIMEOUT_MS, DEBUG_BAUDRATES, USBDBG_HEADER_MAGIC, USBDBG_HEADER_SIZE};

/// What a line-coding change selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineCoding {
    /// Debug protocol on.
    Debug,
    /// Reset into the bootloader requested.
    Bootloader,
    /// Plain serial; the link stays idle.
    Serial,
}

#[derive(Debug, Default)]
pub struct CdcDebugLink {
    debug_mode: bool,
    header: [u8; USBDBG_HEADER_SIZE],
    header_len: usize,
    last_rx_ms: u32,
}

impl CdcDebugLink {
    pub const fn new() -> Self {
        Self {
            debug_mode: false,
            header: [0; USBDBG_HEADER_SIZE],
            header_len: 0,
            last_rx_ms: 0,
        }
    }

    pub fn is_debug_mode(&self) -> bool {
        self.debug_mode
    }

    /// React to the host changing the port's baud rate.
    pub fn on_line_coding<T: DebugTarget, P: Profiler>(&mut self, baud: u32, dbg: &mut UsbDebug<'_, T, P>) -> LineCoding {
        self.reset();
        dbg.abort_transfer();
        if DEBUG_BAUDRATES.contains(&baud) {
            self.debug_mode = true;
            log::debug!("debug mode at {} baud", baud);
            LineCoding::Debug
        } else if baud == BOOTLOADER_BAUDRATE {
            self.debug_mode = false;
            dbg.request_bootloader();
            LineCoding::Bootloader
        } else {
            self.debug_mode = false;
            LineCoding::Serial
        }
    }

    /// Drop any partially received header.
    pub fn reset(&mut self) {
        self.header_len = 0;
    }

    /// Bytes of a header received so far.
    pub fn pending_header(&self) -> usize {
        self.header_len
    }

    /// Move as much as the port allows right now. Returns the bytes moved.
    ///
    /// Does nothing outside debug mode, while the port is closed, or while
    /// the controller's gate is shut. Time spent with the gate shut does not
    /// count towards [`DATA_TIMEOUT_MS`].
    pub fn poll<T, P, C>(&mut self, dbg: &mut UsbDebug<'_, T, P>, port: &mut C, now_ms: u32) -> usize
    where
        T: DebugTarget,
        P: Profiler,
        C: CdcPort + ?Sized,
    {
        if !self.debug_mode || !port.connected() {
            return 0;
        }
        if !dbg.irq_enabled() {
            self.last_rx_ms = now_ms;
            return 0;
        }
        let mut moved = 0;
        loop {
            let step = match dbg.pending_phase() {
                DataPhase::None => self.read_header(dbg, port),
                DataPhase::In(remaining) => {
                    let n = remaining.min(port.write_available());
                    let sent = if n > 0 { dbg.data_in(n, port) } else { 0 };
                    if sent > 0 && dbg.pending_phase() == DataPhase::None {
                        port.flush();
                    }
                    sent
                }
                DataPhase::Out(remaining) => {
                    let n = remaining.min(port.read_available());
                    if n > 0 {
                        dbg.data_out(n, port)
                    } else {
                        0
                    }
                }
            };
            if step == 0 {
                break;
            }
            moved += step;
            self.last_rx_ms = now_ms;
            if !dbg.irq_enabled() {
                break;
            }
        }

        if moved == 0 && now_ms.wrapping_sub(self.last_rx_ms) > DATA_TIMEOUT_MS {
            if self.header_len > 0 {
                log::warn!("debug header timed out after {} of {} bytes", self.header_len, USBDBG_HEADER_SIZE);
                self.reset();
            } else if dbg.pending_phase() != DataPhase::None && dbg.abort_transfer() {
                log::warn!("debug data phase timed out");
            }
        }
        moved
    }

    fn read_header<T, P, C>(&mut self, dbg: &mut UsbDebug<'_, T, P>, port: &mut C) -> usize
    where
        T: DebugTarget,
        P: Profiler,
        C: CdcPort + ?Sized,
    {
        let n = port.read(&mut self.header[self.header_len..]);
        if n == 0 {
            return 0;
        }
        self.header_len += n;
        if self.header_len < USBDBG_HEADER_SIZE {
            return n;
        }
        self.header_len = 0;

        if self.header[0] != USBDBG_HEADER_MAGIC {
            log::warn!("dropping debug header with bad magic {:#04x}", self.header[0]);
            return n;
        }
        let opcode = self.header[1];
        let length = u32::from_le_bytes([self.header[2], self.header[3], self.header[4], self.header[5]]);
        if let Err(e) = dbg.control(opcode, length) {
            log::debug!("debug command {:#04x} refused: {}", opcode, e);
        }
        n
    }
}
