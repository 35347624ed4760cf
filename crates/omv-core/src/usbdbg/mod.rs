//! USB debug command channel.
//!
//! The host talks to the device with short commands, each optionally
//! followed by a data phase. [`UsbDebug`] is the device side: it decodes a
//! command in [`UsbDebug::control`], then moves the data phase one transport
//! chunk at a time through [`UsbDebug::data_in`] / [`UsbDebug::data_out`].
//! Only one command is in flight at a time.
//!
//! Fixed-size answers are rendered into an inline response buffer when the
//! command arrives; frame, text and profile dumps are read from their
//! sources as each chunk goes out. Chunks never run past the declared length
//! and bytes past the end of a source are sent as zeros.
//!
//! The declared length always frames the phase. For a [`Length::Fixed`]
//! command only the first `n` bytes carry meaning: an IN phase is zero padded
//! past them, an OUT phase discards the excess and has no effect if it ends
//! short of them.

pub mod command;
mod flags;
pub mod link;

pub use command::{Command, CommandSpec, Direction, Length, Requires, COMMANDS};
pub use flags::StatusFlags;
pub use link::{CdcDebugLink, LineCoding};

use alloc::vec::Vec;

use omv_hal::{Clock, DataChannel, DebugTarget, NoProfiler, Profiler};

use crate::config::{ARCH_STR_LEN, DEBUG_CHUNK_SIZE, FIRMWARE_VERSION, GET_STATE_LEN};
use crate::error::ControlError;
use crate::jpeg::{FrameHeader, JpegBuffer};
use crate::textbuf::TextBuffer;

const RESPONSE_LEN: usize = 64;

/// Header fields that precede the text bytes in a GET_STATE response.
const GET_STATE_FIELDS: usize = 5 * 4;

/// Data phase the host should run next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataPhase {
    None,
    /// Device to host, this many bytes.
    In(usize),
    /// Host to device, this many bytes.
    Out(usize),
}

#[derive(Debug, Clone, Copy)]
struct Transfer {
    command: Command,
    direction: Direction,
    length: usize,
    /// Meaningful bytes at the front of the phase.
    payload: usize,
    cursor: usize,
}

impl Transfer {
    fn remaining(&self) -> usize {
        self.length - self.cursor
    }
}

fn put_u32(buf: &mut [u8], index: usize, value: u32) {
    buf[index * 4..index * 4 + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_u32(buf: &[u8], index: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[index * 4..index * 4 + 4]);
    u32::from_le_bytes(word)
}

fn clamp_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

pub struct UsbDebug<'a, T: DebugTarget, P: Profiler = NoProfiler> {
    jpeg: &'a JpegBuffer,
    target: T,
    profiler: Option<P>,
    transfer: Option<Transfer>,
    /// Rendered answer of a fixed-size IN command, or the parameter bytes of
    /// a fixed-size OUT command.
    response: [u8; RESPONSE_LEN],
    /// Frame claimed by FRAME_SIZE or GET_STATE, streamed by FRAME_DUMP.
    frame: Option<FrameHeader>,
    script: Vec<u8>,
    script_ready: bool,
    script_running: bool,
    irq_enabled: bool,
    text: TextBuffer,
    staging: [u8; DEBUG_CHUNK_SIZE],
}

impl<'a, T: DebugTarget> UsbDebug<'a, T, NoProfiler> {
    pub fn new(jpeg: &'a JpegBuffer, target: T) -> Self {
        Self::build(jpeg, target, None)
    }
}

impl<'a, T: DebugTarget, P: Profiler> UsbDebug<'a, T, P> {
    pub fn with_profiler(jpeg: &'a JpegBuffer, target: T, profiler: P) -> Self {
        Self::build(jpeg, target, Some(profiler))
    }

    fn build(jpeg: &'a JpegBuffer, target: T, profiler: Option<P>) -> Self {
        Self {
            jpeg,
            target,
            profiler,
            transfer: None,
            response: [0; RESPONSE_LEN],
            frame: None,
            script: Vec::new(),
            script_ready: false,
            script_running: false,
            irq_enabled: true,
            text: TextBuffer::new(),
            staging: [0; DEBUG_CHUNK_SIZE],
        }
    }

    /// Decode a command header.
    ///
    /// Unknown codes, and profile commands without a profiler, are ignored and
    /// return `Ok(DataPhase::None)`. A refused command leaves every piece of
    /// state as it was.
    pub fn control(&mut self, opcode: u8, length: u32) -> Result<DataPhase, ControlError> {
        if !self.irq_enabled {
            return Err(ControlError::IrqDisabled);
        }
        if self.transfer.is_some() {
            return Err(ControlError::Busy);
        }
        let Some(command) = Command::from_code(opcode) else {
            log::trace!("ignoring unknown debug command {:#04x}", opcode);
            return Ok(DataPhase::None);
        };
        let spec = command.spec();
        if !self.supports(spec.requires) {
            log::trace!("ignoring {:?}: not supported", command);
            return Ok(DataPhase::None);
        }
        let length = length as usize;

        if command == Command::ScriptExec {
            if self.script_ready || self.script_running {
                return Err(ControlError::UploadPending);
            }
            self.script.clear();
            self.script
                .try_reserve_exact(length)
                .map_err(|_| ControlError::NoMemory(length))?;
        }

        let Some(direction) = spec.direction() else {
            self.execute(command);
            return Ok(DataPhase::None);
        };

        self.response = [0; RESPONSE_LEN];
        if direction == Direction::In {
            self.render(command);
        }
        log::trace!("{:?}: {:?} phase of {} bytes", command, direction, length);

        let payload = match spec.length {
            Length::Fixed(n) => n,
            Length::Declared | Length::None => length,
        };
        let transfer = Transfer {
            command,
            direction,
            length,
            payload,
            cursor: 0,
        };
        if length == 0 {
            self.finish(transfer);
            return Ok(DataPhase::None);
        }
        self.transfer = Some(transfer);
        Ok(match direction {
            Direction::In => DataPhase::In(length),
            Direction::Out => DataPhase::Out(length),
        })
    }

    fn supports(&self, requires: Requires) -> bool {
        match requires {
            Requires::Nothing => true,
            Requires::Profiler => self.profiler.is_some(),
            Requires::Pmu => self.profiler.as_ref().is_some_and(|p| p.has_pmu()),
        }
    }

    /// Act on a command without a data phase.
    fn execute(&mut self, command: Command) {
        match command {
            Command::ScriptStop => {
                if self.script_running {
                    self.target.interrupt_script();
                }
            }
            Command::SysReset => {
                log::info!("host requested reset");
                self.target.system_reset();
            }
            Command::SysResetToBootloader => self.request_bootloader(),
            Command::ProfileReset => {
                if let Some(profiler) = self.profiler.as_mut() {
                    profiler.reset();
                }
            }
            _ => {}
        }
    }

    /// Fill `response` for a device-to-host command.
    fn render(&mut self, command: Command) {
        let out = &mut self.response;
        match command {
            Command::FwVersion => {
                let (major, minor, patch) = FIRMWARE_VERSION;
                put_u32(out, 0, major);
                put_u32(out, 1, minor);
                put_u32(out, 2, patch);
            }
            Command::FrameSize => {
                self.frame = self.jpeg.claim();
                let header = self.frame.unwrap_or_default();
                put_u32(out, 0, header.width);
                put_u32(out, 1, header.height);
                put_u32(out, 2, clamp_u32(header.size));
            }
            Command::FrameDump => {
                if self.frame.is_none() {
                    self.frame = self.jpeg.claim();
                }
            }
            Command::ArchStr => {
                let arch = self.target.arch_str().as_bytes();
                let n = arch.len().min(ARCH_STR_LEN - 1);
                out[..n].copy_from_slice(&arch[..n]);
            }
            Command::ScriptRunning => put_u32(out, 0, u32::from(self.script_running)),
            Command::TxBufLen => put_u32(out, 0, clamp_u32(self.text.len())),
            Command::SensorId => put_u32(out, 0, self.target.sensor_id().unwrap_or(0xFF)),
            Command::GetState => {
                let status = self.status();
                self.frame = self.jpeg.claim();
                let header = self.frame.unwrap_or_default();
                let out = &mut self.response;
                let text_len = self.text.drain_into(&mut out[GET_STATE_FIELDS..GET_STATE_LEN]);
                put_u32(out, 0, status.bits());
                put_u32(out, 1, header.width);
                put_u32(out, 2, header.height);
                put_u32(out, 3, clamp_u32(header.size));
                put_u32(out, 4, clamp_u32(text_len));
            }
            Command::ProfileSize => {
                let size = self.profiler.as_ref().map_or(0, |p| p.size());
                put_u32(out, 0, clamp_u32(size));
            }
            _ => {}
        }
    }

    /// Send the next chunk of a device-to-host phase, at most `size` bytes.
    ///
    /// Returns the number of bytes the channel accepted. Zero means nothing
    /// moved: no IN phase is active, the gate is closed, or the frame lock
    /// was busy and the chunk should be retried.
    pub fn data_in<C: DataChannel + ?Sized>(&mut self, size: usize, channel: &mut C) -> usize {
        if !self.irq_enabled {
            return 0;
        }
        let Some(mut xfer) = self.transfer.filter(|t| t.direction == Direction::In) else {
            return 0;
        };
        let n = size.min(xfer.remaining()).min(DEBUG_CHUNK_SIZE);
        if n == 0 {
            return 0;
        }
        let chunk = &mut self.staging[..n];
        chunk.fill(0);
        match xfer.command {
            Command::FrameDump => {
                if let Some(header) = self.frame {
                    let wanted = header.size.saturating_sub(xfer.cursor).min(n);
                    // A frame cleared mid-dump reads short; the rest goes out as zeros.
                    if wanted > 0 && self.jpeg.read_at(xfer.cursor, &mut chunk[..wanted]).is_none() {
                        return 0;
                    }
                }
            }
            Command::TxBuf => {
                self.text.peek_into(chunk);
            }
            Command::ProfileDump => {
                if let Some(profiler) = self.profiler.as_mut() {
                    profiler.read_at(xfer.cursor, chunk);
                }
            }
            _ => {
                let end = xfer.payload.min(RESPONSE_LEN);
                if let Some(src) = self.response.get(xfer.cursor..end) {
                    let k = src.len().min(n);
                    chunk[..k].copy_from_slice(&src[..k]);
                }
            }
        }
        let written = channel.write(chunk).min(n);
        if xfer.command == Command::TxBuf {
            self.text.consume(written);
        }
        xfer.cursor += written;
        self.advance(xfer);
        written
    }

    /// Receive the next chunk of a host-to-device phase, at most `size` bytes.
    ///
    /// Returns the number of bytes read from the channel.
    pub fn data_out<C: DataChannel + ?Sized>(&mut self, size: usize, channel: &mut C) -> usize {
        if !self.irq_enabled {
            return 0;
        }
        let Some(mut xfer) = self.transfer.filter(|t| t.direction == Direction::Out) else {
            return 0;
        };
        let n = size.min(xfer.remaining()).min(DEBUG_CHUNK_SIZE);
        if n == 0 {
            return 0;
        }
        let chunk = &mut self.staging[..n];
        let read = channel.read(chunk).min(n);
        let chunk = &chunk[..read];
        if xfer.command == Command::ScriptExec {
            self.script.extend_from_slice(chunk);
        } else {
            let end = xfer.payload.min(RESPONSE_LEN);
            if xfer.cursor < end {
                let k = (end - xfer.cursor).min(read);
                self.response[xfer.cursor..xfer.cursor + k].copy_from_slice(&chunk[..k]);
            }
        }
        xfer.cursor += read;
        self.advance(xfer);
        read
    }

    fn advance(&mut self, xfer: Transfer) {
        if xfer.remaining() == 0 {
            self.transfer = None;
            self.finish(xfer);
        } else {
            self.transfer = Some(xfer);
        }
    }

    /// Completion side effects of a data phase.
    fn finish(&mut self, xfer: Transfer) {
        if xfer.direction == Direction::Out && xfer.length < xfer.payload {
            log::debug!(
                "{:?}: ignoring short parameter block ({} of {} bytes)",
                xfer.command,
                xfer.length,
                xfer.payload
            );
            return;
        }
        match xfer.command {
            Command::FrameDump => {
                if let Some(header) = self.frame.take() {
                    self.jpeg.finish_claim(xfer.length >= header.size);
                }
            }
            Command::ScriptExec => {
                log::debug!("script received ({} bytes)", self.script.len());
                self.script_ready = true;
                self.script_running = true;
                // Closed until the main loop picks the script up.
                self.irq_enabled = false;
                self.target.interrupt_script();
            }
            Command::FbEnable => {
                let enable = get_u32(&self.response, 0) != 0;
                if !enable {
                    self.frame = None;
                }
                self.jpeg.set_enabled(enable);
            }
            Command::ProfileMode => {
                let exclusive = get_u32(&self.response, 0) != 0;
                if let Some(profiler) = self.profiler.as_mut() {
                    profiler.set_mode(exclusive);
                }
            }
            Command::ProfileEvent => {
                let counter = get_u32(&self.response, 0);
                let event = get_u32(&self.response, 1);
                if let Some(profiler) = self.profiler.as_mut() {
                    profiler.set_event(counter, event);
                }
            }
            _ => {}
        }
    }

    /// Drop the data phase in flight, if any, and release a claimed frame
    /// without consuming it. A partial script upload is discarded. Returns
    /// true if a phase was dropped.
    pub fn abort_transfer(&mut self) -> bool {
        if let Some(header) = self.frame.take() {
            log::trace!("releasing claimed frame ({} bytes)", header.size);
            self.jpeg.finish_claim(false);
        }
        let Some(xfer) = self.transfer.take() else {
            return false;
        };
        log::debug!("{:?}: dropping phase at {} of {} bytes", xfer.command, xfer.cursor, xfer.length);
        if xfer.command == Command::ScriptExec {
            self.script.clear();
        }
        true
    }

    /// Spin for up to `timeout_ms` while a command's data phase is in flight,
    /// calling `poll` each round. Returns true if nothing is left in flight.
    pub fn wait_for_command<K: Clock + ?Sized>(
        &mut self,
        timeout_ms: u32,
        clock: &K,
        mut poll: impl FnMut(&mut Self),
    ) -> bool {
        let start = clock.now_ms();
        while self.irq_enabled && self.transfer.is_some() && clock.now_ms().wrapping_sub(start) < timeout_ms {
            poll(self);
        }
        self.transfer.is_none()
    }

    /// True while a data phase is incomplete or an uploaded script is
    /// waiting to be taken.
    pub fn is_busy(&self) -> bool {
        self.transfer.is_some() || self.script_ready
    }

    /// Data phase still outstanding, with the bytes left.
    pub fn pending_phase(&self) -> DataPhase {
        match self.transfer {
            None => DataPhase::None,
            Some(t) if t.direction == Direction::In => DataPhase::In(t.remaining()),
            Some(t) => DataPhase::Out(t.remaining()),
        }
    }

    pub fn irq_enabled(&self) -> bool {
        self.irq_enabled
    }

    /// Open or close the command gate. While closed, commands and data
    /// phases are not processed at all.
    pub fn set_irq_enabled(&mut self, enabled: bool) {
        self.irq_enabled = enabled;
    }

    pub fn script_ready(&self) -> bool {
        self.script_ready
    }

    pub fn script_running(&self) -> bool {
        self.script_running
    }

    /// Reported by the interpreter when a script starts or ends.
    pub fn set_script_running(&mut self, running: bool) {
        self.script_running = running;
    }

    /// Hand a completed upload to the interpreter and reopen the gate.
    pub fn take_script(&mut self) -> Option<Vec<u8>> {
        if !self.script_ready {
            return None;
        }
        self.script_ready = false;
        self.irq_enabled = true;
        Some(core::mem::take(&mut self.script))
    }

    /// Queue interpreter output for the host.
    pub fn print(&mut self, data: &[u8]) {
        let dropped = self.text.write(data);
        if dropped > 0 {
            log::trace!("text buffer overflow, {} bytes dropped", dropped);
        }
    }

    pub fn text_len(&self) -> usize {
        self.text.len()
    }

    pub fn status(&self) -> StatusFlags {
        let mut flags = StatusFlags::empty();
        flags.set(StatusFlags::SCRIPT_RUNNING, self.script_running);
        flags.set(StatusFlags::TEXTBUF_NOTEMPTY, !self.text.is_empty());
        flags.set(StatusFlags::FRAMEBUF_LOCKED, !self.jpeg.is_enabled());
        if let Some(profiler) = self.profiler.as_ref() {
            flags |= StatusFlags::PROFILE_ENABLED;
            flags.set(StatusFlags::PROFILE_HAS_PMU, profiler.has_pmu());
        }
        flags
    }

    /// Reset into the bootloader through the target.
    pub fn request_bootloader(&mut self) {
        log::info!("host requested bootloader");
        self.target.reset_to_bootloader();
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    pub fn profiler(&self) -> Option<&P> {
        self.profiler.as_ref()
    }

    pub fn profiler_mut(&mut self) -> Option<&mut P> {
        self.profiler.as_mut()
    }
}
