//! Host-side protocol client.
//!
//! [`Session`] owns the device half of the debug stack and plays the IDE on
//! the other end of the loopback: every request is written as raw header and
//! payload bytes, then the device link is pumped until the reply is complete.

use std::cell::Cell;

use omv_core::config::{DATA_TIMEOUT_MS, USBDBG_HEADER_MAGIC};
use omv_core::jpeg::JpegBuffer;
use omv_core::usbdbg::{CdcDebugLink, Command, LineCoding, UsbDebug};
use omv_hal::Clock;

use crate::error::SimError;
use crate::loopback::{self, DevicePort, HostEnd};
use crate::target::{SimProfiler, SimTarget};

/// Baud rate the host opens the port with.
pub const HOST_BAUDRATE: u32 = 921_600;

/// Simulated millisecond tick, advanced once per pump round.
#[derive(Debug, Default)]
pub struct SimClock {
    now: Cell<u32>,
}

impl SimClock {
    pub fn tick(&self) {
        self.now.set(self.now.get().wrapping_add(1));
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u32 {
        self.now.get()
    }
}

pub fn encode_header(opcode: u8, length: u32) -> [u8; 6] {
    let len = length.to_le_bytes();
    [USBDBG_HEADER_MAGIC, opcode, len[0], len[1], len[2], len[3]]
}

fn word(bytes: &[u8], index: usize) -> u32 {
    bytes
        .get(index * 4..index * 4 + 4)
        .map_or(0, |w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
}

/// Device state plus the host end of the link.
pub struct Session<'a> {
    pub dbg: UsbDebug<'a, SimTarget, SimProfiler>,
    link: CdcDebugLink,
    port: DevicePort,
    host: HostEnd,
    clock: SimClock,
    /// Payload bytes the host has received.
    pub bytes_in: usize,
}

impl<'a> Session<'a> {
    pub fn new(jpeg: &'a JpegBuffer, target: SimTarget, profiler: SimProfiler, packet: usize) -> Self {
        let (port, host) = loopback::pair(packet);
        let mut dbg = UsbDebug::with_profiler(jpeg, target, profiler);
        let mut link = CdcDebugLink::new();
        if link.on_line_coding(HOST_BAUDRATE, &mut dbg) != LineCoding::Debug {
            log::warn!("{} baud did not select debug mode", HOST_BAUDRATE);
        }
        Self {
            dbg,
            link,
            port,
            host,
            clock: SimClock::default(),
            bytes_in: 0,
        }
    }

    /// Run one command and collect `expect` reply bytes.
    ///
    /// The device may refuse or ignore the command; that shows up as a
    /// [`SimError::Stalled`] once the reply stops arriving.
    pub fn transact(&mut self, command: Command, payload: &[u8], expect: usize) -> Result<Vec<u8>, SimError> {
        let opcode = command.code();
        let length = if payload.is_empty() { expect } else { payload.len() };
        let length = u32::try_from(length).map_err(|_| SimError::Config(format!("{:?} of {} bytes", command, length)))?;
        self.host.send(&encode_header(opcode, length));
        self.host.send(payload);

        let Self {
            dbg,
            link,
            port,
            host,
            clock,
            ..
        } = self;
        let mut reply = Vec::with_capacity(expect);

        let mut idle = 0;
        // Header first; the data phase, if any, is then pumped below.
        while host.unread() > payload.len() && idle < DATA_TIMEOUT_MS {
            clock.tick();
            if link.poll(dbg, port, clock.now_ms()) == 0 {
                idle += 1;
            }
            host.drain_into(&mut reply);
        }
        let finished = dbg.wait_for_command(DATA_TIMEOUT_MS, &*clock, |dbg| {
            clock.tick();
            link.poll(dbg, port, clock.now_ms());
            host.drain_into(&mut reply);
        });
        host.drain_into(&mut reply);

        if !finished || host.unread() > 0 || reply.len() < expect {
            let received = if payload.is_empty() {
                reply.len()
            } else {
                payload.len().saturating_sub(host.unread())
            };
            // Resynchronise: nothing sent for this command may linger.
            host.discard();
            dbg.abort_transfer();
            return Err(SimError::Stalled {
                opcode,
                received,
                expected: length as usize,
            });
        }
        self.bytes_in += reply.len();
        Ok(reply)
    }

    pub fn query(&mut self, command: Command, len: usize) -> Result<Vec<u8>, SimError> {
        self.transact(command, &[], len)
    }

    /// Run a command that has no data phase at all.
    pub fn signal(&mut self, command: Command) -> Result<(), SimError> {
        self.transact(command, &[], 0).map(|_| ())
    }

    pub fn send(&mut self, command: Command, payload: &[u8]) -> Result<(), SimError> {
        self.transact(command, payload, 0).map(|_| ())
    }

    pub fn firmware_version(&mut self) -> Result<(u32, u32, u32), SimError> {
        let reply = self.query(Command::FwVersion, 12)?;
        Ok((word(&reply, 0), word(&reply, 1), word(&reply, 2)))
    }

    pub fn arch(&mut self) -> Result<String, SimError> {
        let reply = self.query(Command::ArchStr, 64)?;
        let end = reply.iter().position(|&b| b == 0).unwrap_or(reply.len());
        Ok(String::from_utf8_lossy(&reply[..end]).into_owned())
    }

    pub fn sensor_id(&mut self) -> Result<u32, SimError> {
        Ok(word(&self.query(Command::SensorId, 4)?, 0))
    }

    /// Current state: status flags, frame header and any pending text.
    pub fn state(&mut self) -> Result<HostState, SimError> {
        let reply = self.query(Command::GetState, 64)?;
        let text_len = (word(&reply, 4) as usize).min(reply.len() - 20);
        Ok(HostState {
            flags: word(&reply, 0),
            width: word(&reply, 1),
            height: word(&reply, 2),
            size: word(&reply, 3) as usize,
            text: reply[20..20 + text_len].to_vec(),
        })
    }

    /// Pull the published frame, if any. Returns `(width, height, bytes)`.
    pub fn frame(&mut self) -> Result<Option<(u32, u32, Vec<u8>)>, SimError> {
        let header = self.query(Command::FrameSize, 12)?;
        let size = word(&header, 2) as usize;
        if size == 0 {
            return Ok(None);
        }
        let data = self.query(Command::FrameDump, size)?;
        Ok(Some((word(&header, 0), word(&header, 1), data)))
    }

    /// Drain the device's pending text output.
    pub fn text(&mut self) -> Result<Vec<u8>, SimError> {
        let len = word(&self.query(Command::TxBufLen, 4)?, 0) as usize;
        if len == 0 {
            return Ok(Vec::new());
        }
        self.query(Command::TxBuf, len)
    }

    /// Upload and start a script. The device closes its gate until the
    /// interpreter takes the script.
    pub fn exec(&mut self, script: &[u8]) -> Result<(), SimError> {
        self.send(Command::ScriptExec, script)
    }

    pub fn script_running(&mut self) -> Result<bool, SimError> {
        Ok(word(&self.query(Command::ScriptRunning, 4)?, 0) != 0)
    }

    pub fn set_framebuffer_enabled(&mut self, enabled: bool) -> Result<(), SimError> {
        self.send(Command::FbEnable, &u32::from(enabled).to_le_bytes())
    }

    /// Read the whole profile.
    pub fn profile(&mut self) -> Result<Vec<u8>, SimError> {
        let size = word(&self.query(Command::ProfileSize, 4)?, 0) as usize;
        if size == 0 {
            return Ok(Vec::new());
        }
        self.query(Command::ProfileDump, size)
    }

    pub fn flushes(&self) -> usize {
        self.host.flushes()
    }
}

/// Decoded GET_STATE reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostState {
    pub flags: u32,
    pub width: u32,
    pub height: u32,
    pub size: usize,
    pub text: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use omv_core::usbdbg::StatusFlags;

    fn session(jpeg: &JpegBuffer, packet: usize) -> Session<'_> {
        Session::new(jpeg, SimTarget::new(Some(0x2642)), SimProfiler::new(false), packet)
    }

    #[test]
    fn queries_identity_over_small_packets() {
        let jpeg = JpegBuffer::new(64);
        let mut s = session(&jpeg, 5);
        assert_eq!(s.firmware_version().expect("version"), (4, 7, 0));
        assert_eq!(s.arch().expect("arch"), crate::target::SIM_ARCH);
        assert_eq!(s.sensor_id().expect("sensor"), 0x2642);
        assert!(s.flushes() >= 3);
    }

    #[test]
    fn script_upload_round_trip() {
        let jpeg = JpegBuffer::new(64);
        let mut s = session(&jpeg, 64);
        let script = vec![b'#'; 300];
        s.exec(&script).expect("exec");
        assert_eq!(s.dbg.target().interrupts, 1);
        assert!(matches!(s.query(Command::FwVersion, 12), Err(SimError::Stalled { .. })));

        assert_eq!(s.dbg.take_script(), Some(script));
        s.dbg.print(b"hello");
        assert!(s.script_running().expect("running"));
        assert_eq!(s.text().expect("text"), b"hello");
    }

    #[test]
    fn state_reports_text_and_flags() {
        let jpeg = JpegBuffer::new(64);
        let mut s = session(&jpeg, 16);
        s.dbg.print(b"boot ok\n");
        let state = s.state().expect("state");
        assert_eq!(state.text, b"boot ok\n");
        assert_eq!(state.size, 0);
        let flags = StatusFlags::from_bits_truncate(state.flags);
        assert!(flags.contains(StatusFlags::TEXTBUF_NOTEMPTY | StatusFlags::PROFILE_ENABLED));
    }

    #[test]
    fn framebuffer_toggle_locks_frames() {
        let jpeg = JpegBuffer::new(64);
        let mut s = session(&jpeg, 16);
        s.set_framebuffer_enabled(false).expect("disable");
        assert!(!jpeg.is_enabled());
        assert_eq!(s.frame().expect("frame"), None);
        s.set_framebuffer_enabled(true).expect("enable");
        assert!(jpeg.is_enabled());
    }
}
