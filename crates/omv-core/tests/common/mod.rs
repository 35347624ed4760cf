//! Test doubles shared by the debug channel tests.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use omv_core::jpeg::JpegBuffer;
use omv_hal::{CdcPort, Clock, DataChannel, DebugTarget, EncodeError, FrameEncoder, ImageRef, PixFormat, Profiler};

/// Side effects a [`MockTarget`] has seen.
#[derive(Debug, Default)]
pub struct TargetLog {
    pub interrupts: usize,
    pub resets: usize,
    pub bootloader: usize,
}

#[derive(Clone, Default)]
pub struct MockTarget {
    pub log: Rc<RefCell<TargetLog>>,
    pub sensor: Option<u32>,
}

impl DebugTarget for MockTarget {
    fn arch_str(&self) -> &str {
        "OMV4 H7 1024 SDRAM"
    }

    fn sensor_id(&self) -> Option<u32> {
        self.sensor
    }

    fn interrupt_script(&mut self) {
        self.log.borrow_mut().interrupts += 1;
    }

    fn system_reset(&mut self) {
        self.log.borrow_mut().resets += 1;
    }

    fn reset_to_bootloader(&mut self) {
        self.log.borrow_mut().bootloader += 1;
    }
}

/// Profiler double with a fixed byte pattern and recorded settings.
#[derive(Default)]
pub struct MockProfiler {
    pub pmu: bool,
    pub data: Vec<u8>,
    pub exclusive: Option<bool>,
    pub events: Vec<(u32, u32)>,
    pub resets: usize,
}

impl Profiler for MockProfiler {
    fn has_pmu(&self) -> bool {
        self.pmu
    }

    fn size(&self) -> usize {
        self.data.len()
    }

    fn read_at(&mut self, offset: usize, out: &mut [u8]) -> usize {
        let Some(tail) = self.data.get(offset..) else {
            return 0;
        };
        let n = tail.len().min(out.len());
        out[..n].copy_from_slice(&tail[..n]);
        n
    }

    fn set_mode(&mut self, exclusive: bool) {
        self.exclusive = Some(exclusive);
    }

    fn set_event(&mut self, counter: u32, event: u32) {
        self.events.push((counter, event));
    }

    fn reset(&mut self) {
        self.resets += 1;
        self.data.clear();
    }
}

/// Encoder that emits a recognisable byte ramp of a fixed length.
pub struct RampEncoder(pub usize);

impl FrameEncoder for RampEncoder {
    fn compress(&mut self, _src: &ImageRef<'_>, dst: &mut [u8], _quality: u8) -> Result<usize, EncodeError> {
        if self.0 > dst.len() {
            return Err(EncodeError::Overflow);
        }
        for (i, b) in dst[..self.0].iter_mut().enumerate() {
            *b = i as u8;
        }
        Ok(self.0)
    }
}

/// In-memory data channel: `input` feeds reads, writes land in `output`.
/// `limit` caps bytes per call.
#[derive(Default)]
pub struct MemChannel {
    pub input: VecDeque<u8>,
    pub output: Vec<u8>,
    pub limit: Option<usize>,
}

impl MemChannel {
    pub fn with_input(bytes: &[u8]) -> Self {
        Self {
            input: bytes.iter().copied().collect(),
            ..Self::default()
        }
    }
}

impl DataChannel for MemChannel {
    fn write(&mut self, buf: &[u8]) -> usize {
        let n = self.limit.map_or(buf.len(), |l| l.min(buf.len()));
        self.output.extend_from_slice(&buf[..n]);
        n
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = self.limit.map_or(buf.len(), |l| l.min(buf.len())).min(self.input.len());
        for b in buf[..n].iter_mut() {
            *b = self.input.pop_front().unwrap_or(0);
        }
        n
    }
}

/// CDC port double with packet-sized FIFOs in both directions.
pub struct MockPort {
    pub rx: VecDeque<u8>,
    pub tx: Vec<u8>,
    pub packet: usize,
    /// Bytes `tx` holds before the host has to take them. Unbounded if `None`.
    pub tx_capacity: Option<usize>,
    pub connected: bool,
    pub flushes: usize,
}

impl MockPort {
    pub fn new(packet: usize) -> Self {
        Self {
            rx: VecDeque::new(),
            tx: Vec::new(),
            packet,
            tx_capacity: None,
            connected: true,
            flushes: 0,
        }
    }

    pub fn host_send(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }

    pub fn host_take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.tx)
    }
}

impl DataChannel for MockPort {
    fn write(&mut self, buf: &[u8]) -> usize {
        let n = buf.len().min(self.write_available());
        self.tx.extend_from_slice(&buf[..n]);
        n
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.read_available());
        for b in buf[..n].iter_mut() {
            *b = self.rx.pop_front().unwrap_or(0);
        }
        n
    }
}

impl CdcPort for MockPort {
    fn read_available(&self) -> usize {
        self.rx.len().min(self.packet)
    }

    fn write_available(&self) -> usize {
        match self.tx_capacity {
            Some(cap) => cap.saturating_sub(self.tx.len()).min(self.packet),
            None => self.packet,
        }
    }

    fn flush(&mut self) {
        self.flushes += 1;
    }

    fn connected(&self) -> bool {
        self.connected
    }
}

/// Manually advanced millisecond clock.
#[derive(Default)]
pub struct ManualClock {
    pub now: Cell<u32>,
}

impl ManualClock {
    pub fn advance(&self, ms: u32) {
        self.now.set(self.now.get().wrapping_add(ms));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.get()
    }
}

/// Publish a `size` byte frame of 32x24 pixels.
pub fn publish(jpeg: &JpegBuffer, size: usize) {
    let pixels = [0u8; 64];
    let src = ImageRef {
        width: 32,
        height: 24,
        format: PixFormat::Rgb565,
        data: &pixels,
    };
    jpeg.update(&src, &mut RampEncoder(size));
}

/// Encode a debug command header.
pub fn header(opcode: u8, length: u32) -> [u8; 6] {
    let len = length.to_le_bytes();
    [0x30, opcode, len[0], len[1], len[2], len[3]]
}

pub fn words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
