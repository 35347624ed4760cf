//! In-process stand-in for the USB CDC endpoint.
//!
//! The device half implements [`CdcPort`] with packet-sized FIFOs; the host
//! half pushes command bytes in and drains replies out. Both halves share one
//! pair of queues, so the simulator can interleave them on a single thread.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use omv_hal::{CdcPort, DataChannel};

#[derive(Debug, Default)]
struct Pipes {
    to_device: VecDeque<u8>,
    to_host: VecDeque<u8>,
    connected: bool,
    flushes: usize,
}

/// Build a connected device/host pair moving at most `packet` bytes per
/// transfer in each direction.
pub fn pair(packet: usize) -> (DevicePort, HostEnd) {
    let pipes = Rc::new(RefCell::new(Pipes {
        connected: true,
        ..Pipes::default()
    }));
    let packet = packet.max(1);
    (
        DevicePort {
            pipes: Rc::clone(&pipes),
            packet,
        },
        HostEnd { pipes },
    )
}

/// Device side of the loopback.
pub struct DevicePort {
    pipes: Rc<RefCell<Pipes>>,
    packet: usize,
}

impl DataChannel for DevicePort {
    fn write(&mut self, buf: &[u8]) -> usize {
        let n = buf.len().min(self.write_available());
        self.pipes.borrow_mut().to_host.extend(&buf[..n]);
        n
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.read_available());
        let mut pipes = self.pipes.borrow_mut();
        for (dst, src) in buf[..n].iter_mut().zip(pipes.to_device.drain(..n)) {
            *dst = src;
        }
        n
    }
}

impl CdcPort for DevicePort {
    fn read_available(&self) -> usize {
        self.pipes.borrow().to_device.len().min(self.packet)
    }

    fn write_available(&self) -> usize {
        self.packet.saturating_sub(self.pipes.borrow().to_host.len())
    }

    fn flush(&mut self) {
        self.pipes.borrow_mut().flushes += 1;
    }

    fn connected(&self) -> bool {
        self.pipes.borrow().connected
    }
}

/// Host side of the loopback.
pub struct HostEnd {
    pipes: Rc<RefCell<Pipes>>,
}

impl HostEnd {
    pub fn send(&self, bytes: &[u8]) {
        self.pipes.borrow_mut().to_device.extend(bytes);
    }

    /// Take everything the device has written so far.
    pub fn drain_into(&self, out: &mut Vec<u8>) -> usize {
        let mut pipes = self.pipes.borrow_mut();
        let n = pipes.to_host.len();
        out.extend(pipes.to_host.drain(..));
        n
    }

    /// Bytes sent but not yet read by the device.
    pub fn unread(&self) -> usize {
        self.pipes.borrow().to_device.len()
    }

    /// Drop everything queued in either direction.
    pub fn discard(&self) {
        let mut pipes = self.pipes.borrow_mut();
        pipes.to_device.clear();
        pipes.to_host.clear();
    }

    pub fn set_connected(&self, connected: bool) {
        self.pipes.borrow_mut().connected = connected;
    }

    /// Times the device pushed out a partial packet.
    pub fn flushes(&self) -> usize {
        self.pipes.borrow().flushes
    }
}
