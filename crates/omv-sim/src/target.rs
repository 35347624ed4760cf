//! Device hooks and profiler for the simulated board.

use omv_hal::{DebugTarget, Profiler};

/// Architecture string reported by the simulator.
pub const SIM_ARCH: &str = "OMV-SIM x86_64 host";

/// Records the side effects the debug controller asks for.
#[derive(Debug, Default)]
pub struct SimTarget {
    sensor_id: Option<u32>,
    pub interrupts: usize,
    pub resets: usize,
    pub bootloader_requests: usize,
}

impl SimTarget {
    pub fn new(sensor_id: Option<u32>) -> Self {
        Self {
            sensor_id,
            ..Self::default()
        }
    }
}

impl DebugTarget for SimTarget {
    fn arch_str(&self) -> &str {
        SIM_ARCH
    }

    fn sensor_id(&self) -> Option<u32> {
        self.sensor_id
    }

    fn interrupt_script(&mut self) {
        log::debug!("script interrupt raised");
        self.interrupts += 1;
    }

    fn system_reset(&mut self) {
        log::info!("simulated system reset");
        self.resets += 1;
    }

    fn reset_to_bootloader(&mut self) {
        log::info!("simulated bootloader reset");
        self.bootloader_requests += 1;
    }
}

/// Size of one serialized profile record: address, calls, ticks (u64).
pub const PROFILE_RECORD_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProfileRecord {
    address: u32,
    calls: u32,
    ticks: u64,
}

impl ProfileRecord {
    fn to_bytes(self) -> [u8; PROFILE_RECORD_SIZE] {
        let mut out = [0u8; PROFILE_RECORD_SIZE];
        out[0..4].copy_from_slice(&self.address.to_le_bytes());
        out[4..8].copy_from_slice(&self.calls.to_le_bytes());
        out[8..16].copy_from_slice(&self.ticks.to_le_bytes());
        out
    }
}

/// Per-address call counter standing in for the interpreter's profiler.
#[derive(Debug, Default)]
pub struct SimProfiler {
    pmu: bool,
    exclusive: bool,
    events: Vec<(u32, u32)>,
    records: Vec<ProfileRecord>,
}

impl SimProfiler {
    pub fn new(pmu: bool) -> Self {
        Self {
            pmu,
            ..Self::default()
        }
    }

    /// Count one call at `address` lasting `ticks`.
    pub fn record(&mut self, address: u32, ticks: u64) {
        match self.records.iter_mut().find(|r| r.address == address) {
            Some(r) => {
                r.calls = r.calls.saturating_add(1);
                r.ticks = r.ticks.saturating_add(ticks);
            }
            None => self.records.push(ProfileRecord {
                address,
                calls: 1,
                ticks,
            }),
        }
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn events(&self) -> &[(u32, u32)] {
        &self.events
    }
}

impl Profiler for SimProfiler {
    fn has_pmu(&self) -> bool {
        self.pmu
    }

    fn size(&self) -> usize {
        self.records.len() * PROFILE_RECORD_SIZE
    }

    fn read_at(&mut self, offset: usize, out: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < out.len() {
            let pos = offset + copied;
            let Some(record) = self.records.get(pos / PROFILE_RECORD_SIZE) else {
                break;
            };
            let bytes = record.to_bytes();
            let within = pos % PROFILE_RECORD_SIZE;
            let n = (PROFILE_RECORD_SIZE - within).min(out.len() - copied);
            out[copied..copied + n].copy_from_slice(&bytes[within..within + n]);
            copied += n;
        }
        copied
    }

    fn set_mode(&mut self, exclusive: bool) {
        self.exclusive = exclusive;
    }

    fn set_event(&mut self, counter: u32, event: u32) {
        match self.events.iter_mut().find(|(c, _)| *c == counter) {
            Some(slot) => slot.1 = event,
            None => self.events.push((counter, event)),
        }
    }

    fn reset(&mut self) {
        self.records.clear();
    }
}
