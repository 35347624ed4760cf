//! PC simulator for the omv imaging/debug core.
//!
//! Wires a synthetic sensor, the frame buffer pool, the JPEG publish buffer
//! and the debug controller together, then drives them the way the IDE
//! would: over the debug protocol, through a loopback CDC port.

/// Errors raised by a simulation run
pub mod error;

/// JPEG encoding through the `image` crate
pub mod encoder;

/// Host-side protocol client
pub mod host;

/// Loopback CDC port
pub mod loopback;

/// Synthetic sensor
pub mod sensor;

/// Device hooks and profiler
pub mod target;

use std::path::{Path, PathBuf};
use std::time::Instant;

use omv_core::arena::Region;
use omv_core::framebuffer::{AcquireFlags, Framebuffer, FramebufferId, FramebufferRegistry, Queue, Release, ReleaseFlags};
use omv_core::jpeg::{JpegBuffer, Publish};
use omv_core::usbdbg::Command;
use omv_hal::{NoCache, PixFormat};

pub use error::SimError;

use encoder::ImageJpegEncoder;
use host::Session;
use sensor::TestPattern;
use target::{SimProfiler, SimTarget};

/// Script uploaded when none is given.
pub const DEFAULT_SCRIPT: &str = "import sensor\n\nsensor.reset()\nsensor.set_pixformat(sensor.RGB565)\nwhile True:\n    sensor.snapshot()\n";

/// Sensor chip id the simulated board reports.
pub const SIM_SENSOR_ID: u32 = 0x2642;

/// Profiler addresses for the two stages the simulator times.
const PROFILE_CAPTURE: u32 = 0x0800_1000;
const PROFILE_PUBLISH: u32 = 0x0800_2000;

/// Frame registries hold the main buffer and, on hardware, the JPEG stream.
const MAX_FRAMEBUFFERS: usize = 2;

/// Settings for one simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Bytes reserved for the main frame buffer region.
    pub region_size: usize,
    /// Allow the region to grow up to this many bytes.
    pub region_limit: Option<usize>,
    /// Number of frame slots.
    pub buffers: usize,
    /// Spread the region over the slots instead of sizing them to the frame.
    pub expand: bool,
    pub width: u32,
    pub height: u32,
    pub frames: usize,
    /// Loopback packet size in bytes.
    pub packet: usize,
    /// Directory receiving streamed frames as `.jpg` files.
    pub out: Option<PathBuf>,
    /// Script to upload; [`DEFAULT_SCRIPT`] when absent.
    pub script: Option<PathBuf>,
    /// Report a hardware counter unit to the host.
    pub pmu: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            region_size: 256 * 1024,
            region_limit: None,
            buffers: 3,
            expand: false,
            width: 160,
            height: 120,
            frames: 10,
            packet: 64,
            out: None,
            script: None,
            pmu: false,
        }
    }
}

/// What a run produced.
#[derive(Debug, Clone, Default)]
pub struct SimReport {
    pub version: (u32, u32, u32),
    pub arch: String,
    pub sensor_id: u32,
    pub buffer_size: usize,
    pub buffer_count: usize,
    pub frames_captured: usize,
    pub frames_dropped: usize,
    pub frames_streamed: usize,
    pub frames_written: Vec<PathBuf>,
    pub bytes_streamed: usize,
    pub final_quality: Option<u8>,
    pub profile_bytes: usize,
    pub text: String,
}

fn read_script(path: Option<&Path>) -> Result<Vec<u8>, SimError> {
    match path {
        Some(path) => Ok(std::fs::read(path)?),
        None => Ok(DEFAULT_SCRIPT.as_bytes().to_vec()),
    }
}

fn build_registry(config: &SimConfig) -> Result<FramebufferRegistry<MAX_FRAMEBUFFERS>, SimError> {
    let limit = config.region_limit.unwrap_or(config.region_size);
    if limit < config.region_size {
        return Err(SimError::Config(format!(
            "region limit {} is below the region size {}",
            limit, config.region_size
        )));
    }
    let region = Region::dynamic(config.region_size, limit)?;
    let mut fb = Framebuffer::new(region, NoCache)?;
    fb.set_frame(config.width, config.height, PixFormat::Rgb565);
    fb.resize(config.buffers, config.expand)?;
    log::info!(
        "frame buffer: {} x {} bytes ({})",
        fb.count(),
        fb.buffer_size(),
        if fb.is_expanded() { "expanded" } else { "fixed" }
    );

    let mut registry = FramebufferRegistry::new();
    registry.register(FramebufferId::MAIN, fb)?;
    Ok(registry)
}

/// Capture one sensor frame into the pool. Returns false if it was dropped.
fn capture(fb: &mut Framebuffer, sensor: &mut TestPattern) -> Result<bool, SimError> {
    let Some(slot) = fb.acquire(Queue::Free, AcquireFlags::empty()) else {
        log::debug!("no free frame slot");
        return Ok(false);
    };
    if let Some(mut vb) = fb.slot_mut(slot) {
        match sensor.capture(vb.data) {
            Some(n) => vb.set_offset(i32::try_from(n).unwrap_or(i32::MAX)),
            None => vb.mark_overflow(),
        }
    }
    match fb.release(Queue::Used, ReleaseFlags::CHECK_LAST)? {
        Release::Released(_) => Ok(true),
        Release::Skipped(id) => {
            log::trace!("slot {} held back as the last free buffer", id.index());
            Ok(false)
        }
    }
}

/// Move the newest captured frame into the publish buffer.
fn publish(fb: &mut Framebuffer, jpeg: &JpegBuffer, encoder: &mut ImageJpegEncoder) -> Result<Option<Publish>, SimError> {
    let Some(slot) = fb.acquire(Queue::Used, AcquireFlags::INVALIDATE) else {
        return Ok(None);
    };
    let outcome = fb.image(slot).map(|image| jpeg.update(&image, encoder));
    fb.release(Queue::Free, ReleaseFlags::empty())?;
    Ok(outcome)
}

fn write_frame(dir: &Path, index: usize, data: &[u8]) -> Result<PathBuf, SimError> {
    let path = dir.join(format!("frame_{:04}.jpg", index));
    std::fs::write(&path, data).map_err(|e| SimError::Output {
        path: path.clone(),
        message: e.to_string(),
    })?;
    Ok(path)
}

/// Run the full capture, publish and stream loop.
pub fn run(config: &SimConfig) -> Result<SimReport, SimError> {
    if config.width == 0 || config.height == 0 {
        return Err(SimError::Config(format!("empty frame {}x{}", config.width, config.height)));
    }
    let script = read_script(config.script.as_deref())?;
    if let Some(dir) = &config.out {
        std::fs::create_dir_all(dir)?;
    }

    let mut registry = build_registry(config)?;
    let mut sensor = TestPattern::new(config.width, config.height);
    let jpeg = JpegBuffer::new(sensor.frame_size());
    let mut encoder = ImageJpegEncoder::new();
    let mut session = Session::new(
        &jpeg,
        SimTarget::new(Some(SIM_SENSOR_ID)),
        SimProfiler::new(config.pmu),
        config.packet,
    );

    let mut report = SimReport {
        version: session.firmware_version()?,
        arch: session.arch()?,
        sensor_id: session.sensor_id()?,
        ..SimReport::default()
    };
    log::info!(
        "connected: firmware {}.{}.{} on {}",
        report.version.0,
        report.version.1,
        report.version.2,
        report.arch
    );

    session.exec(&script)?;
    let taken = session.dbg.take_script().unwrap_or_default();
    log::info!("script started ({} bytes)", taken.len());
    session.dbg.print(format!("running {} byte script\n", taken.len()).as_bytes());

    let fb = registry
        .get_mut(FramebufferId::MAIN)
        .ok_or_else(|| SimError::Config("main frame buffer missing".to_string()))?;
    report.buffer_size = fb.buffer_size();
    report.buffer_count = fb.count();

    for index in 0..config.frames {
        let started = Instant::now();
        if capture(fb, &mut sensor)? {
            report.frames_captured += 1;
        } else {
            report.frames_dropped += 1;
        }
        let captured = Instant::now();
        if let Some(Publish::Dropped { quality }) = publish(fb, &jpeg, &mut encoder)? {
            log::debug!("frame {} overflowed the publish buffer, quality now {}", index, quality);
        }
        if let Some(profiler) = session.dbg.profiler_mut() {
            profiler.record(PROFILE_CAPTURE, (captured - started).as_micros() as u64);
            profiler.record(PROFILE_PUBLISH, captured.elapsed().as_micros() as u64);
        }
        session.dbg.print(format!("frame {}\n", index).as_bytes());

        if let Some((w, h, data)) = session.frame()? {
            log::debug!("streamed frame {} ({}x{}, {} bytes)", index, w, h, data.len());
            report.frames_streamed += 1;
            if let Some(dir) = &config.out {
                report.frames_written.push(write_frame(dir, index, &data)?);
            }
        }
        let text = session.text()?;
        report.text.push_str(&String::from_utf8_lossy(&text));
    }

    report.profile_bytes = session.profile()?.len();
    let state = session.state()?;
    report.text.push_str(&String::from_utf8_lossy(&state.text));

    if session.script_running()? {
        session.signal(Command::ScriptStop)?;
        session.dbg.set_script_running(false);
    }
    report.final_quality = jpeg.quality();
    report.bytes_streamed = session.bytes_in;
    log::info!(
        "{} frames captured, {} streamed, {} bytes over the link",
        report.frames_captured,
        report.frames_streamed,
        report.bytes_streamed
    );
    Ok(report)
}
