//! Adaptive chunk sizing and cooperative-yield pacing.
//!
//! The "how big" and "how often" decisions for the upload pipeline live here as
//! pure functions over simple numeric inputs, so they can be tested without I/O.
//! Resource signals come from a [`ResourceProbe`] chosen once at startup.

use crate::config::{PacingConfig, ProbeMode};
use crate::{CONSERVATIVE_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use sysinfo::System;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// File-size thresholds and the chunk size used below each one.
const CHUNK_TIERS: &[(u64, usize)] = &[
    (16 * MIB, MIN_CHUNK_SIZE),
    (128 * MIB, 1024 * 1024),
    (GIB, 4 * 1024 * 1024),
    (8 * GIB, 16 * 1024 * 1024),
];

/// Chunk size for uploads streamed without a declared length.
const UNKNOWN_SIZE_CHUNK: usize = 1024 * 1024;

/// A single chunk may use at most this fraction (1/n) of available memory.
const MEMORY_DIVISOR: u64 = 64;

/// How long a [`RealProbe`] sample stays fresh.
const PROBE_TTL: Duration = Duration::from_secs(1);

/// Tiered chunk size for a file, capped by available memory.
///
/// Monotonically non-decreasing in `file_size` for a fixed memory signal.
pub fn tiered_chunk_size(file_size: Option<u64>, available_memory: Option<u64>) -> usize {
    let tier = match file_size {
        None => UNKNOWN_SIZE_CHUNK,
        Some(size) => CHUNK_TIERS
            .iter()
            .find(|(threshold, _)| size < *threshold)
            .map(|(_, chunk)| *chunk)
            .unwrap_or(MAX_CHUNK_SIZE),
    };

    let cap = match available_memory {
        Some(mem) => usize::try_from(mem / MEMORY_DIVISOR).unwrap_or(usize::MAX),
        None => CONSERVATIVE_CHUNK_SIZE,
    };

    tier.min(cap).max(MIN_CHUNK_SIZE)
}

/// Source of host resource signals.
pub trait ResourceProbe: Send + Sync {
    /// Bytes of memory available to new allocations, if measurable.
    fn available_memory(&self) -> Option<u64>;

    /// CPU pressure as run-queue length per core (1.0 = saturated), if measurable.
    fn cpu_pressure(&self) -> Option<f32>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

#[derive(Clone, Copy, Debug, Default)]
struct Sample {
    memory: Option<u64>,
    cpu: Option<f32>,
}

struct HostState {
    system: System,
    last: Option<(Instant, Sample)>,
}

/// Host signals read through [`sysinfo`].
///
/// CPU pressure is the one-minute load average per core where the platform
/// has one, and global CPU usage otherwise. Samples are cached for one second
/// so per-chunk calls stay cheap.
pub struct RealProbe {
    state: Mutex<HostState>,
    cores: f32,
}

impl RealProbe {
    pub fn new() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get() as f32)
            .unwrap_or(1.0);
        Self {
            state: Mutex::new(HostState {
                system: System::new(),
                last: None,
            }),
            cores,
        }
    }

    /// Whether `sysinfo` can read this platform.
    pub fn is_supported() -> bool {
        sysinfo::IS_SUPPORTED_SYSTEM
    }

    fn sample(&self) -> Sample {
        let Ok(mut state) = self.state.lock() else {
            return Sample::default();
        };
        if let Some((taken, sample)) = state.last
            && taken.elapsed() < PROBE_TTL
        {
            return sample;
        }

        state.system.refresh_memory();
        state.system.refresh_cpu_usage();
        let memory = Some(state.system.available_memory()).filter(|&bytes| bytes > 0);
        let load = System::load_average().one as f32;
        let cpu = if load > 0.0 {
            Some(load / self.cores)
        } else {
            Some(state.system.global_cpu_usage() / 100.0)
        };

        let sample = Sample { memory, cpu };
        state.last = Some((Instant::now(), sample));
        sample
    }
}

impl Default for RealProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for RealProbe {
    fn available_memory(&self) -> Option<u64> {
        self.sample().memory
    }

    fn cpu_pressure(&self) -> Option<f32> {
        self.sample().cpu
    }

    fn name(&self) -> &'static str {
        "sysinfo"
    }
}

/// Probe returning fixed signals, for unsupported platforms or for tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedFallbackProbe {
    memory: Option<u64>,
    cpu: Option<f32>,
}

impl FixedFallbackProbe {
    /// A probe that reports no signal at all.
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// A probe that reports the given signals forever.
    pub fn with_signals(memory: Option<u64>, cpu: Option<f32>) -> Self {
        Self { memory, cpu }
    }
}

impl ResourceProbe for FixedFallbackProbe {
    fn available_memory(&self) -> Option<u64> {
        self.memory
    }

    fn cpu_pressure(&self) -> Option<f32> {
        self.cpu
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Pick the probe implementation for this process.
pub fn select_probe(mode: ProbeMode) -> Box<dyn ResourceProbe> {
    match mode {
        ProbeMode::Auto if RealProbe::is_supported() => Box::new(RealProbe::new()),
        ProbeMode::Auto => {
            tracing::info!("Host resource signals unavailable, using fixed pacing inputs");
            Box::new(FixedFallbackProbe::unavailable())
        }
        ProbeMode::Fixed => Box::new(FixedFallbackProbe::unavailable()),
    }
}

/// Snapshot of coordinator load used for pacing decisions.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Load {
    /// Sessions currently holding a worker slot.
    pub active_uploads: usize,
    /// Configured worker slot count.
    pub max_uploads: usize,
    /// CPU pressure from the probe.
    pub cpu_pressure: Option<f32>,
    /// Available memory from the probe.
    pub available_memory: Option<u64>,
}

impl Load {
    /// Build a snapshot from slot counts and the probe's current signals.
    pub fn sample(active_uploads: usize, max_uploads: usize, probe: &dyn ResourceProbe) -> Self {
        Self {
            active_uploads,
            max_uploads,
            cpu_pressure: probe.cpu_pressure(),
            available_memory: probe.available_memory(),
        }
    }

    fn utilisation(&self) -> f32 {
        if self.max_uploads == 0 {
            return 1.0;
        }
        self.active_uploads as f32 / self.max_uploads as f32
    }
}

/// Central pacing policy for chunk size and yield behaviour.
#[derive(Clone, Debug)]
pub struct AdaptivePacer {
    fixed_chunk_size: Option<usize>,
    fixed_yield_interval: Option<Duration>,
    contended_pause: Duration,
    pressure_pause: Duration,
    cpu_pressure_threshold: f32,
    low_memory_bytes: u64,
}

impl AdaptivePacer {
    pub fn from_config(config: &PacingConfig) -> Self {
        Self {
            fixed_chunk_size: config.fixed_chunk_size,
            fixed_yield_interval: config.fixed_yield_interval_ms.map(Duration::from_millis),
            contended_pause: Duration::from_millis(config.contended_pause_ms),
            pressure_pause: Duration::from_millis(config.pressure_pause_ms),
            cpu_pressure_threshold: config.cpu_pressure_threshold,
            low_memory_bytes: config.low_memory_bytes,
        }
    }

    /// Chunk size for a file of `file_size` bytes.
    pub fn chunk_size(&self, file_size: Option<u64>, mem_available: Option<u64>) -> usize {
        self.fixed_chunk_size
            .unwrap_or_else(|| tiered_chunk_size(file_size, mem_available))
    }

    /// Pause taken at each yield point.
    ///
    /// Zero means "yield to the scheduler without sleeping".
    pub fn yield_interval(&self, load: &Load) -> Duration {
        if let Some(fixed) = self.fixed_yield_interval {
            return fixed;
        }
        if self.under_pressure(load) {
            self.pressure_pause
        } else if load.active_uploads <= 1 {
            Duration::ZERO
        } else {
            self.contended_pause
        }
    }

    /// Number of written chunks between yield points.
    pub fn yield_every(&self, load: &Load) -> u32 {
        if self.fixed_yield_interval.is_some() || self.under_pressure(load) {
            return 1;
        }
        if load.active_uploads <= 1 {
            16
        } else if load.utilisation() < 0.5 {
            8
        } else {
            4
        }
    }

    /// Whether the host is short on CPU or memory.
    pub fn under_pressure(&self, load: &Load) -> bool {
        let cpu = load
            .cpu_pressure
            .is_some_and(|p| p >= self.cpu_pressure_threshold);
        let memory = load
            .available_memory
            .is_some_and(|m| m < self.low_memory_bytes);
        cpu || memory
    }
}

impl Default for AdaptivePacer {
    fn default() -> Self {
        Self::from_config(&PacingConfig::default())
    }
}
