//! Host sizing and background maintenance for the embedded engine.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::vectordb::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdLevel {
    None,
    Sse2,
    Avx2,
    Avx512,
    Neon,
}

impl fmt::Display for SimdLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone)]
pub struct ServerProfile {
    pub logical_cores: usize,
    pub worker_threads: usize,
    /// fsync after every append; off trades crash safety for throughput.
    pub strict_durability: bool,
    pub simd_level: SimdLevel,
}

impl ServerProfile {
    pub fn detect() -> Self {
        let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::for_host(cores, Self::detect_simd())
    }

    /// Profile for a host with `cores` logical cores and the given vector unit.
    pub fn for_host(cores: usize, simd_level: SimdLevel) -> Self {
        if cores <= 1 || simd_level == SimdLevel::None {
            warn!(cores, simd = %simd_level, "constrained host, appends are not synced");
            return Self {
                logical_cores: cores,
                worker_threads: 2,
                strict_durability: false,
                simd_level,
            };
        }
        Self {
            logical_cores: cores,
            worker_threads: cores,
            strict_durability: true,
            simd_level,
        }
    }

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    fn detect_simd() -> SimdLevel {
        if is_x86_feature_detected!("avx512f") {
            SimdLevel::Avx512
        } else if is_x86_feature_detected!("avx2") {
            SimdLevel::Avx2
        } else if is_x86_feature_detected!("sse2") {
            SimdLevel::Sse2
        } else {
            SimdLevel::None
        }
    }

    #[cfg(target_arch = "aarch64")]
    fn detect_simd() -> SimdLevel {
        SimdLevel::Neon
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
    fn detect_simd() -> SimdLevel {
        SimdLevel::None
    }
}

/// Rewrites every entity segment without its dead records, every `interval`.
pub fn start_compaction_thread(engine: Arc<Engine>, interval: Duration) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new().name("vectordb-compaction".into()).spawn(move || {
        info!(interval_secs = interval.as_secs(), "compaction thread started");
        loop {
            thread::sleep(interval);
            match engine.compact_all() {
                Ok(0) => debug!("nothing to compact"),
                Ok(compacted) => info!(compacted, "segments compacted"),
                Err(e) => error!(error = %e, "compaction failed"),
            }
        }
    })
}
