//! Process memory sampling for the cache pressure valve.

/// A point-in-time reading of process memory, in megabytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemorySample {
    /// Memory currently in use (resident set).
    pub used_mb: u64,
    /// Memory reserved by the process (virtual size).
    pub total_mb: u64,
}

/// Source of process memory statistics.
///
/// The watchdog polls this on every tick; tests substitute a fixed reading.
pub trait MemoryGauge: Send + Sync {
    /// Take a sample, or `None` when the platform offers no statistics.
    fn sample(&self) -> Option<MemorySample>;
}

/// Reads `/proc/self/status` on Linux.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessMemoryGauge;

impl MemoryGauge for ProcessMemoryGauge {
    #[cfg(target_os = "linux")]
    fn sample(&self) -> Option<MemorySample> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_proc_status(&status)
    }

    #[cfg(not(target_os = "linux"))]
    fn sample(&self) -> Option<MemorySample> {
        None
    }
}

/// A gauge that always reports the same reading.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemoryGauge(pub MemorySample);

impl MemoryGauge for FixedMemoryGauge {
    fn sample(&self) -> Option<MemorySample> {
        Some(self.0)
    }
}

/// Extract `VmRSS` and `VmSize` (reported in kB) from a `/proc/<pid>/status` body.
fn parse_proc_status(status: &str) -> Option<MemorySample> {
    let mut rss_kb = None;
    let mut size_kb = None;

    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            rss_kb = parse_kb(rest);
        } else if let Some(rest) = line.strip_prefix("VmSize:") {
            size_kb = parse_kb(rest);
        }
    }

    let used_kb = rss_kb?;
    Some(MemorySample {
        used_mb: kb_to_mb(used_kb),
        total_mb: kb_to_mb(size_kb.unwrap_or(used_kb)),
    })
}

fn parse_kb(field: &str) -> Option<u64> {
    field.split_whitespace().next()?.parse().ok()
}

/// Round to the nearest megabyte.
fn kb_to_mb(kb: u64) -> u64 {
    (kb + 512) / 1024
}
