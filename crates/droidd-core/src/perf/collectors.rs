//! Per-metric collectors
//!
//! Each collector is a reader over OS-exposed counters. CPU and network
//! are delta-based: the first read yields zero by definition. Parsing is
//! split into pure functions over the raw text so the sources can be
//! exercised without a device.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use crate::shell::ShellExecutor;

use super::types::{BatteryMetric, CpuMetric, FpsMetric, MemoryMetric, NetworkMetric};

/// Frame interval above which a frame counts as jank, ms
pub const JANK_THRESHOLD_MS: f64 = 33.34;
/// Frame interval above which a frame counts as big jank, ms
pub const BIG_JANK_THRESHOLD_MS: f64 = 66.68;

// ===== CPU =====

#[derive(Debug, Clone, Default)]
struct CpuTimes {
    total: u64,
    idle: u64,
}

#[derive(Debug, Clone, Default)]
struct CpuSnapshot {
    aggregate: CpuTimes,
    cores: Vec<CpuTimes>,
    process_ticks: u64,
}

/// System / process / per-core CPU percentages from `/proc/stat` deltas
pub struct CpuCollector {
    shell: Arc<ShellExecutor>,
    prev: Mutex<Option<CpuSnapshot>>,
}

impl CpuCollector {
    pub fn new(shell: Arc<ShellExecutor>) -> Self {
        CpuCollector {
            shell,
            prev: Mutex::new(None),
        }
    }

    pub async fn collect(&self, package: Option<&str>) -> Option<CpuMetric> {
        let stat = tokio::fs::read_to_string("/proc/stat").await.ok()?;
        let (aggregate, cores) = parse_proc_stat(&stat)?;

        let process_ticks = match package {
            Some(pkg) => match self.pid_of(pkg).await {
                Some(pid) => {
                    let path = format!("/proc/{}/stat", pid);
                    tokio::fs::read_to_string(&path)
                        .await
                        .ok()
                        .and_then(|text| parse_proc_pid_stat(&text))
                        .unwrap_or(0)
                }
                None => 0,
            },
            None => 0,
        };

        let current = CpuSnapshot {
            aggregate,
            cores,
            process_ticks,
        };

        let mut prev_guard = self.prev.lock().await;
        let metric = match prev_guard.as_ref() {
            Some(prev) => cpu_delta(prev, &current),
            // First read yields zero by definition
            None => CpuMetric::default(),
        };
        *prev_guard = Some(current);
        Some(metric)
    }

    async fn pid_of(&self, package: &str) -> Option<u32> {
        let result = self
            .shell
            .run(&format!("pidof {}", package), false)
            .await
            .ok()?;
        result.stdout.split_whitespace().next()?.parse().ok()
    }
}

fn cpu_delta(prev: &CpuSnapshot, current: &CpuSnapshot) -> CpuMetric {
    let usage = |p: &CpuTimes, c: &CpuTimes| -> f64 {
        let d_total = c.total.saturating_sub(p.total);
        if d_total == 0 {
            return 0.0;
        }
        let d_idle = c.idle.saturating_sub(p.idle);
        100.0 * (1.0 - d_idle as f64 / d_total as f64)
    };

    let d_total = current.aggregate.total.saturating_sub(prev.aggregate.total);
    let app = if d_total == 0 {
        0.0
    } else {
        100.0 * current.process_ticks.saturating_sub(prev.process_ticks) as f64 / d_total as f64
    };

    let cores = prev
        .cores
        .iter()
        .zip(current.cores.iter())
        .map(|(p, c)| usage(p, c))
        .collect();

    CpuMetric {
        app,
        system: usage(&prev.aggregate, &current.aggregate),
        cores,
    }
}

/// Parse `/proc/stat`: aggregate `cpu` line plus `cpuN` core lines.
/// Idle counts idle + iowait.
fn parse_proc_stat(text: &str) -> Option<(CpuTimes, Vec<CpuTimes>)> {
    let mut aggregate = None;
    let mut cores = Vec::new();

    for line in text.lines() {
        let mut fields = line.split_whitespace();
        let Some(label) = fields.next() else {
            continue;
        };
        if !label.starts_with("cpu") {
            continue;
        }
        let values: Vec<u64> = fields.filter_map(|f| f.parse().ok()).collect();
        if values.len() < 4 {
            continue;
        }
        let total: u64 = values.iter().sum();
        let idle = values[3] + values.get(4).copied().unwrap_or(0);
        let times = CpuTimes { total, idle };
        if label == "cpu" {
            aggregate = Some(times);
        } else {
            cores.push(times);
        }
    }

    aggregate.map(|agg| (agg, cores))
}

/// utime + stime (fields 14 and 15) from `/proc/<pid>/stat`.
/// The comm field may contain spaces; scan from the closing paren.
fn parse_proc_pid_stat(text: &str) -> Option<u64> {
    let after_comm = &text[text.rfind(')')? + 1..];
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // after_comm starts at field 3 (state), so utime/stime land at 11/12
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

// ===== Memory =====

/// System totals from `/proc/meminfo`; target PSS split from
/// `dumpsys meminfo <package>` by keyword match
pub struct MemoryCollector {
    shell: Arc<ShellExecutor>,
}

impl MemoryCollector {
    pub fn new(shell: Arc<ShellExecutor>) -> Self {
        MemoryCollector { shell }
    }

    pub async fn collect(&self, package: Option<&str>) -> Option<MemoryMetric> {
        let mut metric = MemoryMetric::default();

        if let Ok(meminfo) = tokio::fs::read_to_string("/proc/meminfo").await {
            let (total, available) = parse_meminfo(&meminfo);
            metric.total_ram = total;
            metric.available_ram = available;
        }

        if let Some(pkg) = package {
            if let Ok(result) = self
                .shell
                .run(&format!("dumpsys meminfo {}", pkg), false)
                .await
            {
                if result.ok() {
                    apply_dumpsys_meminfo(&result.stdout, &mut metric);
                }
            }
        }

        Some(metric)
    }
}

/// MemTotal / MemAvailable in kB
fn parse_meminfo(text: &str) -> (u64, u64) {
    let mut total = 0;
    let mut available = 0;
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total = first_number(rest);
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available = first_number(rest);
        }
    }
    (total, available)
}

/// Extract PSS rows and heap figures from a `dumpsys meminfo` report.
/// Values are already in kB.
fn apply_dumpsys_meminfo(text: &str, metric: &mut MemoryMetric) {
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("Native Heap") {
            if metric.native_pss == 0 {
                metric.native_pss = first_number(rest);
            }
        } else if let Some(rest) = trimmed.strip_prefix("Dalvik Heap") {
            if metric.dalvik_pss == 0 {
                metric.dalvik_pss = first_number(rest);
                // Row tail carries: Heap Size / Heap Alloc / Heap Free
                let numbers: Vec<u64> = numbers_of(rest);
                if numbers.len() >= 7 {
                    metric.heap_max = numbers[numbers.len() - 3];
                    metric.heap_used = numbers[numbers.len() - 2];
                }
            }
        } else if let Some(rest) = trimmed.strip_prefix("TOTAL PSS:") {
            metric.total_pss = first_number(rest);
        } else if let Some(rest) = trimmed.strip_prefix("TOTAL") {
            if metric.total_pss == 0 && !rest.trim_start().starts_with("SWAP") {
                metric.total_pss = first_number(rest);
            }
        }
    }
    metric.other_pss = metric
        .total_pss
        .saturating_sub(metric.native_pss + metric.dalvik_pss);
}

fn first_number(text: &str) -> u64 {
    text.split_whitespace()
        .find_map(|f| f.parse().ok())
        .unwrap_or(0)
}

fn numbers_of(text: &str) -> Vec<u64> {
    text.split_whitespace()
        .filter_map(|f| f.parse().ok())
        .collect()
}

// ===== Frame timing =====

/// Frame timing from the SurfaceFlinger latency report, with the
/// cumulative gfxinfo summary as fallback
pub struct FpsCollector {
    shell: Arc<ShellExecutor>,
    prev_janky: Mutex<Option<(u64, u64)>>,
}

impl FpsCollector {
    pub fn new(shell: Arc<ShellExecutor>) -> Self {
        FpsCollector {
            shell,
            prev_janky: Mutex::new(None),
        }
    }

    pub async fn collect(&self, package: Option<&str>) -> Option<FpsMetric> {
        let pkg = package?;

        if let Ok(result) = self
            .shell
            .run(&format!("dumpsys SurfaceFlinger --latency {}", pkg), false)
            .await
        {
            if result.ok() {
                if let Some(metric) = parse_latency_report(&result.stdout) {
                    return Some(metric);
                }
            }
        }

        // Fallback: cumulative totals only, no live fps
        let result = self
            .shell
            .run(&format!("dumpsys gfxinfo {}", pkg), false)
            .await
            .ok()?;
        let (total, janky) = parse_gfxinfo(&result.stdout)?;

        let mut prev = self.prev_janky.lock().await;
        let jank = match prev.as_ref() {
            Some((_, prev_janky)) => janky.saturating_sub(*prev_janky) as u32,
            None => 0,
        };
        *prev = Some((total, janky));
        debug!(total, janky, "gfxinfo fallback");
        Some(FpsMetric {
            jank,
            ..Default::default()
        })
    }
}

/// Parse a SurfaceFlinger latency report: first line is the refresh
/// period (ns), then rows of three timestamps; the middle column is the
/// actual presentation time. Pending frames carry a sentinel i64::MAX.
fn parse_latency_report(text: &str) -> Option<FpsMetric> {
    let mut lines = text.lines();
    let _refresh_period: u64 = lines.next()?.trim().parse().ok()?;

    let mut present_times: Vec<u64> = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 {
            continue;
        }
        let Ok(present) = fields[1].parse::<i64>() else {
            continue;
        };
        if present <= 0 || present == i64::MAX {
            continue;
        }
        present_times.push(present as u64);
    }

    if present_times.len() < 2 {
        return None;
    }

    let intervals: Vec<f64> = present_times
        .windows(2)
        .map(|w| (w[1].saturating_sub(w[0])) as f64 / 1_000_000.0)
        .collect();

    let elapsed_ms: f64 = intervals.iter().sum();
    if elapsed_ms <= 0.0 {
        return None;
    }
    let fps = intervals.len() as f64 / (elapsed_ms / 1000.0);
    let jank = intervals.iter().filter(|&&i| i > JANK_THRESHOLD_MS).count() as u32;
    let big_jank = intervals
        .iter()
        .filter(|&&i| i > BIG_JANK_THRESHOLD_MS)
        .count() as u32;

    Some(FpsMetric {
        current: fps,
        average: fps,
        jank,
        big_jank,
        frame_intervals: intervals,
    })
}

/// Total / janky frame counts from a gfxinfo summary
fn parse_gfxinfo(text: &str) -> Option<(u64, u64)> {
    let mut total = None;
    let mut janky = None;
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("Total frames rendered:") {
            total = rest.trim().parse().ok();
        } else if let Some(rest) = trimmed.strip_prefix("Janky frames:") {
            janky = rest.split_whitespace().next().and_then(|v| v.parse().ok());
        }
    }
    Some((total?, janky?))
}

// ===== Network =====

/// Cumulative bytes across non-loopback interfaces from `/proc/net/dev`;
/// speeds from divided differences against the prior read
pub struct NetworkCollector {
    prev: Mutex<Option<(u64, u64, i64)>>,
}

impl NetworkCollector {
    pub fn new() -> Self {
        NetworkCollector {
            prev: Mutex::new(None),
        }
    }

    pub async fn collect(&self) -> Option<NetworkMetric> {
        let text = tokio::fs::read_to_string("/proc/net/dev").await.ok()?;
        let (rx, tx) = parse_proc_net_dev(&text);
        let now = droidd_proto::now_ms();

        let mut prev = self.prev.lock().await;
        let (rx_speed, tx_speed) = match prev.as_ref() {
            Some((prev_rx, prev_tx, prev_ts)) => {
                let dt = (now - prev_ts) as f64 / 1000.0;
                if dt > 0.0 {
                    (
                        rx.saturating_sub(*prev_rx) as f64 / dt,
                        tx.saturating_sub(*prev_tx) as f64 / dt,
                    )
                } else {
                    (0.0, 0.0)
                }
            }
            None => (0.0, 0.0),
        };
        *prev = Some((rx, tx, now));

        Some(NetworkMetric {
            rx_bytes: rx,
            tx_bytes: tx,
            rx_speed,
            tx_speed,
        })
    }
}

impl Default for NetworkCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Sum rx/tx bytes over all interfaces except loopback
fn parse_proc_net_dev(text: &str) -> (u64, u64) {
    let mut rx = 0u64;
    let mut tx = 0u64;
    for line in text.lines() {
        let Some((iface, counters)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }
        let fields: Vec<u64> = counters
            .split_whitespace()
            .filter_map(|f| f.parse().ok())
            .collect();
        // rx bytes is field 0, tx bytes field 8
        if fields.len() >= 9 {
            rx += fields[0];
            tx += fields[8];
        }
    }
    (rx, tx)
}

// ===== Battery =====

/// Battery figures from the power-supply sysfs tree, falling back to the
/// `dumpsys battery` text report
pub struct BatteryCollector {
    shell: Arc<ShellExecutor>,
}

impl BatteryCollector {
    pub fn new(shell: Arc<ShellExecutor>) -> Self {
        BatteryCollector { shell }
    }

    pub async fn collect(&self) -> Option<BatteryMetric> {
        if let Some(metric) = self.collect_sysfs().await {
            return Some(metric);
        }
        let result = self
            .shell
            .run_with_timeout("dumpsys battery", false, Duration::from_secs(5))
            .await
            .ok()?;
        parse_dumpsys_battery(&result.stdout)
    }

    async fn collect_sysfs(&self) -> Option<BatteryMetric> {
        let base = "/sys/class/power_supply/battery";
        let read = |name: &str| {
            let path = format!("{}/{}", base, name);
            async move { tokio::fs::read_to_string(path).await.ok() }
        };

        let level: i32 = read("capacity").await?.trim().parse().ok()?;
        // temp is tenths of °C, voltage_now µV, current_now µA
        let temperature = read("temp")
            .await
            .and_then(|t| t.trim().parse::<f64>().ok())
            .map(|t| t / 10.0)
            .unwrap_or(0.0);
        let voltage = read("voltage_now")
            .await
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(|v| (v / 1000) as i32)
            .unwrap_or(0);
        let current = read("current_now")
            .await
            .and_then(|c| c.trim().parse::<i64>().ok())
            .unwrap_or(0);
        let charging = read("status")
            .await
            .map(|s| s.trim() == "Charging" || s.trim() == "Full")
            .unwrap_or(false);

        Some(BatteryMetric {
            level,
            temperature,
            voltage,
            charging,
            current,
        })
    }
}

/// Parse the `dumpsys battery` key: value report. Temperature arrives in
/// tenths of °C, voltage in mV.
fn parse_dumpsys_battery(text: &str) -> Option<BatteryMetric> {
    let mut metric = BatteryMetric::default();
    let mut seen_level = false;
    let mut plugged = false;
    let mut status = 0;

    for line in text.lines() {
        let trimmed = line.trim();
        let Some((key, value)) = trimmed.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key {
            "level" => {
                metric.level = value.parse().unwrap_or(0);
                seen_level = true;
            }
            "temperature" => {
                metric.temperature = value.parse::<f64>().unwrap_or(0.0) / 10.0;
            }
            "voltage" => metric.voltage = value.parse().unwrap_or(0),
            "status" => status = value.parse().unwrap_or(0),
            "AC powered" | "USB powered" | "Wireless powered" => {
                plugged = plugged || value == "true";
            }
            _ => {}
        }
    }

    if !seen_level {
        return None;
    }
    // BatteryManager: 2 = charging, 5 = full
    metric.charging = plugged || status == 2 || status == 5;
    Some(metric)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROC_STAT: &str = "\
cpu  100 0 100 700 100 0 0 0 0 0
cpu0 50 0 50 350 50 0 0 0 0 0
cpu1 50 0 50 350 50 0 0 0 0 0
intr 12345
ctxt 6789";

    const PROC_STAT_LATER: &str = "\
cpu  200 0 200 750 150 0 0 0 0 0
cpu0 100 0 100 375 75 0 0 0 0 0
cpu1 100 0 100 375 75 0 0 0 0 0
intr 12345
ctxt 6789";

    #[test]
    fn test_parse_proc_stat() {
        let (aggregate, cores) = parse_proc_stat(PROC_STAT).unwrap();
        assert_eq!(aggregate.total, 1000);
        assert_eq!(aggregate.idle, 800);
        assert_eq!(cores.len(), 2);
        assert_eq!(cores[0].total, 500);
        assert_eq!(cores[0].idle, 400);
    }

    #[test]
    fn test_cpu_delta() {
        let (agg1, cores1) = parse_proc_stat(PROC_STAT).unwrap();
        let (agg2, cores2) = parse_proc_stat(PROC_STAT_LATER).unwrap();
        let prev = CpuSnapshot {
            aggregate: agg1,
            cores: cores1,
            process_ticks: 10,
        };
        let current = CpuSnapshot {
            aggregate: agg2,
            cores: cores2,
            process_ticks: 60,
        };
        let metric = cpu_delta(&prev, &current);
        // d_total = 300, d_idle = 100 → 66.67% busy
        assert!((metric.system - 66.666).abs() < 0.01);
        // d_proc = 50 over 300 total ticks
        assert!((metric.app - 16.666).abs() < 0.01);
        assert_eq!(metric.cores.len(), 2);
    }

    #[test]
    fn test_parse_proc_pid_stat() {
        let text = "1234 (com.example app) S 1 1234 0 0 -1 4194560 1000 0 0 0 150 50 0 0 20 0 30 0 100 1000000 500 18446744073709551615";
        assert_eq!(parse_proc_pid_stat(text), Some(200));
    }

    #[test]
    fn test_parse_meminfo() {
        let text = "MemTotal:        8000000 kB\nMemFree:         1000000 kB\nMemAvailable:    3000000 kB\n";
        let (total, available) = parse_meminfo(text);
        assert_eq!(total, 8_000_000);
        assert_eq!(available, 3_000_000);
    }

    #[test]
    fn test_apply_dumpsys_meminfo() {
        let report = "\
Applications Memory Usage (in Kilobytes):

** MEMINFO in pid 1234 [com.example.app] **
                   Pss  Private  Private  SwapPss      Rss     Heap     Heap     Heap
                 Total    Dirty    Clean    Dirty    Total     Size    Alloc     Free
  Native Heap    24000    23900        0        0    25000    40000    30000    10000
  Dalvik Heap    12000    11900        0        0    13000    20000    15000     5000
        TOTAL    90000    80000     2000        0   100000    60000    45000    15000
";
        let mut metric = MemoryMetric::default();
        apply_dumpsys_meminfo(report, &mut metric);
        assert_eq!(metric.native_pss, 24000);
        assert_eq!(metric.dalvik_pss, 12000);
        assert_eq!(metric.total_pss, 90000);
        assert_eq!(metric.other_pss, 54000);
        assert_eq!(metric.heap_max, 20000);
        assert_eq!(metric.heap_used, 15000);
    }

    #[test]
    fn test_parse_latency_report() {
        // 60 Hz refresh; frames 16.6ms apart with one 50ms janky gap
        let report = "\
16666666
10000000000 10000000000 10000000000
10016666666 10016666666 10016666666
10033333332 10033333332 10033333332
10083333332 10083333332 10083333332
0 9223372036854775807 0
";
        let metric = parse_latency_report(report).unwrap();
        assert_eq!(metric.frame_intervals.len(), 3);
        assert_eq!(metric.jank, 1);
        assert_eq!(metric.big_jank, 0);
        assert!(metric.current > 30.0 && metric.current < 40.0);
    }

    #[test]
    fn test_parse_latency_too_few_frames() {
        assert!(parse_latency_report("16666666\n100 100 100\n").is_none());
    }

    #[test]
    fn test_parse_gfxinfo() {
        let report = "\
** Graphics info for pid 1234 [com.example.app] **

Total frames rendered: 1500
Janky frames: 45 (3.00%)
50th percentile: 8ms
";
        assert_eq!(parse_gfxinfo(report), Some((1500, 45)));
        assert_eq!(parse_gfxinfo("garbage"), None);
    }

    #[test]
    fn test_parse_proc_net_dev() {
        let text = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 5000000   10000    0    0    0     0          0         0  5000000   10000    0    0    0     0       0          0
 wlan0: 1000000    2000    0    0    0     0          0         0   500000    1000    0    0    0     0       0          0
rmnet0:  200000     400    0    0    0     0          0         0   100000     200    0    0    0     0       0          0
";
        let (rx, tx) = parse_proc_net_dev(text);
        assert_eq!(rx, 1_200_000);
        assert_eq!(tx, 600_000);
    }

    #[test]
    fn test_parse_dumpsys_battery() {
        let report = "\
Current Battery Service state:
  AC powered: false
  USB powered: true
  Wireless powered: false
  status: 2
  level: 85
  voltage: 4250
  temperature: 305
";
        let metric = parse_dumpsys_battery(report).unwrap();
        assert_eq!(metric.level, 85);
        assert!((metric.temperature - 30.5).abs() < f64::EPSILON);
        assert_eq!(metric.voltage, 4250);
        assert!(metric.charging);
        assert!(parse_dumpsys_battery("no battery here").is_none());
    }
}
