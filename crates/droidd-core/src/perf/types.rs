//! Performance sample and summary types
//!
//! Wire field names follow the controller's analyzer: samples carry any
//! subset of `cpu` / `memory` / `fps` / `network` / `battery`.

use serde::{Deserialize, Serialize};

/// Metric families a session may request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Cpu,
    Memory,
    Fps,
    Network,
    Battery,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
            MetricKind::Fps => "fps",
            MetricKind::Network => "network",
            MetricKind::Battery => "battery",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "cpu" => Some(MetricKind::Cpu),
            "memory" => Some(MetricKind::Memory),
            "fps" => Some(MetricKind::Fps),
            "network" => Some(MetricKind::Network),
            "battery" => Some(MetricKind::Battery),
            _ => None,
        }
    }
}

/// CPU usage percentages
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuMetric {
    /// Target-process CPU %
    pub app: f64,
    /// Whole-system CPU %
    pub system: f64,
    /// Per-core CPU %
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cores: Vec<f64>,
}

/// Memory usage. PSS and RAM figures in kB.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryMetric {
    pub total_pss: u64,
    pub native_pss: u64,
    pub dalvik_pss: u64,
    pub other_pss: u64,
    pub total_ram: u64,
    pub available_ram: u64,
    /// Runtime heap in use, kB
    pub heap_used: u64,
    /// Runtime heap limit, kB
    pub heap_max: u64,
}

/// Frame timing. Intervals in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FpsMetric {
    /// Instantaneous fps over the sampled window
    pub current: f64,
    /// Average fps over the sampled window
    pub average: f64,
    /// Frames whose interval exceeded 33.34 ms
    pub jank: u32,
    /// Frames whose interval exceeded 66.68 ms
    pub big_jank: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frame_intervals: Vec<f64>,
}

/// Network counters. Cumulative bytes plus smoothed bytes/second.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMetric {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_speed: f64,
    pub tx_speed: f64,
}

/// Battery state. Temperature in °C, voltage in mV, current in µA.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryMetric {
    pub level: i32,
    pub temperature: f64,
    pub voltage: i32,
    pub charging: bool,
    pub current: i64,
}

/// One collected sample; only requested metric families are present
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfSample {
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<FpsMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<BatteryMetric>,
}

/// Session summary computed at stop
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfSummary {
    pub avg_cpu: f64,
    pub max_cpu: f64,
    pub min_cpu: f64,
    pub avg_memory: f64,
    pub max_memory: f64,
    pub avg_fps: f64,
    pub min_fps: f64,
    pub jank_count: u32,
}

impl PerfSummary {
    /// Aggregate over a session's samples: avg/min/max CPU %, avg/max
    /// PSS, avg/min fps, total jank.
    pub fn from_samples<'a>(samples: impl Iterator<Item = &'a PerfSample>) -> Self {
        let mut summary = PerfSummary::default();
        let mut cpu_values = Vec::new();
        let mut mem_values = Vec::new();
        let mut fps_values = Vec::new();

        for sample in samples {
            if let Some(cpu) = &sample.cpu {
                cpu_values.push(cpu.app);
            }
            if let Some(memory) = &sample.memory {
                mem_values.push(memory.total_pss as f64);
            }
            if let Some(fps) = &sample.fps {
                fps_values.push(fps.current);
                summary.jank_count += fps.jank;
            }
        }

        if !cpu_values.is_empty() {
            summary.avg_cpu = cpu_values.iter().sum::<f64>() / cpu_values.len() as f64;
            summary.max_cpu = cpu_values.iter().cloned().fold(f64::MIN, f64::max);
            summary.min_cpu = cpu_values.iter().cloned().fold(f64::MAX, f64::min);
        }
        if !mem_values.is_empty() {
            summary.avg_memory = mem_values.iter().sum::<f64>() / mem_values.len() as f64;
            summary.max_memory = mem_values.iter().cloned().fold(f64::MIN, f64::max);
        }
        if !fps_values.is_empty() {
            summary.avg_fps = fps_values.iter().sum::<f64>() / fps_values.len() as f64;
            summary.min_fps = fps_values.iter().cloned().fold(f64::MAX, f64::min);
        }
        summary
    }
}
