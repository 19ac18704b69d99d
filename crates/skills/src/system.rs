//! System skill: host information and resource monitoring via `sysinfo`.
//!
//! Every probe blocks (CPU sampling sleeps for the minimum update interval),
//! so probes run on tokio's blocking pool.

use std::ffi::OsStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use skillbus_core::{
    Capability, EventPriority, ExecutionResult, Skill, SkillContext, SkillError, SkillMetadata,
    SkillPublisher, TaskContext, handler_fn,
};
use sysinfo::{Disks, System};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::parse_config;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub monitoring_enabled: bool,
    #[serde(alias = "monitor_interval")]
    pub monitor_interval_secs: u64,
    /// Percent of RAM in use above which an alert is raised
    pub memory_threshold: f64,
    /// Average CPU percent above which an alert is raised
    pub cpu_threshold: f64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            monitoring_enabled: true,
            monitor_interval_secs: 60,
            memory_threshold: 80.0,
            cpu_threshold: 90.0,
        }
    }
}

pub struct SystemSkill {
    config: SystemConfig,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl SystemSkill {
    pub fn new(config: SystemConfig) -> Self {
        Self {
            config,
            monitor: Mutex::new(None),
        }
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, SkillError> {
        Ok(Self::new(parse_config("system", config)?))
    }

    pub fn is_monitoring(&self) -> bool {
        lock(&self.monitor).as_ref().is_some_and(|h| !h.is_finished())
    }

    fn start_monitor(&self, publisher: SkillPublisher) {
        let config = self.config.clone();
        let period = Duration::from_secs(config.monitor_interval_secs.max(1));
        let handle = tokio::spawn(async move {
            info!(interval_secs = period.as_secs(), "System monitoring started");
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let sample = match tokio::task::spawn_blocking(sample_usage).await {
                    Ok(sample) => sample,
                    Err(e) => {
                        warn!(error = %e, "System sample failed");
                        continue;
                    }
                };
                debug!(memory = sample.memory_percent, cpu = sample.cpu_percent, "System sample");

                if sample.memory_percent > config.memory_threshold {
                    publisher.publish_with_priority(
                        "system.alert.memory",
                        json!({
                            "type": "memory",
                            "percent": sample.memory_percent,
                            "threshold": config.memory_threshold,
                        }),
                        EventPriority::High,
                    );
                }
                if sample.cpu_percent > config.cpu_threshold {
                    publisher.publish_with_priority(
                        "system.alert.cpu",
                        json!({
                            "type": "cpu",
                            "percent": sample.cpu_percent,
                            "threshold": config.cpu_threshold,
                        }),
                        EventPriority::High,
                    );
                }
            }
        });
        if let Some(previous) = lock(&self.monitor).replace(handle) {
            previous.abort();
        }
    }
}

#[async_trait]
impl Skill for SystemSkill {
    fn describe(&self) -> SkillMetadata {
        SkillMetadata::new("system", "1.0.0", "OS-level operations and system monitoring")
            .with_capabilities([Capability::System])
            .with_dependencies(&["sysinfo"])
    }

    async fn initialize(&self, ctx: &SkillContext<'_>) -> Result<(), SkillError> {
        for (event, operation, reply) in [
            ("system.check", "info", "system.check_result"),
            ("system.optimize", "optimize", "system.optimize_result"),
        ] {
            let executor = ctx.executor();
            let publisher = ctx.publisher();
            ctx.subscribe(
                event,
                handler_fn(event, move |_event| {
                    let executor = executor.clone();
                    let publisher = publisher.clone();
                    async move {
                        let context = TaskContext::new().with("operation", operation);
                        let result = executor.execute(operation, &context).await;
                        publisher.publish(reply, serde_json::to_value(&result).unwrap_or_default());
                        Ok(())
                    }
                }),
            );
        }

        if self.config.monitoring_enabled {
            self.start_monitor(ctx.publisher());
        }
        Ok(())
    }

    async fn execute(
        &self,
        _task: &str,
        context: &TaskContext,
    ) -> Result<ExecutionResult, SkillError> {
        let operation = context.get_str("operation").unwrap_or("info").to_string();
        let config = self.config.clone();

        let outcome = tokio::task::spawn_blocking(move || match operation.as_str() {
            "info" => Some(probe_info()),
            "memory" => Some(probe_memory()),
            "cpu" => Some(probe_cpu()),
            "disk" => Some(probe_disks()),
            "processes" => Some(probe_processes()),
            "optimize" => Some(probe_optimize(&config)),
            _ => None,
        })
        .await
        .map_err(|e| SkillError::ExecutionFailed(format!("system probe failed: {e}")))?;

        Ok(match outcome {
            Some(result) => ExecutionResult::ok(result),
            None => ExecutionResult::failure(format!(
                "Unknown operation: {}",
                context.get_str("operation").unwrap_or_default()
            )),
        })
    }

    async fn cleanup(&self, _ctx: &SkillContext<'_>) -> Result<(), SkillError> {
        if let Some(handle) = lock(&self.monitor).take() {
            handle.abort();
            info!("System monitoring stopped");
        }
        Ok(())
    }
}

struct Usage {
    memory_percent: f64,
    cpu_percent: f64,
    per_cpu: Vec<f32>,
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn lossy(s: impl AsRef<OsStr>) -> String {
    s.as_ref().to_string_lossy().into_owned()
}

/// Memory usage plus CPU usage averaged over one minimum update interval.
fn sample_usage() -> Usage {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu_usage();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu_usage();

    let per_cpu: Vec<f32> = sys.cpus().iter().map(|c| c.cpu_usage()).collect();
    let cpu_percent = if per_cpu.is_empty() {
        0.0
    } else {
        per_cpu.iter().map(|&u| f64::from(u)).sum::<f64>() / per_cpu.len() as f64
    };
    Usage {
        memory_percent: percent(sys.used_memory(), sys.total_memory()),
        cpu_percent,
        per_cpu,
    }
}

fn probe_info() -> serde_json::Value {
    let usage = sample_usage();
    let mut sys = System::new();
    sys.refresh_memory();

    json!({
        "platform": System::name(),
        "os_version": System::os_version(),
        "kernel_version": System::kernel_version(),
        "host_name": System::host_name(),
        "uptime_secs": System::uptime(),
        "cpu_count": usage.per_cpu.len(),
        "cpu_percent": usage.cpu_percent,
        "memory_total_gb": sys.total_memory() as f64 / GIB,
        "memory_available_gb": sys.available_memory() as f64 / GIB,
        "memory_percent": percent(sys.used_memory(), sys.total_memory()),
        "timestamp": Utc::now().to_rfc3339(),
    })
}

fn probe_memory() -> serde_json::Value {
    let mut sys = System::new();
    sys.refresh_memory();
    json!({
        "virtual": {
            "total": sys.total_memory(),
            "available": sys.available_memory(),
            "used": sys.used_memory(),
            "free": sys.free_memory(),
            "percent": percent(sys.used_memory(), sys.total_memory()),
        },
        "swap": {
            "total": sys.total_swap(),
            "used": sys.used_swap(),
            "free": sys.free_swap(),
            "percent": percent(sys.used_swap(), sys.total_swap()),
        },
        "timestamp": Utc::now().to_rfc3339(),
    })
}

fn probe_cpu() -> serde_json::Value {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu_usage();

    let cpus = sys.cpus();
    let per_cpu: Vec<f32> = cpus.iter().map(|c| c.cpu_usage()).collect();
    let total = if per_cpu.is_empty() {
        0.0
    } else {
        per_cpu.iter().map(|&u| f64::from(u)).sum::<f64>() / per_cpu.len() as f64
    };
    json!({
        "count": cpus.len(),
        "brand": cpus.first().map(|c| c.brand().to_string()),
        "percent_total": total,
        "percent_per_cpu": per_cpu,
        "frequency": { "current": cpus.first().map(|c| c.frequency()) },
        "timestamp": Utc::now().to_rfc3339(),
    })
}

fn probe_disks() -> serde_json::Value {
    let disks = Disks::new_with_refreshed_list();
    let partitions: Vec<serde_json::Value> = disks
        .list()
        .iter()
        .map(|d| {
            let used = d.total_space().saturating_sub(d.available_space());
            json!({
                "device": lossy(d.name()),
                "mountpoint": d.mount_point().display().to_string(),
                "fstype": lossy(d.file_system()),
                "total": d.total_space(),
                "used": used,
                "free": d.available_space(),
                "percent": percent(used, d.total_space()),
            })
        })
        .collect();
    json!({"partitions": partitions, "timestamp": Utc::now().to_rfc3339()})
}

/// Top ten processes by resident memory.
fn probe_processes() -> serde_json::Value {
    let sys = System::new_all();
    let total_memory = sys.total_memory();
    let mut processes: Vec<_> = sys.processes().values().collect();
    processes.sort_by_key(|p| std::cmp::Reverse(p.memory()));

    let top: Vec<serde_json::Value> = processes
        .iter()
        .take(10)
        .map(|p| {
            json!({
                "pid": p.pid().as_u32(),
                "name": lossy(p.name()),
                "cpu_percent": p.cpu_usage(),
                "memory_bytes": p.memory(),
                "memory_percent": percent(p.memory(), total_memory),
            })
        })
        .collect();
    json!({
        "process_count": sys.processes().len(),
        "top_processes": top,
        "timestamp": Utc::now().to_rfc3339(),
    })
}

fn probe_optimize(config: &SystemConfig) -> serde_json::Value {
    let usage = sample_usage();
    let mut optimizations = Vec::new();
    if usage.memory_percent > config.memory_threshold {
        optimizations.push(json!({
            "type": "memory",
            "status": "warning",
            "message": format!("Memory usage high: {:.1}%", usage.memory_percent),
        }));
    }
    if usage.cpu_percent > config.cpu_threshold {
        optimizations.push(json!({
            "type": "cpu",
            "status": "warning",
            "message": format!("CPU usage high: {:.1}%", usage.cpu_percent),
        }));
    }
    json!({
        "optimizations": optimizations,
        "memory_percent": usage.memory_percent,
        "cpu_percent": usage.cpu_percent,
        "timestamp": Utc::now().to_rfc3339(),
    })
}

fn lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}
