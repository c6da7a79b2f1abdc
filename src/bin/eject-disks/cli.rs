//! Thin CLI wrapper over the core engine (spec §6.1). Every subcommand
//! prints one JSON value (sorted keys, via `serde_json`'s default
//! `BTreeMap`-backed object) and the process always exits 0 on a
//! successful parse — failures are reported inside the JSON payload.

use std::path::Path;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::process::Command;

use eject_disks::diagnose::{self, ProcessInfo};
use eject_disks::{EjectOptions, Session, SingleEjectResult, Volume};

#[derive(Parser)]
#[command(name = "eject-disks", version, about = "Enumerate and eject external volumes on macOS")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List every currently ejectable volume.
    List {
        #[arg(long)]
        compact: bool,
    },
    /// Print the number of ejectable volumes.
    Count,
    /// Eject every ejectable external volume.
    Eject {
        #[arg(long)]
        compact: bool,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        verbose: bool,
        #[arg(long = "use-diskutil")]
        use_diskutil: bool,
    },
    /// Report which processes hold each volume open.
    Diagnose {
        #[arg(long)]
        compact: bool,
    },
    /// Time enumeration and, optionally, both eject strategies.
    Benchmark {
        #[arg(long)]
        eject: bool,
        #[arg(long = "use-diskutil")]
        use_diskutil: bool,
        #[arg(long, default_value_t = 1)]
        iterations: u32,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VolumeInfoOut {
    name: String,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    bsd_name: Option<String>,
    is_ejectable: bool,
    is_removable: bool,
}

impl From<&Volume> for VolumeInfoOut {
    fn from(v: &Volume) -> Self {
        VolumeInfoOut {
            name: v.info.name.clone(),
            path: v.info.path.to_string_lossy().into_owned(),
            bsd_name: v.info.bsd_name.clone(),
            is_ejectable: v.info.is_ejectable,
            is_removable: v.info.is_removable,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListOut {
    count: usize,
    volumes: Vec<VolumeInfoOut>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessOut {
    pid: i32,
    command: String,
    user: String,
}

impl From<ProcessInfo> for ProcessOut {
    fn from(p: ProcessInfo) -> Self {
        ProcessOut {
            pid: p.pid,
            command: p.command,
            user: p.user,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EjectResultOut {
    volume: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    blocking_processes: Option<Vec<ProcessOut>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EjectOut {
    total_count: usize,
    success_count: usize,
    failed_count: usize,
    results: Vec<EjectResultOut>,
    total_duration: f64,
    method: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DiagnoseEntryOut {
    volume: String,
    path: String,
    blocking_processes: Vec<ProcessOut>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BenchmarkOut {
    enumeration_time: f64,
    volume_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    native_eject_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    diskutil_eject_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speedup: Option<f64>,
}

/// Print `value` as JSON with sorted keys (spec §6.1). `#[derive
/// (Serialize)]` emits struct fields in declaration order, so the value
/// is round-tripped through `serde_json::Value` first — its `Map` is
/// `BTreeMap`-backed (this crate does not enable serde_json's
/// `preserve_order` feature), which sorts keys at every nesting level
/// regardless of how the originating struct declared its fields.
fn print_json<T: Serialize>(value: &T, compact: bool) {
    let sorted = match serde_json::to_value(value) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("failed to serialize output: {e}");
            return;
        }
    };
    let rendered = if compact {
        serde_json::to_string(&sorted)
    } else {
        serde_json::to_string_pretty(&sorted)
    };
    match rendered {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("failed to serialize output: {e}"),
    }
}

fn seconds(d: Duration) -> f64 {
    d.as_secs_f64()
}

async fn results_with_blocking_processes(
    results: Vec<SingleEjectResult>,
    verbose: bool,
) -> Vec<EjectResultOut> {
    let mut out = Vec::with_capacity(results.len());
    for r in results {
        let blocking_processes = if verbose && !r.success {
            diagnose::blocking_processes(Path::new(&r.volume_path)).ok()
        } else {
            None
        };
        out.push(EjectResultOut {
            volume: r.volume_name,
            success: r.success,
            error: r.error_message,
            duration: seconds(r.duration),
            blocking_processes: blocking_processes.map(|ps| ps.into_iter().map(ProcessOut::from).collect()),
        });
    }
    out
}

/// Alternate eject path that shells out to `diskutil eject <path>` once per
/// volume, rather than driving DiskArbitration directly. Exists purely for
/// `benchmark`/`--use-diskutil` comparisons against the native pipeline
/// (spec §6.1); it is not part of the core engine.
async fn diskutil_eject_all(volumes: &[Volume]) -> (Vec<SingleEjectResult>, Duration) {
    let start = Instant::now();
    let mut results = Vec::with_capacity(volumes.len());

    for volume in volumes {
        let volume_start = Instant::now();
        let output = Command::new("diskutil")
            .arg("eject")
            .arg(&volume.info.path)
            .output()
            .await;

        let (success, error) = match output {
            Ok(output) if output.status.success() => (true, None),
            Ok(output) => (
                false,
                Some(String::from_utf8_lossy(&output.stderr).trim().to_string()),
            ),
            Err(e) => (false, Some(e.to_string())),
        };

        results.push(SingleEjectResult {
            volume_name: volume.info.name.clone(),
            volume_path: volume.info.path.to_string_lossy().into_owned(),
            success,
            error_message: error,
            duration: volume_start.elapsed(),
        });
    }

    (results, start.elapsed())
}

async fn run_list(session: &Session, compact: bool) {
    let volumes = session.enumerate_ejectable().await.unwrap_or_default();
    let out = ListOut {
        count: volumes.len(),
        volumes: volumes.iter().map(VolumeInfoOut::from).collect(),
    };
    print_json(&out, compact);
}

async fn run_count(session: &Session) {
    println!("{}", session.count_ejectable().await);
}

async fn run_eject(session: &Session, compact: bool, force: bool, verbose: bool, use_diskutil: bool) {
    let options = if force {
        EjectOptions::force_eject()
    } else {
        EjectOptions::default_preset()
    };

    let (results, total_duration, method) = if use_diskutil {
        let volumes = session.enumerate_ejectable().await.unwrap_or_default();
        let (results, duration) = diskutil_eject_all(&volumes).await;
        (results, duration, "diskutil")
    } else {
        let batch = session.eject_all_external(options).await;
        (batch.results, batch.total_duration, "native")
    };

    let success_count = results.iter().filter(|r| r.success).count();
    let total_count = results.len();
    let failed_count = total_count - success_count;
    let results = results_with_blocking_processes(results, verbose).await;

    let out = EjectOut {
        total_count,
        success_count,
        failed_count,
        results,
        total_duration: seconds(total_duration),
        method,
    };
    print_json(&out, compact);
}

async fn run_diagnose(session: &Session, compact: bool) {
    let volumes = session.enumerate_ejectable().await.unwrap_or_default();

    let tasks: Vec<_> = volumes
        .into_iter()
        .map(|v| {
            tokio::spawn(async move {
                let blocking = diagnose::blocking_processes(&v.info.path).unwrap_or_default();
                DiagnoseEntryOut {
                    volume: v.info.name,
                    path: v.info.path.to_string_lossy().into_owned(),
                    blocking_processes: blocking.into_iter().map(ProcessOut::from).collect(),
                }
            })
        })
        .collect();

    let mut entries = Vec::with_capacity(tasks.len());
    for task in tasks {
        if let Ok(entry) = task.await {
            entries.push(entry);
        }
    }

    print_json(&entries, compact);
}

async fn run_benchmark(session: &Session, do_eject: bool, use_diskutil: bool, iterations: u32) {
    let iterations = iterations.max(1);

    let mut enumeration_total = Duration::ZERO;
    let mut last_volumes = Vec::new();
    for _ in 0..iterations {
        let start = Instant::now();
        last_volumes = session.enumerate_ejectable().await.unwrap_or_default();
        enumeration_total += start.elapsed();
    }
    let enumeration_time = seconds(enumeration_total) / iterations as f64;
    let volume_count = last_volumes.len();

    let mut native_eject_time = None;
    let mut diskutil_eject_time = None;

    if do_eject {
        if !use_diskutil {
            let batch = session.eject_all(last_volumes.clone(), EjectOptions::default_preset()).await;
            native_eject_time = Some(seconds(batch.total_duration));
        } else {
            let (_, duration) = diskutil_eject_all(&last_volumes).await;
            diskutil_eject_time = Some(seconds(duration));
        }
    }

    let speedup = match (native_eject_time, diskutil_eject_time) {
        (Some(native), Some(diskutil)) if native > 0.0 => Some(diskutil / native),
        _ => None,
    };

    let out = BenchmarkOut {
        enumeration_time,
        volume_count,
        native_eject_time,
        diskutil_eject_time,
        speedup,
    };
    print_json(&out, false);
}

pub async fn run(cli: Cli, session: &Session) {
    match cli.command {
        Commands::List { compact } => run_list(session, compact).await,
        Commands::Count => run_count(session).await,
        Commands::Eject {
            compact,
            force,
            verbose,
            use_diskutil,
        } => run_eject(session, compact, force, verbose, use_diskutil).await,
        Commands::Diagnose { compact } => run_diagnose(session, compact).await,
        Commands::Benchmark {
            eject,
            use_diskutil,
            iterations,
        } => run_benchmark(session, eject, use_diskutil, iterations).await,
    }
}
