//! 多进程启动器：在连续端口上拉起 N 个独立的 cutout-backend 进程。
//!
//! 各进程之间没有任何协调，只共享同一个磁盘缓存目录；
//! 前面需要自行放一个负载均衡把流量分到这些端口。

use clap::Parser;
use cutout_backend::ShutdownManager;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::{Child, Command};

#[derive(Debug, Parser)]
#[command(
    name = "cutout-farm",
    version,
    about = "Launch several cutout-backend workers on consecutive ports",
    long_about = None
)]
struct FarmArgs {
    /// 工作进程数量
    #[arg(short, long, default_value_t = 4, env = "CUTOUT_FARM_WORKERS")]
    workers: u16,

    /// 第一个工作进程的端口，第 i 个进程使用 base_port + i
    #[arg(short = 'p', long, default_value_t = 8000, env = "CUTOUT_FARM_BASE_PORT")]
    base_port: u16,

    /// 工作进程可执行文件（缺省为与本程序同目录的 cutout-backend）
    #[arg(long, value_name = "PATH")]
    bin: Option<PathBuf>,

    /// 收到退出信号后等待工作进程自行退出的秒数，超时强制结束
    #[arg(long, default_value_t = 30)]
    grace_secs: u64,
}

#[derive(Debug, thiserror::Error)]
enum FarmError {
    #[error("workers 必须大于 0")]
    NoWorkers,

    #[error("端口越界: base_port={base} workers={workers}")]
    PortOverflow { base: u16, workers: u16 },

    #[error("无法定位工作进程可执行文件: {0}")]
    BinNotFound(String),

    #[error("启动工作进程失败 (port={port}): {source}")]
    Spawn {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

/// 计算每个工作进程的端口
fn worker_ports(base: u16, workers: u16) -> Result<Vec<u16>, FarmError> {
    if workers == 0 {
        return Err(FarmError::NoWorkers);
    }
    (0..workers)
        .map(|i| {
            base.checked_add(i)
                .ok_or(FarmError::PortOverflow { base, workers })
        })
        .collect()
}

fn resolve_worker_bin(explicit: Option<PathBuf>) -> Result<PathBuf, FarmError> {
    if let Some(p) = explicit {
        return Ok(p);
    }
    let exe = std::env::current_exe().map_err(|e| FarmError::BinNotFound(e.to_string()))?;
    let dir = exe
        .parent()
        .ok_or_else(|| FarmError::BinNotFound(exe.display().to_string()))?;
    let name = format!("cutout-backend{}", std::env::consts::EXE_SUFFIX);
    Ok(dir.join(name))
}

struct Worker {
    port: u16,
    child: Child,
}

fn spawn_worker(bin: &Path, port: u16) -> Result<Worker, FarmError> {
    let child = Command::new(bin)
        .env("PORT", port.to_string())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| FarmError::Spawn { port, source })?;
    tracing::info!("Started worker on port {} (pid={:?})", port, child.id());
    Ok(Worker { port, child })
}

/// 把退出信号转发给工作进程
#[cfg(unix)]
fn forward_terminate(worker: &mut Worker) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = worker.child.id() else {
        return;
    };
    let Ok(raw) = i32::try_from(pid) else {
        force_kill(worker);
        return;
    };
    if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        tracing::warn!("向 port={} 转发 SIGTERM 失败，直接结束进程: {}", worker.port, e);
        force_kill(worker);
    }
}

#[cfg(not(unix))]
fn forward_terminate(worker: &mut Worker) {
    force_kill(worker);
}

fn force_kill(worker: &mut Worker) {
    if let Err(e) = worker.child.start_kill() {
        tracing::warn!("结束 worker port={} 失败: {}", worker.port, e);
    }
}

async fn wait_all(workers: &mut [Worker]) {
    for w in workers.iter_mut() {
        match w.child.wait().await {
            Ok(status) => tracing::info!("worker port={} exited: {}", w.port, status),
            Err(e) => tracing::warn!("等待 worker port={} 失败: {}", w.port, e),
        }
    }
}

async fn run(args: FarmArgs) -> Result<(), FarmError> {
    let ports = worker_ports(args.base_port, args.workers)?;
    let bin = resolve_worker_bin(args.bin)?;
    tracing::info!("worker binary: {:?}", bin);

    let shutdown = ShutdownManager::new();
    if let Err(e) = shutdown.start_signal_handler().await {
        tracing::warn!("信号处理器启动失败，只能等待工作进程自行退出: {}", e);
    }

    let total = ports.len();
    let mut workers = Vec::with_capacity(total);
    for port in ports {
        // 中途失败时，已启动的进程随 kill_on_drop 一并结束
        workers.push(spawn_worker(&bin, port)?);
    }

    tokio::select! {
        _ = wait_all(&mut workers) => {
            tracing::info!("所有工作进程已退出");
            return Ok(());
        }
        reason = shutdown.wait_for_shutdown() => {
            tracing::info!("接收到退出信号: {:?}，通知 {} 个工作进程", reason, total);
        }
    }

    for w in workers.iter_mut() {
        forward_terminate(w);
    }
    let grace = Duration::from_secs(args.grace_secs);
    if tokio::time::timeout(grace, wait_all(&mut workers)).await.is_err() {
        tracing::warn!("工作进程未在 {}s 内退出，强制结束", args.grace_secs);
        for w in workers.iter_mut() {
            force_kill(w);
        }
        wait_all(&mut workers).await;
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cutout_farm=info".into()),
        )
        .init();

    let args = FarmArgs::parse();
    if let Err(e) = run(args).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}
