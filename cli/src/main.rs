use std::collections::HashMap;
use std::env;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, ensure, Context, Result};
use clap::{Parser, Subcommand};
use hdm_core::logging::init_logging;
use hdm_core::resolver::verify_url;
use hdm_core::segment::plan_segments;
use hdm_core::{CoreResult, DownloadJob, EngineConfig, JobId, JobState, Registry};

const REFRESH: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "hdm", version, about = "Segmented, resumable HTTP downloader")]
struct Cli {
    /// Debug logging for the engine (RUST_LOG wins when set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download one or more http:// URLs.
    ///
    /// While running, type `p [n]`, `r [n]` or `c [n]` to pause, resume or
    /// cancel job n (all jobs without n) and `q` to cancel everything.
    Get {
        #[arg(required = true)]
        urls: Vec<String>,
        /// Output directory (default: $HDM_DOWNLOAD_DIR, then $HOME)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Connections per download
        #[arg(short, long)]
        connections: Option<u32>,
        /// Print the final summary as JSON
        #[arg(long)]
        json: bool,
        /// No progress lines
        #[arg(short, long)]
        quiet: bool,
    },
    /// Show how a file of SIZE bytes would be split.
    Plan {
        size: u64,
        #[arg(short, long)]
        connections: Option<u32>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<ExitCode> {
    let mut config = EngineConfig::from_env().context("reading HDM_* settings")?;
    match command {
        Command::Get {
            urls,
            output,
            connections,
            json,
            quiet,
        } => {
            if let Some(connections) = connections {
                ensure!(connections > 0, "--connections must be at least 1");
                config.connections = connections;
            }
            let output_dir = output.unwrap_or_else(default_download_dir);
            download(urls, output_dir, config, json, quiet)
        }
        Command::Plan { size, connections } => {
            let connections = connections.unwrap_or(config.connections);
            ensure!(connections > 0, "--connections must be at least 1");
            println!("index\tstart\tend\tbytes");
            for segment in plan_segments(size, connections, &config) {
                println!(
                    "{}\t{}\t{}\t{}",
                    segment.index,
                    segment.start,
                    segment.end,
                    segment.remaining()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn download(
    urls: Vec<String>,
    output_dir: PathBuf,
    config: EngineConfig,
    json: bool,
    quiet: bool,
) -> Result<ExitCode> {
    let mut verified = Vec::with_capacity(urls.len());
    for raw in &urls {
        match verify_url(raw) {
            Some(url) => verified.push(url),
            None => bail!("not a downloadable http:// URL: {}", raw),
        }
    }

    let registry = Arc::new(Registry::new(config).context("building http client")?);
    let (tx, rx) = mpsc::channel::<()>();
    let mut jobs = Vec::with_capacity(verified.len());
    for url in verified {
        let job = registry
            .create_download(url.clone(), &output_dir)
            .with_context(|| format!("starting {}", url))?;
        let wake = Mutex::new(tx.clone());
        job.subscribe(Arc::new(move || {
            if let Ok(wake) = wake.lock() {
                let _ = wake.send(());
            }
        }));
        tracing::debug!(job = %job.id(), url = %url, "job registered");
        jobs.push(job);
    }

    spawn_control(Arc::clone(&registry), jobs.clone(), tx);

    let mut speeds: HashMap<JobId, (u64, Instant)> = HashMap::new();
    let mut last_render: Option<Instant> = None;
    loop {
        let _ = rx.recv_timeout(REFRESH);
        while rx.try_recv().is_ok() {}
        let due = last_render.map_or(true, |at| at.elapsed() >= REFRESH);
        if !quiet && due {
            render(&jobs, &mut speeds);
            last_render = Some(Instant::now());
        }
        if jobs.iter().all(|job| job.state().is_terminal()) {
            break;
        }
    }
    for job in &jobs {
        job.await_completion();
    }

    let snapshots: Vec<_> = jobs.iter().map(|job| job.snapshot()).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
    } else {
        for snapshot in &snapshots {
            println!("{}\t{}", snapshot.state, snapshot.output_path.display());
        }
    }

    if snapshots.iter().any(|s| s.state == JobState::Error) {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Pause,
    Resume,
    Cancel,
    Quit,
}

/// `p`, `r`, `c` optionally followed by a 1-based job number; `q` alone.
fn parse_control(line: &str) -> Option<(Control, Option<usize>)> {
    let mut parts = line.split_whitespace();
    let control = match parts.next()?.to_ascii_lowercase().as_str() {
        "p" | "pause" => Control::Pause,
        "r" | "resume" => Control::Resume,
        "c" | "cancel" => Control::Cancel,
        "q" | "quit" => return Some((Control::Quit, None)),
        _ => return None,
    };
    let target = match parts.next() {
        Some(value) => Some(value.parse::<usize>().ok().filter(|n| *n > 0)?),
        None => None,
    };
    Some((control, target))
}

fn spawn_control(registry: Arc<Registry>, jobs: Vec<Arc<DownloadJob>>, wake: Sender<()>) {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let Some((control, target)) = parse_control(&line) else {
                if !line.trim().is_empty() {
                    eprintln!("commands: p [n] | r [n] | c [n] | q");
                }
                continue;
            };
            let selected: Vec<&Arc<DownloadJob>> = match target {
                Some(n) => jobs.get(n - 1).into_iter().collect(),
                None => jobs.iter().collect(),
            };
            if selected.is_empty() {
                eprintln!("no such job");
            }
            for job in selected {
                let result: CoreResult<()> = match control {
                    Control::Pause => job.pause(),
                    // cancelled jobs stay cancelled
                    Control::Resume => registry.resume(&job.id()),
                    Control::Cancel | Control::Quit => job.cancel(),
                };
                if let Err(err) = result {
                    if target.is_some() {
                        eprintln!("job {}: {}", &job.id().to_string()[..8], err);
                    }
                }
            }
            let _ = wake.send(());
            if control == Control::Quit {
                break;
            }
        }
    });
}

fn render(jobs: &[Arc<DownloadJob>], speeds: &mut HashMap<JobId, (u64, Instant)>) {
    let now = Instant::now();
    for (position, job) in jobs.iter().enumerate() {
        let snapshot = job.snapshot();
        let percent = snapshot
            .progress
            .map(|p| format!("{:.1}%", p))
            .unwrap_or_else(|| "--".to_string());
        let (last_bytes, last_time) = speeds
            .get(&snapshot.id)
            .cloned()
            .unwrap_or((snapshot.downloaded, now));
        let delta_bytes = snapshot.downloaded.saturating_sub(last_bytes);
        let delta_secs = now.duration_since(last_time).as_secs_f64();
        let speed_bps = if delta_secs > 0.0 {
            (delta_bytes as f64 / delta_secs) as u64
        } else {
            0
        };
        speeds.insert(snapshot.id, (snapshot.downloaded, now));

        let total = snapshot.total_size.unwrap_or(0);
        let eta = if snapshot.state == JobState::Downloading && total > 0 && speed_bps > 0 {
            format_duration(total.saturating_sub(snapshot.downloaded) / speed_bps)
        } else {
            "--:--".to_string()
        };
        println!(
            "#{} [{}] {} {}/{} ({}/s) eta {} {}",
            position + 1,
            snapshot.state,
            percent,
            format_bytes(snapshot.downloaded),
            snapshot
                .total_size
                .map(format_bytes)
                .unwrap_or_else(|| "?".to_string()),
            format_bytes(speed_bps),
            eta,
            job.file_name(),
        );
    }
}

fn default_download_dir() -> PathBuf {
    if let Ok(dir) = env::var("HDM_DOWNLOAD_DIR") {
        return PathBuf::from(dir);
    }
    env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.2}GB", b / GB)
    } else if b >= MB {
        format!("{:.2}MB", b / MB)
    } else if b >= KB {
        format!("{:.2}KB", b / KB)
    } else {
        format!("{}B", bytes)
    }
}

fn format_duration(mut seconds: u64) -> String {
    let hours = seconds / 3600;
    seconds %= 3600;
    let minutes = seconds / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_lines() {
        assert_eq!(parse_control("p"), Some((Control::Pause, None)));
        assert_eq!(parse_control("r 2"), Some((Control::Resume, Some(2))));
        assert_eq!(parse_control(" cancel 1 "), Some((Control::Cancel, Some(1))));
        assert_eq!(parse_control("q"), Some((Control::Quit, None)));
        assert_eq!(parse_control("p 0"), None);
        assert_eq!(parse_control("p x"), None);
        assert_eq!(parse_control("x"), None);
        assert_eq!(parse_control(""), None);
    }

    #[test]
    fn byte_and_duration_formatting() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.00KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00MB");
        assert_eq!(format_duration(59), "00:59");
        assert_eq!(format_duration(3_661), "01:01:01");
    }

    #[test]
    fn cli_parses_get_flags() {
        let cli = Cli::try_parse_from([
            "hdm",
            "get",
            "http://example.com/a.bin",
            "-o",
            "/tmp/out",
            "-c",
            "4",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Command::Get {
                urls,
                output,
                connections,
                json,
                quiet,
            } => {
                assert_eq!(urls, vec!["http://example.com/a.bin".to_string()]);
                assert_eq!(output, Some(PathBuf::from("/tmp/out")));
                assert_eq!(connections, Some(4));
                assert!(json);
                assert!(!quiet);
            }
            Command::Plan { .. } => panic!("expected get"),
        }
    }
}
