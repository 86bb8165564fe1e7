//! Host environment snapshot embedded once per RunRecord.
//!
//! Everything here is best-effort: a field that cannot be determined cheaply
//! is recorded as null rather than failing the run.

use std::net::UdpSocket;
use std::process::Command;

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
struct EnvironmentSnapshot {
    platform: PlatformInfo,
    engine: RuntimeInfo,
}

#[derive(Debug, Serialize)]
struct PlatformInfo {
    system: &'static str,
    family: &'static str,
    machine: &'static str,
    release: Option<String>,
    node: Option<String>,
    logical_cores: usize,
    memory_gb: Option<f64>,
    ip: Option<String>,
}

#[derive(Debug, Serialize)]
struct RuntimeInfo {
    name: &'static str,
    version: &'static str,
}

/// Collect the environment block. Called once per engine and embedded
/// opaquely into every RunRecord it creates.
pub fn snapshot() -> Value {
    let snap = EnvironmentSnapshot {
        platform: PlatformInfo {
            system: std::env::consts::OS,
            family: std::env::consts::FAMILY,
            machine: std::env::consts::ARCH,
            release: kernel_release(),
            node: detect_hostname(),
            logical_cores: logical_cores(),
            memory_gb: memory_gb(),
            ip: local_ip(),
        },
        engine: RuntimeInfo {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
        },
    };
    serde_json::to_value(snap).unwrap_or(Value::Null)
}

fn detect_hostname() -> Option<String> {
    command_line_output("hostname", &[]).or_else(|| std::env::var("HOSTNAME").ok())
}

fn kernel_release() -> Option<String> {
    command_line_output("uname", &["-r"])
}

fn logical_cores() -> usize {
    std::thread::available_parallelism().map_or(1, |v| v.get())
}

/// Total memory from `/proc/meminfo`, absent on non-Linux hosts.
fn memory_gb() -> Option<f64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let kb_field = meminfo
        .lines()
        .find(|line| line.starts_with("MemTotal:"))?
        .split_whitespace()
        .nth(1)?
        .parse::<f64>()
        .ok()?;
    Some(kb_field / (1024.0 * 1024.0))
}

/// Source address the routing table would pick for an external peer. The
/// socket is never written to, so this works without traffic.
fn local_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:53").ok()?;
    let addr = socket.local_addr().ok()?;
    if addr.ip().is_unspecified() {
        None
    } else {
        Some(addr.ip().to_string())
    }
}

fn command_line_output(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())?;
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() { None } else { Some(text) }
}
