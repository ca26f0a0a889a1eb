//! Host resource figures for the admin dashboard.

use std::time::Duration;

use anyhow::{Context, Result};
use log::warn;
use serde::Serialize;
use tokio::fs;
use tokio::process::Command;

const DF_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub memory: MemoryInfo,
    pub cpu: CpuInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskInfo>,
    /// Human readable, e.g. `up 2 days, 3 hours, 4 minutes`.
    pub uptime: String,
    pub uptime_secs: u64,
}

/// Bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryInfo {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub available: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CpuInfo {
    pub cores: usize,
    /// 1, 5 and 15 minute load averages.
    pub load: [f64; 3],
}

/// Bytes on the filesystem holding `/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiskInfo {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

pub async fn read_server_info() -> Result<ServerInfo> {
    let meminfo = fs::read_to_string("/proc/meminfo")
        .await
        .context("reading /proc/meminfo")?;
    let cpuinfo = fs::read_to_string("/proc/cpuinfo")
        .await
        .context("reading /proc/cpuinfo")?;
    let loadavg = fs::read_to_string("/proc/loadavg")
        .await
        .context("reading /proc/loadavg")?;
    let uptime = fs::read_to_string("/proc/uptime")
        .await
        .context("reading /proc/uptime")?;

    let uptime_secs = parse_uptime(&uptime)?;
    let disk = match read_root_disk().await {
        Ok(disk) => Some(disk),
        Err(e) => {
            warn!("Disk usage unavailable: {:#}", e);
            None
        }
    };

    Ok(ServerInfo {
        memory: parse_meminfo(&meminfo)?,
        cpu: CpuInfo {
            cores: count_processors(&cpuinfo),
            load: parse_loadavg(&loadavg)?,
        },
        disk,
        uptime: format_uptime(uptime_secs),
        uptime_secs,
    })
}

async fn read_root_disk() -> Result<DiskInfo> {
    let output = tokio::time::timeout(
        DF_TIMEOUT,
        Command::new("df").args(["-B1", "/"]).kill_on_drop(true).output(),
    )
    .await
    .context("df timed out")?
    .context("running df")?;

    if !output.status.success() {
        anyhow::bail!("df exited with {}", output.status);
    }
    parse_df(&String::from_utf8_lossy(&output.stdout))
}

fn parse_meminfo(contents: &str) -> Result<MemoryInfo> {
    let field = |key: &str| {
        contents
            .lines()
            .find_map(|line| line.strip_prefix(key)?.strip_prefix(':'))
            .and_then(|rest| rest.split_whitespace().next()?.parse::<u64>().ok())
            .map(|kb| kb * 1024)
    };

    let total = field("MemTotal").context("missing MemTotal")?;
    let free = field("MemFree").context("missing MemFree")?;
    let available = field("MemAvailable").unwrap_or(free);

    Ok(MemoryInfo {
        total,
        used: total.saturating_sub(available),
        free,
        available,
    })
}

fn count_processors(contents: &str) -> usize {
    let count = contents
        .lines()
        .filter(|line| {
            line.split(':')
                .next()
                .is_some_and(|key| key.trim() == "processor")
        })
        .count();
    count.max(1)
}

fn parse_loadavg(contents: &str) -> Result<[f64; 3]> {
    let mut parts = contents.split_whitespace().map(str::parse::<f64>);
    let mut load = [0.0; 3];
    for slot in &mut load {
        *slot = parts
            .next()
            .context("loadavg missing fields")?
            .context("parsing loadavg")?;
    }
    Ok(load)
}

fn parse_uptime(contents: &str) -> Result<u64> {
    let secs: f64 = contents
        .split_whitespace()
        .next()
        .context("empty /proc/uptime")?
        .parse()
        .context("parsing uptime")?;
    Ok(secs.max(0.0) as u64)
}

fn parse_df(output: &str) -> Result<DiskInfo> {
    let line = output.lines().nth(1).context("df printed no filesystem")?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 4 {
        anyhow::bail!("unexpected df output: {}", line);
    }
    let number = |i: usize| fields[i].parse::<u64>().context("parsing df output");
    Ok(DiskInfo {
        total: number(1)?,
        used: number(2)?,
        free: number(3)?,
    })
}

fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = secs % 86_400 / 3_600;
    let minutes = secs % 3_600 / 60;

    let unit = |n: u64, name: &str| {
        if n == 1 {
            format!("1 {}", name)
        } else {
            format!("{} {}s", n, name)
        }
    };

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(unit(days, "day"));
    }
    if hours > 0 {
        parts.push(unit(hours, "hour"));
    }
    if minutes > 0 || parts.is_empty() {
        parts.push(unit(minutes, "minute"));
    }
    format!("up {}", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_meminfo() {
        let contents = "MemTotal:       16384000 kB\nMemFree:         1024000 kB\nMemAvailable:    8192000 kB\nBuffers:          100 kB\n";
        let mem = parse_meminfo(contents).unwrap();
        assert_eq!(mem.total, 16_384_000 * 1024);
        assert_eq!(mem.free, 1_024_000 * 1024);
        assert_eq!(mem.available, 8_192_000 * 1024);
        assert_eq!(mem.used, 8_192_000 * 1024);
    }

    #[test]
    fn meminfo_without_available_falls_back_to_free() {
        let mem = parse_meminfo("MemTotal: 100 kB\nMemFree: 40 kB\n").unwrap();
        assert_eq!(mem.available, 40 * 1024);
        assert!(parse_meminfo("MemFree: 40 kB\n").is_err());
    }

    #[test]
    fn counts_processors() {
        let contents = "processor\t: 0\nmodel name\t: x\n\nprocessor\t: 1\nmodel name\t: x\n";
        assert_eq!(count_processors(contents), 2);
        assert_eq!(count_processors(""), 1);
    }

    #[test]
    fn parses_loadavg_and_uptime() {
        assert_eq!(
            parse_loadavg("0.52 0.58 0.59 1/467 12345\n").unwrap(),
            [0.52, 0.58, 0.59]
        );
        assert!(parse_loadavg("0.5").is_err());
        assert_eq!(parse_uptime("183726.55 720000.10\n").unwrap(), 183_726);
    }

    #[test]
    fn parses_df_output() {
        let output = "Filesystem        1B-blocks         Used    Available Use% Mounted on\n/dev/sda1     100000000000  40000000000  60000000000  40% /\n";
        assert_eq!(
            parse_df(output).unwrap(),
            DiskInfo {
                total: 100_000_000_000,
                used: 40_000_000_000,
                free: 60_000_000_000,
            }
        );
        assert!(parse_df("Filesystem\n").is_err());
    }

    #[test]
    fn formats_uptime() {
        assert_eq!(format_uptime(30), "up 0 minutes");
        assert_eq!(format_uptime(61), "up 1 minute");
        assert_eq!(
            format_uptime(2 * 86_400 + 3 * 3_600 + 4 * 60),
            "up 2 days, 3 hours, 4 minutes"
        );
        assert_eq!(format_uptime(86_400 + 3_600), "up 1 day, 1 hour");
    }
}
