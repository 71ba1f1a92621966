//! Host readers over /proc, /dev/pts, hwmon sysfs and statvfs.
//!
//! Every reader takes the root it reads from so collectors can be pointed at
//! a fake tree in tests.

use ahash::AHashSet as HashSet;
use std::fs;
use std::path::Path;

use crate::collector::{CollectError, Reading};

/// Shell process names counted as logged-in users.
pub const SHELL_NAMES: &[&str] = &["bash", "zsh", "sh"];

/// hwmon device names that carry the CPU temperature, in preference order.
pub const CPU_HWMON_NAMES: &[&str] = &["coretemp", "cpu_thermal", "acpitz"];

/// System load averages for 1, 5, and 15 minute intervals.
#[derive(Debug, Clone, Copy)]
pub struct LoadAverage {
    pub one_min: f64,
    pub five_min: f64,
    pub fifteen_min: f64,
}

/// Reads load average from `<proc_root>/loadavg`.
///
/// Format: "0.00 0.01 0.05 1/234 5678"
pub fn read_load_average(proc_root: &Path) -> Result<LoadAverage, CollectError> {
    let path = proc_root.join("loadavg");
    let content =
        fs::read_to_string(&path).map_err(|e| CollectError::io(path.display().to_string(), e))?;
    parse_load_average(&content)
}

fn parse_load_average(content: &str) -> Result<LoadAverage, CollectError> {
    let parts: Vec<&str> = content.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(CollectError::parse(
            "loadavg",
            format!("expected at least 3 fields, got {}", parts.len()),
        ));
    }

    let field = |i: usize| {
        parts[i]
            .parse::<f64>()
            .map_err(|e| CollectError::parse("loadavg", e))
    };

    Ok(LoadAverage {
        one_min: field(0)?,
        five_min: field(1)?,
        fifteen_min: field(2)?,
    })
}

/// Total and available memory from /proc/meminfo.
#[derive(Debug, Clone, Copy)]
pub struct MemoryInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemoryInfo {
    /// Used memory as a percentage of total.
    pub fn usage_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let used = self.total_bytes.saturating_sub(self.available_bytes);
        used as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Reads MemTotal and MemAvailable from `<proc_root>/meminfo`.
pub fn read_memory_info(proc_root: &Path) -> Result<MemoryInfo, CollectError> {
    let path = proc_root.join("meminfo");
    let content =
        fs::read_to_string(&path).map_err(|e| CollectError::io(path.display().to_string(), e))?;
    parse_memory_info(&content)
}

fn parse_memory_info(content: &str) -> Result<MemoryInfo, CollectError> {
    let mut total_bytes: Option<u64> = None;
    let mut available_bytes: Option<u64> = None;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let slot = match parts.next() {
            Some("MemTotal:") => &mut total_bytes,
            Some("MemAvailable:") => &mut available_bytes,
            _ => continue,
        };
        if let Some(kb) = parts.next().and_then(|v| v.parse::<u64>().ok()) {
            *slot = Some(kb * 1024);
        }
        if total_bytes.is_some() && available_bytes.is_some() {
            break;
        }
    }

    match (total_bytes, available_bytes) {
        (Some(total_bytes), Some(available_bytes)) => Ok(MemoryInfo {
            total_bytes,
            available_bytes,
        }),
        _ => Err(CollectError::parse(
            "meminfo",
            "MemTotal or MemAvailable missing",
        )),
    }
}

/// Aggregate CPU times from the `cpu` line of /proc/stat.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuStat {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuStat {
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    /// Idle plus iowait.
    pub fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }
}

/// Reads the aggregate `cpu` line from `<proc_root>/stat`.
pub fn read_cpu_stat(proc_root: &Path) -> Result<CpuStat, CollectError> {
    let path = proc_root.join("stat");
    let content =
        fs::read_to_string(&path).map_err(|e| CollectError::io(path.display().to_string(), e))?;
    parse_cpu_stat(&content)
}

fn parse_cpu_stat(content: &str) -> Result<CpuStat, CollectError> {
    let line = content
        .lines()
        .find(|l| l.split_whitespace().next() == Some("cpu"))
        .ok_or_else(|| CollectError::parse("stat", "no aggregate cpu line"))?;

    let parts: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|p| p.parse::<u64>().unwrap_or(0))
        .collect();
    if parts.len() < 7 {
        return Err(CollectError::parse(
            "stat",
            format!("expected at least 7 cpu fields, got {}", parts.len()),
        ));
    }

    Ok(CpuStat {
        user: parts[0],
        nice: parts[1],
        system: parts[2],
        idle: parts[3],
        iowait: parts[4],
        irq: parts[5],
        softirq: parts[6],
        steal: parts.get(7).copied().unwrap_or(0),
    })
}

/// Previous CPU sample for computing busy percentage between ticks.
#[derive(Debug, Default)]
pub struct CpuUsageTracker {
    previous: Option<CpuStat>,
}

impl CpuUsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Busy percentage since the previous sample. The first sample has no
    /// baseline and reads as `Unavailable`.
    pub fn sample(&mut self, current: CpuStat) -> Reading {
        let previous = self.previous.replace(current);
        let Some(previous) = previous else {
            return Reading::Unavailable;
        };

        let delta_total = current.total().saturating_sub(previous.total());
        if delta_total == 0 {
            return Reading::Value(0.0);
        }
        let delta_idle = current.idle_total().saturating_sub(previous.idle_total());
        let busy = delta_total.saturating_sub(delta_idle);
        Reading::Value(busy as f64 / delta_total as f64 * 100.0)
    }
}

/// Used space on the filesystem holding `path`, as `used / (used + avail)`
/// in percent. Matches what `df` reports.
pub fn read_disk_usage(path: &Path) -> Result<f64, CollectError> {
    use std::ffi::CString;
    use std::mem;
    use std::os::unix::ffi::OsStrExt;

    let path_str = path.display().to_string();
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| CollectError::parse("disk path", e))?;

    // SAFETY: statvfs is plain-old-data and valid when zeroed; the path is a
    // NUL-terminated C string that outlives the call.
    let stat = unsafe {
        let mut stat: libc::statvfs = mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return Err(CollectError::io(path_str, std::io::Error::last_os_error()));
        }
        stat
    };

    let block_size = stat.f_frsize as u64;
    let used = (stat.f_blocks as u64).saturating_sub(stat.f_bfree as u64) * block_size;
    let avail = stat.f_bavail as u64 * block_size;
    if used + avail == 0 {
        return Ok(0.0);
    }
    Ok(used as f64 / (used + avail) as f64 * 100.0)
}

/// Number of open pseudo-terminals (numbered entries in `pts_dir`).
pub fn count_terminals(pts_dir: &Path) -> Result<u64, CollectError> {
    let entries =
        fs::read_dir(pts_dir).map_err(|e| CollectError::io(pts_dir.display().to_string(), e))?;

    Ok(entries
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().parse::<u32>().is_ok())
        .count() as u64)
}

/// Number of distinct UIDs owning at least one shell process.
pub fn count_shell_users(proc_root: &Path) -> Result<u64, CollectError> {
    let entries = fs::read_dir(proc_root)
        .map_err(|e| CollectError::io(proc_root.display().to_string(), e))?;

    let mut uids = HashSet::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_string_lossy().parse::<u32>().is_err() {
            continue;
        }

        // Processes can exit between listing and reading; skip them.
        let pid_dir = entry.path();
        let comm = match fs::read_to_string(pid_dir.join("comm")) {
            Ok(comm) => comm,
            Err(_) => continue,
        };
        if !SHELL_NAMES.contains(&comm.trim()) {
            continue;
        }
        if let Some(uid) = read_process_uid(&pid_dir) {
            uids.insert(uid);
        }
    }

    Ok(uids.len() as u64)
}

/// Real UID from the `Uid:` line of `<pid_dir>/status`.
fn read_process_uid(pid_dir: &Path) -> Option<u32> {
    let status = fs::read_to_string(pid_dir.join("status")).ok()?;
    status
        .lines()
        .find_map(|l| l.strip_prefix("Uid:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|uid| uid.parse::<u32>().ok())
}

/// CPU temperature in °C from the first preferred hwmon device.
///
/// Devices are matched by their `name` file against [`CPU_HWMON_NAMES`];
/// the lowest-numbered `temp*_input` of the best match is read. No matching
/// device or no readable input is `Unavailable`, not an error.
pub fn read_cpu_temperature(hwmon_root: &Path) -> Reading {
    let entries = match fs::read_dir(hwmon_root) {
        Ok(entries) => entries,
        Err(_) => return Reading::Unavailable,
    };

    let mut candidates: Vec<(usize, std::path::PathBuf)> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let name = match fs::read_to_string(path.join("name")) {
            Ok(name) => name.trim().to_string(),
            Err(_) => continue,
        };
        if let Some(rank) = CPU_HWMON_NAMES.iter().position(|n| *n == name) {
            candidates.push((rank, path));
        }
    }
    candidates.sort();

    for (_, device) in candidates {
        if let Some(celsius) = first_temp_input(&device) {
            return Reading::Value(celsius);
        }
    }
    Reading::Unavailable
}

/// Channel index of a `temp<N>_input` file name.
fn temp_input_index(name: &str) -> Option<u32> {
    name.strip_prefix("temp")?
        .strip_suffix("_input")?
        .parse()
        .ok()
}

fn first_temp_input(device: &Path) -> Option<f64> {
    let mut inputs: Vec<(u32, String)> = fs::read_dir(device)
        .ok()?
        .flatten()
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            temp_input_index(&name).map(|index| (index, name))
        })
        .collect();
    inputs.sort();

    inputs.iter().find_map(|(_, input)| {
        fs::read_to_string(device.join(input))
            .ok()
            .and_then(|c| parse_millidegrees(&c))
    })
}

/// Parses a sysfs millidegree reading into °C.
pub fn parse_millidegrees(content: &str) -> Option<f64> {
    content
        .trim()
        .parse::<i64>()
        .ok()
        .map(|m| m as f64 / 1000.0)
}
