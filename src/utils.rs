use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use encoding_rs::WINDOWS_1252;
use parking_lot::Mutex;
use tracing::info;

/// Parallelism ceiling applied when either tree lives on network storage.
pub const NETWORK_PARALLELISM_CAP: usize = 8;

pub fn parse_size(s: &str) -> u64 {
    let s = s.trim().to_lowercase();
    let units = [
        ("gib", 1024u64.pow(3)),
        ("mib", 1024u64.pow(2)),
        ("kib", 1024),
        ("gb", 1000u64.pow(3)),
        ("mb", 1000u64.pow(2)),
        ("kb", 1000),
        ("g", 1000u64.pow(3)),
        ("m", 1000u64.pow(2)),
        ("k", 1000),
        ("b", 1),
    ];

    for (unit, mult) in units {
        if let Some(number) = s.strip_suffix(unit) {
            if let Ok(val) = number.trim().parse::<f64>() {
                return (val * mult as f64) as u64;
            }
        }
    }
    s.parse().unwrap_or(0)
}

pub fn is_probably_binary(path: &Path) -> bool {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return true,
    };
    let mut buffer = [0u8; 4096];
    let n = match file.read(&mut buffer) {
        Ok(n) => n,
        Err(_) => return true,
    };
    if n == 0 {
        return false;
    }

    let slice = &buffer[..n];
    if slice.contains(&0) {
        return true;
    }
    match std::str::from_utf8(slice) {
        Ok(_) => false,
        // A multi-byte sequence cut by the buffer edge is still text.
        Err(e) => e.error_len().is_some() || n < buffer.len(),
    }
}

pub fn read_text_best_effort(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    let content = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(err) => {
            let (res, _, _) = WINDOWS_1252.decode(err.as_bytes());
            res.into_owned()
        }
    };
    Ok(content.replace("\r\n", "\n"))
}

/// Worker count for the run: configured value, or the CPU count when 0,
/// capped on network storage.
pub fn effective_parallelism(configured: usize, on_network: bool) -> usize {
    let base = if configured > 0 {
        configured
    } else {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    };
    if on_network {
        base.min(NETWORK_PARALLELISM_CAP)
    } else {
        base
    }
}

/// Best guess at whether `path` lives on a network share.
pub fn is_network_path(path: &Path) -> bool {
    let raw = path.to_string_lossy();
    if raw.starts_with(r"\\") || raw.starts_with("//") {
        return true;
    }
    match fs::read_to_string("/proc/mounts") {
        Ok(mounts) => mount_is_network(&mounts, path),
        Err(_) => false,
    }
}

fn mount_is_network(mounts: &str, path: &Path) -> bool {
    let mut best: Option<(usize, &str)> = None;
    for line in mounts.lines() {
        let mut fields = line.split_whitespace();
        let (Some(_device), Some(mount_point), Some(fs_type)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let longer = best.map_or(true, |(len, _)| mount_point.len() > len);
        if longer && path.starts_with(mount_point) {
            best = Some((mount_point.len(), fs_type));
        }
    }
    best.is_some_and(|(_, fs_type)| {
        matches!(fs_type, "nfs" | "nfs4" | "cifs" | "smbfs" | "smb3" | "fuse.sshfs")
    })
}

/// Counts completed items and logs at most once per interval.
pub struct ThrottledProgress {
    label: &'static str,
    total: usize,
    done: AtomicUsize,
    interval: Duration,
    last_log: Mutex<Instant>,
    started: Instant,
}

impl ThrottledProgress {
    pub fn new(label: &'static str, total: usize) -> Self {
        let now = Instant::now();
        Self {
            label,
            total,
            done: AtomicUsize::new(0),
            interval: Duration::from_secs(2),
            last_log: Mutex::new(now),
            started: now,
        }
    }

    pub fn tick(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(mut last) = self.last_log.try_lock() {
            if last.elapsed() >= self.interval {
                *last = Instant::now();
                info!("{}: {}/{}", self.label, done, self.total);
            }
        }
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }

    pub fn finish(&self) {
        info!(
            "{}: {}/{} in {:.1}s",
            self.label,
            self.done(),
            self.total,
            self.started.elapsed().as_secs_f64()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_units() {
        assert_eq!(parse_size("5MB"), 5_000_000);
        assert_eq!(parse_size("2kib"), 2048);
        assert_eq!(parse_size("1.5k"), 1500);
        assert_eq!(parse_size("102400"), 102_400);
        assert_eq!(parse_size("garbage"), 0);
    }

    #[test]
    fn parallelism_is_capped_on_network() {
        assert_eq!(effective_parallelism(32, true), NETWORK_PARALLELISM_CAP);
        assert_eq!(effective_parallelism(32, false), 32);
        assert_eq!(effective_parallelism(3, true), 3);
        assert!(effective_parallelism(0, false) >= 1);
    }

    #[test]
    fn unc_paths_are_network() {
        assert!(is_network_path(Path::new(r"\\server\share\dir")));
        assert!(is_network_path(Path::new("//server/share")));
    }

    #[test]
    fn longest_mount_prefix_decides() {
        let mounts = "\
/dev/sda1 / ext4 rw 0 0
server:/export /mnt/share nfs4 rw 0 0
/dev/sdb1 /mnt/share/local ext4 rw 0 0
";
        assert!(mount_is_network(mounts, Path::new("/mnt/share/project")));
        assert!(!mount_is_network(mounts, Path::new("/mnt/share/local/x")));
        assert!(!mount_is_network(mounts, Path::new("/home/user")));
    }

    #[test]
    fn text_and_binary_detection() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("a.txt");
        let bin = dir.path().join("a.bin");
        fs::write(&text, "hello\nworld\n").unwrap();
        fs::write(&bin, [0u8, 1, 2, 3]).unwrap();
        assert!(!is_probably_binary(&text));
        assert!(is_probably_binary(&bin));
    }

    #[test]
    fn latin1_fallback_and_crlf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin1.txt");
        fs::write(&path, b"caf\xe9\r\nok\r\n").unwrap();
        assert_eq!(read_text_best_effort(&path).unwrap(), "café\nok\n");
    }

    #[test]
    fn progress_counts_ticks() {
        let progress = ThrottledProgress::new("test", 3);
        progress.tick();
        progress.tick();
        assert_eq!(progress.done(), 2);
        progress.finish();
    }
}
