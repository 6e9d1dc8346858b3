use config::FilePairMapping;
use merge::{AppendFailure, Appender, StreamAppender};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

pub fn append_to(path: &Path, data: &[u8]) {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    f.write_all(data).unwrap();
}

pub fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Builds a mapping from names relative to `dir`.
pub fn mapping(dir: &Path, pairs: &[(&str, &str)]) -> FilePairMapping {
    FilePairMapping::new(pairs.iter().map(|(c, a)| (dir.join(c), dir.join(a)))).unwrap()
}

/// Polls `cond` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Appends with a delay and records how many appends run at the same time.
/// With `fail` set, every append reports an error after the delay, so the
/// cache file is restored and stays due for the next tick.
#[derive(Clone)]
pub struct SlowAppender {
    pub delay: Duration,
    pub fail: bool,
    pub active: Arc<AtomicUsize>,
    pub max_active: Arc<AtomicUsize>,
    pub calls: Arc<AtomicUsize>,
}

impl SlowAppender {
    pub fn new(delay: Duration, fail: bool) -> Self {
        Self {
            delay,
            fail,
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Appender for SlowAppender {
    fn append(&self, source: &Path, dest: &Path) -> Result<u64, AppendFailure> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);

        let result = if self.fail {
            Err(AppendFailure {
                written: 0,
                error: io::Error::new(io::ErrorKind::Other, "slow failure"),
            })
        } else {
            StreamAppender::new(false).append(source, dest)
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
