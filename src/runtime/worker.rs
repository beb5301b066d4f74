use {
    anyhow::{Context, Result},
    log::warn,
    nix::{
        sys::socket::{socketpair, AddressFamily, SockFlag, SockProtocol, SockType},
        unistd,
    },
    std::{
        os::unix::io::RawFd,
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::{Duration, Instant},
    },
};

/// Single-producer single-consumer ring of fixed-size records.
///
/// The producer side lives on a worker thread, the consumer on the
/// reactor. Indices are monotonically increasing and reduced modulo
/// the capacity on access, so head==tail is unambiguous.
pub struct Ring {
    buf: std::cell::UnsafeCell<Box<[u8]>>,
    record: usize,
    capacity: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
    dropped: AtomicUsize,
    last_overflow_report: std::sync::Mutex<Option<Instant>>,
}

const OVERFLOW_REPORT_INTERVAL: Duration = Duration::from_secs(5);

impl Ring {
    /// `record` bytes per slot (typically 188), `capacity` slots.
    pub fn new(record: usize, capacity: usize) -> Arc<Self> {
        assert!(record > 0 && capacity > 1);
        Arc::new(Ring {
            buf: std::cell::UnsafeCell::new(vec![0u8; record * capacity].into_boxed_slice()),
            record,
            capacity,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
            last_overflow_report: std::sync::Mutex::new(None),
        })
    }

    #[inline]
    pub fn record_size(&self) -> usize {
        self.record
    }

    /// Producer side. Never blocks; a full ring drops the record and
    /// reports at most once per interval.
    pub fn push(&self, record: &[u8]) -> bool {
        debug_assert_eq!(record.len(), self.record);
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Relaxed);
        if tail - head == self.capacity {
            let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            let mut last = self.last_overflow_report.lock().unwrap();
            let now = Instant::now();
            let due = last.map_or(true, |t| now - t >= OVERFLOW_REPORT_INTERVAL);
            if due {
                *last = Some(now);
                warn!("[worker ring] overflow, {} records dropped", n);
            }
            return false;
        }
        let slot = (tail % self.capacity) * self.record;
        // The consumer never touches a slot before tail is published
        // past it, so this write is unshared.
        unsafe {
            let dst = (*self.buf.get()).as_mut_ptr().add(slot);
            std::ptr::copy_nonoverlapping(record.as_ptr(), dst, self.record);
        }
        self.tail.store(tail + 1, Ordering::Release);
        true
    }

    /// Consumer side; returns false when the ring is empty.
    pub fn pop(&self, out: &mut [u8]) -> bool {
        debug_assert_eq!(out.len(), self.record);
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Relaxed);
        if head == tail {
            return false;
        }
        let slot = (head % self.capacity) * self.record;
        unsafe {
            let src = (*self.buf.get()).as_ptr().add(slot);
            std::ptr::copy_nonoverlapping(src, out.as_mut_ptr(), self.record);
        }
        self.head.store(head + 1, Ordering::Release);
        true
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

// Slot accesses are ordered by the acquire/release head/tail indices;
// a slot is never written and read concurrently.
unsafe impl Sync for Ring {}
unsafe impl Send for Ring {}

/// A joined worker thread with a shutdown flag and a self-pipe that
/// wakes the reactor when the worker has produced data.
pub struct Worker {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    wake_rx: RawFd,
    wake_tx: RawFd,
}

/// Producer half handed to the worker closure.
pub struct WorkerCtx {
    shutdown: Arc<AtomicBool>,
    wake_tx: RawFd,
}

impl WorkerCtx {
    #[inline]
    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::Relaxed)
    }

    /// Nudges the reactor; a full pipe means a wake is already pending.
    pub fn wake(&self) {
        let _ = unistd::write(self.wake_tx, &[0u8]);
    }
}

impl Worker {
    pub fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce(WorkerCtx) + Send + 'static,
    {
        let (wake_rx, wake_tx) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None::<SockProtocol>,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        )
        .context("worker: socketpair")?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let ctx = WorkerCtx {
            shutdown: shutdown.clone(),
            wake_tx,
        };
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || body(ctx))
            .context("worker: spawn")?;

        Ok(Worker {
            handle: Some(handle),
            shutdown,
            wake_rx,
            wake_tx,
        })
    }

    /// Descriptor the reactor registers for read readiness.
    #[inline]
    pub fn wake_fd(&self) -> RawFd {
        self.wake_rx
    }

    /// Drains pending wake bytes after the reactor saw readiness.
    pub fn ack_wake(&self) {
        let mut sink = [0u8; 64];
        while let Ok(n) = unistd::read(self.wake_rx, &mut sink) {
            if n < sink.len() {
                break;
            }
        }
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // Closing the worker side of the pipe unblocks a worker that
        // is parked on write.
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
        let _ = unistd::close(self.wake_rx);
        let _ = unistd::close(self.wake_tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_keeps_order_and_bounds() {
        let ring = Ring::new(4, 8);
        for i in 0u8..8 {
            assert!(ring.push(&[i; 4]));
        }
        assert!(!ring.push(&[0xFF; 4]));
        assert_eq!(ring.dropped(), 1);

        let mut out = [0u8; 4];
        for i in 0u8..8 {
            assert!(ring.pop(&mut out));
            assert_eq!(out, [i; 4]);
        }
        assert!(!ring.pop(&mut out));
    }

    #[test]
    fn ring_works_across_threads() {
        let ring = Ring::new(188, 1024);
        let producer = ring.clone();
        let t = thread::spawn(move || {
            for i in 0..512u32 {
                let mut rec = [0u8; 188];
                rec[..4].copy_from_slice(&i.to_be_bytes());
                while !producer.push(&rec) {
                    thread::yield_now();
                }
            }
        });

        let mut seen = 0u32;
        let mut rec = [0u8; 188];
        while seen < 512 {
            if ring.pop(&mut rec) {
                let i = u32::from_be_bytes([rec[0], rec[1], rec[2], rec[3]]);
                assert_eq!(i, seen);
                seen += 1;
            } else {
                thread::yield_now();
            }
        }
        t.join().unwrap();
    }

    #[test]
    fn worker_shutdown_flag_stops_loop() {
        let mut worker = Worker::spawn("test", |ctx| {
            while ctx.is_running() {
                thread::sleep(Duration::from_millis(1));
            }
        })
        .unwrap();
        worker.stop();
    }
}
