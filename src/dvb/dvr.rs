use {
    crate::{
        runtime::{Ring, Worker, WorkerCtx},
        ts::TS_PACKET_SIZE,
    },
    anyhow::Result,
    log::{error, warn},
    nix::{
        fcntl::{open, OFlag},
        poll::{poll, PollFd, PollFlags},
        sys::stat::Mode,
        unistd,
    },
    std::{
        os::unix::io::RawFd,
        sync::{
            atomic::{AtomicBool, AtomicU64, Ordering},
            Arc,
        },
        thread,
        time::{Duration, Instant},
    },
};

const REOPEN_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_CHUNK: usize = 1024 * 1024;

/// Worker-thread reader of `/dev/dvb/adapterN/dvrM`.
///
/// Reads the raw TS in large chunks, drops non-sync bytes with a
/// counter, splits into 188-byte records and hands them to the
/// reactor through a ring. A failing device is reopened after 5 s;
/// when it stays dead past `lost_timeout` the pump parks itself and
/// raises the lost flag.
pub struct DvrPump {
    ring: Arc<Ring>,
    worker: Worker,
    bytes: Arc<AtomicU64>,
    non_sync: Arc<AtomicU64>,
    lost: Arc<AtomicBool>,
}

struct PumpState {
    adapter: u32,
    device: u32,
    buffer_size: u32,
    chunk: usize,
    lost_timeout: Duration,
    ring: Arc<Ring>,
    bytes: Arc<AtomicU64>,
    non_sync: Arc<AtomicU64>,
    lost: Arc<AtomicBool>,
}

impl DvrPump {
    /// `ring_size` follows the device convention: the driver buffer
    /// is `ring_size * 4096` bytes, and the same figure bounds the
    /// read chunk (1 MiB when zero).
    pub fn start(
        adapter: u32,
        device: u32,
        ring_size: u32,
        lost_timeout: Duration,
    ) -> Result<DvrPump> {
        let chunk = if ring_size > 0 {
            (ring_size as usize * 4096).min(DEFAULT_CHUNK)
        } else {
            DEFAULT_CHUNK
        };
        let ring = Ring::new(TS_PACKET_SIZE, (chunk / TS_PACKET_SIZE) * 4);
        let bytes = Arc::new(AtomicU64::new(0));
        let non_sync = Arc::new(AtomicU64::new(0));
        let lost = Arc::new(AtomicBool::new(false));

        let state = PumpState {
            adapter,
            device,
            buffer_size: ring_size * 4096,
            chunk,
            lost_timeout,
            ring: ring.clone(),
            bytes: bytes.clone(),
            non_sync: non_sync.clone(),
            lost: lost.clone(),
        };

        let worker = Worker::spawn(&format!("dvr {}:{}", adapter, device), move |ctx| {
            pump_loop(state, ctx)
        })?;

        Ok(DvrPump {
            ring,
            worker,
            bytes,
            non_sync,
            lost,
        })
    }

    #[inline]
    pub fn wake_fd(&self) -> RawFd {
        self.worker.wake_fd()
    }

    #[inline]
    pub fn ack_wake(&self) {
        self.worker.ack_wake()
    }

    /// Dequeues one packet into `out`.
    #[inline]
    pub fn pop(&self, out: &mut [u8; TS_PACKET_SIZE]) -> bool {
        self.ring.pop(out)
    }

    #[inline]
    pub fn bytes_read(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn non_sync_bytes(&self) -> u64 {
        self.non_sync.load(Ordering::Relaxed)
    }

    /// Device stayed unreadable past the configured timeout.
    #[inline]
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.worker.stop();
    }
}

fn dvr_open(state: &PumpState) -> Result<RawFd> {
    let path = format!("/dev/dvb/adapter{}/dvr{}", state.adapter, state.device);
    let fd = open(path.as_str(), OFlag::O_RDONLY | OFlag::O_NONBLOCK, Mode::empty())?;

    if state.buffer_size > 0 {
        // DMX_SET_BUFFER_SIZE on the DVR handle sizes the ring
        nix::ioctl_write_int_bad!(ioctl_call, nix::request_code_none!(b'o', 45));
        if let Err(e) = unsafe { ioctl_call(fd, state.buffer_size as _) } {
            warn!(
                "[dvb_input {}:{}] failed to set dvr ring buffer [{}]",
                state.adapter, state.device, e
            );
        }
    }

    Ok(fd)
}

fn pump_loop(state: PumpState, ctx: WorkerCtx) {
    let mut fd = None;
    let mut down_since: Option<Instant> = None;
    let mut buffer = vec![0u8; state.chunk];
    // carry for a packet split across reads
    let mut tail = Vec::with_capacity(TS_PACKET_SIZE);

    while ctx.is_running() {
        let dvr = match fd {
            Some(dvr) => dvr,
            None => match dvr_open(&state) {
                Ok(dvr) => {
                    down_since = None;
                    fd = Some(dvr);
                    dvr
                }
                Err(e) => {
                    let since = *down_since.get_or_insert_with(Instant::now);
                    if since.elapsed() >= state.lost_timeout {
                        error!(
                            "[dvb_input {}:{}] dvr is gone [{}]",
                            state.adapter, state.device, e
                        );
                        state.lost.store(true, Ordering::Relaxed);
                        ctx.wake();
                        return;
                    }
                    warn!(
                        "[dvb_input {}:{}] dvr open failed, retry in 5s [{}]",
                        state.adapter, state.device, e
                    );
                    thread::sleep(REOPEN_DELAY);
                    continue;
                }
            },
        };

        let mut pfd = [PollFd::new(dvr, PollFlags::POLLIN)];
        match poll(&mut pfd, 100) {
            Ok(0) => continue,
            Ok(_) => {}
            Err(nix::Error::EINTR) => continue,
            Err(e) => {
                error!(
                    "[dvb_input {}:{}] poll failed [{}]",
                    state.adapter, state.device, e
                );
                let _ = unistd::close(dvr);
                fd = None;
                continue;
            }
        }

        match unistd::read(dvr, &mut buffer) {
            Ok(0) | Err(nix::Error::EAGAIN) | Err(nix::Error::EINTR) => continue,
            Ok(len) => {
                state.bytes.fetch_add(len as u64, Ordering::Relaxed);
                let mut produced = false;
                let mut data = &buffer[..len];

                if !tail.is_empty() {
                    let need = TS_PACKET_SIZE - tail.len();
                    let take = need.min(data.len());
                    tail.extend_from_slice(&data[..take]);
                    data = &data[take..];
                    if tail.len() == TS_PACKET_SIZE {
                        if tail[0] == 0x47 {
                            produced |= state.ring.push(&tail);
                        } else {
                            state
                                .non_sync
                                .fetch_add(TS_PACKET_SIZE as u64, Ordering::Relaxed);
                        }
                        tail.clear();
                    }
                }

                while !data.is_empty() {
                    if data[0] != 0x47 {
                        state.non_sync.fetch_add(1, Ordering::Relaxed);
                        data = &data[1..];
                        continue;
                    }
                    if data.len() < TS_PACKET_SIZE {
                        tail.extend_from_slice(data);
                        break;
                    }
                    produced |= state.ring.push(&data[..TS_PACKET_SIZE]);
                    data = &data[TS_PACKET_SIZE..];
                }

                if produced {
                    ctx.wake();
                }
            }
            Err(e) => {
                warn!(
                    "[dvb_input {}:{}] dvr read error, try to reopen [{}]",
                    state.adapter, state.device, e
                );
                let _ = unistd::close(dvr);
                fd = None;
                tail.clear();
                thread::sleep(REOPEN_DELAY);
            }
        }
    }

    if let Some(dvr) = fd {
        let _ = unistd::close(dvr);
    }
}
