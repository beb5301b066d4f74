//! PCR-paced file replay source.
//!
//! A worker thread walks the raw 188-byte TS file from PCR to PCR on
//! one reference PID and releases each block in real time, feeding
//! the reactor through the worker ring. Blocks whose PCR step is
//! zero or implausibly large are skipped and the clock re-bases.

use {
    crate::{
        pipeline::{Ctx, Graph, Node, NodeId},
        runtime::{Ring, Worker, WorkerCtx},
        ts::{self, TS_PACKET_SIZE},
    },
    anyhow::{Context, Result},
    log::{error, info, warn},
    std::{
        fs::File,
        io::{Read, Seek, SeekFrom},
        os::unix::io::RawFd,
        path::PathBuf,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread,
        time::{Duration, Instant},
    },
};

const READ_CHUNK: usize = 1022 * TS_PACKET_SIZE;
const MAX_BLOCK_US: u64 = 500_000;

#[derive(Debug, Clone)]
pub struct FileConfig {
    pub path: PathBuf,
    /// restart from the beginning at EOF
    pub repeat: bool,
    /// PCR reference PID; the first PCR-bearing PID when unset
    pub pcr_pid: Option<u16>,
}

/// Reactor-side driver of one replay worker.
pub struct FileInput {
    node: NodeId,
    ring: Arc<Ring>,
    worker: Worker,
    eof: Arc<AtomicBool>,
    eof_logged: bool,
    name: String,
}

struct ReplayNode {
    name: String,
}

impl Node for ReplayNode {
    fn name(&self) -> &str {
        &self.name
    }
    // a source: nothing upstream ever delivers to it
    fn on_ts(&mut self, _ctx: &mut Ctx, _ts: &[u8]) {}
}

impl FileInput {
    pub fn start(graph: &mut Graph, config: FileConfig) -> Result<FileInput> {
        let name = format!("file_input {}", config.path.display());
        let node = graph.add(Box::new(ReplayNode { name: name.clone() }));

        let ring = Ring::new(TS_PACKET_SIZE, READ_CHUNK / TS_PACKET_SIZE * 2);
        let eof = Arc::new(AtomicBool::new(false));

        let worker_ring = ring.clone();
        let worker_eof = eof.clone();
        let worker = Worker::spawn(&name.clone(), move |ctx| {
            replay_loop(config, worker_ring, worker_eof, ctx)
        })?;

        Ok(FileInput {
            node,
            ring,
            worker,
            eof,
            eof_logged: false,
            name,
        })
    }

    #[inline]
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    #[inline]
    pub fn wake_fd(&self) -> RawFd {
        self.worker.wake_fd()
    }

    #[inline]
    pub fn is_eof(&self) -> bool {
        self.eof.load(Ordering::Relaxed)
    }

    /// Drains queued packets into the pipeline, bounded per call.
    pub fn pump(&mut self, graph: &mut Graph, budget_packets: usize) {
        self.worker.ack_wake();
        let mut packet = [0u8; TS_PACKET_SIZE];
        for _ in 0..budget_packets {
            if !self.ring.pop(&mut packet) {
                break;
            }
            graph.send(self.node, &packet);
        }
        if self.is_eof() && !self.eof_logged {
            self.eof_logged = true;
            info!("[{}] end of stream", self.name);
        }
    }

    pub fn stop(&mut self, graph: &mut Graph) {
        self.worker.stop();
        graph.remove(self.node);
    }
}

struct Replay {
    file: File,
    buffer: Vec<u8>,
    len: usize,
    skip: usize,
    pcr_pid: Option<u16>,
    last_pcr: u64,
}

impl Replay {
    fn open(config: &FileConfig) -> Result<Replay> {
        let mut file = File::open(&config.path)
            .with_context(|| format!("file_input: failed to open {}", config.path.display()))?;
        file.seek(SeekFrom::Start(0))?;

        let mut replay = Replay {
            file,
            buffer: vec![0u8; READ_CHUNK],
            len: 0,
            skip: 0,
            pcr_pid: config.pcr_pid,
            last_pcr: 0,
        };
        replay.refill()?;
        ensure!(
            replay.len >= TS_PACKET_SIZE && replay.buffer[0] == 0x47,
            "file_input: wrong file format"
        );
        Ok(replay)
    }

    /// Moves the unconsumed tail to the front and reads more.
    fn refill(&mut self) -> Result<usize> {
        self.buffer.copy_within(self.skip..self.len, 0);
        self.len -= self.skip;
        self.skip = 0;
        let read = self.file.read(&mut self.buffer[self.len..])?;
        self.len += read;
        // only whole packets are usable
        self.len -= self.len % TS_PACKET_SIZE;
        Ok(read)
    }

    /// Finds the next PCR on the reference PID past the current
    /// block start. Returns (bytes to that packet, its PCR).
    fn seek_pcr(&mut self) -> Option<(usize, u64)> {
        let mut at = self.skip + TS_PACKET_SIZE;
        while at + TS_PACKET_SIZE <= self.len {
            let packet = &self.buffer[at..at + TS_PACKET_SIZE];
            if ts::is_pcr(packet) {
                let pid = ts::get_pid(packet);
                let pcr_pid = *self.pcr_pid.get_or_insert(pid);
                if pcr_pid == pid {
                    return Some((at - self.skip, ts::get_pcr(packet)));
                }
            }
            at += TS_PACKET_SIZE;
        }
        None
    }
}

fn replay_loop(config: FileConfig, ring: Arc<Ring>, eof: Arc<AtomicBool>, ctx: WorkerCtx) {
    let mut replay = match Replay::open(&config) {
        Ok(replay) => replay,
        Err(e) => {
            error!("{:#}", e);
            eof.store(true, Ordering::Relaxed);
            ctx.wake();
            return;
        }
    };

    // lock the clock on the first PCR
    match replay.seek_pcr() {
        Some((block, pcr)) => {
            replay.last_pcr = pcr;
            replay.skip += block;
        }
        None => {
            error!("[file_input] first PCR is not found");
            eof.store(true, Ordering::Relaxed);
            ctx.wake();
            return;
        }
    }

    let mut deadline = Instant::now();

    while ctx.is_running() {
        let (block_size, pcr) = match replay.seek_pcr() {
            Some(found) => found,
            None => match replay.refill() {
                Ok(0) => {
                    if !config.repeat {
                        eof.store(true, Ordering::Relaxed);
                        ctx.wake();
                        return;
                    }
                    match Replay::open(&config) {
                        Ok(reopened) => {
                            replay = reopened;
                            if let Some((block, pcr)) = replay.seek_pcr() {
                                replay.last_pcr = pcr;
                                replay.skip += block;
                            }
                            deadline = Instant::now();
                            continue;
                        }
                        Err(e) => {
                            error!("{:#}", e);
                            eof.store(true, Ordering::Relaxed);
                            ctx.wake();
                            return;
                        }
                    }
                }
                Ok(_) => continue,
                Err(e) => {
                    error!("[file_input] read failed [{}]", e);
                    eof.store(true, Ordering::Relaxed);
                    ctx.wake();
                    return;
                }
            },
        };

        let block_us = ts::pcr_delta_us(&mut replay.last_pcr, pcr);
        if block_us == 0 || block_us > MAX_BLOCK_US {
            warn!(
                "[file_input] block time out of range: {}ms block_size:{}",
                block_us / 1000,
                block_size
            );
            replay.skip += block_size;
            deadline = Instant::now();
            continue;
        }

        deadline += Duration::from_micros(block_us);
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        } else {
            // fell behind; re-base instead of bursting
            deadline = now;
        }

        let mut produced = false;
        let mut at = replay.skip;
        let end = replay.skip + block_size;
        while at < end {
            let packet = &replay.buffer[at..at + TS_PACKET_SIZE];
            if packet[0] == 0x47 {
                while !ring.push(packet) {
                    if !ctx.is_running() {
                        return;
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                produced = true;
            }
            at += TS_PACKET_SIZE;
        }
        replay.skip = end;
        if produced {
            ctx.wake();
        }
    }
}
