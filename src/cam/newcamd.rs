//! newcamd key-server client.
//!
//! Wire format: 2-byte big-endian length, then a DES-EDE2-CBC
//! encrypted body of 12-byte header (message id, program number),
//! APDU, XOR checksum, random padding, with the 8-byte IV appended in
//! clear. The login sequence derives the session key from 14 random
//! bytes sent by the peer; after the login ack the key is re-derived
//! from the MD5-crypt of the password.

use {
    super::{Cam, CamEvent, CamInfo, EmKind, EmPacket, KeyReply, Provider},
    crate::runtime::ByteBuffer,
    anyhow::{Context, Result},
    log::{debug, error, info, warn},
    md5::{Digest, Md5},
    openssl::nid::Nid,
    openssl::symm::{Cipher, Crypter, Mode},
    rand::RngCore,
    std::{
        collections::VecDeque,
        io::{Read, Write},
        net::TcpStream,
        os::unix::io::{AsRawFd, RawFd},
        time::{Duration, Instant},
    },
};

const NEWCAMD_HEADER_SIZE: usize = 12;
const NEWCAMD_MSG_SIZE: usize = 400;
const MAX_PROV_COUNT: usize = 16;
const TIMEOUT: Duration = Duration::from_secs(5);
const MAX_TIMEOUTS: u32 = 3;

const MSG_CLIENT_2_SERVER_LOGIN: u8 = 0xE0;
const MSG_CLIENT_2_SERVER_LOGIN_ACK: u8 = 0xE1;
const MSG_CARD_DATA_REQ: u8 = 0xE3;
const MSG_CARD_DATA: u8 = 0xE4;

#[derive(Debug, Clone)]
pub struct NewcamdConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    /// 14-byte shared DES key (28 hex characters in configs)
    pub key: [u8; 14],
    pub disable_emm: bool,
    pub cas_data: [u8; 32],
}

impl NewcamdConfig {
    /// Parses the conventional 28-hex-character key string.
    pub fn parse_key(s: &str) -> Result<[u8; 14]> {
        ensure!(s.len() == 28, "newcamd: key length must be equal 28");
        let mut key = [0u8; 14];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .context("newcamd: invalid key")?;
        }
        Ok(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Down,
    /// waiting for the 14 random key bytes
    Started,
    /// login sent, waiting for the ack
    Connected,
    /// card data requested
    Authorized,
    Ready,
}

struct Outstanding {
    msg_id: u16,
    packet: EmPacket,
    deadline: Instant,
}

pub struct Newcamd {
    config: NewcamdConfig,
    info: CamInfo,

    socket: Option<TcpStream>,
    state: State,
    reconnect_at: Option<Instant>,
    connect_deadline: Option<Instant>,

    session_key: [u8; 16],
    password_md5: String,

    msg_id: u16,
    queue: VecDeque<EmPacket>,
    outstanding: Option<Outstanding>,
    timeouts: u32,

    /// last seen halves for NDS zero-half completion
    last_key: [[u8; 8]; 2],

    rx: ByteBuffer,
    tx: ByteBuffer,
}

impl Newcamd {
    pub fn new(config: NewcamdConfig) -> Newcamd {
        let info = CamInfo {
            disable_emm: config.disable_emm,
            cas_data: config.cas_data,
            ..CamInfo::default()
        };
        Newcamd {
            config,
            info,
            socket: None,
            state: State::Down,
            reconnect_at: None,
            connect_deadline: None,
            session_key: [0; 16],
            password_md5: String::new(),
            msg_id: 0,
            queue: VecDeque::new(),
            outstanding: None,
            timeouts: 0,
            last_key: [[0; 8]; 2],
            rx: ByteBuffer::new(),
            tx: ByteBuffer::new(),
        }
    }

    #[inline]
    pub fn fd(&self) -> Option<RawFd> {
        self.socket.as_ref().map(|s| s.as_raw_fd())
    }

    #[inline]
    pub fn wants_write(&self) -> bool {
        !self.tx.is_empty()
    }

    pub fn connect(&mut self, now: Instant) -> Vec<CamEvent> {
        self.reconnect_at = None;
        let address = format!("{}:{}", self.config.host, self.config.port);
        let stream = std::net::ToSocketAddrs::to_socket_addrs(&address)
            .ok()
            .and_then(|mut addrs| addrs.next())
            .and_then(|addr| TcpStream::connect_timeout(&addr, TIMEOUT).ok());

        match stream {
            Some(stream) => {
                let _ = stream.set_nonblocking(true);
                let _ = stream.set_nodelay(true);
                self.socket = Some(stream);
                self.state = State::Started;
                self.connect_deadline = Some(now + TIMEOUT);
                debug!("[newcamd {}] connected", self.config.name);
                Vec::new()
            }
            None => {
                error!("[newcamd {}] connection failed. try again", self.config.name);
                self.disconnect(now)
            }
        }
    }

    fn disconnect(&mut self, now: Instant) -> Vec<CamEvent> {
        let was_ready = self.state == State::Ready;
        self.socket = None;
        self.state = State::Down;
        self.rx.clear();
        self.tx.clear();
        self.queue.clear();
        self.outstanding = None;
        self.connect_deadline = None;
        self.reconnect_at = Some(now + TIMEOUT);
        if was_ready {
            vec![CamEvent::Down]
        } else {
            Vec::new()
        }
    }

    /// Periodic work: request timeouts, connect timeout, reconnect.
    pub fn tick(&mut self, now: Instant) -> Vec<CamEvent> {
        let mut events = Vec::new();

        if let Some(at) = self.reconnect_at {
            if now >= at {
                events.extend(self.connect(now));
                return events;
            }
        }

        if self.state != State::Ready {
            if let Some(deadline) = self.connect_deadline {
                if now >= deadline {
                    error!("[newcamd {}] receiving timeout. reconnect", self.config.name);
                    events.extend(self.disconnect(now));
                }
            }
            return events;
        }

        let expired = self
            .outstanding
            .as_ref()
            .map(|o| now >= o.deadline)
            .unwrap_or(false);
        if expired {
            let outstanding = self.outstanding.take().unwrap();
            warn!(
                "[newcamd {}] receiving timeout. drop packet",
                self.config.name
            );
            if outstanding.packet.kind == EmKind::Ecm {
                events.push(CamEvent::Key {
                    pnr: outstanding.packet.pnr,
                    reply: KeyReply {
                        parity: outstanding.packet.payload[0],
                        cw: None,
                    },
                });
            }
            self.timeouts += 1;
            if self.timeouts >= MAX_TIMEOUTS {
                error!(
                    "[newcamd {}] {} timeouts in a row. reconnect",
                    self.config.name, self.timeouts
                );
                events.extend(self.disconnect(now));
                return events;
            }
            self.pump_queue(now);
        }

        events
    }

    pub fn on_writable(&mut self, now: Instant) -> Vec<CamEvent> {
        self.flush_tx(now)
    }

    fn flush_tx(&mut self, now: Instant) -> Vec<CamEvent> {
        while !self.tx.is_empty() {
            let socket = match self.socket.as_mut() {
                Some(s) => s,
                None => return Vec::new(),
            };
            match socket.write(self.tx.as_slice()) {
                Ok(0) => return self.disconnect(now),
                Ok(n) => self.tx.advance(n),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("[newcamd {}] send failed [{}]", self.config.name, e);
                    return self.disconnect(now);
                }
            }
        }
        Vec::new()
    }

    pub fn on_readable(&mut self, now: Instant) -> Vec<CamEvent> {
        let mut chunk = [0u8; 2048];
        loop {
            let socket = match self.socket.as_mut() {
                Some(s) => s,
                None => return Vec::new(),
            };
            match socket.read(&mut chunk) {
                Ok(0) => {
                    error!("[newcamd {}] peer closed", self.config.name);
                    return self.disconnect(now);
                }
                Ok(n) => self.rx.push(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("[newcamd {}] recv failed [{}]", self.config.name, e);
                    return self.disconnect(now);
                }
            }
        }
        self.process_rx(now)
    }

    fn process_rx(&mut self, now: Instant) -> Vec<CamEvent> {
        let mut events = Vec::new();
        loop {
            match self.state {
                State::Started => {
                    if self.rx.len() < 14 {
                        break;
                    }
                    let mut random = [0u8; 14];
                    random.copy_from_slice(&self.rx.as_slice()[..14]);
                    self.rx.advance(14);
                    if let Err(e) = self.login(&random, now) {
                        error!("[newcamd {}] {:#}", self.config.name, e);
                        events.extend(self.disconnect(now));
                        return events;
                    }
                }
                State::Connected | State::Authorized | State::Ready => {
                    if self.rx.len() < 2 {
                        break;
                    }
                    let size = u16::from_be_bytes([
                        self.rx.as_slice()[0],
                        self.rx.as_slice()[1],
                    ]) as usize;
                    if size > NEWCAMD_MSG_SIZE - 2 {
                        error!(
                            "[newcamd {}] message size {} is out of bounds",
                            self.config.name, size
                        );
                        events.extend(self.disconnect(now));
                        return events;
                    }
                    if self.rx.len() < 2 + size {
                        break;
                    }
                    let body = self.rx.as_slice()[2..2 + size].to_vec();
                    self.rx.advance(2 + size);
                    match self.decode(&body) {
                        Some(message) => {
                            if let Err(e) = self.handle_message(&message, now, &mut events) {
                                error!("[newcamd {}] {:#}", self.config.name, e);
                                events.extend(self.disconnect(now));
                                return events;
                            }
                        }
                        None => {
                            error!("[newcamd {}] recv: bad checksum", self.config.name);
                            events.extend(self.disconnect(now));
                            return events;
                        }
                    }
                }
                State::Down => break,
            }
        }
        events
    }

    /* crypto */

    fn set_session_key(&mut self, mix: &[u8]) {
        let mut key = self.config.key;
        for (i, &byte) in mix.iter().enumerate() {
            key[i % 14] ^= byte;
        }
        self.session_key = spread_des_key(&key);
    }

    fn cipher(&self, mode: Mode, iv: &[u8; 8], data: &[u8]) -> Result<Vec<u8>> {
        let cipher = Cipher::from_nid(Nid::DES_EDE_CBC).expect("DES-EDE-CBC supported by openssl");
        let mut crypter = Crypter::new(cipher, mode, &self.session_key, Some(&iv[..]))
            .context("newcamd: cipher init")?;
        crypter.pad(false);
        let mut out = vec![0u8; data.len() + 8];
        let mut written = crypter.update(data, &mut out).context("newcamd: cipher")?;
        written += crypter
            .finalize(&mut out[written..])
            .context("newcamd: cipher finalize")?;
        out.truncate(written);
        Ok(out)
    }

    /// Frames, checksums, pads, encrypts and queues one message.
    fn send_message(
        &mut self,
        payload: &[u8],
        msg_id: u16,
        pnr: u16,
        now: Instant,
    ) -> Result<()> {
        let mut body = vec![0u8; NEWCAMD_HEADER_SIZE - 2];
        body[0] = (msg_id >> 8) as u8;
        body[1] = msg_id as u8;
        body[2] = (pnr >> 8) as u8;
        body[3] = pnr as u8;
        body.extend_from_slice(payload);

        // payload bytes 1..3 carry a section-style 12-bit length
        let data_len = payload.len() - 3;
        body[NEWCAMD_HEADER_SIZE - 2 + 1] =
            (body[NEWCAMD_HEADER_SIZE - 2 + 1] & 0xF0) | ((data_len >> 8) as u8 & 0x0F);
        body[NEWCAMD_HEADER_SIZE - 2 + 2] = data_len as u8;

        // pad the body so that with the checksum it fills DES blocks
        let mut rng = rand::thread_rng();
        let pad = (8 - (body.len() + 1) % 8) % 8;
        let mut padding = vec![0u8; pad];
        rng.fill_bytes(&mut padding);
        body.extend_from_slice(&padding);
        body.push(xor_sum(&body));

        ensure!(
            body.len() + 2 + 8 <= NEWCAMD_MSG_SIZE,
            "newcamd: send: failed to pad message"
        );

        let mut iv = [0u8; 8];
        rng.fill_bytes(&mut iv);
        let mut encrypted = self.cipher(Mode::Encrypt, &iv, &body)?;
        encrypted.extend_from_slice(&iv);

        let mut frame = Vec::with_capacity(encrypted.len() + 2);
        frame.extend_from_slice(&(encrypted.len() as u16).to_be_bytes());
        frame.extend_from_slice(&encrypted);

        self.tx.push(&frame);
        self.flush_tx(now);
        Ok(())
    }

    /// Decrypts and checksums one framed body; returns header+payload.
    fn decode(&self, body: &[u8]) -> Option<Vec<u8>> {
        if body.len() % 8 != 0 || body.len() < 16 {
            return None;
        }
        let (encrypted, iv) = body.split_at(body.len() - 8);
        let mut iv_arr = [0u8; 8];
        iv_arr.copy_from_slice(iv);
        let decrypted = self.cipher(Mode::Decrypt, &iv_arr, encrypted).ok()?;
        if xor_sum(&decrypted) != 0 {
            return None;
        }
        Some(decrypted)
    }

    fn send_command(&mut self, command: u8, now: Instant) -> Result<()> {
        self.send_message(&[command, 0, 0], 0, 0, now)
    }

    /* login sequence */

    fn login(&mut self, random: &[u8; 14], now: Instant) -> Result<()> {
        self.msg_id = 0;
        self.set_session_key(random);

        self.password_md5 = md5_crypt(&self.config.pass, "$1$abcdefgh$");

        let mut payload = vec![MSG_CLIENT_2_SERVER_LOGIN, 0, 0];
        payload.extend_from_slice(self.config.user.as_bytes());
        payload.push(0);
        payload.extend_from_slice(self.password_md5.as_bytes());
        payload.push(0);

        self.state = State::Connected;
        self.connect_deadline = Some(now + TIMEOUT);
        self.send_message(&payload, 0, 0, now)
    }

    fn handle_message(
        &mut self,
        message: &[u8],
        now: Instant,
        events: &mut Vec<CamEvent>,
    ) -> Result<()> {
        ensure!(message.len() > NEWCAMD_HEADER_SIZE, "newcamd: short message");
        let payload = &message[NEWCAMD_HEADER_SIZE - 2..];

        match self.state {
            State::Connected => {
                ensure!(
                    payload[0] == MSG_CLIENT_2_SERVER_LOGIN_ACK,
                    "newcamd: login failed [0x{:02X}]",
                    payload[0]
                );
                // session key is re-derived from the password hash
                let md5 = self.password_md5.clone();
                self.set_session_key(md5.as_bytes());
                self.state = State::Authorized;
                self.connect_deadline = Some(now + TIMEOUT);
                self.send_command(MSG_CARD_DATA_REQ, now)
            }
            State::Authorized => {
                ensure!(payload[0] == MSG_CARD_DATA, "newcamd: expected card data");
                self.card_data(payload);
                self.state = State::Ready;
                self.connect_deadline = None;
                self.timeouts = 0;
                events.push(CamEvent::Ready);
                self.pump_queue(now);
                Ok(())
            }
            State::Ready => {
                self.reply(message, payload, now, events);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn card_data(&mut self, payload: &[u8]) {
        if payload.len() < 15 {
            return;
        }
        self.info.caid = u16::from_be_bytes([payload[4], payload[5]]);
        self.info.ua.copy_from_slice(&payload[6..14]);

        let admin = payload[3] == 1;
        if !admin {
            self.info.disable_emm = true;
        }
        info!(
            "[newcamd {}] CaID=0x{:04X} admin={} UA={:02X?}",
            self.config.name,
            self.info.caid,
            if admin { "YES" } else { "NO" },
            self.info.ua
        );

        self.info.providers.clear();
        let count = (payload[14] as usize).min(MAX_PROV_COUNT);
        for i in 0..count {
            let at = 15 + 11 * i;
            if payload.len() < at + 11 {
                break;
            }
            let mut prov = Provider {
                ident: [0; 3],
                sa: [0; 8],
            };
            prov.ident.copy_from_slice(&payload[at..at + 3]);
            prov.sa.copy_from_slice(&payload[at + 3..at + 11]);
            info!(
                "[newcamd {}] Prov:{} ID:{:02X?} SA:{:02X?}",
                self.config.name, i, prov.ident, prov.sa
            );
            self.info.providers.push(prov);
        }
    }

    /* entitlement round-trips */

    fn pump_queue(&mut self, now: Instant) {
        if self.outstanding.is_some() || self.state != State::Ready {
            return;
        }
        let packet = match self.queue.pop_front() {
            Some(p) => p,
            None => return,
        };

        self.msg_id = self.msg_id.wrapping_add(1);
        let msg_id = self.msg_id;
        let pnr = packet.pnr;
        let payload = packet.payload.clone();

        self.outstanding = Some(Outstanding {
            msg_id,
            packet,
            deadline: now + TIMEOUT,
        });
        if let Err(e) = self.send_message(&payload, msg_id, pnr, now) {
            error!("[newcamd {}] {:#}", self.config.name, e);
            self.outstanding = None;
        }
    }

    fn reply(
        &mut self,
        message: &[u8],
        payload: &[u8],
        now: Instant,
        events: &mut Vec<CamEvent>,
    ) {
        let msg_type = payload[0];
        if !(0x80..=0x8F).contains(&msg_type) {
            return;
        }
        let msg_id = u16::from_be_bytes([message[0], message[1]]);
        let id_matches = self
            .outstanding
            .as_ref()
            .map(|o| o.msg_id == msg_id)
            .unwrap_or(false);
        if !id_matches {
            warn!(
                "[newcamd {}] packet with id {} is not found [type:0x{:02X}]",
                self.config.name, msg_id, msg_type
            );
            return;
        }
        let outstanding = self.outstanding.take().unwrap();
        self.timeouts = 0;

        let data_len =
            ((((payload[1] & 0x0F) as usize) << 8) | payload[2] as usize) + 3;

        if outstanding.packet.kind == EmKind::Ecm {
            let reply = if data_len == 19 && payload.len() >= 19 {
                let mut cw = [0u8; 16];
                cw.copy_from_slice(&payload[3..19]);

                // NDS answers with one half at a time; the stale half
                // comes from the previous reply
                if cw[..8] == [0; 8] {
                    cw[..8].copy_from_slice(&self.last_key[0]);
                    self.last_key[1].copy_from_slice(&cw[8..]);
                } else if cw[8..] == [0; 8] {
                    cw[8..].copy_from_slice(&self.last_key[1]);
                    self.last_key[0].copy_from_slice(&cw[..8]);
                } else {
                    self.last_key[0].copy_from_slice(&cw[..8]);
                    self.last_key[1].copy_from_slice(&cw[8..]);
                }

                KeyReply {
                    parity: msg_type,
                    cw: Some(cw),
                }
            } else {
                error!(
                    "[newcamd {}] ECM PNR:{} incorrect message length [{}]",
                    self.config.name, outstanding.packet.pnr, data_len
                );
                KeyReply {
                    parity: outstanding.packet.payload[0],
                    cw: None,
                }
            };
            events.push(CamEvent::Key {
                pnr: outstanding.packet.pnr,
                reply,
            });
        }

        self.pump_queue(now);
    }
}

impl Cam for Newcamd {
    fn info(&self) -> &CamInfo {
        &self.info
    }

    fn is_ready(&self) -> bool {
        self.state == State::Ready
    }

    fn queue_em(&mut self, packet: EmPacket) {
        if self.state != State::Ready {
            return;
        }
        // a newer ECM supersedes a queued one that never went out
        if packet.kind == EmKind::Ecm {
            if let Some(at) = self
                .queue
                .iter()
                .position(|p| p.kind == EmKind::Ecm && p.pnr == packet.pnr)
            {
                warn!(
                    "[newcamd {}] drop old packet (pnr:{})",
                    self.config.name, packet.pnr
                );
                self.queue.remove(at);
            }
        }
        self.queue.push_back(packet);
        self.pump_queue(Instant::now());
    }
}

fn xor_sum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, &b| acc ^ b)
}

/// Spreads 14 key bytes over 16 with a parity bit per byte, then
/// forces odd parity as DES wants it.
fn spread_des_key(key: &[u8; 14]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[0] = key[0] & 0xFE;
    out[1] = ((key[0] << 7) | (key[1] >> 1)) & 0xFE;
    out[2] = ((key[1] << 6) | (key[2] >> 2)) & 0xFE;
    out[3] = ((key[2] << 5) | (key[3] >> 3)) & 0xFE;
    out[4] = ((key[3] << 4) | (key[4] >> 4)) & 0xFE;
    out[5] = ((key[4] << 3) | (key[5] >> 5)) & 0xFE;
    out[6] = ((key[5] << 2) | (key[6] >> 6)) & 0xFE;
    out[7] = key[6] << 1;
    out[8] = key[7] & 0xFE;
    out[9] = ((key[7] << 7) | (key[8] >> 1)) & 0xFE;
    out[10] = ((key[8] << 6) | (key[9] >> 2)) & 0xFE;
    out[11] = ((key[9] << 5) | (key[10] >> 3)) & 0xFE;
    out[12] = ((key[10] << 4) | (key[11] >> 4)) & 0xFE;
    out[13] = ((key[11] << 3) | (key[12] >> 5)) & 0xFE;
    out[14] = ((key[12] << 2) | (key[13] >> 6)) & 0xFE;
    out[15] = key[13] << 1;

    for byte in &mut out {
        if byte.count_ones() % 2 == 0 {
            *byte ^= 1;
        }
    }
    out
}

const CRYPT_ALPHABET: &[u8; 64] =
    b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

fn to64(out: &mut String, mut v: u32, n: usize) {
    for _ in 0..n {
        out.push(CRYPT_ALPHABET[(v & 0x3F) as usize] as char);
        v >>= 6;
    }
}

/// FreeBSD-style `$1$` MD5-crypt, as newcamd servers expect for the
/// login password.
fn md5_crypt(password: &str, salt: &str) -> String {
    let magic = "$1$";
    let salt = salt.strip_prefix(magic).unwrap_or(salt);
    let salt = &salt[..salt.find('$').unwrap_or(salt.len()).min(8)];
    let pw = password.as_bytes();

    let mut ctx = Md5::new();
    ctx.update(pw);
    ctx.update(magic.as_bytes());
    ctx.update(salt.as_bytes());

    let alternate = {
        let mut ctx = Md5::new();
        ctx.update(pw);
        ctx.update(salt.as_bytes());
        ctx.update(pw);
        ctx.finalize()
    };
    let mut remaining = pw.len();
    while remaining > 0 {
        ctx.update(&alternate[..remaining.min(16)]);
        remaining = remaining.saturating_sub(16);
    }

    let mut i = pw.len();
    while i > 0 {
        if i & 1 != 0 {
            ctx.update([0u8]);
        } else {
            ctx.update(&pw[..1]);
        }
        i >>= 1;
    }

    let mut digest = ctx.finalize();

    for round in 0..1000 {
        let mut ctx = Md5::new();
        if round & 1 != 0 {
            ctx.update(pw);
        } else {
            ctx.update(&digest);
        }
        if round % 3 != 0 {
            ctx.update(salt.as_bytes());
        }
        if round % 7 != 0 {
            ctx.update(pw);
        }
        if round & 1 != 0 {
            ctx.update(&digest);
        } else {
            ctx.update(pw);
        }
        digest = ctx.finalize();
    }

    let mut out = format!("{}{}$", magic, salt);
    for &(a, b, c) in &[(0usize, 6usize, 12usize), (1, 7, 13), (2, 8, 14), (3, 9, 15), (4, 10, 5)] {
        let v = ((digest[a] as u32) << 16) | ((digest[b] as u32) << 8) | digest[c] as u32;
        to64(&mut out, v, 4);
    }
    to64(&mut out, digest[11] as u32, 2);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_checksum_covers_whole_body() {
        let mut body = vec![0x12u8, 0x34, 0x56];
        body.push(xor_sum(&body));
        assert_eq!(xor_sum(&body), 0);
    }

    #[test]
    fn des_key_has_odd_parity() {
        let key = spread_des_key(&[0xAB; 14]);
        for byte in key {
            assert_eq!(byte.count_ones() % 2, 1);
        }
    }

    #[test]
    fn md5_crypt_reference_vector() {
        // classic `openssl passwd -1 -salt abcdefgh hello` output
        assert_eq!(
            md5_crypt("hello", "$1$abcdefgh$"),
            "$1$abcdefgh$rwnEbRiN0agqVgZBovWNQ/"
        );
    }

    #[test]
    fn message_roundtrip_through_cipher() {
        let mut client = Newcamd::new(NewcamdConfig {
            name: "test".into(),
            host: "localhost".into(),
            port: 10000,
            user: "user".into(),
            pass: "pass".into(),
            key: NewcamdConfig::parse_key("0102030405060708091011121314").unwrap(),
            disable_emm: false,
            cas_data: [0; 32],
        });
        client.set_session_key(&[0x55; 14]);

        let mut body = vec![0u8; 10];
        body.extend_from_slice(&[0x80, 0x00, 0x04, 1, 2, 3, 4]);
        let pad = (8 - (body.len() + 1) % 8) % 8;
        body.extend(std::iter::repeat(0xA5).take(pad));
        body.push(xor_sum(&body));

        let iv = [7u8; 8];
        let encrypted = client.cipher(Mode::Encrypt, &iv, &body).unwrap();
        assert_eq!(encrypted.len(), body.len());
        assert_ne!(encrypted, body);

        let mut framed = encrypted;
        framed.extend_from_slice(&iv);
        let decoded = client.decode(&framed).unwrap();
        assert_eq!(decoded, body);
    }
}
