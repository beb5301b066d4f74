pub mod sys;

use {
    anyhow::{Context, Result},
    log::info,
    nix::{ioctl_none_bad, ioctl_read, ioctl_write_int_bad, request_code_none, unistd},
    std::{
        fs::{File, OpenOptions},
        os::unix::{
            fs::OpenOptionsExt,
            io::{AsRawFd, RawFd},
        },
    },
    sys::*,
};

use crate::ci::{CiClock, CiEvent, CiHost, MAX_TPDU_SIZE};

/// Byte transport to `/dev/dvb/adapterN/caM`: link-layer TPDU frames
/// travel over plain read/write. The EN 50221 protocol itself lives
/// in [`crate::ci`] and is pumped by the owner of this device.
#[derive(Debug)]
pub struct CaDevice {
    adapter: u32,
    device: u32,
    file: File,
    slots: u32,
}

impl AsRawFd for CaDevice {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl CaDevice {
    /// Opens the CA device and checks for a link-layer CI. Returns
    /// `Ok(None)` when the adapter simply has no CA endpoint.
    pub fn open(adapter: u32, device: u32) -> Result<Option<CaDevice>> {
        let path = format!("/dev/dvb/adapter{}/ca{}", adapter, device);
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(::nix::libc::O_NONBLOCK)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("CA: failed to open device {}", &path))
            }
        };

        let mut ca = CaDevice {
            adapter,
            device,
            file,
            slots: 0,
        };

        let mut caps = CaCaps::default();
        ca.get_caps(&mut caps)?;

        info!("[dvb_ca {}:{}] slots:{}", adapter, device, caps.slot_num);
        if caps.slot_num == 0 {
            return Ok(None);
        }

        ensure!(
            caps.slot_type & CA_CI_LINK != 0,
            "CA: link layer interface is not supported"
        );

        ca.slots = caps.slot_num;
        Ok(Some(ca))
    }

    #[inline]
    pub fn slots(&self) -> u32 {
        self.slots
    }

    /// Resets the slots selected by `slot_mask` (bit per slot).
    pub fn reset(&self, slot_mask: u32) -> Result<()> {
        // CA_RESET
        ioctl_write_int_bad!(
            #[inline]
            ioctl_call,
            request_code_none!(b'o', 128)
        );
        unsafe { ioctl_call(self.as_raw_fd(), slot_mask as _) }.context("CA: reset")?;

        Ok(())
    }

    /// Resets the whole interface.
    pub fn reset_all(&self) -> Result<()> {
        // CA_RESET without a slot mask
        ioctl_none_bad!(
            #[inline]
            ioctl_call,
            request_code_none!(b'o', 128)
        );
        unsafe { ioctl_call(self.as_raw_fd()) }.context("CA: reset")?;

        Ok(())
    }

    pub fn get_caps(&mut self, caps: &mut CaCaps) -> Result<()> {
        // CA_GET_CAP
        ioctl_read!(
            #[inline]
            ioctl_call,
            b'o',
            129,
            CaCaps
        );
        unsafe { ioctl_call(self.as_raw_fd(), caps as *mut _) }.context("CA: get caps")?;

        Ok(())
    }

    pub fn get_slot_info(&self, slot: u32) -> Result<CaSlotInfo> {
        let mut info = CaSlotInfo {
            num: slot as i32,
            ..CaSlotInfo::default()
        };

        // CA_GET_SLOT_INFO
        ioctl_read!(
            #[inline]
            ioctl_call,
            b'o',
            130,
            CaSlotInfo
        );
        unsafe { ioctl_call(self.as_raw_fd(), &mut info as *mut _) }
            .context("CA: get slot info")?;

        Ok(info)
    }

    /// True when the module in `slot` reports ready.
    pub fn is_module_ready(&self, slot: u32) -> Result<bool> {
        Ok(self.get_slot_info(slot)?.flags & CA_CI_MODULE_READY != 0)
    }

    /// Writes one link-layer frame.
    pub fn write_frame(&self, frame: &[u8]) -> Result<()> {
        let written = unistd::write(self.as_raw_fd(), frame)
            .with_context(|| format!("[dvb_ca {}:{}] write", self.adapter, self.device))?;
        ensure!(written == frame.len(), "CA: short write");
        Ok(())
    }

    /// Reads one link-layer frame if available; `Ok(0)` when the
    /// device has nothing pending.
    pub fn read_frame(&self, buffer: &mut [u8; MAX_TPDU_SIZE]) -> Result<usize> {
        match unistd::read(self.as_raw_fd(), buffer) {
            Ok(n) => Ok(n),
            Err(nix::Error::EAGAIN) => Ok(0),
            Err(e) => {
                Err(e).with_context(|| format!("[dvb_ca {}:{}] read", self.adapter, self.device))
            }
        }
    }
}

/// Reactor-side pump tying a [`CaDevice`] to the EN 50221 host:
/// register the device fd for read readiness and arrange a 100 ms
/// tick, then feed both into this object.
pub struct CamMonitor {
    device: CaDevice,
    pub host: CiHost,
}

impl CamMonitor {
    pub fn new(device: CaDevice, utc_offset_minutes: i16) -> CamMonitor {
        let host = CiHost::new(
            &format!("dvb_ca {}:{}", device.adapter, device.device),
            device.slots(),
            utc_offset_minutes,
        );
        CamMonitor { device, host }
    }

    #[inline]
    pub fn device(&self) -> &CaDevice {
        &self.device
    }

    /// 100 ms poll: slot presence, host lifecycle, outbound frames.
    /// Returns protocol events for the descrambler side.
    pub fn tick(&mut self, clock: CiClock) -> Result<Vec<CiEvent>> {
        let ready: Vec<bool> = (0..self.device.slots())
            .map(|slot| self.device.is_module_ready(slot).unwrap_or(false))
            .collect();
        self.host.tick(clock, &ready);
        self.drain(clock)
    }

    /// Device fd became readable.
    pub fn on_readable(&mut self, clock: CiClock) -> Result<Vec<CiEvent>> {
        let mut buffer = [0u8; MAX_TPDU_SIZE];
        loop {
            let len = self.device.read_frame(&mut buffer)?;
            if len == 0 {
                break;
            }
            self.host.on_frame(&buffer[..len], clock);
        }
        self.drain(clock)
    }

    fn drain(&mut self, _clock: CiClock) -> Result<Vec<CiEvent>> {
        while let Some(frame) = self.host.pop_frame() {
            self.device.write_frame(&frame)?;
        }

        let mut out = Vec::new();
        for event in self.host.take_events() {
            match event {
                CiEvent::SlotReset { slot } => {
                    self.device.reset(1 << slot)?;
                }
                other => out.push(other),
            }
        }
        Ok(out)
    }
}
