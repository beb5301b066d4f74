pub mod sys;

use {
    anyhow::{Context, Result},
    nix::{ioctl_none_bad, ioctl_write_int_bad, ioctl_write_ptr, request_code_none},
    std::{
        fs::{File, OpenOptions},
        os::unix::{
            fs::OpenOptionsExt,
            io::{AsRawFd, RawFd},
        },
    },
    sys::*,
};

/// One open demux handle. Per-PID mode holds one of these per joined
/// PID; budget mode holds a single handle filtering PID 8192.
#[derive(Debug)]
pub struct DmxDevice {
    file: File,
    pid: u16,
}

impl AsRawFd for DmxDevice {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl DmxDevice {
    /// Opens `/dev/dvb/adapterN/demuxM` and installs an immediately
    /// started PID filter routed to the DVR device.
    pub fn open_pid(adapter: u32, device: u32, pid: u16) -> Result<Self> {
        let path = format!("/dev/dvb/adapter{}/demux{}", adapter, device);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(::nix::libc::O_NONBLOCK)
            .open(&path)
            .with_context(|| format!("DMX: failed to open device {}", &path))?;

        let dmx = DmxDevice { file, pid };
        dmx.set_pes_filter(&DmxPesFilterParams {
            pid,
            input: DMX_IN_FRONTEND,
            output: DMX_OUT_TS_TAP,
            pes_type: DMX_PES_OTHER,
            flags: DmxFilterFlags::DMX_IMMEDIATE_START,
        })?;

        Ok(dmx)
    }

    #[inline]
    pub fn pid(&self) -> u16 {
        self.pid
    }

    /// Installs a PID-only filter.
    pub fn set_pes_filter(&self, filter: &DmxPesFilterParams) -> Result<()> {
        // DMX_SET_PES_FILTER
        ioctl_write_ptr!(
            #[inline]
            ioctl_call,
            b'o',
            44,
            DmxPesFilterParams
        );

        unsafe { ioctl_call(self.as_raw_fd(), filter as *const _) }
            .context("DMX: set PES filter")?;

        Ok(())
    }

    /// Resizes the driver's circular buffer (default 2 * 4096).
    pub fn set_buffer_size(&self, size: u32) -> Result<()> {
        // DMX_SET_BUFFER_SIZE
        ioctl_write_int_bad!(
            #[inline]
            ioctl_call,
            request_code_none!(b'o', 45)
        );

        unsafe { ioctl_call(self.as_raw_fd(), size as _) }.context("DMX: set buffer size")?;

        Ok(())
    }

    pub fn start(&self) -> Result<()> {
        // DMX_START
        ioctl_none_bad!(
            #[inline]
            ioctl_call,
            request_code_none!(b'o', 41)
        );

        unsafe { ioctl_call(self.as_raw_fd()) }.context("DMX: start")?;

        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        // DMX_STOP
        ioctl_none_bad!(
            #[inline]
            ioctl_call,
            request_code_none!(b'o', 42)
        );

        unsafe { ioctl_call(self.as_raw_fd()) }.context("DMX: stop")?;

        Ok(())
    }

    /// DMX_STOP followed by DMX_START to flush stale driver data
    /// after a retune or a section change.
    pub fn bounce(&self) -> Result<()> {
        self.stop()?;
        self.start()
    }
}
