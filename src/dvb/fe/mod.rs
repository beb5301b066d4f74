mod status;
pub mod sys;

use crate::dtv_property;

use {
    anyhow::{Context, Result},
    nix::{ioctl_read, ioctl_write_int_bad, ioctl_write_ptr, request_code_none},
    std::{
        ffi::CStr,
        fmt,
        fs::{File, OpenOptions},
        ops::Range,
        os::unix::{
            fs::{FileTypeExt, OpenOptionsExt},
            io::{AsRawFd, RawFd},
        },
        thread,
        time::Duration,
    },
    sys::*,
};

pub use status::FeStatus;

#[macro_export]
macro_rules! get_dtv_properties {
    ( $device:expr, $( $property:ident ),+ ) => { (|| -> ::anyhow::Result<_> {
        let mut input = [ $( $property($crate::dvb::fe::sys::DtvPropertyRequest::default()), )* ];
        ::anyhow::Context::context($device.get_properties(&mut input), "Error fetching properties")?;
        let mut iterator = input.iter();
        Ok((
            $(
                ::anyhow::Context::with_context(match iterator.next() {
                    Some($property(d)) => $crate::dvb::fe::sys::WrappedResult::get(d),
                    _ => ::anyhow::Result::Err(::anyhow::anyhow!("Missing value")),
                }, || format!("Error unpacking {}", stringify!($property)))?,
            )*
        ))
    })()}
}

#[macro_export]
macro_rules! set_dtv_properties {
    ( $device:expr, $( $property:ident($data:expr) ),+ ) => {
        $device.set_properties(&[
            $( $crate::dtv_property!($property($data)), )*
        ])
    };
}

/// Horizontal/left maps to 18V, vertical/right to 13V.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unicable {
    /// user band (SCR), 1-based
    pub scr: u8,
    /// user band centre frequency, MHz
    pub frequency_mhz: u32,
}

/// Typed tuning request for one transponder/multiplex. Frequencies
/// are kHz for satellite and Hz for terrestrial/cable/ATSC, matching
/// what the driver expects.
#[derive(Debug, Clone)]
pub struct TuneParams {
    pub delivery: fe_delivery_system,
    pub frequency: u32,
    pub symbolrate: u32,
    pub fec: fe_code_rate,
    pub modulation: Option<fe_modulation>,
    pub rolloff: fe_rolloff,
    pub stream_id: Option<u32>,

    // satellite
    pub polarity: Polarity,
    /// low-band local oscillator, kHz
    pub lof1: u32,
    /// high-band local oscillator, kHz
    pub lof2: u32,
    /// band switch frequency, kHz
    pub slof: u32,
    /// committed switch port 0 (off) .. 4
    pub diseqc: u8,
    pub unicable: Option<Unicable>,
    /// shared LNB: never drive voltage/tone
    pub lnb_sharing: bool,

    // terrestrial
    pub bandwidth_hz: u32,
    pub guard_interval: fe_guard_interval,
    pub transmission_mode: fe_transmit_mode,
    pub hierarchy: fe_hierarchy,
}

impl Default for TuneParams {
    fn default() -> Self {
        TuneParams {
            delivery: SYS_UNDEFINED,
            frequency: 0,
            symbolrate: 0,
            fec: FEC_AUTO,
            modulation: None,
            rolloff: ROLLOFF_35,
            stream_id: None,
            polarity: Polarity::Horizontal,
            lof1: 9_750_000,
            lof2: 10_600_000,
            slof: 11_700_000,
            diseqc: 0,
            unicable: None,
            lnb_sharing: false,
            bandwidth_hz: 0,
            guard_interval: GUARD_INTERVAL_AUTO,
            transmission_mode: TRANSMISSION_MODE_AUTO,
            hierarchy: HIERARCHY_AUTO,
        }
    }
}

/// Result of the satellite band/switch computation: everything that
/// has to happen on the wire before DTV_TUNE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LnbPlan {
    /// intermediate frequency handed to the driver, kHz
    pub frequency: u32,
    pub hiband: bool,
    pub voltage: fe_sec_voltage,
    pub tone: fe_sec_tone_mode,
    /// committed-switch master command, when diseqc > 0
    pub diseqc_cmd: Option<[u8; 4]>,
    pub burst: Option<fe_sec_mini_cmd>,
    /// ODU_channel_change message, when unicable is configured
    pub unicable_cmd: Option<[u8; 5]>,
}

impl TuneParams {
    /// Computes band, LNB supply and switch messages for a satellite
    /// tune. Pure; the ioctl sequencing lives in [`FeDevice::tune`].
    pub fn lnb_plan(&self) -> LnbPlan {
        let hiband = self.slof != 0 && self.lof2 != 0 && self.frequency > self.slof;
        let frequency = if hiband {
            self.frequency - self.lof2
        } else if self.frequency < self.lof1 {
            self.lof1 - self.frequency
        } else {
            self.frequency - self.lof1
        };

        let (voltage, tone) = if self.lnb_sharing {
            (SEC_VOLTAGE_OFF, SEC_TONE_OFF)
        } else {
            let voltage = match self.polarity {
                Polarity::Vertical => SEC_VOLTAGE_13,
                Polarity::Horizontal => SEC_VOLTAGE_18,
            };
            let tone = if hiband { SEC_TONE_ON } else { SEC_TONE_OFF };
            (voltage, tone)
        };

        let mut plan = LnbPlan {
            frequency,
            hiband,
            voltage,
            tone,
            diseqc_cmd: None,
            burst: None,
            unicable_cmd: None,
        };

        if let Some(uni) = self.unicable {
            let t = (frequency / 1000 + uni.frequency_mhz + 2) / 4;
            let t_field = t.saturating_sub(350) as u16;
            plan.frequency = t * 4000 - frequency;
            plan.unicable_cmd = Some([
                0xE0,
                0x10,
                0x5A,
                ((t_field >> 8) as u8)
                    | ((uni.scr.saturating_sub(1)) << 5)
                    | (((voltage == SEC_VOLTAGE_18) as u8) << 3)
                    | (((tone == SEC_TONE_ON) as u8) << 2),
                t_field as u8,
            ]);
        } else if self.diseqc > 0 && voltage != SEC_VOLTAGE_OFF {
            plan.diseqc_cmd = Some([
                0xE0,
                0x10,
                0x38,
                0xF0 | ((self.diseqc - 1) << 2)
                    | (((voltage == SEC_VOLTAGE_18) as u8) << 1)
                    | (tone == SEC_TONE_ON) as u8,
            ]);
            plan.burst = Some(if (self.diseqc - 1) & 1 != 0 {
                SEC_MINI_B
            } else {
                SEC_MINI_A
            });
        }

        plan
    }
}

/// A reference to the frontend device and device information
#[derive(Debug)]
pub struct FeDevice {
    adapter: u32,
    device: u32,

    file: File,

    api_version: u16,

    name: String,
    delivery_system_list: Vec<fe_delivery_system>,
    frequency_range: Range<u32>,
    symbolrate_range: Range<u32>,
    caps: fe_caps,
}

impl fmt::Display for FeDevice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "DVB API: {}.{}",
            self.api_version >> 8,
            self.api_version & 0xFF
        )?;
        writeln!(f, "Frontend: {}", self.name)?;

        write!(f, "Delivery system:")?;
        for v in &self.delivery_system_list {
            write!(f, " {}", v)?;
        }
        writeln!(f)?;

        write!(f, "Frontend capabilities: 0x{:08x}", self.caps)
    }
}

impl AsRawFd for FeDevice {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

const SWITCH_DELAY: Duration = Duration::from_millis(15);

impl FeDevice {
    fn open_internal(adapter: u32, device: u32, is_write: bool) -> Result<FeDevice> {
        let path = format!("/dev/dvb/adapter{}/frontend{}", adapter, device);
        let file = OpenOptions::new()
            .read(true)
            .write(is_write)
            .custom_flags(::nix::libc::O_NONBLOCK)
            .open(&path)
            .with_context(|| format!("FE: failed to open device {}", &path))?;

        let mut fe = FeDevice {
            adapter,
            device,
            file,
            api_version: 0,
            name: String::default(),
            delivery_system_list: Vec::default(),
            frequency_range: 0..0,
            symbolrate_range: 0..0,
            caps: fe_caps::FE_IS_STUPID,
        };

        fe.get_info()?;

        Ok(fe)
    }

    /// Attempts to open frontend device in read-only mode
    #[inline]
    pub fn open_ro(adapter: u32, device: u32) -> Result<FeDevice> {
        Self::open_internal(adapter, device, false)
    }

    /// Attempts to open frontend device in read-write mode
    #[inline]
    pub fn open_rw(adapter: u32, device: u32) -> Result<FeDevice> {
        Self::open_internal(adapter, device, true)
    }

    fn get_info(&mut self) -> Result<()> {
        let mut feinfo = FeInfo::default();

        // FE_GET_INFO
        ioctl_read!(
            #[inline]
            ioctl_call,
            b'o',
            61,
            FeInfo
        );
        unsafe { ioctl_call(self.as_raw_fd(), &mut feinfo as *mut _) }.context("FE: get info")?;

        if let Some(len) = feinfo.name.iter().position(|&b| b == 0) {
            let name = unsafe { CStr::from_ptr(feinfo.name[..len + 1].as_ptr()) };
            if let Ok(name) = name.to_str() {
                self.name = name.to_owned();
            }
        }

        self.frequency_range = feinfo.frequency_min..feinfo.frequency_max;
        self.symbolrate_range = feinfo.symbol_rate_min..feinfo.symbol_rate_max;
        self.caps = feinfo.caps;

        let (api_version, enum_delsys) =
            get_dtv_properties!(self, DTV_API_VERSION, DTV_ENUM_DELSYS)
                .context("FE: get api version (deprecated driver)")?;

        self.api_version = api_version as u16;
        self.delivery_system_list = enum_delsys;

        let metadata = self.file.metadata().context("FE: get device metadata")?;
        ensure!(
            metadata.file_type().is_char_device(),
            "FE: path is not to char device"
        );

        Ok(())
    }

    fn check_properties(&self, cmdseq: &[DtvProperty]) -> Result<()> {
        for p in cmdseq {
            match p {
                DTV_FREQUENCY(d) => {
                    ensure!(
                        self.frequency_range.contains(&d.get()?),
                        "FE: frequency out of range"
                    );
                }
                DTV_SYMBOL_RATE(d) => {
                    ensure!(
                        self.symbolrate_range.contains(&d.get()?),
                        "FE: symbolrate out of range"
                    );
                }
                DTV_INVERSION(d) => {
                    if d.get()? == INVERSION_AUTO {
                        ensure!(
                            self.caps.contains(fe_caps::FE_CAN_INVERSION_AUTO),
                            "FE: auto inversion is not available"
                        );
                    }
                }
                DTV_TRANSMISSION_MODE(d) => {
                    if d.get()? == TRANSMISSION_MODE_AUTO {
                        ensure!(
                            self.caps.contains(fe_caps::FE_CAN_TRANSMISSION_MODE_AUTO),
                            "FE: no auto transmission mode"
                        );
                    }
                }
                DTV_GUARD_INTERVAL(d) => {
                    if d.get()? == GUARD_INTERVAL_AUTO {
                        ensure!(
                            self.caps.contains(fe_caps::FE_CAN_GUARD_INTERVAL_AUTO),
                            "FE: no auto guard interval"
                        );
                    }
                }
                DTV_HIERARCHY(d) => {
                    if d.get()? == HIERARCHY_AUTO {
                        ensure!(
                            self.caps.contains(fe_caps::FE_CAN_HIERARCHY_AUTO),
                            "FE: no auto hierarchy"
                        );
                    }
                }
                DTV_STREAM_ID(..) => {
                    ensure!(
                        self.caps.contains(fe_caps::FE_CAN_MULTISTREAM),
                        "FE: no multistream"
                    );
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Sets properties on frontend device
    pub fn set_properties(&self, cmdseq: &[DtvProperty]) -> Result<()> {
        self.check_properties(cmdseq)?;

        #[repr(C)]
        pub struct DtvProperties {
            num: u32,
            props: *const DtvProperty,
        }

        let cmd = DtvProperties {
            num: cmdseq.len() as u32,
            props: cmdseq.as_ptr(),
        };

        // FE_SET_PROPERTY
        ioctl_write_ptr!(
            #[inline]
            ioctl_call,
            b'o',
            82,
            DtvProperties
        );
        unsafe { ioctl_call(self.as_raw_fd(), &cmd as *const _) }.context("FE: set properties")?;

        Ok(())
    }

    /// Gets properties from frontend device
    pub fn get_properties(&self, cmdseq: &mut [DtvProperty]) -> Result<()> {
        #[repr(C)]
        pub struct DtvProperties {
            num: u32,
            props: *mut DtvProperty,
        }

        let mut cmd = DtvProperties {
            num: cmdseq.len() as u32,
            props: cmdseq.as_mut_ptr(),
        };

        // FE_GET_PROPERTY
        ioctl_read!(
            #[inline]
            ioctl_call,
            b'o',
            83,
            DtvProperties
        );
        unsafe { ioctl_call(self.as_raw_fd(), &mut cmd as *mut _) }
            .context("FE: get properties")?;

        Ok(())
    }

    /// Returns a frontend event if available
    pub fn get_event(&self, event: &mut FeEvent) -> Result<()> {
        // FE_GET_EVENT
        ioctl_read!(
            #[inline]
            ioctl_call,
            b'o',
            78,
            FeEvent
        );
        unsafe { ioctl_call(self.as_raw_fd(), event as *mut _) }.context("FE: get event")?;

        Ok(())
    }

    /// Reads the frontend status word
    pub fn read_status(&self) -> Result<fe_status> {
        let mut result: u32 = 0;

        // FE_READ_STATUS
        ioctl_read!(
            #[inline]
            ioctl_call,
            b'o',
            69,
            u32
        );
        unsafe { ioctl_call(self.as_raw_fd(), &mut result as *mut _) }
            .context("FE: read status")?;

        fe_status::from_bits(result).context("FE: invalid status")
    }

    /// Relative signal strength (DVBv3 fallback)
    pub fn read_signal_strength(&self) -> Result<u16> {
        let mut result: u16 = 0;

        // FE_READ_SIGNAL_STRENGTH
        ioctl_read!(
            #[inline]
            ioctl_call,
            b'o',
            71,
            u16
        );
        unsafe { ioctl_call(self.as_raw_fd(), &mut result as *mut _) }
            .context("FE: read signal strength")?;

        Ok(result)
    }

    /// Relative signal-to-noise ratio (DVBv3 fallback)
    pub fn read_snr(&self) -> Result<u16> {
        let mut result: u16 = 0;

        // FE_READ_SNR
        ioctl_read!(
            #[inline]
            ioctl_call,
            b'o',
            72,
            u16
        );
        unsafe { ioctl_call(self.as_raw_fd(), &mut result as *mut _) }.context("FE: read snr")?;

        Ok(result)
    }

    /// Bit error counter (DVBv3 fallback)
    pub fn read_ber(&self) -> Result<u64> {
        let mut result: u32 = 0;

        // FE_READ_BER
        ioctl_read!(
            #[inline]
            ioctl_call,
            b'o',
            70,
            u32
        );
        unsafe { ioctl_call(self.as_raw_fd(), &mut result as *mut _) }.context("FE: read ber")?;

        Ok(result as u64)
    }

    /// Uncorrected blocks counter (DVBv3 fallback)
    pub fn read_unc(&self) -> Result<u64> {
        let mut result: u32 = 0;

        // FE_READ_UNCORRECTED_BLOCKS
        ioctl_read!(
            #[inline]
            ioctl_call,
            b'o',
            73,
            u32
        );
        unsafe { ioctl_call(self.as_raw_fd(), &mut result as *mut _) }
            .context("FE: read uncorrected blocks")?;

        Ok(result as u64)
    }

    /// Turns the continuous 22kHz tone on or off
    pub fn set_tone(&self, value: fe_sec_tone_mode) -> Result<()> {
        // FE_SET_TONE
        ioctl_write_int_bad!(
            #[inline]
            ioctl_call,
            request_code_none!(b'o', 66)
        );

        unsafe { ioctl_call(self.as_raw_fd(), value as _) }.context("FE: set tone")?;

        Ok(())
    }

    /// Sets the DC voltage level for the LNB
    pub fn set_voltage(&self, value: fe_sec_voltage) -> Result<()> {
        // FE_SET_VOLTAGE
        ioctl_write_int_bad!(
            #[inline]
            ioctl_call,
            request_code_none!(b'o', 67)
        );

        unsafe { ioctl_call(self.as_raw_fd(), value as _) }.context("FE: set voltage")?;

        Ok(())
    }

    /// Sends a DiSEqC master command of up to 6 bytes
    pub fn diseqc_master_cmd(&self, msg: &[u8]) -> Result<()> {
        let mut cmd = DiseqcMasterCmd::default();
        debug_assert!(msg.len() <= cmd.msg.len());

        cmd.msg[0..msg.len()].copy_from_slice(msg);
        cmd.len = msg.len() as u8;

        // FE_DISEQC_SEND_MASTER_CMD
        ioctl_write_ptr!(ioctl_call, b'o', 63, DiseqcMasterCmd);
        unsafe { ioctl_call(self.as_raw_fd(), &cmd as *const _) }
            .context("FE: diseqc master cmd")?;

        Ok(())
    }

    /// Sends a mini-DiSEqC burst to select satellite A or B
    pub fn diseqc_burst(&self, value: fe_sec_mini_cmd) -> Result<()> {
        // FE_DISEQC_SEND_BURST
        ioctl_write_int_bad!(
            #[inline]
            ioctl_call,
            request_code_none!(b'o', 65)
        );

        unsafe { ioctl_call(self.as_raw_fd(), value as _) }.context("FE: diseqc burst")?;

        Ok(())
    }

    /// Clears frontend settings and drains the event queue
    pub fn clear(&self) -> Result<()> {
        set_dtv_properties!(
            self,
            DTV_VOLTAGE(SEC_VOLTAGE_OFF),
            DTV_TONE(SEC_TONE_OFF),
            DTV_CLEAR(())
        )
        .context("FE: clear")?;

        let mut event = FeEvent::default();
        for _ in 0..FE_MAX_EVENT {
            if self.get_event(&mut event).is_err() {
                break;
            }
        }

        Ok(())
    }

    /// Drives the committed switch: tone off, select voltage, master
    /// command, burst, then the band tone.
    fn diseqc_setup(&self, plan: &LnbPlan) -> Result<()> {
        self.set_tone(SEC_TONE_OFF)?;
        self.set_voltage(plan.voltage)?;
        thread::sleep(SWITCH_DELAY);

        if let Some(cmd) = &plan.diseqc_cmd {
            self.diseqc_master_cmd(cmd)?;
            thread::sleep(SWITCH_DELAY);
        }
        if let Some(burst) = plan.burst {
            self.diseqc_burst(burst)?;
            thread::sleep(SWITCH_DELAY);
        }

        self.set_tone(plan.tone)?;
        Ok(())
    }

    /// Single ODU_channel_change with the tuner briefly at 18V.
    fn unicable_setup(&self, plan: &LnbPlan) -> Result<()> {
        let cmd = plan.unicable_cmd.as_ref().unwrap();
        self.set_voltage(SEC_VOLTAGE_18)?;
        thread::sleep(SWITCH_DELAY);
        self.diseqc_master_cmd(cmd)?;
        thread::sleep(Duration::from_millis(50));
        self.set_voltage(SEC_VOLTAGE_13)?;
        Ok(())
    }

    fn tune_sat(&self, params: &TuneParams) -> Result<()> {
        let plan = params.lnb_plan();

        if plan.unicable_cmd.is_some() {
            self.unicable_setup(&plan)?;
        } else if plan.diseqc_cmd.is_some() {
            self.diseqc_setup(&plan)?;
        }

        let mut cmdseq = vec![
            dtv_property!(DTV_DELIVERY_SYSTEM(params.delivery)),
            dtv_property!(DTV_FREQUENCY(plan.frequency)),
            dtv_property!(DTV_SYMBOL_RATE(params.symbolrate)),
            dtv_property!(DTV_INNER_FEC(params.fec)),
            dtv_property!(DTV_INVERSION(INVERSION_AUTO)),
        ];
        if let Some(modulation) = params.modulation {
            cmdseq.push(dtv_property!(DTV_MODULATION(modulation)));
        }
        if params.delivery == SYS_DVBS2 {
            cmdseq.push(dtv_property!(DTV_ROLLOFF(params.rolloff)));
            cmdseq.push(dtv_property!(DTV_PILOT(PILOT_AUTO)));
        }
        if let Some(stream_id) = params.stream_id {
            cmdseq.push(dtv_property!(DTV_STREAM_ID(stream_id)));
        }
        if plan.diseqc_cmd.is_none() && plan.unicable_cmd.is_none() {
            cmdseq.push(dtv_property!(DTV_VOLTAGE(plan.voltage)));
            cmdseq.push(dtv_property!(DTV_TONE(plan.tone)));
        }
        cmdseq.push(dtv_property!(DTV_TUNE(())));

        self.set_properties(&cmdseq)
    }

    fn tune_terrestrial(&self, params: &TuneParams) -> Result<()> {
        let mut cmdseq = vec![
            dtv_property!(DTV_DELIVERY_SYSTEM(params.delivery)),
            dtv_property!(DTV_FREQUENCY(params.frequency)),
            dtv_property!(DTV_INVERSION(INVERSION_AUTO)),
            dtv_property!(DTV_BANDWIDTH_HZ(params.bandwidth_hz)),
            dtv_property!(DTV_CODE_RATE_HP(FEC_AUTO)),
            dtv_property!(DTV_CODE_RATE_LP(FEC_AUTO)),
            dtv_property!(DTV_GUARD_INTERVAL(params.guard_interval)),
            dtv_property!(DTV_TRANSMISSION_MODE(params.transmission_mode)),
            dtv_property!(DTV_HIERARCHY(params.hierarchy)),
        ];
        if let Some(modulation) = params.modulation {
            cmdseq.push(dtv_property!(DTV_MODULATION(modulation)));
        }
        if let Some(stream_id) = params.stream_id {
            cmdseq.push(dtv_property!(DTV_STREAM_ID(stream_id)));
        }
        cmdseq.push(dtv_property!(DTV_TUNE(())));

        self.set_properties(&cmdseq)
    }

    fn tune_cable(&self, params: &TuneParams) -> Result<()> {
        let mut cmdseq = vec![
            dtv_property!(DTV_DELIVERY_SYSTEM(params.delivery)),
            dtv_property!(DTV_FREQUENCY(params.frequency)),
            dtv_property!(DTV_INVERSION(INVERSION_AUTO)),
            dtv_property!(DTV_SYMBOL_RATE(params.symbolrate)),
            dtv_property!(DTV_INNER_FEC(params.fec)),
        ];
        if let Some(modulation) = params.modulation {
            cmdseq.push(dtv_property!(DTV_MODULATION(modulation)));
        }
        cmdseq.push(dtv_property!(DTV_TUNE(())));

        self.set_properties(&cmdseq)
    }

    fn tune_atsc(&self, params: &TuneParams) -> Result<()> {
        let mut cmdseq = vec![
            dtv_property!(DTV_DELIVERY_SYSTEM(params.delivery)),
            dtv_property!(DTV_FREQUENCY(params.frequency)),
            dtv_property!(DTV_INVERSION(INVERSION_AUTO)),
        ];
        if let Some(modulation) = params.modulation {
            cmdseq.push(dtv_property!(DTV_MODULATION(modulation)));
        }
        cmdseq.push(dtv_property!(DTV_TUNE(())));

        self.set_properties(&cmdseq)
    }

    /// Clears the frontend and applies the full tuning sequence for
    /// the configured delivery system.
    pub fn tune(&self, params: &TuneParams) -> Result<()> {
        self.clear()?;

        match params.delivery {
            SYS_DVBS | SYS_DVBS2 | SYS_TURBO => self.tune_sat(params),
            SYS_DVBT | SYS_DVBT2 => self.tune_terrestrial(params),
            SYS_DVBC_ANNEX_A | SYS_DVBC_ANNEX_B | SYS_DVBC_ANNEX_C | SYS_DVBC2 => {
                self.tune_cable(params)
            }
            SYS_ATSC => self.tune_atsc(params),
            other => Err(anyhow!("FE: unsupported delivery system {}", other)),
        }
    }

    #[inline]
    pub fn get_api_version(&self) -> u16 {
        self.api_version
    }

    #[inline]
    pub fn get_name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn get_delivery_system_list(&self) -> &[fe_delivery_system] {
        &self.delivery_system_list
    }

    #[inline]
    pub fn get_caps(&self) -> fe_caps {
        self.caps
    }

    #[inline]
    pub fn adapter(&self) -> u32 {
        self.adapter
    }

    #[inline]
    pub fn device(&self) -> u32 {
        self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sat(diseqc: u8, polarity: Polarity, frequency: u32) -> TuneParams {
        TuneParams {
            delivery: SYS_DVBS2,
            frequency,
            symbolrate: 27_500_000,
            polarity,
            diseqc,
            ..TuneParams::default()
        }
    }

    #[test]
    fn low_band_vertical_port_two() {
        // port 2, vertical, below the band switch: 13V, no tone,
        // committed-switch byte 0xF4
        let plan = sat(2, Polarity::Vertical, 11_045_000).lnb_plan();
        assert!(!plan.hiband);
        assert_eq!(plan.voltage, SEC_VOLTAGE_13);
        assert_eq!(plan.tone, SEC_TONE_OFF);
        assert_eq!(plan.frequency, 11_045_000 - 9_750_000);
        assert_eq!(plan.diseqc_cmd, Some([0xE0, 0x10, 0x38, 0xF4]));
        assert_eq!(plan.burst, Some(SEC_MINI_B));
    }

    #[test]
    fn high_band_adds_tone_bit() {
        let plan = sat(2, Polarity::Vertical, 12_245_000).lnb_plan();
        assert!(plan.hiband);
        assert_eq!(plan.frequency, 12_245_000 - 10_600_000);
        assert_eq!(plan.tone, SEC_TONE_ON);
        assert_eq!(plan.diseqc_cmd, Some([0xE0, 0x10, 0x38, 0xF5]));
    }

    #[test]
    fn diseqc_zero_emits_no_frame() {
        // no switch configured means no switch traffic
        let plan = sat(0, Polarity::Horizontal, 11_045_000).lnb_plan();
        assert_eq!(plan.diseqc_cmd, None);
        assert_eq!(plan.burst, None);
        assert_eq!(plan.voltage, SEC_VOLTAGE_18);
    }

    #[test]
    fn port_parity_selects_burst() {
        for (port, burst) in [
            (1u8, SEC_MINI_A),
            (2, SEC_MINI_B),
            (3, SEC_MINI_A),
            (4, SEC_MINI_B),
        ] {
            let plan = sat(port, Polarity::Horizontal, 11_045_000).lnb_plan();
            assert_eq!(plan.burst, Some(burst), "port {}", port);
        }
    }

    #[test]
    fn lnb_sharing_keeps_supply_off() {
        let mut params = sat(2, Polarity::Vertical, 12_245_000);
        params.lnb_sharing = true;
        let plan = params.lnb_plan();
        assert_eq!(plan.voltage, SEC_VOLTAGE_OFF);
        assert_eq!(plan.tone, SEC_TONE_OFF);
        assert_eq!(plan.diseqc_cmd, None);
    }

    #[test]
    fn unicable_channel_change_message() {
        let mut params = sat(0, Polarity::Vertical, 12_245_000);
        params.unicable = Some(Unicable {
            scr: 1,
            frequency_mhz: 1400,
        });
        let plan = params.lnb_plan();
        let cmd = plan.unicable_cmd.unwrap();
        assert_eq!(&cmd[..3], &[0xE0, 0x10, 0x5A]);
        // IF 1645 MHz, user band 1400 MHz: t = (1645+1400+2)/4 = 761
        let t = 761u16 - 350;
        assert_eq!(cmd[3] & 0x03, (t >> 8) as u8);
        assert_eq!(cmd[4], t as u8);
        // SCR 1 occupies bits 5..7 as zero
        assert_eq!(cmd[3] >> 5, 0);
        assert_eq!(plan.frequency, 761 * 4000 - 1_645_000);
    }

    #[test]
    fn inverted_c_band_offset() {
        // below LOF1 the IF is mirrored
        let params = TuneParams {
            delivery: SYS_DVBS,
            frequency: 3_675_000,
            lof1: 5_150_000,
            lof2: 0,
            slof: 0,
            ..TuneParams::default()
        };
        let plan = params.lnb_plan();
        assert!(!plan.hiband);
        assert_eq!(plan.frequency, 5_150_000 - 3_675_000);
    }
}
