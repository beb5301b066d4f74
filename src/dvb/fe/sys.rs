//! Raw DVB-API v5 frontend ABI: parameter enums, property requests
//! and the structures handed to ioctls.

use std::fmt::{self, Debug};
use std::mem;
use std::str::FromStr;

use anyhow::Context;
use bitflags::bitflags;
use strum::{Display, EnumString, FromRepr};

pub use {
    fe_code_rate::*, fe_delivery_system::*, fe_guard_interval::*, fe_hierarchy::*,
    fe_modulation::*, fe_pilot::*, fe_rolloff::*, fe_sec_mini_cmd::*, fe_sec_tone_mode::*,
    fe_sec_voltage::*, fe_spectral_inversion::*, fe_transmit_mode::*, DtvProperty::*,
};

bitflags! {
    /// Frontend capabilities reported by FE_GET_INFO
    #[repr(C)]
    pub struct fe_caps : u32 {
        const FE_IS_STUPID = 0x0;
        const FE_CAN_INVERSION_AUTO = 0x1;
        const FE_CAN_FEC_AUTO = 0x200;
        const FE_CAN_QAM_AUTO = 0x10000;
        const FE_CAN_TRANSMISSION_MODE_AUTO = 0x20000;
        const FE_CAN_BANDWIDTH_AUTO = 0x40000;
        const FE_CAN_GUARD_INTERVAL_AUTO = 0x80000;
        const FE_CAN_HIERARCHY_AUTO = 0x100000;
        const FE_CAN_8VSB = 0x200000;
        const FE_CAN_16VSB = 0x400000;
        const FE_HAS_EXTENDED_CAPS = 0x800000;
        const FE_CAN_MULTISTREAM = 0x4000000;
        const FE_CAN_TURBO_FEC = 0x8000000;
        const FE_CAN_2G_MODULATION = 0x10000000;
        const FE_CAN_RECOVER = 0x40000000;
        const FE_CAN_MUTE_TS = 0x80000000;
    }
}

bitflags! {
    /// Frontend status word
    #[repr(C)]
    pub struct fe_status : u32 {
        const FE_NONE = 0x00;
        /// Found something above the noise level
        const FE_HAS_SIGNAL = 0x01;
        /// Found a carrier
        const FE_HAS_CARRIER = 0x02;
        /// FEC inner coding is stable
        const FE_HAS_VITERBI = 0x04;
        /// Synchronization bytes found
        const FE_HAS_SYNC = 0x08;
        /// Everything is working
        const FE_HAS_LOCK = 0x10;
        /// No lock within the last about 2 seconds
        const FE_TIMEDOUT = 0x20;
        /// Frontend was reinitialized; reset DiSEqC, tone and parameters
        const FE_REINIT = 0x40;
    }
}

/// Frontend properties reported by FE_GET_INFO. Frequencies are Hz
/// for terrestrial/cable systems and kHz for satellite.
#[repr(C)]
#[derive(Debug)]
pub struct FeInfo {
    pub name: [std::os::raw::c_char; 128],
    /// DVBv3 frontend type, deprecated
    pub fe_type: u32,
    pub frequency_min: u32,
    pub frequency_max: u32,
    pub frequency_stepsize: u32,
    pub frequency_tolerance: u32,
    pub symbol_rate_min: u32,
    pub symbol_rate_max: u32,
    pub symbol_rate_tolerance: u32,
    pub notifier_delay: u32,
    pub caps: fe_caps,
}

impl Default for FeInfo {
    #[inline]
    fn default() -> Self {
        unsafe { mem::zeroed::<Self>() }
    }
}

/// DiSEqC master command: 3-byte header (framing, address, command)
/// plus up to 3 bytes of data.
#[repr(C)]
#[derive(Debug)]
pub struct DiseqcMasterCmd {
    pub msg: [u8; 6],
    /// valid values are 3 to 6
    pub len: u8,
}

impl Default for DiseqcMasterCmd {
    #[inline]
    fn default() -> Self {
        unsafe { mem::zeroed::<Self>() }
    }
}

#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(EnumString, Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
pub enum fe_sec_voltage {
    /// 13V: vertical linear, right circular
    SEC_VOLTAGE_13 = 0,
    /// 18V: horizontal linear, left circular
    SEC_VOLTAGE_18 = 1,
    /// LNB power supply off (shared LNB)
    SEC_VOLTAGE_OFF = 2,
}

#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(EnumString, Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
pub enum fe_sec_tone_mode {
    SEC_TONE_ON = 0,
    SEC_TONE_OFF = 1,
}

#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
pub enum fe_sec_mini_cmd {
    SEC_MINI_A = 0,
    SEC_MINI_B = 1,
}

#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(EnumString, Debug, PartialEq, Eq, FromRepr, Clone, Copy)]
pub enum fe_spectral_inversion {
    #[strum(serialize = "OFF")]
    INVERSION_OFF = 0,
    #[strum(serialize = "ON")]
    INVERSION_ON = 1,
    #[strum(serialize = "AUTO")]
    INVERSION_AUTO = 2,
}

#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(EnumString, Debug, PartialEq, Eq, FromRepr, Clone, Copy)]
#[strum(ascii_case_insensitive)]
pub enum fe_code_rate {
    #[strum(serialize = "NONE")]
    FEC_NONE = 0,
    #[strum(serialize = "1/2")]
    FEC_1_2 = 1,
    #[strum(serialize = "2/3")]
    FEC_2_3 = 2,
    #[strum(serialize = "3/4")]
    FEC_3_4 = 3,
    #[strum(serialize = "4/5")]
    FEC_4_5 = 4,
    #[strum(serialize = "5/6")]
    FEC_5_6 = 5,
    #[strum(serialize = "6/7")]
    FEC_6_7 = 6,
    #[strum(serialize = "7/8")]
    FEC_7_8 = 7,
    #[strum(serialize = "8/9")]
    FEC_8_9 = 8,
    #[strum(serialize = "AUTO")]
    FEC_AUTO = 9,
    #[strum(serialize = "3/5")]
    FEC_3_5 = 10,
    #[strum(serialize = "9/10")]
    FEC_9_10 = 11,
    #[strum(serialize = "2/5")]
    FEC_2_5 = 12,
}

#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(EnumString, Debug, PartialEq, Eq, FromRepr, Copy, Clone)]
pub enum fe_modulation {
    QPSK = 0,
    #[strum(serialize = "QAM/16")]
    QAM_16 = 1,
    #[strum(serialize = "QAM/32")]
    QAM_32 = 2,
    #[strum(serialize = "QAM/64")]
    QAM_64 = 3,
    #[strum(serialize = "QAM/128")]
    QAM_128 = 4,
    #[strum(serialize = "QAM/256")]
    QAM_256 = 5,
    #[strum(serialize = "QAM/AUTO")]
    QAM_AUTO = 6,
    #[strum(serialize = "VSB/8")]
    VSB_8 = 7,
    #[strum(serialize = "VSB/16")]
    VSB_16 = 8,
    #[strum(serialize = "PSK/8")]
    PSK_8 = 9,
    #[strum(serialize = "APSK/16")]
    APSK_16 = 10,
    #[strum(serialize = "APSK/32")]
    APSK_32 = 11,
    #[strum(serialize = "DQPSK")]
    DQPSK = 12,
}

#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(EnumString, Debug, PartialEq, Eq, FromRepr, Copy, Clone)]
pub enum fe_transmit_mode {
    #[strum(serialize = "2K")]
    TRANSMISSION_MODE_2K = 0,
    #[strum(serialize = "8K")]
    TRANSMISSION_MODE_8K = 1,
    #[strum(serialize = "AUTO")]
    TRANSMISSION_MODE_AUTO = 2,
    #[strum(serialize = "4K")]
    TRANSMISSION_MODE_4K = 3,
    #[strum(serialize = "1K")]
    TRANSMISSION_MODE_1K = 4,
    #[strum(serialize = "16K")]
    TRANSMISSION_MODE_16K = 5,
    #[strum(serialize = "32K")]
    TRANSMISSION_MODE_32K = 6,
}

#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(EnumString, Debug, PartialEq, Eq, FromRepr, Copy, Clone)]
pub enum fe_guard_interval {
    #[strum(serialize = "1/32")]
    GUARD_INTERVAL_1_32 = 0,
    #[strum(serialize = "1/16")]
    GUARD_INTERVAL_1_16 = 1,
    #[strum(serialize = "1/8")]
    GUARD_INTERVAL_1_8 = 2,
    #[strum(serialize = "1/4")]
    GUARD_INTERVAL_1_4 = 3,
    #[strum(serialize = "AUTO")]
    GUARD_INTERVAL_AUTO = 4,
    #[strum(serialize = "1/128")]
    GUARD_INTERVAL_1_128 = 5,
    #[strum(serialize = "19/128")]
    GUARD_INTERVAL_19_128 = 6,
    #[strum(serialize = "19/256")]
    GUARD_INTERVAL_19_256 = 7,
}

#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(EnumString, Debug, PartialEq, Eq, FromRepr, Copy, Clone)]
pub enum fe_hierarchy {
    #[strum(serialize = "NONE")]
    HIERARCHY_NONE = 0,
    #[strum(serialize = "1")]
    HIERARCHY_1 = 1,
    #[strum(serialize = "2")]
    HIERARCHY_2 = 2,
    #[strum(serialize = "4")]
    HIERARCHY_4 = 3,
    #[strum(serialize = "AUTO")]
    HIERARCHY_AUTO = 4,
}

#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(EnumString, Debug, PartialEq, Eq, FromRepr, Copy, Clone)]
pub enum fe_pilot {
    PILOT_ON = 0,
    PILOT_OFF = 1,
    PILOT_AUTO = 2,
}

#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(EnumString, Debug, PartialEq, Eq, FromRepr, Copy, Clone)]
pub enum fe_rolloff {
    ROLLOFF_35 = 0,
    ROLLOFF_20 = 1,
    ROLLOFF_25 = 2,
    ROLLOFF_AUTO = 3,
}

#[derive(EnumString, Display, FromRepr, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
#[allow(non_camel_case_types)]
#[strum(ascii_case_insensitive)]
pub enum fe_delivery_system {
    #[strum(to_string = "none")]
    SYS_UNDEFINED = 0,
    #[strum(to_string = "dvbc/annex_a")]
    SYS_DVBC_ANNEX_A = 1,
    #[strum(to_string = "dvbc/annex_b")]
    SYS_DVBC_ANNEX_B = 2,
    #[strum(to_string = "dvbt")]
    SYS_DVBT = 3,
    #[strum(to_string = "dvbs")]
    SYS_DVBS = 5,
    #[strum(to_string = "dvbs2")]
    SYS_DVBS2 = 6,
    #[strum(to_string = "atsc")]
    SYS_ATSC = 11,
    #[strum(to_string = "dvbt2")]
    SYS_DVBT2 = 16,
    #[strum(to_string = "dvbs/turbo")]
    SYS_TURBO = 17,
    #[strum(to_string = "dvbc/annex_c")]
    SYS_DVBC_ANNEX_C = 18,
    #[strum(to_string = "dvbc2")]
    SYS_DVBC2 = 19,
}

pub trait WrappedSlice<T> {
    fn slice(&self) -> &[T];
}

pub trait WrappedResult<T> {
    fn get(&self) -> anyhow::Result<T>;
}

#[repr(C, packed)]
#[derive(Debug, Copy, Clone)]
pub struct NoScale {
    __reserved: [u8; 8],
}

#[repr(C, packed)]
#[derive(Debug, Copy, Clone)]
pub struct ScaleDecibel {
    pub scale: i64,
}

#[repr(C, packed)]
#[derive(Debug, Copy, Clone)]
pub struct ScaleRelative {
    pub scale: u16,
    __reserved: [u8; 6],
}

#[repr(C, packed)]
#[derive(Debug, Copy, Clone)]
pub struct ScaleCounter {
    pub scale: u64,
}

/// One DTV statistics slot with its scale tag.
#[repr(u8)]
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone)]
pub enum DtvStat {
    FE_SCALE_NOT_AVAILABLE(NoScale),
    /// 0.001 dB steps
    FE_SCALE_DECIBEL(ScaleDecibel),
    /// 0 (0%) to 0xFFFF (100%)
    FE_SCALE_RELATIVE(ScaleRelative),
    /// event counter (bit errors, block errors)
    FE_SCALE_COUNTER(ScaleCounter),
}

impl DtvStat {
    pub fn decibel(&self) -> Option<i64> {
        match self {
            DtvStat::FE_SCALE_DECIBEL(s) => Some(s.scale),
            _ => None,
        }
    }
    pub fn relative(&self) -> Option<u16> {
        match self {
            DtvStat::FE_SCALE_RELATIVE(s) => Some(s.scale),
            _ => None,
        }
    }
    pub fn counter(&self) -> Option<u64> {
        match self {
            DtvStat::FE_SCALE_COUNTER(s) => Some(s.scale),
            _ => None,
        }
    }
}

pub const MAX_DTV_STATS: usize = 4;

#[repr(C, packed)]
#[derive(Copy, Clone)]
pub struct DtvFrontendStats {
    len: u8,
    stat: [DtvStat; MAX_DTV_STATS],
}

impl WrappedSlice<DtvStat> for DtvFrontendStats {
    fn slice(&self) -> &[DtvStat] {
        let len = std::cmp::min(self.len as usize, self.stat.len());
        &self.stat[0..len]
    }
}

impl Debug for DtvFrontendStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.slice().iter()).finish()
    }
}

impl DtvFrontendStats {
    pub fn decibel(&self) -> Option<i64> {
        self.slice().iter().find_map(|s| s.decibel())
    }
    pub fn relative(&self) -> Option<u16> {
        self.slice().iter().find_map(|s| s.relative())
    }
    pub fn counter(&self) -> Option<u64> {
        self.slice().iter().find_map(|s| s.counter())
    }
}

#[repr(C, packed)]
#[derive(Copy, Clone)]
pub struct DtvPropertyBuffer {
    data: [u8; 32],
    len: u32,
}

impl WrappedSlice<u8> for DtvPropertyBuffer {
    fn slice(&self) -> &[u8] {
        let len = std::cmp::min(self.len as usize, self.data.len());
        &self.data[0..len]
    }
}

impl Debug for DtvPropertyBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.slice().iter()).finish()
    }
}

const DATA_SIZE: usize = 56;

/// One slot of a FE_SET_PROPERTY / FE_GET_PROPERTY cmdseq. The
/// padding keeps every variant at the kernel's fixed union size.
#[repr(C, packed)]
pub struct DtvPropertyRequest<T, const N: usize> {
    __reserved: [u32; 3],
    data: T,
    padding: [u8; N],
    result: i32,
}

impl<T, const N: usize> DtvPropertyRequest<T, N> {
    #[inline]
    pub fn new(data: T) -> Self {
        Self {
            __reserved: [0; 3],
            data,
            padding: [0; N],
            result: 0,
        }
    }
}

impl<T, const N: usize> Default for DtvPropertyRequest<T, N> {
    #[inline]
    fn default() -> Self {
        unsafe { mem::zeroed::<Self>() }
    }
}

pub type DtvPropertyRequestVoid = DtvPropertyRequest<(), DATA_SIZE>;

impl WrappedResult<()> for DtvPropertyRequestVoid {
    #[inline]
    fn get(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl Debug for DtvPropertyRequestVoid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("()")
    }
}

pub type DtvPropertyRequestInt<T> = DtvPropertyRequest<T, { DATA_SIZE - 4 }>;

impl<T: Copy + Debug> WrappedResult<T> for DtvPropertyRequestInt<T> {
    #[inline]
    fn get(&self) -> anyhow::Result<T> {
        Ok(self.data)
    }
}

impl<T: Copy + Debug> Debug for DtvPropertyRequestInt<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.get().fmt(f)
    }
}

pub type DtvPropertyRequestFrontendStats = DtvPropertyRequest<DtvFrontendStats, { DATA_SIZE - 37 }>;

impl WrappedResult<DtvFrontendStats> for DtvPropertyRequestFrontendStats {
    #[inline]
    fn get(&self) -> anyhow::Result<DtvFrontendStats> {
        Ok(self.data)
    }
}

impl Debug for DtvPropertyRequestFrontendStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.data.fmt(f)
    }
}

pub type DtvPropertyRequestDeliverySystems =
    DtvPropertyRequest<DtvPropertyBuffer, { DATA_SIZE - 4 - 32 }>;

impl WrappedResult<Vec<fe_delivery_system>> for DtvPropertyRequestDeliverySystems {
    fn get(&self) -> anyhow::Result<Vec<fe_delivery_system>> {
        self.data
            .slice()
            .iter()
            .map(|&x| fe_delivery_system::from_repr(x as u32).context("invalid delivery system"))
            .collect()
    }
}

impl Debug for DtvPropertyRequestDeliverySystems {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.get() {
            Ok(list) => f.debug_list().entries(list.iter()).finish(),
            Err(_) => f.write_str("?"),
        }
    }
}

/// DVBv5 property commands. Discriminants are the kernel property
/// numbers; only the subset this crate drives is declared.
#[repr(u32, C)]
#[allow(non_camel_case_types)]
#[derive(Debug)]
pub enum DtvProperty {
    DTV_TUNE(DtvPropertyRequestVoid) = 1,
    DTV_CLEAR(DtvPropertyRequestVoid) = 2,
    DTV_FREQUENCY(DtvPropertyRequestInt<u32>) = 3,
    DTV_MODULATION(DtvPropertyRequestInt<fe_modulation>) = 4,
    DTV_BANDWIDTH_HZ(DtvPropertyRequestInt<u32>) = 5,
    DTV_INVERSION(DtvPropertyRequestInt<fe_spectral_inversion>) = 6,
    DTV_SYMBOL_RATE(DtvPropertyRequestInt<u32>) = 8,
    DTV_INNER_FEC(DtvPropertyRequestInt<fe_code_rate>) = 9,
    DTV_VOLTAGE(DtvPropertyRequestInt<fe_sec_voltage>) = 10,
    DTV_TONE(DtvPropertyRequestInt<fe_sec_tone_mode>) = 11,
    DTV_PILOT(DtvPropertyRequestInt<fe_pilot>) = 12,
    DTV_ROLLOFF(DtvPropertyRequestInt<fe_rolloff>) = 13,
    DTV_DELIVERY_SYSTEM(DtvPropertyRequestInt<fe_delivery_system>) = 17,
    DTV_API_VERSION(DtvPropertyRequestInt<u32>) = 35,
    DTV_CODE_RATE_HP(DtvPropertyRequestInt<fe_code_rate>) = 36,
    DTV_CODE_RATE_LP(DtvPropertyRequestInt<fe_code_rate>) = 37,
    DTV_GUARD_INTERVAL(DtvPropertyRequestInt<fe_guard_interval>) = 38,
    DTV_TRANSMISSION_MODE(DtvPropertyRequestInt<fe_transmit_mode>) = 39,
    DTV_HIERARCHY(DtvPropertyRequestInt<fe_hierarchy>) = 40,
    DTV_STREAM_ID(DtvPropertyRequestInt<u32>) = 42,
    DTV_ENUM_DELSYS(DtvPropertyRequestDeliverySystems) = 44,
    DTV_STAT_SIGNAL_STRENGTH(DtvPropertyRequestFrontendStats) = 62,
    DTV_STAT_CNR(DtvPropertyRequestFrontendStats) = 63,
    DTV_STAT_PRE_ERROR_BIT_COUNT(DtvPropertyRequestFrontendStats) = 64,
    DTV_STAT_ERROR_BLOCK_COUNT(DtvPropertyRequestFrontendStats) = 68,
}

#[macro_export]
macro_rules! dtv_property {
    ( $property:ident($data:expr) ) => {
        $property($crate::dvb::fe::sys::DtvPropertyRequest::new($data))
    };
}

impl FromStr for DtvProperty {
    type Err = anyhow::Error;

    /// Parses a `KEY = value` tuning line into a property slot.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        macro_rules! parse_into {
            ( $property:ident($data:expr) ) => {
                $property(DtvPropertyRequest::new($data.parse().with_context(|| {
                    format!("invalid {}: {}", stringify!($property), $data)
                })?))
            };
        }

        let (k, v) = s.split_once('=').context("invalid tuning line")?;
        let v = v.trim();
        Ok(match k.trim() {
            "FREQUENCY" => parse_into!(DTV_FREQUENCY(v)),
            "MODULATION" => parse_into!(DTV_MODULATION(v)),
            "BANDWIDTH_HZ" => parse_into!(DTV_BANDWIDTH_HZ(v)),
            "INVERSION" => parse_into!(DTV_INVERSION(v)),
            "SYMBOL_RATE" => parse_into!(DTV_SYMBOL_RATE(v)),
            "INNER_FEC" => parse_into!(DTV_INNER_FEC(v)),
            "VOLTAGE" => parse_into!(DTV_VOLTAGE(v)),
            "TONE" => parse_into!(DTV_TONE(v)),
            "PILOT" => parse_into!(DTV_PILOT(v)),
            "ROLLOFF" => parse_into!(DTV_ROLLOFF(v)),
            "DELIVERY_SYSTEM" => parse_into!(DTV_DELIVERY_SYSTEM(v)),
            "CODE_RATE_HP" => parse_into!(DTV_CODE_RATE_HP(v)),
            "CODE_RATE_LP" => parse_into!(DTV_CODE_RATE_LP(v)),
            "GUARD_INTERVAL" => parse_into!(DTV_GUARD_INTERVAL(v)),
            "TRANSMISSION_MODE" => parse_into!(DTV_TRANSMISSION_MODE(v)),
            "HIERARCHY" => parse_into!(DTV_HIERARCHY(v)),
            "STREAM_ID" => parse_into!(DTV_STREAM_ID(v)),
            _ => bail!("invalid tuning key {}", k),
        })
    }
}

/// num of properties cannot exceed DTV_IOCTL_MAX_MSGS per ioctl
pub const DTV_IOCTL_MAX_MSGS: usize = 64;

#[repr(C)]
#[derive(Debug)]
pub struct FeParameters {
    pub frequency: u32,
    pub inversion: u32,
    __reserved_1: [u8; 28],
}

pub const FE_MAX_EVENT: usize = 8;

#[repr(C)]
#[derive(Debug)]
pub struct FeEvent {
    pub status: u32,
    pub parameters: FeParameters,
}

impl Default for FeEvent {
    #[inline]
    fn default() -> Self {
        unsafe { mem::zeroed::<Self>() }
    }
}
