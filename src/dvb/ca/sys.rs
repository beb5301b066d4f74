use std::mem;

/// slot interface types
pub const CA_CI: u32 = 1;
pub const CA_CI_LINK: u32 = 2;
pub const CA_CI_PHYS: u32 = 4;
pub const CA_DESCR: u32 = 8;
pub const CA_SC: u32 = 128;

/// slot flags
pub const CA_CI_MODULE_PRESENT: u32 = 1;
pub const CA_CI_MODULE_READY: u32 = 2;

/// descrambler types
pub const CA_ECD: u32 = 1;
pub const CA_NDS: u32 = 2;
pub const CA_DSS: u32 = 4;

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct CaCaps {
    pub slot_num: u32,
    pub slot_type: u32,
    pub descr_num: u32,
    pub descr_type: u32,
}

impl Default for CaCaps {
    #[inline]
    fn default() -> Self {
        unsafe { mem::zeroed::<Self>() }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct CaSlotInfo {
    /// slot number
    pub num: i32,
    /// CA interface type
    pub slot_type: i32,
    /// module state
    pub flags: u32,
}

impl Default for CaSlotInfo {
    #[inline]
    fn default() -> Self {
        unsafe { mem::zeroed::<Self>() }
    }
}
