//! EN 50221 application layer: resource ids, object tags and APDU
//! packing (8.8.1, Table 58).

use super::asn1;

pub const RI_RESOURCE_MANAGER: u32 = 0x0001_0041;
pub const RI_APPLICATION_INFORMATION: u32 = 0x0002_0041;
pub const RI_CONDITIONAL_ACCESS_SUPPORT: u32 = 0x0003_0041;
pub const RI_HOST_CONTROL: u32 = 0x0020_0041;
pub const RI_DATE_TIME: u32 = 0x0024_0041;
pub const RI_MMI: u32 = 0x0040_0041;

pub const AOT_PROFILE_ENQ: u32 = 0x9F8010;
pub const AOT_PROFILE: u32 = 0x9F8011;
pub const AOT_PROFILE_CHANGE: u32 = 0x9F8012;
pub const AOT_APPLICATION_INFO_ENQ: u32 = 0x9F8020;
pub const AOT_APPLICATION_INFO: u32 = 0x9F8021;
pub const AOT_CA_INFO_ENQ: u32 = 0x9F8030;
pub const AOT_CA_INFO: u32 = 0x9F8031;
pub const AOT_CA_PMT: u32 = 0x9F8032;
pub const AOT_CA_PMT_REPLY: u32 = 0x9F8033;
pub const AOT_CA_UPDATE: u32 = 0x9F8034;
pub const AOT_DATE_TIME_ENQ: u32 = 0x9F8440;
pub const AOT_DATE_TIME: u32 = 0x9F8441;
pub const AOT_CLOSE_MMI: u32 = 0x9F8800;
pub const AOT_DISPLAY_CONTROL: u32 = 0x9F8801;
pub const AOT_DISPLAY_REPLY: u32 = 0x9F8802;
pub const AOT_TEXT_LAST: u32 = 0x9F8803;
pub const AOT_TEXT_MORE: u32 = 0x9F8804;
pub const AOT_ENQ: u32 = 0x9F8807;
pub const AOT_ANSW: u32 = 0x9F8808;
pub const AOT_MENU_LAST: u32 = 0x9F8809;
pub const AOT_MENU_MORE: u32 = 0x9F880A;
pub const AOT_MENU_ANSW: u32 = 0x9F880B;
pub const AOT_LIST_LAST: u32 = 0x9F880C;
pub const AOT_LIST_MORE: u32 = 0x9F880D;

pub const APDU_TAG_SIZE: usize = 3;

/// Appends `tag + length + data` to `out`.
pub fn pack(out: &mut Vec<u8>, tag: u32, data: &[u8]) {
    out.push((tag >> 16) as u8);
    out.push((tag >> 8) as u8);
    out.push(tag as u8);
    asn1::encode(out, data.len() as u16);
    out.extend_from_slice(data);
}

/// Object tag of an SPDU-carried APDU, when complete.
pub fn tag(spdu: &[u8]) -> u32 {
    if spdu.len() >= super::spdu::SPDU_HEADER_SIZE + APDU_TAG_SIZE {
        let b = &spdu[super::spdu::SPDU_HEADER_SIZE..];
        ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32
    } else {
        0
    }
}

/// APDU payload behind the session header and length field.
pub fn body(spdu: &[u8]) -> &[u8] {
    let start = super::spdu::SPDU_HEADER_SIZE + APDU_TAG_SIZE;
    if spdu.len() <= start {
        return &[];
    }
    match asn1::decode(&spdu[start..]) {
        Some((size, skip)) => {
            let from = start + skip;
            let to = (from + size as usize).min(spdu.len());
            &spdu[from..to]
        }
        None => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_and_unpack() {
        let mut spdu = vec![0x90, 0x02, 0x00, 0x01];
        pack(&mut spdu, AOT_CA_INFO, &[0x05, 0x00]);
        assert_eq!(tag(&spdu), AOT_CA_INFO);
        assert_eq!(body(&spdu), &[0x05, 0x00]);
    }

    #[test]
    fn short_spdu_has_no_tag() {
        assert_eq!(tag(&[0x90, 0x02]), 0);
        assert!(body(&[0x90, 0x02, 0x00, 0x01, 0x9F]).is_empty());
    }
}
