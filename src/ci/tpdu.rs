//! EN 50221 transport layer: TPDU tags and link-frame construction.

use super::asn1;

/// A.4.1.13 transport tags
pub const TT_SB: u8 = 0x80;
pub const TT_RCV: u8 = 0x81;
pub const TT_CREATE_TC: u8 = 0x82;
pub const TT_CTC_REPLY: u8 = 0x83;
pub const TT_DELETE_TC: u8 = 0x84;
pub const TT_DTC_REPLY: u8 = 0x85;
pub const TT_REQUEST_TC: u8 = 0x86;
pub const TT_NEW_TC: u8 = 0x87;
pub const TT_TC_ERROR: u8 = 0x88;
pub const TT_DATA_LAST: u8 = 0xA0;
pub const TT_DATA_MORE: u8 = 0xA1;

/// status byte flag: module has data pending
pub const DATA_INDICATOR: u8 = 0x80;

/// Builds one link frame `slot_id tcid tag [len] [tcid] [data]`.
/// The transport connection id is `slot_id + 1` throughout.
pub fn frame(slot_id: u8, tag: u8, data: &[u8]) -> Vec<u8> {
    let tcid = slot_id + 1;
    let mut out = Vec::with_capacity(data.len() + 8);
    out.push(slot_id);
    out.push(tcid);
    out.push(tag);

    match tag {
        TT_RCV | TT_CREATE_TC | TT_CTC_REPLY | TT_DELETE_TC | TT_DTC_REPLY | TT_REQUEST_TC => {
            out.push(1);
            out.push(tcid);
        }
        TT_NEW_TC | TT_TC_ERROR => {
            out.push(2);
            out.push(tcid);
            out.push(data[0]);
        }
        TT_DATA_LAST | TT_DATA_MORE => {
            asn1::encode(&mut out, data.len() as u16 + 1);
            out.push(tcid);
            out.extend_from_slice(data);
        }
        _ => {}
    }

    out
}

/// A parsed inbound link frame.
pub struct Frame<'a> {
    pub slot_id: u8,
    pub tag: u8,
    /// SPDU fragment carried by DATA_LAST/DATA_MORE
    pub data: &'a [u8],
    /// trailing status byte reports pending module data
    pub has_data: bool,
}

/// Splits a frame read from the CA device. Frames shorter than the
/// mandatory header plus status are malformed.
pub fn parse(buffer: &[u8]) -> Option<Frame> {
    if buffer.len() < 5 {
        return None;
    }
    let slot_id = buffer[1].checked_sub(1)?;
    let tag = buffer[2];

    let data = match tag {
        TT_DATA_LAST | TT_DATA_MORE => {
            let (size, skip) = asn1::decode(&buffer[3..])?;
            if size < 1 {
                &[]
            } else {
                let start = 3 + skip + 1; // skip the tcid byte
                let end = start + size as usize - 1;
                buffer.get(start..end)?
            }
        }
        _ => &[],
    };

    // [TT_SB, 2, tcid, status] closes every frame
    let n = buffer.len();
    let has_data = n >= 4
        && buffer[n - 4] == TT_SB
        && buffer[n - 3] == 2
        && buffer[n - 1] & DATA_INDICATOR != 0;

    Some(Frame {
        slot_id,
        tag,
        data,
        has_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_tc_frame_layout() {
        assert_eq!(frame(0, TT_CREATE_TC, &[]), vec![0, 1, 0x82, 1, 1]);
        assert_eq!(frame(2, TT_RCV, &[]), vec![2, 3, 0x81, 1, 3]);
    }

    #[test]
    fn data_last_wraps_payload() {
        let f = frame(0, TT_DATA_LAST, &[0xAA, 0xBB]);
        assert_eq!(f, vec![0, 1, 0xA0, 3, 1, 0xAA, 0xBB]);
    }

    #[test]
    fn parse_reads_payload_and_status() {
        let mut wire = frame(1, TT_DATA_LAST, &[0x91, 0x04, 0x00, 0x01, 0x00, 0x41]);
        wire.extend_from_slice(&[TT_SB, 2, 2, DATA_INDICATOR]);
        let parsed = parse(&wire).unwrap();
        assert_eq!(parsed.slot_id, 1);
        assert_eq!(parsed.tag, TT_DATA_LAST);
        assert_eq!(parsed.data, &[0x91, 0x04, 0x00, 0x01, 0x00, 0x41]);
        assert!(parsed.has_data);
    }
}
