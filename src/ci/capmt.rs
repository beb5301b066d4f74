//! CA-PMT construction (EN 50221 8.4.3.4): the subset of a PMT a CAM
//! needs to start descrambling a program.

use crate::ts::{Descriptor, Pmt};

/// ca_pmt_list_management
pub const CA_PMT_LM_ONLY: u8 = 0x03;
pub const CA_PMT_LM_ADD: u8 = 0x04;
pub const CA_PMT_LM_UPDATE: u8 = 0x05;

/// ca_pmt_cmd_id
pub const CA_PMT_CMD_OK_DESCRAMBLING: u8 = 0x01;
pub const CA_PMT_CMD_QUERY: u8 = 0x03;
pub const CA_PMT_CMD_NOT_SELECTED: u8 = 0x04;

/// Copies the CA descriptors whose CAID the CAM advertised into a
/// program_info/ES_info block. Returns true when at least one
/// descriptor was copied (the block then carries `cmd_id`).
fn copy_ca_descriptors(
    out: &mut Vec<u8>,
    descriptors: &[Descriptor],
    caids: &[u16],
    cmd_id: u8,
) -> bool {
    let mut block = Vec::new();
    for desc in descriptors {
        if let Descriptor::Ca { caid, .. } = desc {
            if caids.contains(caid) {
                desc.assemble(&mut block);
            }
        }
    }

    if block.is_empty() {
        out.push(0xF0);
        out.push(0x00);
        return false;
    }

    let info_length = block.len() + 1; // cmd_id included
    out.push(0xF0 | ((info_length >> 8) as u8 & 0x0F));
    out.push(info_length as u8);
    out.push(cmd_id);
    out.extend_from_slice(&block);
    true
}

/// Renders a CA-PMT for `pmt`, keeping only CA descriptors matching
/// the CAM's CAIDs. `None` when nothing matches and the message
/// would be pointless.
pub fn build(pmt: &Pmt, caids: &[u16], list_management: u8, cmd_id: u8) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(64);
    out.push(list_management);
    out.extend_from_slice(&pmt.pnr.to_be_bytes());
    out.push(0xC1 | (pmt.version << 1));

    let mut has_caid = copy_ca_descriptors(&mut out, &pmt.descriptors, caids, cmd_id);

    for item in &pmt.items {
        out.push(item.stream_type);
        out.push(0xE0 | (item.pid >> 8) as u8);
        out.push(item.pid as u8);
        has_caid |= copy_ca_descriptors(&mut out, &item.descriptors, caids, cmd_id);
    }

    if has_caid {
        Some(out)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ts::PmtItem;

    fn pmt() -> Pmt {
        Pmt {
            pnr: 0x0001,
            version: 2,
            current_next: true,
            pcr_pid: 258,
            descriptors: vec![Descriptor::Ca {
                caid: 0x0500,
                pid: 1010,
                data: vec![],
            }],
            items: vec![
                PmtItem {
                    stream_type: 0x02,
                    pid: 258,
                    descriptors: vec![Descriptor::Ca {
                        caid: 0x0B00,
                        pid: 1020,
                        data: vec![],
                    }],
                },
                PmtItem {
                    stream_type: 0x04,
                    pid: 259,
                    descriptors: vec![],
                },
            ],
        }
    }

    #[test]
    fn keeps_only_advertised_caids() {
        let wire = build(&pmt(), &[0x0500], CA_PMT_LM_ADD, CA_PMT_CMD_OK_DESCRAMBLING).unwrap();
        assert_eq!(wire[0], CA_PMT_LM_ADD);
        assert_eq!(&wire[1..3], &[0x00, 0x01]);
        assert_eq!(wire[3], 0xC1 | (2 << 1));
        // program loop: length 7 (cmd + 6-byte CA descriptor)
        assert_eq!(&wire[4..6], &[0xF0, 0x07]);
        assert_eq!(wire[6], CA_PMT_CMD_OK_DESCRAMBLING);
        assert_eq!(&wire[7..13], &[0x09, 0x04, 0x05, 0x00, 0xE3, 0xF2]);
        // first ES: caid 0x0B00 not advertised, empty loop
        assert_eq!(&wire[13..16], &[0x02, 0xE1, 0x02]);
        assert_eq!(&wire[16..18], &[0xF0, 0x00]);
        // second ES never had CA descriptors
        assert_eq!(&wire[18..21], &[0x04, 0xE1, 0x03]);
        assert_eq!(&wire[21..23], &[0xF0, 0x00]);
        assert_eq!(wire.len(), 23);
    }

    #[test]
    fn no_matching_caid_builds_nothing() {
        assert!(build(&pmt(), &[0x1833], CA_PMT_LM_ADD, CA_PMT_CMD_OK_DESCRAMBLING).is_none());
    }

    #[test]
    fn es_scoped_descriptors_count() {
        let wire = build(&pmt(), &[0x0B00], CA_PMT_LM_UPDATE, CA_PMT_CMD_NOT_SELECTED).unwrap();
        assert_eq!(wire[0], CA_PMT_LM_UPDATE);
        // program loop empty, first ES carries the descriptor
        assert_eq!(&wire[4..6], &[0xF0, 0x00]);
        assert_eq!(&wire[9..11], &[0xF0, 0x07]);
        assert_eq!(wire[11], CA_PMT_CMD_NOT_SELECTED);
    }
}
