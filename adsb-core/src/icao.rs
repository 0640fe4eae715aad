//! Short-frame ICAO address recovery.
//!
//! A 56-bit Mode S reply (DF0/4/5/16) has no explicit ICAO field; its last 24
//! bits are an AP ("Address/Parity") field equal to `CRC(data[0..32]) XOR
//! icao`. Recovering the address means trying candidates until one satisfies
//! that equation — there is no way to derive it analytically from the frame
//! alone.

use crate::crc::crc24_payload;
use crate::types::{icao_to_u32, Icao};

/// Recover the ICAO address of a short Mode S frame given a candidate set.
///
/// Returns the first candidate `c` such that `crc24_payload(data) ^ icao(c)
/// == AP field of data`. Candidates are tried in the order given, so callers
/// that want a deterministic result should order by recency. `None` if no
/// candidate matches.
pub fn recover(data: &[u8], candidates: &[Icao]) -> Option<Icao> {
    if data.len() < 7 {
        return None;
    }
    let payload_crc = crc24_payload(data);
    let ap = (data[data.len() - 3] as u32) << 16
        | (data[data.len() - 2] as u32) << 8
        | data[data.len() - 1] as u32;

    candidates
        .iter()
        .copied()
        .find(|c| (payload_crc ^ icao_to_u32(c)) == ap)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a 7-byte DF4 reply (zeroed payload) whose AP field matches `icao`.
    fn frame_for_icao(icao: Icao) -> Vec<u8> {
        let mut data = vec![0x20, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let crc = crc24_payload(&data);
        let ap = crc ^ icao_to_u32(&icao);
        data[4] = ((ap >> 16) & 0xFF) as u8;
        data[5] = ((ap >> 8) & 0xFF) as u8;
        data[6] = (ap & 0xFF) as u8;
        data
    }

    #[test]
    fn test_recover_matches_first_valid_candidate() {
        let target: Icao = [0xA1, 0x23, 0x45];
        let frame = frame_for_icao(target);
        let candidates = [[0xFF, 0xFF, 0xFF], target, [0x00, 0x00, 0x00]];
        assert_eq!(recover(&frame, &candidates), Some(target));
    }

    #[test]
    fn test_recover_no_match() {
        let target: Icao = [0xA1, 0x23, 0x45];
        let frame = frame_for_icao(target);
        let candidates = [[0xB6, 0x78, 0x90]];
        assert_eq!(recover(&frame, &candidates), None);
    }

    #[test]
    fn test_recover_empty_candidates() {
        let frame = frame_for_icao([0x11, 0x22, 0x33]);
        assert_eq!(recover(&frame, &[]), None);
    }

    #[test]
    fn test_recover_short_data_rejected() {
        assert_eq!(recover(&[0, 0, 0], &[[0, 0, 0]]), None);
    }

    #[test]
    fn test_recover_picks_first_match_in_order() {
        let a: Icao = [0x11, 0x11, 0x11];
        let frame = frame_for_icao(a);
        // `a` appears twice; the function should still return on first hit
        // rather than scanning past it.
        assert_eq!(recover(&frame, &[a, a]), Some(a));
    }
}
