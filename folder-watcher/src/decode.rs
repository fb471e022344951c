//! Decoding of packed native change-notification buffers.

use std::path::Path;

use crate::event::{ChangeAction, ChangeRecord};

/// Size of the fixed buffer handed to the operating system for each read.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Byte length of the fixed portion of one record: next-entry offset,
/// action code and name length, each a little-endian `u32`.
const HEADER_LEN: usize = 12;

/// Decode the valid prefix of a notification buffer into change records.
///
/// The buffer holds a chain of variable-length records, each a 12-byte
/// header followed by a UTF-16 name. The first header field is the byte
/// offset from this record to the next, zero for the last one. Reported
/// names are joined onto `root` to produce full paths.
///
/// The buffer comes straight from the kernel but is never trusted: every
/// field is bounds-checked before it is read, and a record that would
/// reach past the valid length ends the walk. Malformed trailing data
/// truncates the result instead of failing, so the records decoded so
/// far are still delivered. Records with an action code outside the
/// documented range are skipped.
pub fn decode_notification_buffer(buf: &[u8], root: &Path) -> Vec<ChangeRecord> {
    let mut records = Vec::new();
    let mut offset = 0usize;

    while offset + HEADER_LEN <= buf.len() {
        let next = read_u32(buf, offset);
        let action = read_u32(buf, offset + 4);
        let name_len = read_u32(buf, offset + 8) as usize;

        let name_start = offset + HEADER_LEN;
        let Some(name_end) = name_start.checked_add(name_len) else {
            break;
        };
        // An odd byte count cannot be UTF-16; treat it as corruption.
        if name_end > buf.len() || name_len % 2 != 0 {
            break;
        }

        if let Some(action) = ChangeAction::from_code(action) {
            let name = decode_utf16_name(&buf[name_start..name_end]);
            records.push(ChangeRecord::new(action, root.join(name)));
        }

        if next == 0 {
            break;
        }
        match offset.checked_add(next as usize) {
            Some(advanced) => offset = advanced,
            None => break,
        }
    }

    records
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn decode_utf16_name(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}
