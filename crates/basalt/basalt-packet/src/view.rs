use std::str;

use crate::{ID_LEN, NUM_OFF, Packet, PacketError, TABLE_OFF};

/// A packet parsed in place.
///
/// Header keys, values, the id, and the payload all borrow the underlying
/// buffer; only the header index itself is allocated. Use
/// [`to_owned`](PacketView::to_owned) for a self-contained copy.
pub struct PacketView<'a> {
    id: &'a str,
    headers: Vec<(&'a str, &'a str)>,
    payload: &'a [u8],
}

impl<'a> PacketView<'a> {
    /// Validates and indexes a serialized packet.
    ///
    /// Rejects short buffers, malformed ids, offset tables that are not
    /// non-decreasing and in-range, missing NUL terminators, and non-utf8
    /// header text.
    pub fn parse(buf: &'a [u8]) -> Result<PacketView<'a>, PacketError> {
        if buf.len() < TABLE_OFF + 8 {
            return Err(PacketError::Truncated { need: TABLE_OFF + 8, have: buf.len() });
        }

        let id = parse_id(buf)?;

        // The header count is untrusted; all table arithmetic is checked.
        let n = read_u64(buf, NUM_OFF) as usize;
        let entries = n
            .checked_mul(2)
            .and_then(|x| x.checked_add(1))
            .ok_or(PacketError::BadOffsets)?;
        let table_end = entries
            .checked_mul(8)
            .and_then(|x| x.checked_add(TABLE_OFF))
            .ok_or(PacketError::BadOffsets)?;
        if table_end > buf.len() {
            return Err(PacketError::Truncated { need: table_end, have: buf.len() });
        }

        let mut offsets = Vec::with_capacity(entries);
        for i in 0..entries {
            offsets.push(read_u64(buf, TABLE_OFF + 8 * i) as usize);
        }

        let mut last = table_end;
        for &off in &offsets {
            if off < last || off > buf.len() {
                return Err(PacketError::BadOffsets);
            }
            last = off;
        }

        let mut headers = Vec::with_capacity(n);
        for i in 0..n {
            let key = parse_str(buf, offsets[2 * i], offsets[2 * i + 1])?;
            let val = parse_str(buf, offsets[2 * i + 1], offsets[2 * i + 2])?;
            headers.push((key, val));
        }

        let payload = &buf[offsets[2 * n]..];
        Ok(PacketView { id, headers, payload })
    }

    pub fn id(&self) -> &'a str {
        self.id
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    pub fn num_headers(&self) -> usize {
        self.headers.len()
    }

    pub fn headers(&self) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.headers.iter().copied()
    }

    /// First header value stored under `key`.
    pub fn find_header(&self, key: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
    }

    /// Deep-copies into a self-contained [`Packet`].
    pub fn to_owned(&self) -> Packet {
        Packet::from_parts(
            self.id.to_string(),
            self.headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            self.payload.to_vec(),
        )
    }
}

fn read_u64(buf: &[u8], off: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(bytes)
}

fn parse_id(buf: &[u8]) -> Result<&str, PacketError> {
    if buf[ID_LEN] != 0 {
        return Err(PacketError::BadId);
    }
    let id = str::from_utf8(&buf[..ID_LEN]).map_err(|_| PacketError::BadId)?;
    for (i, c) in id.chars().enumerate() {
        let ok = if matches!(i, 8 | 13 | 18 | 23) {
            c == '-'
        } else {
            c.is_ascii_alphanumeric()
        };
        if !ok {
            return Err(PacketError::BadId);
        }
    }
    Ok(id)
}

/// A NUL-terminated string spanning `[start, end)` of the buffer.
fn parse_str(buf: &[u8], start: usize, end: usize) -> Result<&str, PacketError> {
    if end <= start || buf[end - 1] != 0 {
        return Err(PacketError::BadOffsets);
    }
    str::from_utf8(&buf[start..end - 1]).map_err(|_| PacketError::BadUtf8)
}
