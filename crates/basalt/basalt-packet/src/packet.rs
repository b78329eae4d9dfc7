use uuid::Uuid;

use crate::{DEP_KEY, ID_FIELD, ID_LEN, NUM_OFF, PacketError, TABLE_OFF};

/// An owned packet.
///
/// The id is minted at construction; callers never supply one. Header keys
/// may repeat, and the `a0_` key prefix is reserved for protocol use
/// ([`DEP_KEY`] and the framing headers of higher layers).
pub struct Packet {
    id: String,
    headers: Vec<(String, String)>,
    payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketStats {
    pub num_headers: usize,
    /// Total bytes of header keys, header values, and payload.
    pub content_size: usize,
    /// Bytes needed to serialize the whole packet.
    pub serial_size: usize,
}

impl Packet {
    /// A new packet with a fresh UUIDv4 id and no headers.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Packet {
            id: Uuid::new_v4().as_hyphenated().to_string(),
            headers: Vec::new(),
            payload: payload.into(),
        }
    }

    pub(crate) fn from_parts(
        id: String,
        headers: Vec<(String, String)>,
        payload: Vec<u8>,
    ) -> Self {
        Packet { id, headers, payload }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn push_header(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.headers.push((key.into(), val.into()));
    }

    /// Records a dependency on another packet under the reserved
    /// [`DEP_KEY`] header.
    pub fn add_dep(&mut self, id: &str) {
        self.push_header(DEP_KEY, id);
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn for_each_header(&self, mut cb: impl FnMut(&str, &str)) {
        for (k, v) in &self.headers {
            cb(k, v);
        }
    }

    /// First header value stored under `key`.
    pub fn find_header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn stats(&self) -> PacketStats {
        let content_size = self
            .headers
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum::<usize>()
            + self.payload.len();
        PacketStats {
            num_headers: self.headers.len(),
            content_size,
            serial_size: self.serial_size(),
        }
    }

    /// Exact size of the serialized form.
    pub fn serial_size(&self) -> usize {
        let n = self.headers.len();
        let strings: usize = self
            .headers
            .iter()
            .map(|(k, v)| k.len() + 1 + v.len() + 1)
            .sum();
        TABLE_OFF + (2 * n + 1) * 8 + strings + self.payload.len()
    }

    /// Serializes into `buf`, which must be at least
    /// [`serial_size`](Packet::serial_size) bytes.
    pub fn serialize_into(&self, buf: &mut [u8]) -> Result<(), PacketError> {
        let need = self.serial_size();
        if buf.len() < need {
            return Err(PacketError::Truncated { need, have: buf.len() });
        }
        self.write_into(buf);
        Ok(())
    }

    /// Serializes into a fresh buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.serial_size()];
        self.write_into(&mut buf);
        buf
    }

    fn write_into(&self, buf: &mut [u8]) {
        debug_assert_eq!(self.id.len(), ID_LEN);

        buf[..ID_LEN].copy_from_slice(self.id.as_bytes());
        // NUL terminator plus padding to the aligned count field; the
        // buffer may be recycled frame memory, so zero them explicitly.
        buf[ID_LEN..ID_FIELD].fill(0);

        let n = self.headers.len();
        write_u64(buf, NUM_OFF, n as u64);

        let mut table = TABLE_OFF;
        let mut content = TABLE_OFF + (2 * n + 1) * 8;
        for (k, v) in &self.headers {
            for s in [k, v] {
                write_u64(buf, table, content as u64);
                table += 8;
                buf[content..content + s.len()].copy_from_slice(s.as_bytes());
                buf[content + s.len()] = 0;
                content += s.len() + 1;
            }
        }
        write_u64(buf, table, content as u64);
        buf[content..content + self.payload.len()].copy_from_slice(&self.payload);
    }
}

fn write_u64(buf: &mut [u8], off: usize, val: u64) {
    buf[off..off + 8].copy_from_slice(&val.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_a_hyphenated_uuid() {
        let pkt = Packet::new(Vec::new());
        let id = pkt.id();
        assert_eq!(id.len(), ID_LEN);
        for (i, c) in id.chars().enumerate() {
            if matches!(i, 8 | 13 | 18 | 23) {
                assert_eq!(c, '-', "expected hyphen at {i} in {id}");
            } else {
                assert!(c.is_ascii_hexdigit(), "bad char at {i} in {id}");
            }
        }
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(Packet::new(Vec::new()).id(), Packet::new(Vec::new()).id());
    }

    #[test]
    fn stats_count_content() {
        let mut pkt = Packet::new(&b"Hello, World!"[..]);
        pkt.push_header("key0", "val0");
        pkt.add_dep("00000000-0000-0000-0000-000000000000");

        let stats = pkt.stats();
        assert_eq!(stats.num_headers, 2);
        assert_eq!(
            stats.content_size,
            "key0".len() + "val0".len() + DEP_KEY.len() + 36 + 13
        );
        assert_eq!(stats.serial_size, pkt.to_vec().len());
    }

    #[test]
    fn serialize_into_reports_small_buffers() {
        let pkt = Packet::new(&b"x"[..]);
        let mut buf = vec![0u8; 8];
        assert!(matches!(
            pkt.serialize_into(&mut buf),
            Err(PacketError::Truncated { .. })
        ));
    }

    #[test]
    fn serialized_layout_places_id_first() {
        let pkt = Packet::new(Vec::new());
        let buf = pkt.to_vec();
        assert_eq!(&buf[..ID_LEN], pkt.id().as_bytes());
        assert_eq!(buf[ID_LEN], 0);
    }
}
