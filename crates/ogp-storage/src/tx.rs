//! Per-channel transaction log records.
//!
//! ```text
//! [8 bytes: kind]  1 = write, 2 = erase
//! [8 bytes: offset into the data file]
//! [8 bytes: length]
//! [8 bytes: CRC32 of the written bytes (zero for erase)]
//! ```
//!
//! Records are little-endian regardless of the entity byte order.

pub(crate) const RECORD_LENGTH: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RecordKind {
    Write,
    Erase,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct TransactionRecord {
    pub kind: RecordKind,
    pub offset: u64,
    pub length: u64,
    pub crc: u32,
}

impl TransactionRecord {
    pub fn write(offset: u64, data: &[u8]) -> Self {
        Self {
            kind: RecordKind::Write,
            offset,
            length: data.len() as u64,
            crc: crc32fast::hash(data),
        }
    }

    pub fn erase(offset: u64, length: u64) -> Self {
        Self {
            kind: RecordKind::Erase,
            offset,
            length,
            crc: 0,
        }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    pub fn encode(&self) -> [u8; RECORD_LENGTH] {
        let kind: u64 = match self.kind {
            RecordKind::Write => 1,
            RecordKind::Erase => 2,
        };
        let mut out = [0u8; RECORD_LENGTH];
        out[0..8].copy_from_slice(&kind.to_le_bytes());
        out[8..16].copy_from_slice(&self.offset.to_le_bytes());
        out[16..24].copy_from_slice(&self.length.to_le_bytes());
        out[24..32].copy_from_slice(&u64::from(self.crc).to_le_bytes());
        out
    }

    /// `None` for an unknown kind.
    pub fn decode(raw: &[u8; RECORD_LENGTH]) -> Option<Self> {
        let field = |i: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&raw[i * 8..i * 8 + 8]);
            u64::from_le_bytes(b)
        };
        let kind = match field(0) {
            1 => RecordKind::Write,
            2 => RecordKind::Erase,
            _ => return None,
        };
        let crc = u32::try_from(field(3)).ok()?;
        Some(Self {
            kind,
            offset: field(1),
            length: field(2),
            crc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_layout() {
        let record = TransactionRecord::write(64, b"abc");
        let raw = record.encode();
        assert_eq!(&raw[0..8], &1u64.to_le_bytes());
        assert_eq!(&raw[8..16], &64u64.to_le_bytes());
        assert_eq!(TransactionRecord::decode(&raw), Some(record));
        assert_eq!(record.end(), 67);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut raw = TransactionRecord::erase(0, 8).encode();
        raw[0] = 9;
        assert_eq!(TransactionRecord::decode(&raw), None);
    }
}
