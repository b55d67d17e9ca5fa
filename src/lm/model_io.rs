//! Binary model serialization (PHLM files).
//!
//! Layout: 4 magic bytes, version byte, model order, two reserved bytes,
//! crc32 of the payload, then the bincode payload. The checksum is
//! verified before deserialization so truncation and bit rot surface as
//! typed errors rather than garbage models.

use std::fs::{self, File};
use std::path::Path;

use memmap2::Mmap;

use super::model::{HashedModel, NgramLookup};
use super::LmError;

const MAGIC: &[u8; 4] = b"PHLM";
const VERSION: u8 = 1;
const HEADER_SIZE: usize = 12;

impl HashedModel {
    pub fn to_bytes(&self) -> Result<Vec<u8>, LmError> {
        let payload = bincode::serialize(self).map_err(LmError::Serialize)?;
        let crc = crc32fast::hash(&payload);

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(MAGIC);
        buf.push(VERSION);
        buf.push(self.order());
        buf.extend_from_slice(&[0u8; 2]); // reserved
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, LmError> {
        if data.len() < HEADER_SIZE {
            return Err(LmError::InvalidHeader);
        }
        if &data[..4] != MAGIC {
            return Err(LmError::InvalidMagic);
        }
        if data[4] != VERSION {
            return Err(LmError::UnsupportedVersion(data[4]));
        }
        let stored_crc = u32::from_le_bytes(data[8..12].try_into().unwrap());
        let payload = &data[HEADER_SIZE..];
        if crc32fast::hash(payload) != stored_crc {
            return Err(LmError::ChecksumMismatch);
        }
        bincode::deserialize(payload).map_err(LmError::Deserialize)
    }

    /// Open a compiled model file via mmap.
    pub fn open(path: &Path) -> Result<Self, LmError> {
        let file = File::open(path)?;
        // SAFETY: The file is opened read-only and the mapping is dropped
        // before this function returns; the deserialized model owns its data.
        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_bytes(&mmap)
    }

    pub fn save(&self, path: &Path) -> Result<(), LmError> {
        Ok(fs::write(path, self.to_bytes()?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::model::tests::tiny_model;
    use super::super::model::NgramLookup;
    use super::*;

    #[test]
    fn roundtrip_preserves_scores() {
        let model = tiny_model();
        let bytes = model.to_bytes().unwrap();
        let reloaded = HashedModel::from_bytes(&bytes).unwrap();

        let v = model.vocab();
        let words: Vec<_> = ["the", "cat", "sat", "down"]
            .iter()
            .map(|w| v.get(w))
            .collect();
        let (a, sa) = model.score_sequence(&model.begin_sentence_state(), &words);
        let (b, sb) = reloaded.score_sequence(&reloaded.begin_sentence_state(), &words);
        assert!((a - b).abs() < 1e-6);
        assert_eq!(sa, sb);
    }

    #[test]
    fn save_and_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.phlm");
        let model = tiny_model();
        model.save(&path).unwrap();

        let reloaded = HashedModel::open(&path).unwrap();
        assert_eq!(reloaded.order(), 3);
        assert_eq!(reloaded.vocab().len(), model.vocab().len());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = tiny_model().to_bytes().unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            HashedModel::from_bytes(&bytes),
            Err(LmError::InvalidMagic)
        ));
    }

    #[test]
    fn rejects_bad_version() {
        let mut bytes = tiny_model().to_bytes().unwrap();
        bytes[4] = 99;
        assert!(matches!(
            HashedModel::from_bytes(&bytes),
            Err(LmError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn rejects_corrupt_payload() {
        let mut bytes = tiny_model().to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(
            HashedModel::from_bytes(&bytes),
            Err(LmError::ChecksumMismatch)
        ));
    }

    #[test]
    fn rejects_truncated_file() {
        let bytes = tiny_model().to_bytes().unwrap();
        assert!(matches!(
            HashedModel::from_bytes(&bytes[..6]),
            Err(LmError::InvalidHeader)
        ));
    }
}
