//! `SaveContainer` (spec §4.6, §6.3): bit-exact layout of the on-disk save
//! blob. Grounded on the original's `SaveLoadManager::SaveLocalData` /
//! `LoadLocalData`: signature, version, nonce, a SHA-512 checksum computed
//! with the checksum field zeroed, then three data stores, with AES-CTR
//! encrypting everything from the nonce onward.

use std::collections::BTreeMap;

use pkgcore_bytestream::ByteStream;
use pkgcore_codec::{aes_ctr_decrypt, aes_ctr_encrypt, sha512};
use rand::Rng;

use crate::error::{SaveError, SaveResult};
use crate::tree::DataNode;

pub const SAVE_CONTAINER_SIGNATURE: u32 = 0x27ea_db42;
pub const CONTAINER_VERSION: i32 = 1;
const NONCE_LEN: usize = 12;
const CHECKSUM_LEN: usize = 64;

/// Per-slot bookkeeping carried alongside the save data (spec §4.7): which
/// session produced it and how far the cloud checkpoint has advanced.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveFileMetadata {
    pub session_guid: String,
    pub version: i32,
    pub transaction_id_min: u64,
    pub transaction_id_max: u64,
}

impl Default for SaveFileMetadata {
    fn default() -> Self {
        Self {
            session_guid: String::new(),
            version: 0,
            transaction_id_min: 0,
            transaction_id_max: 0,
        }
    }
}

impl SaveFileMetadata {
    pub(crate) fn to_node(&self) -> DataNode {
        let mut table = BTreeMap::new();
        table.insert("session_guid".to_string(), DataNode::Str(self.session_guid.clone()));
        table.insert("version".to_string(), DataNode::Int(i64::from(self.version)));
        table.insert(
            "transaction_id_min".to_string(),
            DataNode::Int(self.transaction_id_min as i64),
        );
        table.insert(
            "transaction_id_max".to_string(),
            DataNode::Int(self.transaction_id_max as i64),
        );
        DataNode::Table(table)
    }

    pub(crate) fn from_node(node: &DataNode) -> SaveResult<Self> {
        let DataNode::Table(table) = node else {
            return Err(SaveError::Deserialization);
        };
        let get_str = |key: &str| -> SaveResult<String> {
            match table.get(key) {
                Some(DataNode::Str(value)) => Ok(value.clone()),
                _ => Err(SaveError::Deserialization),
            }
        };
        let get_int = |key: &str| -> SaveResult<i64> {
            match table.get(key) {
                Some(DataNode::Int(value)) => Ok(*value),
                _ => Err(SaveError::Deserialization),
            }
        };
        Ok(Self {
            session_guid: get_str("session_guid")?,
            version: get_int("version")? as i32,
            transaction_id_min: get_int("transaction_id_min")? as u64,
            transaction_id_max: get_int("transaction_id_max")? as u64,
        })
    }
}

/// Encodes and decodes the on-disk save blob; carries no state of its own.
pub struct SaveContainer;

impl SaveContainer {
    /// Serialise `metadata`, `save_data` and `pending_delta` into an
    /// encrypted, checksummed blob (spec §4.6: `encode`).
    pub fn encode(
        key: &[u8; 32],
        save_data: &DataNode,
        pending_delta: &DataNode,
        metadata: &SaveFileMetadata,
    ) -> SaveResult<Vec<u8>> {
        let mut stream = ByteStream::new();
        stream.write::<u32>(SAVE_CONTAINER_SIGNATURE);
        stream.write::<i32>(CONTAINER_VERSION);

        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce);
        stream.write_bytes(&nonce);

        let checksum_offset = stream.position();
        stream.write_bytes(&[0u8; CHECKSUM_LEN]);

        metadata.to_node().encode(&mut stream);
        save_data.encode(&mut stream);
        pending_delta.encode(&mut stream);

        let mut bytes = stream.into_vec();
        let checksum = sha512(&bytes);
        bytes[checksum_offset..checksum_offset + CHECKSUM_LEN].copy_from_slice(&checksum);

        aes_ctr_encrypt(key, &nonce, &mut bytes[checksum_offset..])?;
        Ok(bytes)
    }

    /// Inverse of [`Self::encode`] (spec §4.6: `decode`), failing with a
    /// distinct [`SaveError`] variant for each stage: signature, version,
    /// checksum, or deserialisation.
    pub fn decode(key: &[u8; 32], bytes: &[u8]) -> SaveResult<(DataNode, DataNode, SaveFileMetadata)> {
        let mut header = ByteStream::from_bytes(bytes.to_vec());
        let signature: u32 = header.read().map_err(|_| SaveError::SignatureData)?;
        if signature != SAVE_CONTAINER_SIGNATURE {
            return Err(SaveError::SignatureCheck {
                expected: SAVE_CONTAINER_SIGNATURE,
                actual: signature,
            });
        }

        let version: i32 = header.read().map_err(|_| SaveError::VersionData)?;
        if version != CONTAINER_VERSION {
            return Err(SaveError::VersionCheck(version));
        }

        let nonce = header.read_bytes(NONCE_LEN).map_err(|_| SaveError::Encryption)?.to_vec();
        let checksum_offset = header.position();

        let remaining_len = bytes.len().saturating_sub(checksum_offset);
        let mut decrypted = header
            .read_bytes(remaining_len)
            .map_err(|_| SaveError::Encryption)?
            .to_vec();
        aes_ctr_decrypt(key, &nonce, &mut decrypted)?;

        if decrypted.len() < CHECKSUM_LEN {
            return Err(SaveError::ChecksumData);
        }
        let stored_checksum = decrypted[..CHECKSUM_LEN].to_vec();

        let mut plaintext = bytes[..checksum_offset].to_vec();
        plaintext.extend_from_slice(&[0u8; CHECKSUM_LEN]);
        plaintext.extend_from_slice(&decrypted[CHECKSUM_LEN..]);
        let computed_checksum = sha512(&plaintext);
        if computed_checksum.as_slice() != stored_checksum.as_slice() {
            return Err(SaveError::ChecksumCheck);
        }

        let mut body = ByteStream::from_bytes(decrypted[CHECKSUM_LEN..].to_vec());
        let metadata_node = DataNode::decode(&mut body)?;
        let save_data = DataNode::decode(&mut body)?;
        let pending_delta = DataNode::decode(&mut body)?;

        if body.position() != body.len() {
            return Err(SaveError::ExtraData);
        }

        let metadata = SaveFileMetadata::from_node(&metadata_node)?;
        Ok((save_data, pending_delta, metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key() -> [u8; 32] {
        [9u8; 32]
    }

    fn sample_metadata() -> SaveFileMetadata {
        SaveFileMetadata {
            session_guid: "11111111-1111-1111-1111-111111111111".to_string(),
            version: 3,
            transaction_id_min: 1,
            transaction_id_max: 5,
        }
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let key = sample_key();
        let save_data = DataNode::Table(BTreeMap::from([("gold".to_string(), DataNode::Int(100))]));
        let pending_delta = DataNode::Null;
        let metadata = sample_metadata();

        let bytes = SaveContainer::encode(&key, &save_data, &pending_delta, &metadata).unwrap();
        let (decoded_save, decoded_delta, decoded_metadata) = SaveContainer::decode(&key, &bytes).unwrap();

        assert_eq!(decoded_save, save_data);
        assert_eq!(decoded_delta, pending_delta);
        assert_eq!(decoded_metadata, metadata);
    }

    #[test]
    fn wrong_signature_is_rejected() {
        let key = sample_key();
        let mut bytes = SaveContainer::encode(&key, &DataNode::Null, &DataNode::Null, &sample_metadata()).unwrap();
        bytes[0] ^= 0xff;
        assert!(matches!(
            SaveContainer::decode(&key, &bytes),
            Err(SaveError::SignatureCheck { .. })
        ));
    }

    #[test]
    fn corrupted_encrypted_region_fails_checksum() {
        let key = sample_key();
        let mut bytes = SaveContainer::encode(&key, &DataNode::Null, &DataNode::Null, &sample_metadata()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(SaveContainer::decode(&key, &bytes), Err(SaveError::ChecksumCheck)));
    }

    #[test]
    fn wrong_key_fails_checksum() {
        let key = sample_key();
        let bytes = SaveContainer::encode(&key, &DataNode::Null, &DataNode::Null, &sample_metadata()).unwrap();
        let wrong_key = [1u8; 32];
        assert!(matches!(
            SaveContainer::decode(&wrong_key, &bytes),
            Err(SaveError::ChecksumCheck)
        ));
    }
}
