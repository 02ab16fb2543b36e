//! Blob type - the unit of content-addressed storage

use crate::model::Hash;
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Encoding of a blob's payload
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobCodec {
    /// Compact binary encoding
    #[default]
    Bincode,
    /// JSON text, handy for inspecting blocks
    Json,
}

impl BlobCodec {
    pub fn as_byte(&self) -> u8 {
        match self {
            BlobCodec::Bincode => 0,
            BlobCodec::Json => 1,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(BlobCodec::Bincode),
            1 => Some(BlobCodec::Json),
            _ => None,
        }
    }
}

/// An encoded block together with the codec needed to read it back
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blob {
    pub codec: BlobCodec,
    /// Raw payload (uncompressed)
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(codec: BlobCodec, data: Vec<u8>) -> Self {
        Blob { codec, data }
    }

    /// Encode a value with `codec`
    pub fn encode<T: Serialize>(codec: BlobCodec, value: &T) -> Result<Self> {
        let data = match codec {
            BlobCodec::Bincode => bincode::serialize(value)?,
            BlobCodec::Json => serde_json::to_vec(value)?,
        };
        Ok(Blob { codec, data })
    }

    /// Decode the payload
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(match self.codec {
            BlobCodec::Bincode => bincode::deserialize(&self.data)?,
            BlobCodec::Json => serde_json::from_slice(&self.data)?,
        })
    }

    /// Content hash; the codec is part of the address
    pub fn hash(&self) -> Hash {
        Hash::digest_tagged(self.codec.as_byte(), &self.data)
    }

    /// Compress the blob for storage
    pub fn compress(&self) -> Result<Vec<u8>> {
        let mut output = vec![self.codec.as_byte()];
        output.extend(zstd::encode_all(self.data.as_slice(), 3)?);
        Ok(output)
    }

    /// Decompress a blob from storage
    pub fn decompress(data: &[u8]) -> Result<Self> {
        let (&tag, payload) = data
            .split_first()
            .ok_or_else(|| Error::Corruption("Empty blob data".into()))?;
        let codec = BlobCodec::from_byte(tag)
            .ok_or_else(|| Error::Corruption(format!("Invalid blob codec: {}", tag)))?;
        Ok(Blob {
            codec,
            data: zstd::decode_all(payload)?,
        })
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_compress_roundtrip() {
        let original = Blob::new(BlobCodec::Json, br#"{"dataMap":[0]}"#.to_vec());
        let compressed = original.compress().unwrap();
        assert_eq!(Blob::decompress(&compressed).unwrap(), original);
    }

    #[test]
    fn test_encode_decode_both_codecs() {
        let value = (vec![1u8, 2, 3], String::from("v"));
        for codec in [BlobCodec::Bincode, BlobCodec::Json] {
            let blob = Blob::encode(codec, &value).unwrap();
            let back: (Vec<u8>, String) = blob.decode().unwrap();
            assert_eq!(back, value);
        }
    }

    #[test]
    fn test_hash_includes_codec() {
        let a = Blob::new(BlobCodec::Bincode, b"data".to_vec());
        let b = Blob::new(BlobCodec::Json, b"data".to_vec());
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_decompress_rejects_garbage() {
        assert!(matches!(Blob::decompress(&[]), Err(Error::Corruption(_))));
        assert!(matches!(Blob::decompress(&[9, 1, 2]), Err(Error::Corruption(_))));
    }
}
