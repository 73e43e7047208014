use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use url::Url;

use crate::error::{MirrorError, MirrorResult};

/// The AES-128 key in effect for the segments of one manifest.
///
/// `bytes` is only present when the key material was fetched for decryption.
/// Otherwise the key is mirrored as a file and segments are written verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentKey {
    pub uri: Url,
    pub bytes: Option<[u8; 16]>,
    pub iv: Option<[u8; 16]>,
}

impl ContentKey {
    /// IV for the segment at `index`, preferring the one declared by the playlist.
    pub fn segment_iv(&self, media_sequence: u64, index: usize) -> [u8; 16] {
        self.iv
            .unwrap_or_else(|| derive_iv(media_sequence, index))
    }
}

/// IV made of the big-endian words `[0, 0, media_sequence, index]`.
///
/// Only the low 32 bits of `media_sequence` and `index` fit in their words, larger
/// values wrap.
pub fn derive_iv(media_sequence: u64, index: usize) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[8..12].copy_from_slice(&((media_sequence & 0xffff_ffff) as u32).to_be_bytes());
    iv[12..16].copy_from_slice(&((index & 0xffff_ffff) as u32).to_be_bytes());
    iv
}

/// Parse an `IV=0x...` attribute value.
pub fn parse_iv(iv: &str) -> MirrorResult<[u8; 16]> {
    let hex = iv
        .strip_prefix("0x")
        .or_else(|| iv.strip_prefix("0X"))
        .unwrap_or(iv);
    u128::from_str_radix(hex, 16)
        .map(u128::to_be_bytes)
        .map_err(|_| MirrorError::InvalidIv(iv.to_string()))
}

pub fn key_from_bytes(bytes: &[u8]) -> MirrorResult<[u8; 16]> {
    bytes
        .try_into()
        .map_err(|_| MirrorError::InvalidBinaryKey(bytes.to_vec()))
}

pub fn decrypt_aes128(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> MirrorResult<Vec<u8>> {
    let decryptor = cbc::Decryptor::<aes::Aes128>::new(key.into(), iv.into());
    Ok(decryptor.decrypt_padded_vec_mut::<Pkcs7>(data)?)
}
