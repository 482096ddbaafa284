// MAC-then-encrypt envelope guarded by the reference oracle.
//
//     ciphertext = IV || AES-128-CBC(IV, tag || message || pkcs7)
//     tag        = HMAC-SHA256(mac_key, message)
//
// The encrypted tag takes the place of the `tag` region in a `Layout`, and
// its last block is the chaining block for the first message block. The
// oracle decrypts, checks padding, then checks the tag, and says which step
// failed. Telling those two failures apart is the leak.
use aes::Aes128;
use cipher::{generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::{pkcs7_pad, pkcs7_padding_len, Layout, Oracle, OracleError, Verdict};

pub const KEY_LEN: usize = 16;
pub const IV_LEN: usize = 16;
pub const TAG_LEN: usize = 32;
pub const BLOCK_SIZE: usize = 16;

/// Environment variable the reference oracle reads its hex key from.
pub const KEY_ENV: &str = "PADDING_ORACLE_KEY";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("key must be {KEY_LEN} bytes of hex: {0}")]
    InvalidKey(String),
    #[error("envelope of {0} bytes is not IV, tag and whole blocks")]
    Malformed(usize),
    #[error("bad padding")]
    BadPadding,
    #[error("bad MAC")]
    BadMac,
}

/// The oracle's reply byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Response {
    Ok = b'O',
    BadMac = b'M',
    BadPadding = b'P',
    Malformed = b'F',
}

impl Response {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct EnvelopeKey {
    cipher_key: [u8; KEY_LEN],
    mac_key: [u8; 32],
}

impl EnvelopeKey {
    pub fn new(cipher_key: [u8; KEY_LEN]) -> Self {
        let mac_key = Sha256::new()
            .chain_update(b"mac")
            .chain_update(cipher_key)
            .finalize()
            .into();
        Self {
            cipher_key,
            mac_key,
        }
    }

    pub fn random() -> Self {
        Self::new(rand::random())
    }

    pub fn from_hex(hex_key: &str) -> Result<Self, EnvelopeError> {
        let bytes =
            hex::decode(hex_key.trim()).map_err(|e| EnvelopeError::InvalidKey(e.to_string()))?;
        let cipher_key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| EnvelopeError::InvalidKey(format!("got {} bytes", b.len())))?;
        Ok(Self::new(cipher_key))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.cipher_key)
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC zero-extends short keys to the hash block size.
        let mut key_block = [0u8; 64];
        key_block[..self.mac_key.len()].copy_from_slice(&self.mac_key);
        <HmacSha256 as Mac>::new(GenericArray::from_slice(&key_block))
    }

    fn tag(&self, message: &[u8]) -> [u8; TAG_LEN] {
        let mut mac = self.mac();
        mac.update(message);
        mac.finalize().into_bytes().into()
    }

    fn verify_tag(&self, message: &[u8], tag: &[u8]) -> bool {
        let mut mac = self.mac();
        mac.update(message);
        mac.verify_slice(tag).is_ok()
    }
}

impl std::fmt::Debug for EnvelopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeKey").finish_non_exhaustive()
    }
}

/// The layout of a sealed envelope, as seen by the recovery engine.
pub fn layout() -> Layout {
    Layout::new(IV_LEN, TAG_LEN, BLOCK_SIZE)
}

pub fn seal(key: &EnvelopeKey, iv: &[u8; IV_LEN], message: &[u8]) -> Vec<u8> {
    let tagged = [&key.tag(message)[..], message].concat();
    let mut body = pkcs7_pad(&tagged, BLOCK_SIZE as u8);
    let mut encryptor = cbc::Encryptor::<Aes128>::new(&key.cipher_key.into(), &(*iv).into());
    for block in body.chunks_exact_mut(BLOCK_SIZE) {
        encryptor.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
    [&iv[..], &body].concat()
}

pub fn seal_with_random_iv(key: &EnvelopeKey, message: &[u8]) -> Vec<u8> {
    seal(key, &rand::random(), message)
}

/// Decrypts everything after the IV without looking at padding or tag.
pub fn decrypt_raw(key: &EnvelopeKey, ciphertext: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    if ciphertext.len() < IV_LEN + TAG_LEN + BLOCK_SIZE
        || (ciphertext.len() - IV_LEN) % BLOCK_SIZE != 0
    {
        return Err(EnvelopeError::Malformed(ciphertext.len()));
    }
    let (iv, body) = ciphertext.split_at(IV_LEN);
    let mut plaintext = body.to_vec();
    let mut decryptor =
        cbc::Decryptor::<Aes128>::new(&key.cipher_key.into(), GenericArray::from_slice(iv));
    for block in plaintext.chunks_exact_mut(BLOCK_SIZE) {
        decryptor.decrypt_block_mut(GenericArray::from_mut_slice(block));
    }
    Ok(plaintext)
}

/// Decrypts and authenticates an envelope, returning the message.
pub fn open(key: &EnvelopeKey, ciphertext: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let mut plaintext = decrypt_raw(key, ciphertext)?;
    let n_pad = pkcs7_padding_len(&plaintext, BLOCK_SIZE as u8).ok_or(EnvelopeError::BadPadding)?;
    plaintext.truncate(plaintext.len() - n_pad as usize);
    if plaintext.len() < TAG_LEN {
        return Err(EnvelopeError::BadMac);
    }
    let message = plaintext.split_off(TAG_LEN);
    if !key.verify_tag(&message, &plaintext) {
        return Err(EnvelopeError::BadMac);
    }
    Ok(message)
}

/// What the reference oracle answers for a ciphertext.
pub fn check(key: &EnvelopeKey, ciphertext: &[u8]) -> Response {
    match open(key, ciphertext) {
        Ok(_) => Response::Ok,
        Err(EnvelopeError::BadMac) => Response::BadMac,
        Err(EnvelopeError::BadPadding) => Response::BadPadding,
        Err(_) => Response::Malformed,
    }
}

/// An oracle that runs the envelope checks in-process.
#[derive(Debug, Clone)]
pub struct EnvelopeOracle {
    key: EnvelopeKey,
    queries: usize,
}

impl EnvelopeOracle {
    pub fn new(key: EnvelopeKey) -> Self {
        Self { key, queries: 0 }
    }

    pub fn queries(&self) -> usize {
        self.queries
    }
}

impl Oracle for EnvelopeOracle {
    fn query(&mut self, candidate: &[u8]) -> Result<Verdict, OracleError> {
        self.queries += 1;
        Ok(Verdict::from_byte(check(&self.key, candidate).as_byte()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    fn test_key() -> EnvelopeKey {
        EnvelopeKey::new(*b"YELLOW SUBMARINE")
    }

    #[rstest]
    #[case(b"")]
    #[case(b"ICE ICE BABY")]
    #[case(b"HELLO WORLD!!!!!HELLO WORLD!!!!!")]
    fn sealed_message_opens(#[case] message: &[u8]) {
        let key = test_key();

        let ciphertext = seal_with_random_iv(&key, message);

        assert_eq!((ciphertext.len() - IV_LEN - TAG_LEN) % BLOCK_SIZE, 0);
        assert_eq!(open(&key, &ciphertext), Ok(message.to_vec()));
        assert_eq!(check(&key, &ciphertext), Response::Ok);
    }

    #[test]
    fn sealing_is_deterministic_for_fixed_iv() {
        let key = test_key();
        let iv = [7u8; IV_LEN];

        assert_eq!(seal(&key, &iv, b"message"), seal(&key, &iv, b"message"));
    }

    #[test]
    fn flipped_message_byte_is_bad_mac() {
        let key = test_key();
        let mut ciphertext = seal(&key, &[0u8; IV_LEN], b"attack at dawn, not at dusk");
        // Garbles the tag and one byte of the first message block, but the
        // padding at the end still decrypts cleanly.
        ciphertext[IV_LEN + TAG_LEN - 1] ^= 0x01;

        assert_eq!(check(&key, &ciphertext), Response::BadMac);
    }

    #[test]
    fn flipped_padding_byte_is_bad_padding() {
        let key = test_key();
        let mut ciphertext = seal(&key, &[0u8; IV_LEN], b"attack at dawn");
        let len = ciphertext.len();
        ciphertext[len - BLOCK_SIZE - 1] ^= 0x10;

        assert_eq!(check(&key, &ciphertext), Response::BadPadding);
    }

    #[rstest]
    #[case(0)]
    #[case(IV_LEN + TAG_LEN)]
    #[case(IV_LEN + TAG_LEN + 5)]
    fn short_or_ragged_envelope_is_malformed(#[case] len: usize) {
        assert_eq!(check(&test_key(), &vec![0u8; len]), Response::Malformed);
    }

    #[test]
    fn key_round_trips_through_hex() {
        let key = EnvelopeKey::random();

        let parsed = EnvelopeKey::from_hex(&key.to_hex()).unwrap();

        assert_eq!(parsed, key);
    }

    #[rstest]
    #[case("not hex")]
    #[case("00112233")]
    fn bad_hex_key_is_rejected(#[case] hex_key: &str) {
        assert!(matches!(
            EnvelopeKey::from_hex(hex_key),
            Err(EnvelopeError::InvalidKey(_))
        ));
    }

    #[test]
    fn envelope_oracle_counts_queries() {
        let key = test_key();
        let ciphertext = seal(&key, &[0u8; IV_LEN], b"message");
        let mut oracle = EnvelopeOracle::new(key);

        assert_eq!(oracle.query(&ciphertext).unwrap(), Verdict::Valid);
        assert_eq!(oracle.query(&ciphertext[..IV_LEN]).unwrap(), Verdict::Invalid);
        assert_eq!(oracle.queries(), 2);
    }
}
