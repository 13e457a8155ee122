//! `aes128gcm` content encoding for Web Push (RFC 8188 framing, RFC 8291 keys).

use aes_gcm::{
    Aes128Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use hkdf::Hkdf;
use p256::PublicKey;
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use thiserror::Error;

/// Single-record encoding, so the whole payload must fit in one record.
pub const RECORD_SIZE: u32 = 4096;

const TAG_LEN: usize = 16;
const SALT_LEN: usize = 16;
const AUTH_SECRET_LEN: usize = 16;
const UNCOMPRESSED_POINT_LEN: usize = 65;

/// Browsers hand out unpadded base64url, some libraries pad it.
pub(crate) const B64_URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error)]
pub enum EncryptError {
    #[error("p256dh is not a valid P-256 public key")]
    BadPublicKey,
    #[error("auth secret must be 16 bytes")]
    BadAuthSecret,
    #[error("payload of {0} bytes does not fit in one record")]
    TooLarge(usize),
    #[error("key derivation failed")]
    Derive,
    #[error("encryption failed")]
    Cipher,
}

/// Decoded subscription keys.
pub struct ClientKeys {
    public: PublicKey,
    auth: [u8; AUTH_SECRET_LEN],
}

impl ClientKeys {
    pub fn parse(p256dh: &str, auth: &str) -> Result<Self, EncryptError> {
        let point = B64_URL
            .decode(p256dh.trim())
            .map_err(|_| EncryptError::BadPublicKey)?;
        if point.len() != UNCOMPRESSED_POINT_LEN {
            return Err(EncryptError::BadPublicKey);
        }
        let public = PublicKey::from_sec1_bytes(&point).map_err(|_| EncryptError::BadPublicKey)?;

        let auth: [u8; AUTH_SECRET_LEN] = B64_URL
            .decode(auth.trim())
            .map_err(|_| EncryptError::BadAuthSecret)?
            .try_into()
            .map_err(|_| EncryptError::BadAuthSecret)?;

        Ok(Self { public, auth })
    }
}

/// Encrypt `plaintext` for one subscriber. Returns the full request body:
/// `salt(16) || rs(4) || idlen(1) || keyid(65) || ciphertext`.
pub fn encrypt(keys: &ClientKeys, plaintext: &[u8]) -> Result<Vec<u8>, EncryptError> {
    // One delimiter byte plus the GCM tag must fit alongside the payload.
    if plaintext.len() + 1 + TAG_LEN > RECORD_SIZE as usize {
        return Err(EncryptError::TooLarge(plaintext.len()));
    }

    let ua_public = keys.public.to_encoded_point(false);

    let as_secret = EphemeralSecret::random(&mut OsRng);
    let as_public = as_secret.public_key().to_encoded_point(false);
    let shared = as_secret.diffie_hellman(&keys.public);

    // IKM = HKDF(auth, ecdh, "WebPush: info\0" || ua_public || as_public)
    let mut key_info = Vec::with_capacity(14 + 2 * UNCOMPRESSED_POINT_LEN);
    key_info.extend_from_slice(b"WebPush: info\0");
    key_info.extend_from_slice(ua_public.as_bytes());
    key_info.extend_from_slice(as_public.as_bytes());

    let mut ikm = [0u8; 32];
    Hkdf::<Sha256>::new(Some(keys.auth.as_slice()), shared.raw_secret_bytes().as_slice())
        .expand(&key_info, &mut ikm)
        .map_err(|_| EncryptError::Derive)?;

    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    let (cek, nonce) = derive_content_keys(&salt, &ikm)?;

    let mut record = Vec::with_capacity(plaintext.len() + 1);
    record.extend_from_slice(plaintext);
    record.push(0x02); // last-record delimiter

    let cipher = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(&cek));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), record.as_slice())
        .map_err(|_| EncryptError::Cipher)?;

    let mut body = Vec::with_capacity(SALT_LEN + 4 + 1 + UNCOMPRESSED_POINT_LEN + ciphertext.len());
    body.extend_from_slice(&salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(UNCOMPRESSED_POINT_LEN as u8);
    body.extend_from_slice(as_public.as_bytes());
    body.extend_from_slice(&ciphertext);
    Ok(body)
}

fn derive_content_keys(salt: &[u8], ikm: &[u8]) -> Result<([u8; 16], [u8; 12]), EncryptError> {
    let prk = Hkdf::<Sha256>::new(Some(salt), ikm);

    let mut cek = [0u8; 16];
    prk.expand(b"Content-Encoding: aes128gcm\0", &mut cek)
        .map_err(|_| EncryptError::Derive)?;

    let mut nonce = [0u8; 12];
    prk.expand(b"Content-Encoding: nonce\0", &mut nonce)
        .map_err(|_| EncryptError::Derive)?;

    Ok((cek, nonce))
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::SecretKey;

    /// The user agent's half of the exchange, to check what we produce.
    fn decrypt(ua_secret: &SecretKey, auth: &[u8; 16], body: &[u8]) -> Vec<u8> {
        let salt = &body[..16];
        let rs = u32::from_be_bytes(body[16..20].try_into().unwrap());
        assert_eq!(rs, RECORD_SIZE);
        let idlen = body[20] as usize;
        let as_public_bytes = &body[21..21 + idlen];
        let ciphertext = &body[21 + idlen..];

        let as_public = PublicKey::from_sec1_bytes(as_public_bytes).unwrap();
        let shared = p256::ecdh::diffie_hellman(ua_secret.to_nonzero_scalar(), as_public.as_affine());

        let mut key_info = b"WebPush: info\0".to_vec();
        key_info.extend_from_slice(ua_secret.public_key().to_encoded_point(false).as_bytes());
        key_info.extend_from_slice(as_public_bytes);
        let mut ikm = [0u8; 32];
        Hkdf::<Sha256>::new(Some(auth.as_slice()), shared.raw_secret_bytes().as_slice())
            .expand(&key_info, &mut ikm)
            .unwrap();

        let (cek, nonce) = derive_content_keys(salt, &ikm).unwrap();
        let mut plain = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(&cek))
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .unwrap();
        assert_eq!(plain.pop(), Some(0x02));
        plain
    }

    fn subscriber() -> (SecretKey, [u8; 16], ClientKeys) {
        let secret = SecretKey::random(&mut OsRng);
        let mut auth = [0u8; 16];
        OsRng.fill_bytes(&mut auth);

        let p256dh = B64_URL.encode(secret.public_key().to_encoded_point(false).as_bytes());
        let keys = ClientKeys::parse(&p256dh, &B64_URL.encode(auth)).unwrap();
        (secret, auth, keys)
    }

    #[test]
    fn subscriber_can_decrypt() {
        let (secret, auth, keys) = subscriber();
        let body = encrypt(&keys, br#"{"title":"bob"}"#).unwrap();

        assert_eq!(body[20] as usize, UNCOMPRESSED_POINT_LEN);
        assert_eq!(decrypt(&secret, &auth, &body), br#"{"title":"bob"}"#);
    }

    #[test]
    fn each_send_uses_fresh_salt_and_key() {
        let (_, _, keys) = subscriber();
        let a = encrypt(&keys, b"same").unwrap();
        let b = encrypt(&keys, b"same").unwrap();
        assert_ne!(a[..21 + 65], b[..21 + 65]);
    }

    #[test]
    fn oversized_payload_is_refused() {
        let (_, _, keys) = subscriber();
        let big = vec![b'x'; RECORD_SIZE as usize];
        assert!(matches!(encrypt(&keys, &big), Err(EncryptError::TooLarge(_))));
    }

    #[test]
    fn rejects_bad_keys() {
        let (secret, auth, _) = subscriber();
        let p256dh = B64_URL.encode(secret.public_key().to_encoded_point(false).as_bytes());

        assert!(matches!(
            ClientKeys::parse("AAAA", &B64_URL.encode(auth)),
            Err(EncryptError::BadPublicKey)
        ));
        assert!(matches!(
            ClientKeys::parse(&p256dh, "c2hvcnQ"),
            Err(EncryptError::BadAuthSecret)
        ));
        assert!(matches!(
            ClientKeys::parse(&B64_URL.encode([4u8; 65]), &B64_URL.encode(auth)),
            Err(EncryptError::BadPublicKey)
        ));
    }
}
