//! Message crypto for the platform push protocol.
//!
//! - SHA-1 signatures over the sorted `[token, timestamp, nonce(, encrypt)]`
//! - AES-256-CBC with the IV taken from the first 16 key bytes
//!
//! Plaintext framing before encryption:
//!
//! ```text
//! random(16) ‖ len(msg) as u32 BE ‖ msg ‖ appid ‖ PKCS#7 padding to 32 bytes
//! ```

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD as BASE64};
use base64::Engine;
use sha1::{Digest, Sha1};

use crate::error::{GatewayError, GatewayResult};
use crate::xml::XmlBuilder;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Block size used by the platform's PKCS#7 padding.
const PAD_BLOCK: usize = 32;
const RANDOM_PREFIX: usize = 16;
const AES_KEY_CHARS: usize = 43;

/// Keys are 43 Base64 characters whose last symbol may carry stray bits.
const KEY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

/// Verification, decryption and encryption of pushed messages.
pub trait MessageCrypto: Send + Sync + std::fmt::Debug {
    /// Check the plain `signature` query parameter (URL verification and
    /// unencrypted pushes).
    fn verify_url_signature(&self, signature: &str, timestamp: &str, nonce: &str) -> bool;

    /// Check `msg_signature` against the encrypted payload and decrypt it.
    fn decrypt_request(
        &self,
        msg_signature: &str,
        timestamp: &str,
        nonce: &str,
        encrypted: &str,
    ) -> GatewayResult<String>;

    /// Encrypt `plaintext` and wrap it in the signed reply envelope.
    fn encrypt_reply(&self, plaintext: &str, timestamp: &str, nonce: &str) -> GatewayResult<String>;
}

/// The platform's message crypto scheme.
#[derive(Clone)]
pub struct BizMsgCrypt {
    token: String,
    key: [u8; 32],
    appid: String,
}

impl std::fmt::Debug for BizMsgCrypt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BizMsgCrypt")
            .field("appid", &self.appid)
            .finish_non_exhaustive()
    }
}

/// SHA-1 over the lexicographically sorted parts, hex encoded.
pub fn signature(parts: &[&str]) -> String {
    let mut sorted = parts.to_vec();
    sorted.sort_unstable();
    let mut hasher = Sha1::new();
    for part in sorted {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

impl BizMsgCrypt {
    /// `aes_key` is the 43-character key from the platform console; `appid`
    /// is the id stamped into (and expected in) every payload.
    pub fn new(
        token: impl Into<String>,
        aes_key: &str,
        appid: impl Into<String>,
    ) -> GatewayResult<Self> {
        if aes_key.len() != AES_KEY_CHARS {
            return Err(GatewayError::Config {
                message: format!(
                    "aes_key must be {} characters, got {}",
                    AES_KEY_CHARS,
                    aes_key.len()
                ),
            });
        }
        let decoded = KEY_ENGINE
            .decode(format!("{}=", aes_key))
            .map_err(|e| GatewayError::Config {
                message: format!("aes_key is not Base64: {e}"),
            })?;
        let key: [u8; 32] = decoded.try_into().map_err(|_| GatewayError::Config {
            message: "aes_key must decode to 32 bytes".to_string(),
        })?;

        Ok(Self {
            token: token.into(),
            key,
            appid: appid.into(),
        })
    }

    pub fn appid(&self) -> &str {
        &self.appid
    }

    /// Encrypt `msg` into the Base64 payload carried in `<Encrypt>`.
    pub fn encrypt(&self, msg: &str) -> GatewayResult<String> {
        use rand::rngs::OsRng;
        use rand::RngCore;

        let mut random = [0u8; RANDOM_PREFIX];
        OsRng.fill_bytes(&mut random);
        self.encrypt_with_prefix(msg, random)
    }

    fn encrypt_with_prefix(&self, msg: &str, random: [u8; RANDOM_PREFIX]) -> GatewayResult<String> {
        let len = u32::try_from(msg.len())
            .map_err(|_| GatewayError::crypto("message too large to encrypt"))?;

        let mut plain =
            Vec::with_capacity(RANDOM_PREFIX + 4 + msg.len() + self.appid.len() + PAD_BLOCK);
        plain.extend_from_slice(&random);
        plain.extend_from_slice(&len.to_be_bytes());
        plain.extend_from_slice(msg.as_bytes());
        plain.extend_from_slice(self.appid.as_bytes());

        let pad = PAD_BLOCK - plain.len() % PAD_BLOCK;
        plain.resize(plain.len() + pad, pad as u8);

        let cipher = Aes256CbcEnc::new_from_slices(&self.key, &self.key[..16])
            .map_err(|e| GatewayError::crypto(format!("cipher init failed: {e}")))?;
        let encrypted = cipher.encrypt_padded_vec_mut::<NoPadding>(&plain);
        Ok(BASE64.encode(encrypted))
    }

    /// Decrypt a Base64 `<Encrypt>` payload and check the embedded appid.
    pub fn decrypt(&self, encrypted: &str) -> GatewayResult<String> {
        let data = BASE64
            .decode(encrypted.trim())
            .map_err(|e| GatewayError::crypto(format!("payload is not Base64: {e}")))?;
        if data.is_empty() || data.len() % 16 != 0 {
            return Err(GatewayError::crypto("payload is not a whole number of blocks"));
        }

        let cipher = Aes256CbcDec::new_from_slices(&self.key, &self.key[..16])
            .map_err(|e| GatewayError::crypto(format!("cipher init failed: {e}")))?;
        let plain = cipher
            .decrypt_padded_vec_mut::<NoPadding>(&data)
            .map_err(|e| GatewayError::crypto(format!("decryption failed: {e}")))?;

        let pad = plain.last().copied().map(usize::from).unwrap_or(0);
        if pad == 0 || pad > PAD_BLOCK || pad > plain.len() {
            return Err(GatewayError::crypto("invalid padding"));
        }
        let content = &plain[..plain.len() - pad];
        if content.len() < RANDOM_PREFIX + 4 {
            return Err(GatewayError::crypto("payload too short"));
        }
        let content = &content[RANDOM_PREFIX..];

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&content[..4]);
        let msg_len = u32::from_be_bytes(len_bytes) as usize;
        let rest = &content[4..];
        if msg_len > rest.len() {
            return Err(GatewayError::crypto("declared length exceeds payload"));
        }

        let (msg, appid) = rest.split_at(msg_len);
        if appid != self.appid.as_bytes() {
            return Err(GatewayError::crypto(format!(
                "appid mismatch: expected {}, got {}",
                self.appid,
                String::from_utf8_lossy(appid)
            )));
        }

        String::from_utf8(msg.to_vec())
            .map_err(|e| GatewayError::crypto(format!("message is not UTF-8: {e}")))
    }
}

impl MessageCrypto for BizMsgCrypt {
    fn verify_url_signature(&self, signature: &str, timestamp: &str, nonce: &str) -> bool {
        self::signature(&[&self.token, timestamp, nonce]) == signature
    }

    fn decrypt_request(
        &self,
        msg_signature: &str,
        timestamp: &str,
        nonce: &str,
        encrypted: &str,
    ) -> GatewayResult<String> {
        let expected = signature(&[&self.token, timestamp, nonce, encrypted]);
        if expected != msg_signature {
            return Err(GatewayError::Signature {
                message: "msg_signature does not match payload".to_string(),
            });
        }
        self.decrypt(encrypted)
    }

    fn encrypt_reply(&self, plaintext: &str, timestamp: &str, nonce: &str) -> GatewayResult<String> {
        let encrypted = self.encrypt(plaintext)?;
        let msg_signature = signature(&[&self.token, timestamp, nonce, &encrypted]);
        let timestamp: i64 = timestamp
            .parse()
            .map_err(|_| GatewayError::protocol(format!("invalid timestamp '{timestamp}'")))?;

        let mut xml = XmlBuilder::new();
        xml.cdata("Encrypt", &encrypted)
            .cdata("MsgSignature", &msg_signature)
            .number("TimeStamp", timestamp)
            .cdata("Nonce", nonce);
        xml.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_flat;

    const KEY: &str = "abcdefghijklmnopqrstuvwxyz0123456789ABCDEFG";

    fn crypt() -> BizMsgCrypt {
        BizMsgCrypt::new("pamtest", KEY, "wxb11529c136998cb6").unwrap()
    }

    #[test]
    fn test_signature_sorts_parts() {
        let a = signature(&["token", "1409659813", "1372623149"]);
        let b = signature(&["1372623149", "token", "1409659813"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_known_signature() {
        // Sorted and concatenated: "abc".
        assert_eq!(
            signature(&["c", "a", "b"]),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_encrypt_decrypt() {
        let crypt = crypt();
        let msg = "<xml><ToUserName><![CDATA[oia2Tj]]></ToUserName></xml>";
        let encrypted = crypt.encrypt(msg).unwrap();
        assert_eq!(crypt.decrypt(&encrypted).unwrap(), msg);
    }

    #[test]
    fn test_padding_fills_whole_blocks() {
        let crypt = crypt();
        // 16 + 4 + 12 = 32 bytes before padding: a full extra block is added.
        let short = BizMsgCrypt::new("t", KEY, "").unwrap();
        let encrypted = short.encrypt_with_prefix("abcdefghijkl", [7u8; 16]).unwrap();
        assert_eq!(BASE64.decode(encrypted).unwrap().len(), 64);

        let encrypted = crypt.encrypt_with_prefix("", [0u8; 16]).unwrap();
        assert_eq!(BASE64.decode(encrypted).unwrap().len() % PAD_BLOCK, 0);
    }

    #[test]
    fn test_foreign_appid_rejected() {
        let ours = crypt();
        let theirs = BizMsgCrypt::new("pamtest", KEY, "wx-someone-else").unwrap();
        let encrypted = theirs.encrypt("hello").unwrap();
        assert!(matches!(
            ours.decrypt(&encrypted),
            Err(GatewayError::Crypto { .. })
        ));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let crypt = crypt();
        assert!(crypt.decrypt("not base64!!").is_err());
        assert!(crypt.decrypt(&BASE64.encode([1u8; 15])).is_err());
    }

    #[test]
    fn test_decrypt_request_checks_signature() {
        let crypt = crypt();
        let encrypted = crypt.encrypt("<xml/>").unwrap();
        let good = signature(&["pamtest", "1409659813", "nonce", &encrypted]);

        assert_eq!(
            crypt
                .decrypt_request(&good, "1409659813", "nonce", &encrypted)
                .unwrap(),
            "<xml/>"
        );
        assert!(matches!(
            crypt.decrypt_request("bad", "1409659813", "nonce", &encrypted),
            Err(GatewayError::Signature { .. })
        ));
    }

    #[test]
    fn test_encrypt_reply_envelope() {
        let crypt = crypt();
        let envelope = crypt
            .encrypt_reply("<xml><Content>hi</Content></xml>", "1409659813", "nonce")
            .unwrap();
        let fields = parse_flat(&envelope).unwrap();

        assert_eq!(fields["TimeStamp"], "1409659813");
        assert_eq!(fields["Nonce"], "nonce");
        assert_eq!(
            fields["MsgSignature"],
            signature(&["pamtest", "1409659813", "nonce", &fields["Encrypt"]])
        );
        assert_eq!(
            crypt.decrypt(&fields["Encrypt"]).unwrap(),
            "<xml><Content>hi</Content></xml>"
        );
    }

    #[test]
    fn test_url_signature() {
        let crypt = crypt();
        let sig = signature(&["pamtest", "1409659813", "nonce"]);
        assert!(crypt.verify_url_signature(&sig, "1409659813", "nonce"));
        assert!(!crypt.verify_url_signature(&sig, "1409659814", "nonce"));
    }

    #[test]
    fn test_key_length_checked() {
        assert!(matches!(
            BizMsgCrypt::new("t", "short", "wx"),
            Err(GatewayError::Config { .. })
        ));
    }
}
