use aes::{Aes128, Aes192, Aes256};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use md5::{Digest, Md5};

use super::ScriptError;

/// Lowercase hex MD5 digest of the UTF-8 bytes of `input`.
pub fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

pub fn base64_encode(input: &str) -> String {
    STANDARD.encode(input.as_bytes())
}

/// Decode base64 into a string; invalid UTF-8 is replaced, not rejected.
pub fn base64_decode(input: &str) -> Result<String, ScriptError> {
    let bytes = STANDARD.decode(input.trim())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// AES-CBC/PKCS7 decrypt base64 `data` with raw byte-string `key` and `iv`.
///
/// Key length picks the cipher: 16, 24 or 32 bytes.
pub fn aes_cbc_decrypt(data: &str, key: &str, iv: &str) -> Result<String, ScriptError> {
    let mut buf = STANDARD.decode(data.trim())?;
    let (key, iv) = (key.as_bytes(), iv.as_bytes());
    let crypto = |err: &dyn std::fmt::Display| ScriptError::Crypto(err.to_string());

    let plain = match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(|e| crypto(&e))?
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|e| crypto(&e))?
            .to_vec(),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(|e| crypto(&e))?
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|e| crypto(&e))?
            .to_vec(),
        32 => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(|e| crypto(&e))?
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|e| crypto(&e))?
            .to_vec(),
        n => {
            return Err(ScriptError::Crypto(format!(
                "unsupported AES key length {n}"
            )))
        }
    };

    Ok(String::from_utf8_lossy(&plain).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbc::cipher::BlockEncryptMut;

    fn encrypt_128(plain: &str, key: &str, iv: &str) -> String {
        let mut buf = [0u8; 64];
        let len = plain.len();
        buf[..len].copy_from_slice(plain.as_bytes());
        let cipher = cbc::Encryptor::<Aes128>::new_from_slices(key.as_bytes(), iv.as_bytes())
            .unwrap()
            .encrypt_padded_mut::<Pkcs7>(&mut buf, len)
            .unwrap();
        STANDARD.encode(cipher)
    }

    #[test]
    fn test_md5_hex() {
        assert_eq!(md5_hex("hello"), "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_base64() {
        assert_eq!(base64_encode("hello"), "aGVsbG8=");
        assert_eq!(base64_decode("aGVsbG8=").unwrap(), "hello");
        assert!(base64_decode("%%%").is_err());
    }

    #[test]
    fn test_aes_cbc_decrypt() {
        let key = "0123456789abcdef";
        let iv = "fedcba9876543210";
        let data = encrypt_128("chapter text 第一章", key, iv);
        assert_eq!(aes_cbc_decrypt(&data, key, iv).unwrap(), "chapter text 第一章");
    }

    #[test]
    fn test_aes_rejects_bad_key_length() {
        let err = aes_cbc_decrypt("aGVsbG8=", "short", "fedcba9876543210").unwrap_err();
        assert!(matches!(err, ScriptError::Crypto(_)));
    }

    #[test]
    fn test_aes_wrong_key_fails_padding() {
        let data = encrypt_128("secret", "0123456789abcdef", "fedcba9876543210");
        let result = aes_cbc_decrypt(&data, "ffffffffffffffff", "fedcba9876543210");
        // A wrong key almost always breaks PKCS7 padding; if it happens to
        // unpad, the plaintext must still differ.
        if let Ok(text) = result {
            assert_ne!(text, "secret");
        }
    }
}
