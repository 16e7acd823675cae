use hmac::{Hmac, Mac, digest::CtOutput};
use sha1::Sha1;

use crate::Error;

/// HMAC SHA1 digest.
///
/// # Test
///
/// ```
/// use relay_server_codec::crypto::hmac_sha1;
///
/// let key = [0x0bu8; 20];
///
/// let sign = [
///     0xb6u8, 0x17, 0x31, 0x86, 0x55, 0x05, 0x72, 0x64, 0xe2, 0x8b,
///     0xc0, 0xb6, 0xfb, 0x37, 0x8c, 0x8e, 0xf1, 0x46, 0xbe, 0x00,
/// ];
///
/// let hmac_output = hmac_sha1(&key, &[b"Hi There"])
///     .unwrap()
///     .into_bytes();
///
/// assert_eq!(hmac_output.as_slice(), &sign);
/// ```
pub fn hmac_sha1(key: &[u8], source: &[&[u8]]) -> Result<CtOutput<Hmac<Sha1>>, Error> {
    match Hmac::<Sha1>::new_from_slice(key) {
        Err(_) => Err(Error::SummaryFailed),
        Ok(mut mac) => {
            for buf in source {
                mac.update(buf);
            }

            Ok(mac.finalize())
        }
    }
}

/// Verifies an HMAC SHA1 tag in constant time.
///
/// # Test
///
/// ```
/// use relay_server_codec::crypto::hmac_sha1_verify;
///
/// let key = [0x0bu8; 20];
///
/// let sign = [
///     0xb6u8, 0x17, 0x31, 0x86, 0x55, 0x05, 0x72, 0x64, 0xe2, 0x8b,
///     0xc0, 0xb6, 0xfb, 0x37, 0x8c, 0x8e, 0xf1, 0x46, 0xbe, 0x00,
/// ];
///
/// assert!(hmac_sha1_verify(&key, &[b"Hi There"], &sign));
/// assert!(!hmac_sha1_verify(&key, &[b"Hi There"], &[0u8; 20]));
/// assert!(!hmac_sha1_verify(b"other key", &[b"Hi There"], &sign));
/// ```
pub fn hmac_sha1_verify(key: &[u8], source: &[&[u8]], tag: &[u8]) -> bool {
    match Hmac::<Sha1>::new_from_slice(key) {
        Err(_) => false,
        Ok(mut mac) => {
            for buf in source {
                mac.update(buf);
            }

            mac.verify_slice(tag).is_ok()
        }
    }
}
