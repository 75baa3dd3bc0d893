//! Passphrase-to-key derivation.
//!
//! Argon2id turns a low-entropy secret (the master passphrase or a
//! recovery phrase) into a 256-bit wrapping key. The parameters travel
//! with whatever they protected — a wrapper sealed under last year's
//! calibration still opens after the defaults move.

use {argon2::Argon2, zeroize::Zeroizing};

use crate::error::VaultError;

/// Argon2id cost parameters. The defaults are calibrated to roughly a
/// hundred milliseconds on current server hardware.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub m_cost: u32,
    /// Iterations.
    pub t_cost: u32,
    /// Lanes.
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: 65536, // 64 MiB
            t_cost: 3,
            p_cost: 1,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for unit tests.
    #[must_use]
    pub fn insecure_fast() -> Self {
        Self {
            m_cost: 256,
            t_cost: 1,
            p_cost: 1,
        }
    }

    /// Derive the 256-bit wrapping key for `secret` under `salt`.
    pub fn derive(
        &self,
        secret: &[u8],
        salt: &[u8],
    ) -> Result<Zeroizing<[u8; 32]>, VaultError> {
        let params = argon2::Params::new(self.m_cost, self.t_cost, self.p_cost, Some(32))
            .map_err(|e| VaultError::Cipher(format!("invalid KDF params: {e}")))?;
        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

        let mut key = Zeroizing::new([0u8; 32]);
        argon2
            .hash_password_into(secret, salt, key.as_mut())
            .map_err(|e| VaultError::Cipher(format!("KDF failed: {e}")))?;
        Ok(key)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let params = KdfParams::insecure_fast();
        let a = params.derive(b"open sesame", b"salt-0123456789a").unwrap();
        let b = params.derive(b"open sesame", b"salt-0123456789a").unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn secret_salt_and_cost_all_matter() {
        let params = KdfParams::insecure_fast();
        let salt = b"salt-0123456789a";
        let base = params.derive(b"open sesame", salt).unwrap();

        assert_ne!(*base, *params.derive(b"open sesamf", salt).unwrap());
        assert_ne!(*base, *params.derive(b"open sesame", b"salt-0123456789b").unwrap());

        let costlier = KdfParams {
            m_cost: 512,
            ..KdfParams::insecure_fast()
        };
        assert_ne!(*base, *costlier.derive(b"open sesame", salt).unwrap());
    }

    #[test]
    fn wire_shape_is_camel_case() {
        let json = serde_json::to_string(&KdfParams::default()).unwrap();
        assert!(json.contains("\"mCost\":65536"));
        assert!(json.contains("\"tCost\":3"));
        let parsed: KdfParams = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, KdfParams::default());
    }
}
