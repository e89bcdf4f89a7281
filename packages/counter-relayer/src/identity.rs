//! Signing identities: secp256k1 keys with their derived ledger address.

use crate::transaction::{LegacyTransaction, SignedTransaction};
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use primitive_types::{H160, U256};
use sha3::{Digest, Keccak256};
use std::str::FromStr;

/// A private signing credential and the address it controls.
///
/// Immutable once loaded. `Debug` prints only the address.
pub struct SigningIdentity {
    key: SigningKey,
    address: H160,
}

impl SigningIdentity {
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, crate::Error> {
        let key = SigningKey::from_slice(bytes)
            .map_err(|e| crate::Error::Signing(format!("invalid secret key: {e}")))?;
        let address = address_of(&key);
        Ok(Self { key, address })
    }

    /// Parse a hex secret, with or without `0x`.
    pub fn from_hex(secret: &str) -> Result<Self, crate::Error> {
        let trimmed = secret.trim();
        let stripped = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(stripped)
            .map_err(|e| crate::Error::Signing(format!("secret key is not hex: {e}")))?;
        if bytes.len() != 32 {
            return Err(crate::Error::Signing(format!(
                "secret key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        Self::from_secret_bytes(&bytes)
    }

    /// Generate a fresh random identity.
    pub fn random() -> Self {
        let key = SigningKey::random(&mut rand::thread_rng());
        let address = address_of(&key);
        Self { key, address }
    }

    pub fn address(&self) -> H160 {
        self.address
    }

    /// Sign an EIP-155 transaction.
    pub fn sign_transaction(
        &self,
        tx: &LegacyTransaction,
    ) -> Result<SignedTransaction, crate::Error> {
        let prehash = tx.signing_hash();
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(prehash.as_bytes())
            .map_err(|e| crate::Error::Signing(format!("ecdsa sign failed: {e}")))?;

        let bytes = signature.to_bytes();
        let r = U256::from_big_endian(&bytes[..32]);
        let s = U256::from_big_endian(&bytes[32..]);
        let v = tx.chain_id * 2 + 35 + u64::from(recovery_id.to_byte());

        Ok(tx.encode_signed(v, r, s))
    }
}

impl FromStr for SigningIdentity {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Parse a 20-byte hex address, with or without `0x`.
pub fn parse_address(s: &str) -> Result<H160, crate::Error> {
    let trimmed = s.trim();
    let stripped = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(stripped)
        .map_err(|e| crate::Error::Config(format!("address {s:?} is not hex: {e}")))?;
    if bytes.len() != 20 {
        return Err(crate::Error::Config(format!(
            "address must be 20 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(H160::from_slice(&bytes))
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningIdentity({:?})", self.address)
    }
}

/// Last 20 bytes of keccak256 over the uncompressed public key (without the 0x04 prefix).
fn address_of(key: &SigningKey) -> H160 {
    let public = k256::PublicKey::from(key.verifying_key());
    let point = public.to_encoded_point(false);
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    H160::from_slice(&hash[12..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

    // Well-known development key (hardhat / anvil account #0).
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_address_derivation_matches_known_account() {
        let identity = SigningIdentity::from_hex(DEV_KEY).unwrap();
        assert_eq!(
            format!("{:x}", identity.address()),
            "f39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[test]
    fn test_hex_without_prefix_is_accepted() {
        let with = SigningIdentity::from_hex(DEV_KEY).unwrap();
        let without = SigningIdentity::from_hex(&DEV_KEY[2..]).unwrap();
        assert_eq!(with.address(), without.address());
    }

    #[test]
    fn test_rejects_bad_secrets() {
        assert!(SigningIdentity::from_hex("0x1234").is_err());
        assert!(SigningIdentity::from_hex("not-hex").is_err());
        assert!(SigningIdentity::from_hex(&"00".repeat(32)).is_err());
    }

    #[test]
    fn test_parse_address() {
        let addr = parse_address("0x927d45Fb81B1B14dC4E8DE8f62930D5C33a43D22").unwrap();
        assert_eq!(format!("{addr:x}"), "927d45fb81b1b14dc4e8de8f62930d5c33a43d22");
        assert!(parse_address("927d45").is_err());
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let identity = SigningIdentity::from_hex(DEV_KEY).unwrap();
        let printed = format!("{identity:?}");
        assert!(!printed.contains("ac0974bec39a17e3"));
        assert!(printed.starts_with("SigningIdentity("));
    }

    #[test]
    fn test_signature_recovers_to_identity_address() {
        let identity = SigningIdentity::random();
        let tx = LegacyTransaction::increment(
            3,
            U256::from(1_000_000_000u64),
            100_000,
            H160::repeat_byte(0x11),
            20143,
        );
        let signed = identity.sign_transaction(&tx).unwrap();

        let rlp = rlp::Rlp::new(&signed.raw);
        let v: u64 = rlp.val_at(6).unwrap();
        let r: U256 = rlp.val_at(7).unwrap();
        let s: U256 = rlp.val_at(8).unwrap();

        let parity = v - 35 - 2 * 20143;
        assert!(parity <= 1);

        let mut sig_bytes = [0u8; 64];
        r.to_big_endian(&mut sig_bytes[..32]);
        s.to_big_endian(&mut sig_bytes[32..]);
        let signature = Signature::from_slice(&sig_bytes).unwrap();
        let recovery_id = RecoveryId::from_byte(parity as u8).unwrap();
        let recovered = VerifyingKey::recover_from_prehash(
            tx.signing_hash().as_bytes(),
            &signature,
            recovery_id,
        )
        .unwrap();

        assert_eq!(address_of_verifying(&recovered), identity.address());
    }

    fn address_of_verifying(key: &VerifyingKey) -> H160 {
        let public = k256::PublicKey::from(key);
        let point = public.to_encoded_point(false);
        let hash = Keccak256::digest(&point.as_bytes()[1..]);
        H160::from_slice(&hash[12..])
    }
}
