//! EIP-155 legacy transaction encoding for the counter contract.

use primitive_types::{H160, H256, U256};
use rlp::RlpStream;
use sha3::{Digest, Keccak256};

/// `keccak256("increment()")[..4]`
pub const INCREMENT_SELECTOR: [u8; 4] = [0xd0, 0x9d, 0xe0, 0x8a];
/// `keccak256("counter()")[..4]`
pub const COUNTER_SELECTOR: [u8; 4] = [0x61, 0xbc, 0x22, 0x1a];

/// Unsigned legacy transaction with replay protection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: H160,
    pub value: U256,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

/// Raw signed bytes plus the hash the network will know them by.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub raw: Vec<u8>,
    pub hash: H256,
}

impl LegacyTransaction {
    /// A zero-value call to `increment()` on `contract`.
    pub fn increment(
        nonce: u64,
        gas_price: U256,
        gas_limit: u64,
        contract: H160,
        chain_id: u64,
    ) -> Self {
        Self {
            nonce,
            gas_price,
            gas_limit,
            to: contract,
            value: U256::zero(),
            data: INCREMENT_SELECTOR.to_vec(),
            chain_id,
        }
    }

    /// RLP payload that gets hashed for signing: the six fields plus `chain_id, 0, 0`.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut stream = RlpStream::new_list(9);
        self.append_fields(&mut stream);
        stream.append(&self.chain_id);
        stream.append(&0u8);
        stream.append(&0u8);
        stream.out().to_vec()
    }

    pub fn signing_hash(&self) -> H256 {
        H256::from_slice(&Keccak256::digest(self.signing_payload()))
    }

    pub(crate) fn encode_signed(&self, v: u64, r: U256, s: U256) -> SignedTransaction {
        let mut stream = RlpStream::new_list(9);
        self.append_fields(&mut stream);
        stream.append(&v);
        stream.append(&r);
        stream.append(&s);
        let raw = stream.out().to_vec();
        let hash = H256::from_slice(&Keccak256::digest(&raw));
        SignedTransaction { raw, hash }
    }

    fn append_fields(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&self.gas_price);
        stream.append(&self.gas_limit);
        stream.append(&self.to);
        stream.append(&self.value);
        stream.append(&self.data);
    }
}
