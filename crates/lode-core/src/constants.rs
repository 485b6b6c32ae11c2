//! Protocol constants.

/// Proof-of-work difficulty as a leading-zero bit count.
///
/// The PoW target is `2^(256 - DIFFICULTY)`, so the expected search cost is
/// `2^DIFFICULTY` hashes. The default is a testing-grade constant;
/// [`ProofOfWork::with_difficulty`](crate::pow::ProofOfWork::with_difficulty)
/// overrides it per instance.
pub const DIFFICULTY: u32 = 12;

/// Value minted by the coinbase transaction of every block.
pub const SUBSIDY: u64 = 10;

/// Wire protocol version exchanged in `version` messages.
pub const PROTOCOL_VERSION: i32 = 1;

/// Length of the random data salted into an empty coinbase input.
pub const COINBASE_DATA_LENGTH: usize = 24;

/// Address version byte prepended before base58 encoding.
pub const ADDRESS_VERSION: u8 = 0x01;

/// Length of the address checksum suffix.
pub const CHECKSUM_LENGTH: usize = 4;
