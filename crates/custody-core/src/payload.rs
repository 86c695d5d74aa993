//! Canonical encodings of the actions key holders sign
//!
//! Deposit payload: `asset (20 bytes) || amount (32-byte word)`, the
//! packed encoding of `(address, uint256)`.
//!
//! Transfer batch payload: ABI encoding of a dynamic array of
//! `(address recipient, uint256 amount, address asset)` tuples:
//!
//! | Offset      | Size | Content                         |
//! |-------------|------|---------------------------------|
//! | 0           | 32   | head offset, always 0x20        |
//! | 32          | 32   | number of lines                 |
//! | 64 + 96*i   | 32   | recipient, left-padded          |
//! | 96 + 96*i   | 32   | amount, big-endian              |
//! | 128 + 96*i  | 32   | asset, left-padded              |
//!
//! Line order is part of the encoding, so a signature over one order does
//! not authorize another.

use serde::{Deserialize, Serialize};

use crate::crypto::keccak256;
use crate::error::{Error, Result};
use crate::types::{Address, Amount, Asset, MessageHash};
use crate::{ADDRESS_LEN, WORD_LEN};

/// Words per encoded transfer line
const LINE_WORDS: usize = 3;

/// The signed content of a deposit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositPayload {
    pub asset: Asset,
    pub amount: Amount,
}

impl DepositPayload {
    pub fn new(asset: Asset, amount: Amount) -> Self {
        Self { asset, amount }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ADDRESS_LEN + WORD_LEN);
        out.extend_from_slice(self.asset.address().as_bytes());
        out.extend_from_slice(&amount_word(self.amount));
        out
    }

    pub fn digest(&self) -> MessageHash {
        MessageHash::new(keccak256(&self.encode()))
    }
}

/// A single requested movement out of ledger custody
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLine {
    /// Receiving address at the token
    pub recipient: Address,
    /// Amount to move
    pub amount: Amount,
    /// Token being moved
    pub asset: Asset,
}

impl TransferLine {
    pub fn new(recipient: Address, amount: Amount, asset: Asset) -> Self {
        Self {
            recipient,
            amount,
            asset,
        }
    }
}

/// Ordered transfer lines signed as one payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferBatch {
    lines: Vec<TransferLine>,
}

impl TransferBatch {
    pub fn new(lines: Vec<TransferLine>) -> Self {
        Self { lines }
    }

    pub fn lines(&self) -> &[TransferLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TransferLine> {
        self.lines.iter()
    }

    /// ABI encoding of the batch
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(WORD_LEN * (2 + LINE_WORDS * self.lines.len()));
        out.extend_from_slice(&amount_word(WORD_LEN as Amount));
        out.extend_from_slice(&amount_word(self.lines.len() as Amount));
        for line in &self.lines {
            out.extend_from_slice(&address_word(&line.recipient));
            out.extend_from_slice(&amount_word(line.amount));
            out.extend_from_slice(&address_word(line.asset.address()));
        }
        out
    }

    pub fn digest(&self) -> MessageHash {
        MessageHash::new(keccak256(&self.encode()))
    }

    /// Parse an ABI-encoded batch
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 2 * WORD_LEN || bytes.len() % WORD_LEN != 0 {
            return Err(Error::Encoding(format!(
                "batch encoding has invalid length {}",
                bytes.len()
            )));
        }

        let offset = read_amount(word_at(bytes, 0))?;
        if offset != WORD_LEN as Amount {
            return Err(Error::Encoding(format!("unexpected head offset {}", offset)));
        }

        let count = read_amount(word_at(bytes, 1))?;
        let body_words = bytes.len() / WORD_LEN - 2;
        if count != (body_words / LINE_WORDS) as Amount || body_words % LINE_WORDS != 0 {
            return Err(Error::Encoding(format!(
                "declared {} lines but body holds {} words",
                count, body_words
            )));
        }

        let mut lines = Vec::with_capacity(body_words / LINE_WORDS);
        for i in 0..body_words / LINE_WORDS {
            let base = 2 + i * LINE_WORDS;
            lines.push(TransferLine {
                recipient: read_address(word_at(bytes, base))?,
                amount: read_amount(word_at(bytes, base + 1))?,
                asset: Asset::new(read_address(word_at(bytes, base + 2))?),
            });
        }

        Ok(Self { lines })
    }
}

impl From<Vec<TransferLine>> for TransferBatch {
    fn from(lines: Vec<TransferLine>) -> Self {
        Self::new(lines)
    }
}

impl FromIterator<TransferLine> for TransferBatch {
    fn from_iter<I: IntoIterator<Item = TransferLine>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a TransferBatch {
    type Item = &'a TransferLine;
    type IntoIter = std::slice::Iter<'a, TransferLine>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.iter()
    }
}

fn amount_word(amount: Amount) -> [u8; WORD_LEN] {
    let mut word = [0u8; WORD_LEN];
    word[WORD_LEN - 16..].copy_from_slice(&amount.to_be_bytes());
    word
}

fn address_word(address: &Address) -> [u8; WORD_LEN] {
    let mut word = [0u8; WORD_LEN];
    word[WORD_LEN - ADDRESS_LEN..].copy_from_slice(address.as_bytes());
    word
}

fn word_at(bytes: &[u8], index: usize) -> &[u8] {
    &bytes[index * WORD_LEN..(index + 1) * WORD_LEN]
}

fn read_amount(word: &[u8]) -> Result<Amount> {
    if word[..WORD_LEN - 16].iter().any(|b| *b != 0) {
        return Err(Error::Encoding("amount does not fit in 128 bits".to_string()));
    }
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&word[WORD_LEN - 16..]);
    Ok(Amount::from_be_bytes(bytes))
}

fn read_address(word: &[u8]) -> Result<Address> {
    if word[..WORD_LEN - ADDRESS_LEN].iter().any(|b| *b != 0) {
        return Err(Error::Encoding("address word has dirty padding".to_string()));
    }
    let mut bytes = [0u8; ADDRESS_LEN];
    bytes.copy_from_slice(&word[WORD_LEN - ADDRESS_LEN..]);
    Ok(Address::new(bytes))
}
