//! Transaction wire format.
//!
//! A legacy message is laid out as:
//!
//! ```text
//! header        3 bytes  (required signatures, readonly signed, readonly unsigned)
//! account_keys  compact-u16 length, then 32 bytes each
//! blockhash     32 bytes
//! instructions  compact-u16 length, then per instruction:
//!                 program_id_index u8
//!                 accounts         compact-u16 length, u8 indexes
//!                 data             compact-u16 length, bytes
//! ```
//!
//! A transaction is `compact-u16 signature count || signatures || message`.
//! Signatures cover the serialized message; the first one is the
//! transaction id.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keys::{Hash, Keypair, Pubkey, Signature};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unexpected end of input at offset {0}")]
    Truncated(usize),

    #[error("compact-u16 value overflows at offset {0}")]
    CompactOverflow(usize),

    #[error("{0} trailing bytes after transaction")]
    TrailingBytes(usize),

    #[error("too many accounts in message ({0}, max 255)")]
    TooManyAccounts(usize),

    #[error("instruction {instruction} references account index {index} out of range")]
    InvalidAccountIndex { instruction: usize, index: u8 },

    #[error("missing signer {0}")]
    MissingSigner(Pubkey),

    #[error("keypair {0} is not a required signer of this message")]
    UnexpectedSigner(Pubkey),

    #[error("expected {expected} signatures, got {actual}")]
    SignatureCount { expected: usize, actual: usize },

    #[error("signature {0} does not verify")]
    InvalidSignature(usize),

    #[error("instruction data: {0}")]
    InstructionData(String),
}

// =============================================================================
// compact-u16
// =============================================================================

pub fn encode_compact_u16(out: &mut Vec<u8>, value: u16) {
    let mut rem = value;
    loop {
        let mut byte = (rem & 0x7f) as u8;
        rem >>= 7;
        if rem != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if rem == 0 {
            break;
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        let b = *self.buf.get(self.pos).ok_or(WireError::Truncated(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos.checked_add(n).ok_or(WireError::Truncated(self.pos))?;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or(WireError::Truncated(self.pos))?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let start = self.pos;
        self.bytes(N)?
            .try_into()
            .map_err(|_| WireError::Truncated(start))
    }

    fn compact_u16(&mut self) -> Result<usize, WireError> {
        let start = self.pos;
        let mut value: u32 = 0;
        for shift in [0u32, 7, 14] {
            let byte = self.u8()?;
            value |= ((byte & 0x7f) as u32) << shift;
            if byte & 0x80 == 0 {
                if value > u16::MAX as u32 {
                    return Err(WireError::CompactOverflow(start));
                }
                return Ok(value as usize);
            }
        }
        Err(WireError::CompactOverflow(start))
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

fn push_len(out: &mut Vec<u8>, len: usize) {
    encode_compact_u16(out, u16::try_from(len).unwrap_or(u16::MAX));
}

// =============================================================================
// Instructions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMeta {
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn new(pubkey: Pubkey, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: true,
        }
    }

    pub fn new_readonly(pubkey: Pubkey, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: false,
        }
    }
}

/// An instruction before account indexes are assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub program_id: Pubkey,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    pub num_required_signatures: u8,
    pub num_readonly_signed_accounts: u8,
    pub num_readonly_unsigned_accounts: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub accounts: Vec<u8>,
    pub data: Vec<u8>,
}

// =============================================================================
// Message
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub account_keys: Vec<Pubkey>,
    pub recent_blockhash: Hash,
    pub instructions: Vec<CompiledInstruction>,
}

#[derive(Clone, Copy)]
struct KeyFlags {
    signer: bool,
    writable: bool,
}

impl Message {
    /// Compile instructions into a message. The payer is always the first
    /// account (writable signer). Accounts are ordered writable signers,
    /// readonly signers, writable non-signers, readonly non-signers, keeping
    /// first-seen order within each group.
    pub fn new(
        instructions: &[Instruction],
        payer: &Pubkey,
        recent_blockhash: Hash,
    ) -> Result<Self, WireError> {
        let mut keys: Vec<(Pubkey, KeyFlags)> = vec![(
            *payer,
            KeyFlags {
                signer: true,
                writable: true,
            },
        )];
        let mut upsert = |key: Pubkey, signer: bool, writable: bool| {
            match keys.iter_mut().find(|(k, _)| *k == key) {
                Some((_, flags)) => {
                    flags.signer |= signer;
                    flags.writable |= writable;
                }
                None => keys.push((key, KeyFlags { signer, writable })),
            }
        };
        for ix in instructions {
            for meta in &ix.accounts {
                upsert(meta.pubkey, meta.is_signer, meta.is_writable);
            }
            upsert(ix.program_id, false, false);
        }

        let group = |f: &KeyFlags| -> u8 {
            match (f.signer, f.writable) {
                (true, true) => 0,
                (true, false) => 1,
                (false, true) => 2,
                (false, false) => 3,
            }
        };
        keys.sort_by_key(|(_, flags)| group(flags));

        if keys.len() > u8::MAX as usize {
            return Err(WireError::TooManyAccounts(keys.len()));
        }

        let count = |g: u8| keys.iter().filter(|(_, f)| group(f) == g).count() as u8;
        let header = MessageHeader {
            num_required_signatures: count(0) + count(1),
            num_readonly_signed_accounts: count(1),
            num_readonly_unsigned_accounts: count(3),
        };
        let account_keys: Vec<Pubkey> = keys.into_iter().map(|(k, _)| k).collect();
        let index_of = |key: &Pubkey| -> u8 {
            // every key was inserted above
            account_keys.iter().position(|k| k == key).unwrap_or(0) as u8
        };

        let compiled = instructions
            .iter()
            .map(|ix| CompiledInstruction {
                program_id_index: index_of(&ix.program_id),
                accounts: ix.accounts.iter().map(|m| index_of(&m.pubkey)).collect(),
                data: ix.data.clone(),
            })
            .collect();

        Ok(Self {
            header,
            account_keys,
            recent_blockhash,
            instructions: compiled,
        })
    }

    pub fn signer_keys(&self) -> &[Pubkey] {
        let n = (self.header.num_required_signatures as usize).min(self.account_keys.len());
        &self.account_keys[..n]
    }

    pub fn is_signer(&self, index: usize) -> bool {
        index < self.header.num_required_signatures as usize
    }

    pub fn is_writable(&self, index: usize) -> bool {
        let h = &self.header;
        let signed = h.num_required_signatures as usize;
        if index < signed {
            index < signed.saturating_sub(h.num_readonly_signed_accounts as usize)
        } else {
            index
                < self
                    .account_keys
                    .len()
                    .saturating_sub(h.num_readonly_unsigned_accounts as usize)
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.account_keys.len() * 32);
        out.push(self.header.num_required_signatures);
        out.push(self.header.num_readonly_signed_accounts);
        out.push(self.header.num_readonly_unsigned_accounts);
        push_len(&mut out, self.account_keys.len());
        for key in &self.account_keys {
            out.extend_from_slice(key.as_bytes());
        }
        out.extend_from_slice(self.recent_blockhash.as_bytes());
        push_len(&mut out, self.instructions.len());
        for ix in &self.instructions {
            out.push(ix.program_id_index);
            push_len(&mut out, ix.accounts.len());
            out.extend_from_slice(&ix.accounts);
            push_len(&mut out, ix.data.len());
            out.extend_from_slice(&ix.data);
        }
        out
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let header = MessageHeader {
            num_required_signatures: r.u8()?,
            num_readonly_signed_accounts: r.u8()?,
            num_readonly_unsigned_accounts: r.u8()?,
        };
        let n_keys = r.compact_u16()?;
        let mut account_keys = Vec::with_capacity(n_keys.min(256));
        for _ in 0..n_keys {
            account_keys.push(Pubkey::new(r.array::<32>()?));
        }
        let recent_blockhash = Hash::new(r.array::<32>()?);
        let n_ix = r.compact_u16()?;
        let mut instructions = Vec::with_capacity(n_ix.min(64));
        for i in 0..n_ix {
            let program_id_index = r.u8()?;
            let n_acc = r.compact_u16()?;
            let accounts = r.bytes(n_acc)?.to_vec();
            let n_data = r.compact_u16()?;
            let data = r.bytes(n_data)?.to_vec();
            for &index in accounts.iter().chain(std::iter::once(&program_id_index)) {
                if index as usize >= account_keys.len() {
                    return Err(WireError::InvalidAccountIndex {
                        instruction: i,
                        index,
                    });
                }
            }
            instructions.push(CompiledInstruction {
                program_id_index,
                accounts,
                data,
            });
        }
        Ok(Self {
            header,
            account_keys,
            recent_blockhash,
            instructions,
        })
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(bytes);
        let msg = Self::read(&mut r)?;
        match r.remaining() {
            0 => Ok(msg),
            n => Err(WireError::TrailingBytes(n)),
        }
    }
}

// =============================================================================
// Transaction
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub signatures: Vec<Signature>,
    pub message: Message,
}

impl Transaction {
    /// An unsigned transaction with placeholder signatures.
    pub fn new_unsigned(message: Message) -> Self {
        let n = message.header.num_required_signatures as usize;
        Self {
            signatures: vec![Signature::default(); n],
            message,
        }
    }

    /// Sign with exactly the required signers. Every required signer must be
    /// supplied, and every supplied keypair must be a required signer.
    pub fn sign(&mut self, keypairs: &[&Keypair]) -> Result<(), WireError> {
        for kp in keypairs {
            let pk = kp.pubkey();
            if !self.message.signer_keys().contains(&pk) {
                return Err(WireError::UnexpectedSigner(pk));
            }
        }
        let bytes = self.message.serialize();
        let mut signatures = Vec::with_capacity(self.message.signer_keys().len());
        for key in self.message.signer_keys() {
            let kp = keypairs
                .iter()
                .find(|kp| kp.pubkey() == *key)
                .ok_or(WireError::MissingSigner(*key))?;
            signatures.push(kp.sign(&bytes));
        }
        self.signatures = signatures;
        Ok(())
    }

    /// Check the signature count and every signature against its signer key.
    pub fn verify(&self) -> Result<(), WireError> {
        let signers = self.message.signer_keys();
        if signers.len() != self.message.header.num_required_signatures as usize
            || self.signatures.len() != signers.len()
        {
            return Err(WireError::SignatureCount {
                expected: self.message.header.num_required_signatures as usize,
                actual: self.signatures.len(),
            });
        }
        let bytes = self.message.serialize();
        for (i, (sig, key)) in self.signatures.iter().zip(signers).enumerate() {
            if !key.verify(&bytes, sig) {
                return Err(WireError::InvalidSignature(i));
            }
        }
        Ok(())
    }

    /// The transaction id (first signature).
    pub fn signature(&self) -> Signature {
        self.signatures.first().copied().unwrap_or_default()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        push_len(&mut out, self.signatures.len());
        for sig in &self.signatures {
            out.extend_from_slice(sig.as_bytes());
        }
        out.extend_from_slice(&self.message.serialize());
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(bytes);
        let n = r.compact_u16()?;
        let mut signatures = Vec::with_capacity(n.min(16));
        for _ in 0..n {
            signatures.push(Signature::new(r.array::<64>()?));
        }
        let message = Message::read(&mut r)?;
        match r.remaining() {
            0 => Ok(Self {
                signatures,
                message,
            }),
            extra => Err(WireError::TrailingBytes(extra)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SYSTEM_PROGRAM_ID;

    fn transfer_like(payer: &Pubkey, other: &Keypair) -> Instruction {
        Instruction {
            program_id: SYSTEM_PROGRAM_ID,
            accounts: vec![
                AccountMeta::new(*payer, true),
                AccountMeta::new(other.pubkey(), true),
            ],
            data: vec![1, 2, 3],
        }
    }

    #[test]
    fn compact_u16_boundaries() {
        for (value, expected) in [
            (0u16, vec![0x00]),
            (0x7f, vec![0x7f]),
            (0x80, vec![0x80, 0x01]),
            (0x3fff, vec![0xff, 0x7f]),
            (0x4000, vec![0x80, 0x80, 0x01]),
            (u16::MAX, vec![0xff, 0xff, 0x03]),
        ] {
            let mut out = Vec::new();
            encode_compact_u16(&mut out, value);
            assert_eq!(out, expected, "encoding {value:#x}");
            assert_eq!(Reader::new(&out).compact_u16().unwrap(), value as usize);
        }
        assert_eq!(
            Reader::new(&[0xff, 0xff, 0x04]).compact_u16(),
            Err(WireError::CompactOverflow(0))
        );
    }

    #[test]
    fn message_orders_accounts_and_counts_header() {
        let payer = Keypair::generate();
        let program = Keypair::generate();
        let msg = Message::new(
            &[transfer_like(&payer.pubkey(), &program)],
            &payer.pubkey(),
            Hash::new([9; 32]),
        )
        .unwrap();

        assert_eq!(msg.account_keys[0], payer.pubkey());
        assert_eq!(msg.account_keys[1], program.pubkey());
        assert_eq!(msg.account_keys[2], SYSTEM_PROGRAM_ID);
        assert_eq!(msg.header.num_required_signatures, 2);
        assert_eq!(msg.header.num_readonly_signed_accounts, 0);
        assert_eq!(msg.header.num_readonly_unsigned_accounts, 1);
        assert!(msg.is_writable(0) && msg.is_writable(1));
        assert!(!msg.is_writable(2));
        assert!(!msg.is_signer(2));
        assert_eq!(msg.instructions[0].program_id_index, 2);
        assert_eq!(msg.instructions[0].accounts, vec![0, 1]);
    }

    #[test]
    fn signed_transaction_survives_the_wire() {
        let payer = Keypair::generate();
        let program = Keypair::generate();
        let msg = Message::new(
            &[transfer_like(&payer.pubkey(), &program)],
            &payer.pubkey(),
            Hash::new([1; 32]),
        )
        .unwrap();
        let mut tx = Transaction::new_unsigned(msg);
        tx.sign(&[&payer, &program]).unwrap();
        tx.verify().unwrap();

        let decoded = Transaction::deserialize(&tx.serialize()).unwrap();
        assert_eq!(decoded, tx);
        decoded.verify().unwrap();
        assert_eq!(decoded.signature(), payer.sign(&tx.message.serialize()));
    }

    #[test]
    fn sign_requires_every_signer() {
        let payer = Keypair::generate();
        let program = Keypair::generate();
        let msg = Message::new(
            &[transfer_like(&payer.pubkey(), &program)],
            &payer.pubkey(),
            Hash::default(),
        )
        .unwrap();
        let mut tx = Transaction::new_unsigned(msg);
        assert_eq!(
            tx.sign(&[&payer]),
            Err(WireError::MissingSigner(program.pubkey()))
        );

        let stranger = Keypair::generate();
        assert_eq!(
            tx.sign(&[&payer, &program, &stranger]),
            Err(WireError::UnexpectedSigner(stranger.pubkey()))
        );
        assert!(tx.verify().is_err());
    }

    #[test]
    fn tampered_message_fails_verification() {
        let payer = Keypair::generate();
        let program = Keypair::generate();
        let msg = Message::new(
            &[transfer_like(&payer.pubkey(), &program)],
            &payer.pubkey(),
            Hash::default(),
        )
        .unwrap();
        let mut tx = Transaction::new_unsigned(msg);
        tx.sign(&[&payer, &program]).unwrap();
        tx.message.instructions[0].data[0] ^= 0xff;
        assert_eq!(tx.verify(), Err(WireError::InvalidSignature(0)));
    }

    #[test]
    fn deserialize_rejects_truncation_and_trailing_bytes() {
        let payer = Keypair::generate();
        let msg = Message::new(&[], &payer.pubkey(), Hash::default()).unwrap();
        let mut tx = Transaction::new_unsigned(msg);
        tx.sign(&[&payer]).unwrap();
        let mut bytes = tx.serialize();

        assert!(matches!(
            Transaction::deserialize(&bytes[..bytes.len() - 1]),
            Err(WireError::Truncated(_))
        ));
        bytes.push(0);
        assert_eq!(
            Transaction::deserialize(&bytes),
            Err(WireError::TrailingBytes(1))
        );
    }
}
