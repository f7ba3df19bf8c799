//! System and loader instruction encodings.
//!
//! Both are bincode-encoded enums (u32 little-endian variant tag, fixed-width
//! integers, raw 32-byte pubkeys, u64-length-prefixed byte vectors), which is
//! how the system program and the non-upgradeable BPF loader decode them.

use serde::{Deserialize, Serialize};

use crate::keys::{Pubkey, SYSTEM_PROGRAM_ID};
use crate::tx::{AccountMeta, Instruction, WireError};

/// Default loader program id used to publish program binaries.
pub const DEFAULT_LOADER_ID: &str = "BPFLoader2111111111111111111111111111111111";

/// `SysvarRent111111111111111111111111111111111`, read by loader `Finalize`.
pub const RENT_SYSVAR_ID: Pubkey = Pubkey::new([
    6, 167, 213, 23, 25, 44, 92, 81, 33, 140, 201, 76, 61, 74, 241, 127, 88, 218, 238, 8, 155,
    161, 253, 68, 227, 219, 217, 138, 0, 0, 0, 0,
]);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemInstruction {
    /// Variant 0. Accounts: `[writable, signer] funder`, `[writable, signer] new`.
    CreateAccount {
        lamports: u64,
        space: u64,
        owner: Pubkey,
    },
    /// Variant 1. Accounts: `[writable, signer] account`.
    Assign { owner: Pubkey },
    /// Variant 2. Accounts: `[writable, signer] from`, `[writable] to`.
    Transfer { lamports: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoaderInstruction {
    /// Variant 0. Copy `bytes` into the account data starting at `offset`.
    /// Accounts: `[writable, signer] program`.
    Write { offset: u32, bytes: Vec<u8> },
    /// Variant 1. Mark the fully written account executable.
    /// Accounts: `[writable, signer] program`, `[] rent sysvar`.
    Finalize,
}

impl SystemInstruction {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        bincode::serialize(self).map_err(|e| WireError::InstructionData(e.to_string()))
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        bincode::deserialize(data).map_err(|e| WireError::InstructionData(e.to_string()))
    }
}

impl LoaderInstruction {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        bincode::serialize(self).map_err(|e| WireError::InstructionData(e.to_string()))
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        bincode::deserialize(data).map_err(|e| WireError::InstructionData(e.to_string()))
    }
}

pub fn create_account(
    from: &Pubkey,
    to: &Pubkey,
    lamports: u64,
    space: u64,
    owner: &Pubkey,
) -> Result<Instruction, WireError> {
    Ok(Instruction {
        program_id: SYSTEM_PROGRAM_ID,
        accounts: vec![AccountMeta::new(*from, true), AccountMeta::new(*to, true)],
        data: SystemInstruction::CreateAccount {
            lamports,
            space,
            owner: *owner,
        }
        .encode()?,
    })
}

pub fn assign(account: &Pubkey, owner: &Pubkey) -> Result<Instruction, WireError> {
    Ok(Instruction {
        program_id: SYSTEM_PROGRAM_ID,
        accounts: vec![AccountMeta::new(*account, true)],
        data: SystemInstruction::Assign { owner: *owner }.encode()?,
    })
}

pub fn transfer(from: &Pubkey, to: &Pubkey, lamports: u64) -> Result<Instruction, WireError> {
    Ok(Instruction {
        program_id: SYSTEM_PROGRAM_ID,
        accounts: vec![AccountMeta::new(*from, true), AccountMeta::new(*to, false)],
        data: SystemInstruction::Transfer { lamports }.encode()?,
    })
}

pub fn loader_write(
    loader_id: &Pubkey,
    program: &Pubkey,
    offset: u32,
    bytes: Vec<u8>,
) -> Result<Instruction, WireError> {
    Ok(Instruction {
        program_id: *loader_id,
        accounts: vec![AccountMeta::new(*program, true)],
        data: LoaderInstruction::Write { offset, bytes }.encode()?,
    })
}

pub fn loader_finalize(loader_id: &Pubkey, program: &Pubkey) -> Result<Instruction, WireError> {
    Ok(Instruction {
        program_id: *loader_id,
        accounts: vec![
            AccountMeta::new(*program, true),
            AccountMeta::new_readonly(RENT_SYSVAR_ID, false),
        ],
        data: LoaderInstruction::Finalize.encode()?,
    })
}
