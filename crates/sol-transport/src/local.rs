//! In-process chain used by `serve --local` and by the test suites.
//!
//! `LocalChain` verifies and executes transactions against an in-memory
//! account map: system `CreateAccount`/`Assign`/`Transfer`, the loader's
//! `Deploy`, and calls into deployed programs (recorded, not executed).
//! A transaction's instructions are applied to a copy of the account map
//! and committed only if every instruction succeeds.
//!
//! Fault injection hooks let tests exercise retry and reconciliation paths:
//! transient send/read failures, dropped or delayed transactions, withheld statuses
//! and an adjustable block height for blockhash expiry.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use sol_sandbox_types::encoding::sha256;
use sol_sandbox_types::instruction::{LoaderInstruction, SystemInstruction};
use sol_sandbox_types::tx::CompiledInstruction;
use sol_sandbox_types::{Hash, Pubkey, Signature, Transaction, SYSTEM_PROGRAM_ID};
use tracing::debug;

use crate::rpc::{AccountInfo, ChainRpc, Commitment, LatestBlockhash, RpcError, TransactionStatus};

/// Bytes of account metadata charged for rent on top of the data length.
pub const ACCOUNT_STORAGE_OVERHEAD: u64 = 128;
pub const LAMPORTS_PER_BYTE_YEAR: u64 = 3_480;
pub const EXEMPTION_THRESHOLD_YEARS: u64 = 2;
pub const LAMPORTS_PER_SIGNATURE: u64 = 5_000;
/// Blocks a blockhash stays valid for after it is issued.
pub const BLOCKHASH_VALIDITY: u64 = 150;
pub const MAX_ACCOUNT_DATA_LEN: u64 = 10 * 1024 * 1024;

pub fn rent_exempt_minimum(data_len: usize) -> u64 {
    (ACCOUNT_STORAGE_OVERHEAD + data_len as u64) * LAMPORTS_PER_BYTE_YEAR * EXEMPTION_THRESHOLD_YEARS
}

/// A call into a deployed program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program_id: Pubkey,
    pub accounts: Vec<Pubkey>,
    pub data: Vec<u8>,
    pub signature: Signature,
}

#[derive(Default)]
struct Faults {
    failing_sends: usize,
    dropped_sends: usize,
    delayed_sends: usize,
    timed_out_sends: usize,
    failing_reads: usize,
    withhold_statuses: bool,
    unhealthy: bool,
}

struct ChainState {
    accounts: HashMap<Pubkey, AccountInfo>,
    statuses: HashMap<Signature, TransactionStatus>,
    /// Landed transactions whose status is not yet visible to queries.
    withheld: HashMap<Signature, TransactionStatus>,
    /// Accepted transactions that have not reached the chain yet.
    delayed: Vec<Transaction>,
    invocations: Vec<Invocation>,
    block_height: u64,
    slot: u64,
    preflight: bool,
    faults: Faults,
}

impl ChainState {
    fn blockhash_at(height: u64) -> Hash {
        Hash::new(sha256(&height.to_le_bytes()))
    }

    /// Whether `hash` was issued by this chain and is still inside the
    /// validity window.
    fn blockhash_valid(&self, hash: &Hash) -> bool {
        let oldest = self.block_height.saturating_sub(BLOCKHASH_VALIDITY);
        (oldest..=self.block_height).any(|h| Self::blockhash_at(h) == *hash)
    }

    fn produce_block(&mut self) {
        self.block_height += 1;
        self.slot += 1;
    }
}

pub struct LocalChain {
    loader_id: Pubkey,
    state: Mutex<ChainState>,
}

impl LocalChain {
    pub fn new(loader_id: Pubkey) -> Self {
        Self {
            loader_id,
            state: Mutex::new(ChainState {
                accounts: HashMap::new(),
                statuses: HashMap::new(),
                withheld: HashMap::new(),
                delayed: Vec::new(),
                invocations: Vec::new(),
                block_height: 1,
                slot: 1,
                preflight: true,
                faults: Faults::default(),
            }),
        }
    }

    pub fn loader_id(&self) -> Pubkey {
        self.loader_id
    }

    /// Credit `lamports` to a system-owned account, creating it if needed.
    pub fn airdrop(&self, pubkey: &Pubkey, lamports: u64) {
        let mut state = self.state.lock();
        let account = state.accounts.entry(*pubkey).or_insert_with(|| AccountInfo {
            lamports: 0,
            owner: SYSTEM_PROGRAM_ID,
            data: Vec::new(),
            executable: false,
        });
        account.lamports = account.lamports.saturating_add(lamports);
    }

    pub fn set_balance(&self, pubkey: &Pubkey, lamports: u64) {
        let mut state = self.state.lock();
        match state.accounts.get_mut(pubkey) {
            Some(account) => account.lamports = lamports,
            None => {
                state.accounts.insert(
                    *pubkey,
                    AccountInfo {
                        lamports,
                        owner: SYSTEM_PROGRAM_ID,
                        data: Vec::new(),
                        executable: false,
                    },
                );
            }
        }
    }

    pub fn account(&self, pubkey: &Pubkey) -> Option<AccountInfo> {
        self.state.lock().accounts.get(pubkey).cloned()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.state.lock().invocations.clone()
    }

    /// Advance the chain, expiring blockhashes older than the validity window.
    pub fn advance_blocks(&self, n: u64) {
        let mut state = self.state.lock();
        for _ in 0..n {
            state.produce_block();
        }
    }

    /// With preflight on (the default), a transaction whose instructions fail
    /// is rejected at send time. With it off, the transaction lands, pays its
    /// fee, and its status carries the error.
    pub fn set_preflight(&self, enabled: bool) {
        self.state.lock().preflight = enabled;
    }

    /// The next `n` sends fail with a transient transport error.
    pub fn fail_next_sends(&self, n: usize) {
        self.state.lock().faults.failing_sends = n;
    }

    /// The next `n` sends return a signature but the transaction is lost.
    pub fn drop_next_sends(&self, n: usize) {
        self.state.lock().faults.dropped_sends = n;
    }

    /// The next `n` sends return a signature but only land when
    /// [`LocalChain::deliver_delayed`] is called.
    pub fn delay_next_sends(&self, n: usize) {
        self.state.lock().faults.delayed_sends = n;
    }

    /// The next `n` sends are processed normally, but the caller sees
    /// [`RpcError::Timeout`] instead of the result.
    pub fn time_out_next_sends(&self, n: usize) {
        self.state.lock().faults.timed_out_sends = n;
    }

    /// Process delayed transactions now, in the order they were sent.
    pub fn deliver_delayed(&self) -> Vec<Result<Signature, RpcError>> {
        let mut state = self.state.lock();
        let delayed = std::mem::take(&mut state.delayed);
        let mut results = Vec::with_capacity(delayed.len());
        for tx in &delayed {
            results.push(self.process(&mut state, tx));
        }
        results
    }

    /// The next `n` read calls fail with a transient transport error.
    pub fn fail_next_reads(&self, n: usize) {
        self.state.lock().faults.failing_reads = n;
    }

    /// Landed transactions stay invisible to `get_signature_status` until
    /// [`LocalChain::release_statuses`] is called.
    pub fn withhold_statuses(&self, withhold: bool) {
        self.state.lock().faults.withhold_statuses = withhold;
    }

    pub fn release_statuses(&self) {
        let mut state = self.state.lock();
        let withheld: Vec<_> = state.withheld.drain().collect();
        state.statuses.extend(withheld);
    }

    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.state.lock().faults.unhealthy = unhealthy;
    }

    fn read_fault(state: &mut ChainState) -> Result<(), RpcError> {
        if state.faults.failing_reads > 0 {
            state.faults.failing_reads -= 1;
            return Err(RpcError::Transport("connection reset by peer".into()));
        }
        Ok(())
    }

    fn process(&self, state: &mut ChainState, tx: &Transaction) -> Result<Signature, RpcError> {
        if state.faults.failing_sends > 0 {
            state.faults.failing_sends -= 1;
            return Err(RpcError::Transport("connection reset by peer".into()));
        }

        tx.verify()
            .map_err(|e| RpcError::Rejected(format!("signature verification failed: {e}")))?;
        let signature = tx.signature();

        if state.faults.dropped_sends > 0 {
            state.faults.dropped_sends -= 1;
            debug!(%signature, "local chain dropped transaction");
            return Ok(signature);
        }
        if state.faults.delayed_sends > 0 {
            state.faults.delayed_sends -= 1;
            state.delayed.push(tx.clone());
            debug!(%signature, "local chain delayed transaction");
            return Ok(signature);
        }

        if !state.blockhash_valid(&tx.message.recent_blockhash) {
            return Err(RpcError::Rejected("Blockhash not found".into()));
        }
        if state.statuses.contains_key(&signature) || state.withheld.contains_key(&signature) {
            return Err(RpcError::Rejected("This transaction has already been processed".into()));
        }

        let payer = tx
            .message
            .account_keys
            .first()
            .copied()
            .ok_or_else(|| RpcError::Rejected("transaction has no fee payer".into()))?;
        let fee = LAMPORTS_PER_SIGNATURE * tx.signatures.len() as u64;
        let payer_balance = state.accounts.get(&payer).map(|a| a.lamports).unwrap_or(0);
        if payer_balance < fee {
            return Err(RpcError::Rejected(
                "Attempt to debit an account but found no record of a prior credit".into(),
            ));
        }

        let mut accounts = state.accounts.clone();
        if let Some(a) = accounts.get_mut(&payer) {
            a.lamports -= fee;
        }
        let mut invocations = Vec::new();
        let outcome = self.execute(&mut accounts, &mut invocations, tx);

        let err = match outcome {
            Ok(()) => {
                state.accounts = accounts;
                state.invocations.extend(invocations);
                None
            }
            Err(e) if state.preflight => {
                return Err(RpcError::Rejected(format!(
                    "Transaction simulation failed: {e}"
                )));
            }
            Err(e) => {
                if let Some(a) = state.accounts.get_mut(&payer) {
                    a.lamports -= fee;
                }
                Some(e)
            }
        };

        let status = TransactionStatus {
            slot: state.slot,
            err,
            confirmation_status: Some(Commitment::Finalized),
        };
        if state.faults.withhold_statuses {
            state.withheld.insert(signature, status);
        } else {
            state.statuses.insert(signature, status);
        }
        state.produce_block();
        debug!(%signature, "local chain processed transaction");
        Ok(signature)
    }

    fn execute(
        &self,
        accounts: &mut HashMap<Pubkey, AccountInfo>,
        invocations: &mut Vec<Invocation>,
        tx: &Transaction,
    ) -> Result<(), String> {
        for (i, ix) in tx.message.instructions.iter().enumerate() {
            self.execute_instruction(accounts, invocations, tx, ix)
                .map_err(|e| format!("{{\"InstructionError\":[{i},\"{e}\"]}}"))?;
        }
        Ok(())
    }

    fn execute_instruction(
        &self,
        accounts: &mut HashMap<Pubkey, AccountInfo>,
        invocations: &mut Vec<Invocation>,
        tx: &Transaction,
        ix: &CompiledInstruction,
    ) -> Result<(), String> {
        let msg = &tx.message;
        let program_id = msg.account_keys[ix.program_id_index as usize];
        let keys: Vec<Pubkey> = ix
            .accounts
            .iter()
            .map(|&idx| msg.account_keys[idx as usize])
            .collect();
        let signer = |n: usize| -> Result<Pubkey, String> {
            let idx = *ix.accounts.get(n).ok_or("NotEnoughAccountKeys")? as usize;
            if !msg.is_signer(idx) {
                return Err("MissingRequiredSignature".into());
            }
            if !msg.is_writable(idx) {
                return Err("ReadonlyAccountModified".into());
            }
            Ok(msg.account_keys[idx])
        };

        if program_id == SYSTEM_PROGRAM_ID {
            let decoded = SystemInstruction::decode(&ix.data)
                .map_err(|_| "InvalidInstructionData".to_string())?;
            match decoded {
                SystemInstruction::CreateAccount {
                    lamports,
                    space,
                    owner,
                } => {
                    let (from, to) = (signer(0)?, signer(1)?);
                    create_account(accounts, &from, &to, lamports, space, &owner)
                }
                SystemInstruction::Assign { owner } => assign(accounts, &signer(0)?, &owner),
                SystemInstruction::Transfer { lamports } => {
                    let from = signer(0)?;
                    let to = *keys.get(1).ok_or("NotEnoughAccountKeys")?;
                    transfer(accounts, &from, &to, lamports)
                }
            }
        } else if program_id == self.loader_id {
            match LoaderInstruction::decode(&ix.data)
                .map_err(|_| "InvalidInstructionData".to_string())?
            {
                LoaderInstruction::Write { offset, bytes } => {
                    write(accounts, &self.loader_id, &signer(0)?, offset, &bytes)
                }
                LoaderInstruction::Finalize => finalize(accounts, &self.loader_id, &signer(0)?),
            }
        } else {
            match accounts.get(&program_id) {
                Some(p) if p.executable && p.owner == self.loader_id => {
                    invocations.push(Invocation {
                        program_id,
                        accounts: keys,
                        data: ix.data.clone(),
                        signature: tx.signature(),
                    });
                    Ok(())
                }
                _ => Err("ProgramAccountNotFound".to_string()),
            }
        }
    }
}

fn debit(account: &mut AccountInfo, lamports: u64) -> Result<(), String> {
    if !account.data.is_empty() || account.owner != SYSTEM_PROGRAM_ID {
        return Err("InvalidAccountData".into());
    }
    account.lamports = account
        .lamports
        .checked_sub(lamports)
        .ok_or_else(|| "InsufficientFunds".to_string())?;
    Ok(())
}

fn create_account(
    accounts: &mut HashMap<Pubkey, AccountInfo>,
    from: &Pubkey,
    to: &Pubkey,
    lamports: u64,
    space: u64,
    owner: &Pubkey,
) -> Result<(), String> {
    if accounts.get(to).is_some_and(|a| a.lamports > 0 || !a.data.is_empty()) {
        return Err("AccountAlreadyInUse".into());
    }
    if space > MAX_ACCOUNT_DATA_LEN {
        return Err("InvalidAccountDataLength".into());
    }
    let payer = accounts
        .get_mut(from)
        .ok_or_else(|| "AccountNotFound".to_string())?;
    debit(payer, lamports)?;
    accounts.insert(
        *to,
        AccountInfo {
            lamports,
            owner: *owner,
            data: vec![0; space as usize],
            executable: false,
        },
    );
    Ok(())
}

fn assign(
    accounts: &mut HashMap<Pubkey, AccountInfo>,
    account: &Pubkey,
    owner: &Pubkey,
) -> Result<(), String> {
    let acct = accounts
        .get_mut(account)
        .ok_or_else(|| "AccountNotFound".to_string())?;
    if acct.owner != SYSTEM_PROGRAM_ID {
        return Err("ModifiedProgramId".into());
    }
    acct.owner = *owner;
    Ok(())
}

fn transfer(
    accounts: &mut HashMap<Pubkey, AccountInfo>,
    from: &Pubkey,
    to: &Pubkey,
    lamports: u64,
) -> Result<(), String> {
    let payer = accounts
        .get_mut(from)
        .ok_or_else(|| "AccountNotFound".to_string())?;
    debit(payer, lamports)?;
    let dest = accounts.entry(*to).or_insert_with(|| AccountInfo {
        lamports: 0,
        owner: SYSTEM_PROGRAM_ID,
        data: Vec::new(),
        executable: false,
    });
    dest.lamports = dest.lamports.saturating_add(lamports);
    Ok(())
}

/// Loader-owned account that has not been finalized yet.
fn unfinalized<'a>(
    accounts: &'a mut HashMap<Pubkey, AccountInfo>,
    loader_id: &Pubkey,
    program: &Pubkey,
) -> Result<&'a mut AccountInfo, String> {
    let acct = accounts
        .get_mut(program)
        .ok_or_else(|| "AccountNotFound".to_string())?;
    if acct.owner != *loader_id {
        return Err("IncorrectProgramId".into());
    }
    if acct.executable {
        return Err("AccountAlreadyInitialized".into());
    }
    Ok(acct)
}

fn write(
    accounts: &mut HashMap<Pubkey, AccountInfo>,
    loader_id: &Pubkey,
    program: &Pubkey,
    offset: u32,
    bytes: &[u8],
) -> Result<(), String> {
    let acct = unfinalized(accounts, loader_id, program)?;
    let start = offset as usize;
    let end = start
        .checked_add(bytes.len())
        .filter(|end| *end <= acct.data.len())
        .ok_or_else(|| "AccountDataTooSmall".to_string())?;
    acct.data[start..end].copy_from_slice(bytes);
    Ok(())
}

fn finalize(
    accounts: &mut HashMap<Pubkey, AccountInfo>,
    loader_id: &Pubkey,
    program: &Pubkey,
) -> Result<(), String> {
    let acct = unfinalized(accounts, loader_id, program)?;
    if acct.data.is_empty() {
        return Err("InvalidAccountData".into());
    }
    if acct.lamports < rent_exempt_minimum(acct.data.len()) {
        return Err("AccountNotRentExempt".into());
    }
    acct.executable = true;
    Ok(())
}

#[async_trait]
impl ChainRpc for LocalChain {
    async fn get_minimum_balance_for_rent_exemption(
        &self,
        data_len: usize,
    ) -> Result<u64, RpcError> {
        Self::read_fault(&mut self.state.lock())?;
        Ok(rent_exempt_minimum(data_len))
    }

    async fn get_balance(&self, pubkey: &Pubkey) -> Result<u64, RpcError> {
        let mut state = self.state.lock();
        Self::read_fault(&mut state)?;
        Ok(state.accounts.get(pubkey).map(|a| a.lamports).unwrap_or(0))
    }

    async fn get_account_info(&self, pubkey: &Pubkey) -> Result<Option<AccountInfo>, RpcError> {
        let mut state = self.state.lock();
        Self::read_fault(&mut state)?;
        Ok(state.accounts.get(pubkey).cloned())
    }

    async fn get_latest_blockhash(&self) -> Result<LatestBlockhash, RpcError> {
        let mut state = self.state.lock();
        Self::read_fault(&mut state)?;
        Ok(LatestBlockhash {
            blockhash: ChainState::blockhash_at(state.block_height),
            last_valid_block_height: state.block_height + BLOCKHASH_VALIDITY,
        })
    }

    async fn get_block_height(&self) -> Result<u64, RpcError> {
        let mut state = self.state.lock();
        Self::read_fault(&mut state)?;
        Ok(state.block_height)
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<Signature, RpcError> {
        let mut state = self.state.lock();
        if state.faults.timed_out_sends > 0 {
            state.faults.timed_out_sends -= 1;
            let landed = self.process(&mut state, tx);
            debug!(ok = landed.is_ok(), "local chain timed out send response");
            return Err(RpcError::Timeout);
        }
        self.process(&mut state, tx)
    }

    async fn get_signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<TransactionStatus>, RpcError> {
        let mut state = self.state.lock();
        Self::read_fault(&mut state)?;
        Ok(state.statuses.get(signature).cloned())
    }

    async fn get_health(&self) -> Result<(), RpcError> {
        if self.state.lock().faults.unhealthy {
            return Err(RpcError::Rpc {
                code: -32005,
                message: "Node is unhealthy".into(),
            });
        }
        Ok(())
    }

    async fn get_slot(&self) -> Result<u64, RpcError> {
        let mut state = self.state.lock();
        Self::read_fault(&mut state)?;
        Ok(state.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sol_sandbox_types::instruction::{self, DEFAULT_LOADER_ID};
    use sol_sandbox_types::{Keypair, Message};

    fn chain() -> LocalChain {
        LocalChain::new(DEFAULT_LOADER_ID.parse().unwrap())
    }

    async fn signed(
        chain: &LocalChain,
        ixs: &[sol_sandbox_types::Instruction],
        signers: &[&Keypair],
    ) -> Transaction {
        let blockhash = chain.get_latest_blockhash().await.unwrap().blockhash;
        let msg = Message::new(ixs, &signers[0].pubkey(), blockhash).unwrap();
        let mut tx = Transaction::new_unsigned(msg);
        tx.sign(signers).unwrap();
        tx
    }

    #[tokio::test]
    async fn transfer_charges_fee_and_moves_lamports() {
        let chain = chain();
        let payer = Keypair::generate();
        let dest = Keypair::generate().pubkey();
        chain.airdrop(&payer.pubkey(), 1_000_000);

        let ix = instruction::transfer(&payer.pubkey(), &dest, 400_000).unwrap();
        let tx = signed(&chain, &[ix], &[&payer]).await;
        let sig = chain.send_transaction(&tx).await.unwrap();

        assert_eq!(chain.get_balance(&dest).await.unwrap(), 400_000);
        assert_eq!(
            chain.get_balance(&payer.pubkey()).await.unwrap(),
            1_000_000 - 400_000 - LAMPORTS_PER_SIGNATURE
        );
        let status = chain.get_signature_status(&sig).await.unwrap().unwrap();
        assert!(status.err.is_none());
    }

    #[tokio::test]
    async fn failing_instruction_leaves_no_partial_state() {
        let chain = chain();
        let payer = Keypair::generate();
        let program = Keypair::generate();
        chain.airdrop(&payer.pubkey(), 10_000_000);
        chain.set_preflight(false);

        let loader = chain.loader_id();
        let ixs = vec![
            instruction::create_account(
                &payer.pubkey(),
                &program.pubkey(),
                rent_exempt_minimum(16),
                16,
                &SYSTEM_PROGRAM_ID,
            )
            .unwrap(),
            instruction::assign(&program.pubkey(), &loader).unwrap(),
            // the account was sized for 16 bytes
            instruction::loader_write(&loader, &program.pubkey(), 0, vec![1u8; 32]).unwrap(),
            instruction::loader_finalize(&loader, &program.pubkey()).unwrap(),
        ];
        let tx = signed(&chain, &ixs, &[&payer, &program]).await;
        let sig = chain.send_transaction(&tx).await.unwrap();

        assert!(chain.account(&program.pubkey()).is_none());
        let status = chain.get_signature_status(&sig).await.unwrap().unwrap();
        assert!(status.err.unwrap().contains("AccountDataTooSmall"));
        assert_eq!(
            chain.get_balance(&payer.pubkey()).await.unwrap(),
            10_000_000 - 2 * LAMPORTS_PER_SIGNATURE
        );
    }

    #[tokio::test]
    async fn chunked_writes_then_finalize_publish_program() {
        let chain = chain();
        let payer = Keypair::generate();
        let program = Keypair::generate();
        chain.airdrop(&payer.pubkey(), 10_000_000);

        let loader = chain.loader_id();
        let ixs = vec![
            instruction::create_account(
                &payer.pubkey(),
                &program.pubkey(),
                rent_exempt_minimum(16),
                16,
                &SYSTEM_PROGRAM_ID,
            )
            .unwrap(),
            instruction::assign(&program.pubkey(), &loader).unwrap(),
            instruction::loader_write(&loader, &program.pubkey(), 8, vec![2u8; 8]).unwrap(),
            instruction::loader_write(&loader, &program.pubkey(), 0, vec![1u8; 8]).unwrap(),
            instruction::loader_finalize(&loader, &program.pubkey()).unwrap(),
        ];
        let tx = signed(&chain, &ixs, &[&payer, &program]).await;
        chain.send_transaction(&tx).await.unwrap();

        let account = chain.account(&program.pubkey()).unwrap();
        assert!(account.executable);
        assert_eq!(account.owner, loader);
        assert_eq!(&account.data[..8], &[1u8; 8]);
        assert_eq!(&account.data[8..], &[2u8; 8]);

        // finalized accounts accept no further writes
        let rewrite =
            [instruction::loader_write(&loader, &program.pubkey(), 0, vec![9u8; 4]).unwrap()];
        let tx = signed(&chain, &rewrite, &[&payer, &program]).await;
        let err = chain.send_transaction(&tx).await.unwrap_err();
        assert!(
            matches!(err, RpcError::Rejected(ref m) if m.contains("AccountAlreadyInitialized"))
        );
    }

    #[tokio::test]
    async fn preflight_rejects_failing_transaction() {
        let chain = chain();
        let payer = Keypair::generate();
        chain.airdrop(&payer.pubkey(), 10_000);
        let ix = instruction::transfer(&payer.pubkey(), &Pubkey::new([8; 32]), 1_000_000).unwrap();
        let tx = signed(&chain, &[ix], &[&payer]).await;

        let err = chain.send_transaction(&tx).await.unwrap_err();
        assert!(matches!(err, RpcError::Rejected(ref m) if m.contains("InsufficientFunds")));
        assert_eq!(chain.get_balance(&payer.pubkey()).await.unwrap(), 10_000);
    }

    #[tokio::test]
    async fn expired_blockhash_is_rejected() {
        let chain = chain();
        let payer = Keypair::generate();
        chain.airdrop(&payer.pubkey(), 1_000_000);
        let ix = instruction::transfer(&payer.pubkey(), &Pubkey::new([8; 32]), 1).unwrap();
        let tx = signed(&chain, &[ix], &[&payer]).await;

        chain.advance_blocks(BLOCKHASH_VALIDITY + 1);
        let err = chain.send_transaction(&tx).await.unwrap_err();
        assert_eq!(err, RpcError::Rejected("Blockhash not found".into()));
    }

    #[tokio::test]
    async fn withheld_status_becomes_visible_on_release() {
        let chain = chain();
        let payer = Keypair::generate();
        chain.airdrop(&payer.pubkey(), 1_000_000);
        chain.withhold_statuses(true);

        let ix = instruction::transfer(&payer.pubkey(), &Pubkey::new([8; 32]), 1).unwrap();
        let tx = signed(&chain, &[ix], &[&payer]).await;
        let sig = chain.send_transaction(&tx).await.unwrap();
        assert_eq!(chain.get_signature_status(&sig).await.unwrap(), None);

        chain.release_statuses();
        assert!(chain.get_signature_status(&sig).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delayed_send_lands_on_delivery() {
        let chain = chain();
        let payer = Keypair::generate();
        let dest = Pubkey::new([8; 32]);
        chain.airdrop(&payer.pubkey(), 1_000_000);
        chain.delay_next_sends(1);

        let ix = instruction::transfer(&payer.pubkey(), &dest, 10).unwrap();
        let tx = signed(&chain, &[ix], &[&payer]).await;
        let sig = chain.send_transaction(&tx).await.unwrap();
        assert_eq!(chain.get_signature_status(&sig).await.unwrap(), None);
        assert_eq!(chain.get_balance(&dest).await.unwrap(), 0);

        let delivered = chain.deliver_delayed();
        assert_eq!(delivered, vec![Ok(sig)]);
        assert_eq!(chain.get_balance(&dest).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn timed_out_send_still_lands() {
        let chain = chain();
        let payer = Keypair::generate();
        let dest = Pubkey::new([8; 32]);
        chain.airdrop(&payer.pubkey(), 1_000_000);
        chain.time_out_next_sends(1);

        let ix = instruction::transfer(&payer.pubkey(), &dest, 10).unwrap();
        let tx = signed(&chain, &[ix], &[&payer]).await;
        assert_eq!(chain.send_transaction(&tx).await.unwrap_err(), RpcError::Timeout);
        assert_eq!(chain.get_balance(&dest).await.unwrap(), 10);
        assert!(chain
            .get_signature_status(&tx.signature())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn injected_faults_are_transient() {
        let chain = chain();
        chain.fail_next_reads(1);
        assert!(chain.get_slot().await.unwrap_err().is_transient());
        assert!(chain.get_slot().await.is_ok());

        chain.set_unhealthy(true);
        assert!(chain.get_health().await.is_err());
    }
}
