#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::message::{Message, VersionedMessage};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use tokio::time::Instant;
use tradegate_relayer::signing::encode_transaction;
use tradegate_relayer::{
    BundleSource, PrepareRequest, RelayClient, RelayerError, TransactionBundle, TxEncoding,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Unsigned transaction requiring `signers`, fee payer first.
pub fn unsigned_tx(signers: &[Pubkey]) -> VersionedTransaction {
    let accounts = signers.iter().map(|k| AccountMeta::new(*k, true)).collect();
    let ix = Instruction::new_with_bytes(Pubkey::new_unique(), &[7], accounts);
    let message = Message::new_with_blockhash(&[ix], Some(&signers[0]), &Hash::new_unique());
    VersionedTransaction {
        signatures: vec![Signature::default(); message.header.num_required_signatures as usize],
        message: VersionedMessage::Legacy(message),
    }
}

pub fn bundle_for(signers: &[Pubkey]) -> TransactionBundle {
    let tx = encode_transaction(&unsigned_tx(signers), TxEncoding::Base58).unwrap();
    TransactionBundle::new(vec![tx])
}

/// Relay fake: records dispatch times and payloads and fails every call from
/// `fail_from` onwards.
pub struct RecordingRelay {
    pub calls: AtomicU32,
    pub dispatched: Mutex<Vec<Instant>>,
    pub submitted: Mutex<Vec<Vec<String>>>,
    pub fail_from: Option<u32>,
}

impl RecordingRelay {
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            dispatched: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            fail_from: None,
        }
    }

    pub fn failing_from(call: u32) -> Self {
        Self {
            fail_from: Some(call),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn dispatch_times(&self) -> Vec<Instant> {
        let mut times = self.dispatched.lock().unwrap().clone();
        times.sort();
        times
    }

    /// Bundles in the order the relay received them.
    pub fn submitted(&self) -> Vec<Vec<String>> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelayClient for RecordingRelay {
    async fn submit_bundle(&self, transactions: &[String]) -> Result<String, RelayerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.dispatched.lock().unwrap().push(Instant::now());
        self.submitted.lock().unwrap().push(transactions.to_vec());

        if self.fail_from.is_some_and(|n| call >= n) {
            return Err(RelayerError::Protocol("bundle simulation failed".into()));
        }
        Ok(format!("bundle-{call}"))
    }
}

/// Relay fake that always fails with a transport error.
pub struct DeadRelay {
    pub calls: AtomicU32,
}

#[async_trait]
impl RelayClient for DeadRelay {
    async fn submit_bundle(&self, _transactions: &[String]) -> Result<String, RelayerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RelayerError::Network("connection refused".into()))
    }
}

/// Bundle source fake returning fixed bundles and recording the request.
pub struct FixedSource {
    pub bundles: Vec<TransactionBundle>,
    pub last_request: Mutex<Option<PrepareRequest>>,
}

impl FixedSource {
    pub fn new(bundles: Vec<TransactionBundle>) -> Self {
        Self {
            bundles,
            last_request: Mutex::new(None),
        }
    }
}

#[async_trait]
impl BundleSource for FixedSource {
    async fn prepare_bundles(
        &self,
        request: &PrepareRequest,
    ) -> Result<Vec<TransactionBundle>, RelayerError> {
        *self.last_request.lock().unwrap() = Some(request.clone());
        Ok(self.bundles.clone())
    }
}
