//! Client-side completion of server-prepared bundles.
//!
//! The backend may return the first transaction of the first bundle with a
//! signature already present. That signature is preserved and only the
//! still-empty signer slots are filled from local wallets.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use solana_sdk::transaction::VersionedTransaction;
use tracing::debug;

use crate::error::RelayerError;
use crate::types::{SigningWallet, TransactionBundle};

/// Text encoding of serialized transactions on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxEncoding {
    #[default]
    Base58,
    Base64,
}

impl TxEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Base58 => "base58",
            Self::Base64 => "base64",
        }
    }

    pub fn decode(&self, encoded: &str) -> Result<Vec<u8>, RelayerError> {
        match self {
            Self::Base58 => bs58::decode(encoded)
                .into_vec()
                .map_err(|e| RelayerError::Decode(format!("base58 transaction: {e}"))),
            Self::Base64 => BASE64
                .decode(encoded)
                .map_err(|e| RelayerError::Decode(format!("base64 transaction: {e}"))),
        }
    }

    pub fn encode(&self, bytes: &[u8]) -> String {
        match self {
            Self::Base58 => bs58::encode(bytes).into_string(),
            Self::Base64 => BASE64.encode(bytes),
        }
    }
}

pub fn decode_transaction(
    encoded: &str,
    encoding: TxEncoding,
) -> Result<VersionedTransaction, RelayerError> {
    let bytes = encoding.decode(encoded)?;
    Ok(bincode::deserialize(&bytes)?)
}

pub fn encode_transaction(
    tx: &VersionedTransaction,
    encoding: TxEncoding,
) -> Result<String, RelayerError> {
    let bytes = bincode::serialize(tx)?;
    Ok(encoding.encode(&bytes))
}

fn find_keypair<'a>(wallets: &'a [SigningWallet], pubkey: &Pubkey) -> Option<&'a Keypair> {
    wallets
        .iter()
        .find(|w| w.pubkey() == *pubkey)
        .map(SigningWallet::keypair)
}

/// Signer pubkeys of a transaction, in slot order.
fn required_signers(tx: &VersionedTransaction) -> Result<Vec<Pubkey>, RelayerError> {
    let required = tx.message.header().num_required_signatures as usize;
    let keys = tx.message.static_account_keys();
    if keys.len() < required {
        return Err(RelayerError::Decode(format!(
            "transaction lists {required} signers but only {} account keys",
            keys.len()
        )));
    }
    Ok(keys[..required].to_vec())
}

fn has_external_signature(tx: &VersionedTransaction) -> bool {
    tx.signatures.iter().any(|s| *s != Signature::default())
}

/// Fill only the all-zero signer slots, leaving existing signatures alone.
fn sign_missing_slots(
    tx: &mut VersionedTransaction,
    wallets: &[SigningWallet],
) -> Result<(), RelayerError> {
    let signers = required_signers(tx)?;
    tx.signatures.resize(signers.len(), Signature::default());
    let message = tx.message.serialize();

    for (slot, pubkey) in signers.iter().enumerate() {
        if tx.signatures[slot] != Signature::default() {
            continue;
        }
        let keypair = find_keypair(wallets, pubkey).ok_or_else(|| RelayerError::MissingSigner {
            pubkey: pubkey.to_string(),
        })?;
        tx.signatures[slot] = keypair.sign_message(&message);
    }
    Ok(())
}

/// Sign every required slot with the matching local keypair.
fn sign_all_slots(
    tx: &mut VersionedTransaction,
    wallets: &[SigningWallet],
) -> Result<(), RelayerError> {
    let signers = required_signers(tx)?;

    let mut keypairs: Vec<&Keypair> = Vec::with_capacity(signers.len());
    for pubkey in &signers {
        let keypair = find_keypair(wallets, pubkey).ok_or_else(|| RelayerError::MissingSigner {
            pubkey: pubkey.to_string(),
        })?;
        if !keypairs.iter().any(|k| k.pubkey() == *pubkey) {
            keypairs.push(keypair);
        }
    }

    let message = tx.message.serialize();
    tx.signatures = signers
        .iter()
        .map(|pubkey| {
            keypairs
                .iter()
                .find(|k| k.pubkey() == *pubkey)
                .map(|k| k.sign_message(&message))
                .unwrap_or_default()
        })
        .collect();
    Ok(())
}

/// Complete client-side signing of server-prepared bundles.
///
/// The first transaction of the first bundle keeps any signature it
/// arrived with; all other transactions are signed in full. Signing is
/// deterministic, so re-signing an already signed bundle is a no-op.
pub fn complete_bundle_signing(
    bundles: &[TransactionBundle],
    wallets: &[SigningWallet],
    encoding: TxEncoding,
) -> Result<Vec<TransactionBundle>, RelayerError> {
    let mut signed = Vec::with_capacity(bundles.len());

    for (bundle_idx, bundle) in bundles.iter().enumerate() {
        let mut transactions = Vec::with_capacity(bundle.len());
        for (tx_idx, encoded) in bundle.transactions.iter().enumerate() {
            let mut tx = decode_transaction(encoded, encoding)?;

            if bundle_idx == 0 && tx_idx == 0 && has_external_signature(&tx) {
                debug!("Preserving pre-signed slot on critical transaction");
                sign_missing_slots(&mut tx, wallets)?;
            } else {
                sign_all_slots(&mut tx, wallets)?;
            }

            transactions.push(encode_transaction(&tx, encoding)?);
        }
        signed.push(TransactionBundle::new(transactions));
    }

    Ok(signed)
}
