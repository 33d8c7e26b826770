/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Signing and verification for blocks and votes.
//!
//! Every signature check in the crate goes through the [Identity] trait, so the concrete scheme can be
//! swapped without touching the ledger, transport, gossip or agreement code. The provided
//! implementation, [Ed25519Identity], wraps an [Ed25519 signing key](ed25519_dalek::SigningKey).
//!
//! Public keys and signatures travel as lowercase hex strings. A node configured without a key runs in
//! verify-only mode: it can validate blocks and votes but cannot sign or vote.

use std::{fmt, fs, path::Path};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;

use crate::types::{validators::parse_public_key, Block, SequenceNumber, ViewNumber};

pub trait Identity: Send + Sync {
    /// Hex-encoded public key of the local signing key, if one is configured.
    fn public_key(&self) -> Option<String>;

    /// Sign `message` with the local key, returning the hex-encoded signature.
    fn sign(&self, message: &[u8]) -> Option<String>;

    /// Check that `signature` is a signature by `public_key` over `message`. Malformed keys or
    /// signatures never verify.
    fn verify(&self, public_key: &str, message: &[u8], signature: &str) -> bool;
}

/// A wrapper around [SigningKey] which implements a convenience method for creating signatures.
#[derive(Clone)]
pub(crate) struct Keypair(SigningKey);

impl Keypair {
    pub(crate) fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    pub(crate) fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.0.sign(message).to_bytes()
    }

    pub(crate) fn public(&self) -> VerifyingKey {
        self.0.verifying_key()
    }
}

#[derive(Clone)]
pub struct Ed25519Identity {
    keypair: Option<Keypair>,
}

impl Ed25519Identity {
    pub fn new(signing_key: SigningKey) -> Ed25519Identity {
        Ed25519Identity {
            keypair: Some(Keypair::new(signing_key)),
        }
    }

    /// An identity that can verify but holds no signing key.
    pub fn verify_only() -> Ed25519Identity {
        Ed25519Identity { keypair: None }
    }

    pub fn generate() -> Ed25519Identity {
        Ed25519Identity::new(SigningKey::generate(&mut OsRng))
    }

    /// Load a signing key from a file holding the hex encoding of either a 64-byte keypair or a
    /// 32-byte seed.
    pub fn from_key_file(path: impl AsRef<Path>) -> Result<Ed25519Identity, KeyError> {
        let contents = fs::read_to_string(path)?;
        let bytes = hex::decode(contents.trim())?;
        let signing_key = match bytes.len() {
            64 => {
                let keypair: [u8; 64] = bytes.try_into().map_err(|_| KeyError::Length(64))?;
                SigningKey::from_keypair_bytes(&keypair).map_err(|_| KeyError::Length(64))?
            }
            32 => {
                let seed: [u8; 32] = bytes.try_into().map_err(|_| KeyError::Length(32))?;
                SigningKey::from_bytes(&seed)
            }
            other => return Err(KeyError::Length(other)),
        };
        Ok(Ed25519Identity::new(signing_key))
    }

    pub fn verifying_key(&self) -> Option<VerifyingKey> {
        self.keypair.as_ref().map(Keypair::public)
    }
}

impl Identity for Ed25519Identity {
    fn public_key(&self) -> Option<String> {
        self.verifying_key().map(|key| hex::encode(key.to_bytes()))
    }

    fn sign(&self, message: &[u8]) -> Option<String> {
        self.keypair
            .as_ref()
            .map(|keypair| hex::encode(keypair.sign(message)))
    }

    fn verify(&self, public_key: &str, message: &[u8], signature: &str) -> bool {
        let Some(public_key) = parse_public_key(public_key) else {
            return false;
        };
        let Ok(signature_bytes) = hex::decode(signature) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&signature_bytes) else {
            return false;
        };
        public_key.verify(message, &signature).is_ok()
    }
}

/// Sign `block` with the local key, filling in its `pub_key` and `signature` fields. Returns false,
/// leaving the block untouched, if no local key is configured.
pub fn sign_block(identity: &dyn Identity, block: &mut Block) -> bool {
    let (Some(public_key), Some(signature)) = (
        identity.public_key(),
        identity.sign(block.compute_hash().as_bytes()),
    ) else {
        return false;
    };
    block.pub_key = public_key;
    block.signature = signature;
    true
}

/// Verify the signature on `block` over its recomputed hash. A block missing either its signature or
/// its public key never verifies.
pub fn verify_block(identity: &dyn Identity, block: &Block) -> bool {
    block.is_signed()
        && identity.verify(
            &block.pub_key,
            block.compute_hash().as_bytes(),
            &block.signature,
        )
}

/// The canonical string signed by agreement messages: `"{block_hash}:{sequence}:{view}"`.
///
/// Signer and verifier both build this string from the structured fields of the message; it is never
/// parsed back, so any disagreement in its format makes verification fail.
///
/// Prepare and commit messages sign the same string, so a signature does not say which phase it was
/// cast in. The phase comes from the kind of message carrying it, and a prepare signature also
/// verifies as a commit signature for the same block, sequence and view.
pub fn vote_message(block_hash: &str, sequence: SequenceNumber, view: ViewNumber) -> String {
    format!("{}:{}:{}", block_hash, sequence, view)
}

#[derive(Debug)]
pub enum KeyError {
    Io(std::io::Error),
    Hex(hex::FromHexError),
    /// The decoded key material had this many bytes instead of 32 or 64, or was not a valid keypair.
    Length(usize),
}

impl From<std::io::Error> for KeyError {
    fn from(value: std::io::Error) -> Self {
        KeyError::Io(value)
    }
}

impl From<hex::FromHexError> for KeyError {
    fn from(value: hex::FromHexError) -> Self {
        KeyError::Hex(value)
    }
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::Io(err) => write!(f, "cannot read key file: {}", err),
            KeyError::Hex(err) => write!(f, "key file is not hex: {}", err),
            KeyError::Length(len) => write!(f, "unusable key material of {} bytes", len),
        }
    }
}

impl std::error::Error for KeyError {}
