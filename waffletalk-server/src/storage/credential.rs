//! Stored login credential.
//!
//! Clients send `clienthash` (a hash of password and username computed on
//! the client); the server stores PBKDF2-HMAC-SHA256 of it under a random
//! per-user salt.

use std::num::NonZeroU32;

use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use waffletalk_core::Snowflake;

use crate::error::StoreError;

const ITERATIONS: NonZeroU32 = match NonZeroU32::new(100_000) {
    Some(n) => n,
    None => unreachable!(),
};
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub user: Snowflake,
    salt: Vec<u8>,
    hash: Vec<u8>,
}

impl Credential {
    pub fn derive(user: Snowflake, clienthash: &str) -> Result<Self, StoreError> {
        let mut salt = vec![0u8; SALT_LEN];
        SystemRandom::new()
            .fill(&mut salt)
            .map_err(|_| StoreError::Crypto)?;
        let mut hash = vec![0u8; HASH_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            ITERATIONS,
            &salt,
            clienthash.as_bytes(),
            &mut hash,
        );
        Ok(Self { user, salt, hash })
    }

    pub fn verify(&self, clienthash: &str) -> bool {
        pbkdf2::verify(
            pbkdf2::PBKDF2_HMAC_SHA256,
            ITERATIONS,
            &self.salt,
            clienthash.as_bytes(),
            &self.hash,
        )
        .is_ok()
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (credential, _) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(credential)
    }
}
