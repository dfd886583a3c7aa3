//! Cryptographic primitives for block hashing

pub mod hash;

pub use hash::hash_fields_hex;
