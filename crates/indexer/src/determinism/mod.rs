//! Canonical serialization, size ceilings and output verification.
//!
//! Every document goes through [`canonical::to_canonical_value`] and
//! [`canonical::render`], so identical inputs produce identical bytes.

pub mod canonical;
pub mod limits;
pub mod validator;

pub use canonical::{first_difference, render, sort_keys, to_canonical_value};
pub use limits::{apply_reverse_ceiling, cap_evidence};
pub use validator::{
    CanonicalBundle, LimitSummary, MANIFEST_FILE, OUTPUT_FILES, sha256_hex, verify_written,
};
