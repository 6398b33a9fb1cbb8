//! Security Manager outcomes
//!
//! Only the result of pairing is modelled here: the security level, key size and
//! Secure Connections flag of the current link key. The L2CAP and ATT layers consult
//! these when gating access.

mod types;

pub use self::types::*;
