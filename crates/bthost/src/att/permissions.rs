//! Access checks against the security of the current link

use super::attribute::AccessRequirements;
use super::error::AttErrorCode;
use crate::smp::{SecurityLevel, SecurityProperties};

fn check_security_permissions(
    reqs: &AccessRequirements,
    security: &SecurityProperties,
    not_permitted: AttErrorCode,
) -> Result<(), AttErrorCode> {
    if !reqs.allowed() {
        return Err(not_permitted);
    }

    // An unencrypted link means pairing never completed, so the peer is asked to
    // authenticate rather than to encrypt.
    if reqs.encryption_required() && security.level() < SecurityLevel::Encrypted {
        return Err(AttErrorCode::InsufficientAuthentication);
    }

    if (reqs.authentication_required() || reqs.authorization_required())
        && security.level() < SecurityLevel::Authenticated
    {
        return Err(AttErrorCode::InsufficientAuthentication);
    }

    // Key size last: a link lacking authentication is never reported as a short key.
    if reqs.encryption_required() && security.enc_key_size() < reqs.min_enc_key_size() {
        return Err(AttErrorCode::InsufficientEncryptionKeySize);
    }

    Ok(())
}

/// Whether a read with `reqs` may proceed on a link secured by `security`
pub fn check_read_permissions(
    reqs: &AccessRequirements,
    security: &SecurityProperties,
) -> Result<(), AttErrorCode> {
    check_security_permissions(reqs, security, AttErrorCode::ReadNotPermitted)
}

/// Whether a write with `reqs` may proceed on a link secured by `security`
pub fn check_write_permissions(
    reqs: &AccessRequirements,
    security: &SecurityProperties,
) -> Result<(), AttErrorCode> {
    check_security_permissions(reqs, security, AttErrorCode::WriteNotPermitted)
}
