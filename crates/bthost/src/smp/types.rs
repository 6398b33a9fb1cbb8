//! Link security state as seen by the upper layers
//!
//! Pairing itself is outside this crate; the channel and attribute layers only need the
//! outcome of it, which is captured by [`SecurityProperties`].

use std::fmt;

/// Security level of an encrypted link
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum SecurityLevel {
    /// No encryption
    #[default]
    None = 0,
    /// Encrypted with an unauthenticated key (Just Works)
    Encrypted = 1,
    /// Encrypted with a key that has MITM protection
    Authenticated = 2,
}

impl SecurityLevel {
    /// Whether the level implies an encrypted link
    pub fn is_encrypted(&self) -> bool {
        *self >= SecurityLevel::Encrypted
    }

    /// Only MITM-protected keys count as authenticated
    pub fn is_authenticated(&self) -> bool {
        *self >= SecurityLevel::Authenticated
    }
}

/// Security properties of the key protecting a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecurityProperties {
    level: SecurityLevel,
    secure_connections: bool,
    key_size: u8,
}

impl SecurityProperties {
    /// Properties of a link encrypted at `level` with a `key_size` byte key
    pub const fn new(level: SecurityLevel, key_size: u8, secure_connections: bool) -> Self {
        Self {
            level,
            secure_connections,
            key_size,
        }
    }

    /// Properties of an unencrypted link
    pub const fn none() -> Self {
        Self::new(SecurityLevel::None, 0, false)
    }

    /// Security level of the key
    pub fn level(&self) -> SecurityLevel {
        self.level
    }

    /// Whether the key was generated with LE Secure Connections
    pub fn secure_connections(&self) -> bool {
        self.secure_connections
    }

    /// Encryption key size in bytes
    pub fn enc_key_size(&self) -> u8 {
        self.key_size
    }

    /// Shorthand for `level().is_authenticated()`
    pub fn authenticated(&self) -> bool {
        self.level.is_authenticated()
    }

    /// Shorthand for `level().is_encrypted()`
    pub fn encrypted(&self) -> bool {
        self.level.is_encrypted()
    }
}

impl fmt::Display for SecurityProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[security: {:?}, key size: {}, secure connections: {}]",
            self.level, self.key_size, self.secure_connections
        )
    }
}

/// Whether pairing on a link may create a bond
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BondableMode {
    #[default]
    Bondable,
    NonBondable,
}

/// What a BR/EDR service demands of the link before it may be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BrEdrSecurityRequirements {
    pub authentication: bool,
    pub secure_connections: bool,
}

/// Whether a link with `properties` satisfies `requirements`
pub fn security_properties_meet_requirements(
    properties: &SecurityProperties,
    requirements: &BrEdrSecurityRequirements,
) -> bool {
    let auth_ok = !requirements.authentication || properties.authenticated();
    let sc_ok = !requirements.secure_connections || properties.secure_connections();
    auth_ok && sc_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered() {
        assert!(SecurityLevel::None < SecurityLevel::Encrypted);
        assert!(SecurityLevel::Encrypted < SecurityLevel::Authenticated);
        assert!(SecurityLevel::Authenticated.is_encrypted());
        assert!(!SecurityLevel::Encrypted.is_authenticated());
    }

    #[test]
    fn test_bredr_requirements() {
        let unauthenticated = SecurityProperties::new(SecurityLevel::Encrypted, 16, false);
        let authenticated = SecurityProperties::new(SecurityLevel::Authenticated, 16, false);
        let unauthenticated_sc = SecurityProperties::new(SecurityLevel::Encrypted, 16, true);
        let authenticated_sc = SecurityProperties::new(SecurityLevel::Authenticated, 16, true);

        let requirements = |authentication, secure_connections| BrEdrSecurityRequirements {
            authentication,
            secure_connections,
        };
        let none = requirements(false, false);
        let auth = requirements(true, false);
        let sc = requirements(false, true);
        let auth_sc = requirements(true, true);

        // (link, requirements, met)
        let cases = [
            (unauthenticated, none, true),
            (unauthenticated, auth, false),
            (unauthenticated, sc, false),
            (unauthenticated, auth_sc, false),
            (authenticated, none, true),
            (authenticated, auth, true),
            (authenticated, sc, false),
            (authenticated, auth_sc, false),
            (unauthenticated_sc, none, true),
            (unauthenticated_sc, auth, false),
            (unauthenticated_sc, sc, true),
            (unauthenticated_sc, auth_sc, false),
            (authenticated_sc, none, true),
            (authenticated_sc, auth, true),
            (authenticated_sc, sc, true),
            (authenticated_sc, auth_sc, true),
        ];
        for (link, reqs, met) in cases {
            assert_eq!(
                security_properties_meet_requirements(&link, &reqs),
                met,
                "link {:?} requirements {:?}",
                link,
                reqs
            );
        }
        assert!(security_properties_meet_requirements(
            &SecurityProperties::none(),
            &none
        ));
    }
}
