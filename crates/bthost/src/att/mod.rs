//! Attribute Protocol (ATT) attribute access
//!
//! This module holds the server-side attribute model: attributes and their groupings,
//! the database that allocates handles for them, and the permission checks an ATT bearer
//! runs before touching an attribute.

pub mod attribute;
pub mod constants;
pub mod database;
pub mod error;
pub mod permissions;

pub use self::attribute::{
    AccessFlags, AccessRequirements, Attribute, AttributeGrouping, ReadHandler,
    ReadResultCallback, WriteHandler, WriteResultCallback,
};
pub use self::constants::*;
pub use self::database::Database;
pub use self::error::{AttError, AttErrorCode, AttResult};
pub use self::permissions::{check_read_permissions, check_write_permissions};
