//! Attribute data model
//!
//! An [`AttributeGrouping`] owns a contiguous handle range. Its first attribute is the
//! group declaration; the remaining attributes are added one at a time, in handle order,
//! until the range is full. Each [`Attribute`] knows the start handle of the grouping it
//! belongs to, which the [`Database`](super::Database) resolves back to the grouping.

use super::constants::*;
use super::error::{AttError, AttErrorCode, AttResult};
use crate::gap::PeerId;
use crate::uuid::Uuid;
use bitflags::bitflags;
use log::trace;
use std::fmt;
use std::sync::Arc;

bitflags! {
    /// Security properties demanded by one kind of access
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u8 {
        const ALLOWED = 1 << 0;
        const ENCRYPTION_REQUIRED = 1 << 1;
        const AUTHENTICATION_REQUIRED = 1 << 2;
        const AUTHORIZATION_REQUIRED = 1 << 3;
    }
}

/// Read or write policy of an attribute. The default policy forbids access entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessRequirements {
    flags: AccessFlags,
    min_enc_key_size: u8,
}

impl Default for AccessRequirements {
    fn default() -> Self {
        Self {
            flags: AccessFlags::empty(),
            min_enc_key_size: MAX_ENCRYPTION_KEY_SIZE,
        }
    }
}

impl AccessRequirements {
    /// Access is allowed, subject to the given security requirements. A required
    /// encryption key must be of the maximum size.
    pub fn new(encryption: bool, authentication: bool, authorization: bool) -> Self {
        Self::with_key_size(
            encryption,
            authentication,
            authorization,
            MAX_ENCRYPTION_KEY_SIZE,
        )
    }

    /// Like `new`, with an explicit minimum encryption key size
    pub fn with_key_size(
        encryption: bool,
        authentication: bool,
        authorization: bool,
        min_enc_key_size: u8,
    ) -> Self {
        let mut flags = AccessFlags::ALLOWED;
        flags.set(AccessFlags::ENCRYPTION_REQUIRED, encryption);
        flags.set(AccessFlags::AUTHENTICATION_REQUIRED, authentication);
        flags.set(AccessFlags::AUTHORIZATION_REQUIRED, authorization);
        Self {
            flags,
            min_enc_key_size,
        }
    }

    /// Access with no security requirements
    pub fn open() -> Self {
        Self::new(false, false, false)
    }

    /// Raw permission flags
    pub fn flags(&self) -> AccessFlags {
        self.flags
    }

    /// Whether the access is permitted at all
    pub fn allowed(&self) -> bool {
        self.flags.contains(AccessFlags::ALLOWED)
    }

    /// Permitted with no encryption, authentication or authorization
    pub fn allowed_without_security(&self) -> bool {
        self.flags == AccessFlags::ALLOWED
    }

    /// Whether the link must be encrypted
    pub fn encryption_required(&self) -> bool {
        self.flags.contains(AccessFlags::ENCRYPTION_REQUIRED)
    }

    /// Whether the link key must be authenticated
    pub fn authentication_required(&self) -> bool {
        self.flags.contains(AccessFlags::AUTHENTICATION_REQUIRED)
    }

    /// Whether the upper layer must authorize the access
    pub fn authorization_required(&self) -> bool {
        self.flags.contains(AccessFlags::AUTHORIZATION_REQUIRED)
    }

    /// Smallest encryption key size accepted, in bytes
    pub fn min_enc_key_size(&self) -> u8 {
        self.min_enc_key_size
    }
}

/// Completes an asynchronous read with the value or an error code
pub type ReadResultCallback = Box<dyn FnOnce(Result<Vec<u8>, AttErrorCode>) + Send>;

/// Completes an asynchronous write
pub type WriteResultCallback = Box<dyn FnOnce(Result<(), AttErrorCode>) + Send>;

/// Serves reads of a dynamic attribute: `(peer, handle, offset, result)`
pub type ReadHandler = Arc<dyn Fn(PeerId, Handle, u16, ReadResultCallback) + Send + Sync>;

/// Serves writes: `(peer, handle, offset, value, result)`
pub type WriteHandler =
    Arc<dyn Fn(PeerId, Handle, u16, &[u8], WriteResultCallback) + Send + Sync>;

/// A single addressable attribute
pub struct Attribute {
    group_start: Handle,
    handle: Handle,
    attr_type: Uuid,
    read_reqs: AccessRequirements,
    write_reqs: AccessRequirements,
    value: Option<Vec<u8>>,
    read_handler: Option<ReadHandler>,
    write_handler: Option<WriteHandler>,
}

impl Default for Attribute {
    /// An uninitialized attribute: invalid handle, no access
    fn default() -> Self {
        Self::new(
            INVALID_HANDLE,
            INVALID_HANDLE,
            Uuid::from_u16(0),
            AccessRequirements::default(),
            AccessRequirements::default(),
        )
    }
}

impl Attribute {
    fn new(
        group_start: Handle,
        handle: Handle,
        attr_type: Uuid,
        read_reqs: AccessRequirements,
        write_reqs: AccessRequirements,
    ) -> Self {
        Self {
            group_start,
            handle,
            attr_type,
            read_reqs,
            write_reqs,
            value: None,
            read_handler: None,
            write_handler: None,
        }
    }

    /// False for the default attribute, which has no handle
    pub fn is_initialized(&self) -> bool {
        self.handle != INVALID_HANDLE
    }

    /// Handle of this attribute
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Attribute type UUID
    pub fn attr_type(&self) -> Uuid {
        self.attr_type
    }

    /// Start handle of the grouping this attribute belongs to
    pub fn group_start(&self) -> Handle {
        self.group_start
    }

    /// Requirements for reading this attribute
    pub fn read_reqs(&self) -> &AccessRequirements {
        &self.read_reqs
    }

    /// Requirements for writing this attribute
    pub fn write_reqs(&self) -> &AccessRequirements {
        &self.write_reqs
    }

    /// The static value, if one was set
    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Assign a static value. Only attributes that cannot be written may hold one, and
    /// the value must be between 1 and [`MAX_ATTRIBUTE_VALUE_LENGTH`] bytes.
    pub fn set_value(&mut self, value: &[u8]) -> AttResult<()> {
        if value.is_empty() || value.len() > MAX_ATTRIBUTE_VALUE_LENGTH {
            return Err(AttErrorCode::InvalidAttributeValueLength.into());
        }
        if self.write_reqs.allowed() {
            return Err(AttError::InvalidParameter(format!(
                "attribute 0x{:04X} is writable and cannot hold a static value",
                self.handle
            )));
        }
        self.value = Some(value.to_vec());
        Ok(())
    }

    /// Install the handler used for reads when no static value is set
    pub fn set_read_handler(&mut self, handler: ReadHandler) {
        self.read_handler = Some(handler);
    }

    /// Install the handler used for writes
    pub fn set_write_handler(&mut self, handler: WriteHandler) {
        self.write_handler = Some(handler);
    }

    pub fn read_handler(&self) -> Option<ReadHandler> {
        self.read_handler.clone()
    }

    pub fn write_handler(&self) -> Option<WriteHandler> {
        self.write_handler.clone()
    }

    /// Start an asynchronous read through the read handler. Returns false without doing
    /// anything if the attribute is uninitialized, has no handler, or does not allow
    /// reads. Security is not checked here.
    pub fn read_async(&self, peer_id: PeerId, offset: u16, result: ReadResultCallback) -> bool {
        if !self.is_initialized() || !self.read_reqs.allowed() {
            return false;
        }
        let Some(handler) = self.read_handler.clone() else {
            return false;
        };
        trace!("att: read handle 0x{:04X} offset {} by {}", self.handle, offset, peer_id);
        handler(peer_id, self.handle, offset, result);
        true
    }

    /// Start an asynchronous write through the write handler. Same rules as
    /// [`read_async`](Self::read_async).
    pub fn write_async(
        &self,
        peer_id: PeerId,
        offset: u16,
        value: &[u8],
        result: WriteResultCallback,
    ) -> bool {
        if !self.is_initialized() || !self.write_reqs.allowed() {
            return false;
        }
        let Some(handler) = self.write_handler.clone() else {
            return false;
        };
        trace!(
            "att: write handle 0x{:04X} offset {} by {}: {}",
            self.handle,
            offset,
            peer_id,
            hex::encode(value)
        );
        handler(peer_id, self.handle, offset, value, result);
        true
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("handle", &self.handle)
            .field("type", &self.attr_type)
            .field("group_start", &self.group_start)
            .field("read_reqs", &self.read_reqs)
            .field("write_reqs", &self.write_reqs)
            .field("value", &self.value.as_ref().map(hex::encode))
            .field("dynamic_read", &self.read_handler.is_some())
            .field("dynamic_write", &self.write_handler.is_some())
            .finish()
    }
}

/// A contiguous range of attributes headed by a group declaration
#[derive(Debug)]
pub struct AttributeGrouping {
    group_type: Uuid,
    start_handle: Handle,
    end_handle: Handle,
    active: bool,
    attributes: Vec<Attribute>,
}

impl AttributeGrouping {
    /// Reserve `attr_count + 1` handles starting at `start_handle`. The declaration
    /// attribute is created immediately with `decl_value`; it can be read without
    /// security and never written.
    pub fn new(
        group_type: Uuid,
        start_handle: Handle,
        attr_count: usize,
        decl_value: &[u8],
    ) -> AttResult<Self> {
        if start_handle == INVALID_HANDLE {
            return Err(AttError::InvalidParameter("invalid start handle".into()));
        }
        if attr_count > (HANDLE_MAX - start_handle) as usize {
            return Err(AttError::OutOfHandles(attr_count + 1));
        }
        let end_handle = start_handle + attr_count as u16;

        let mut decl = Attribute::new(
            start_handle,
            start_handle,
            group_type,
            AccessRequirements::open(),
            AccessRequirements::default(),
        );
        decl.set_value(decl_value)?;

        let mut attributes = Vec::with_capacity(attr_count + 1);
        attributes.push(decl);

        Ok(Self {
            group_type,
            start_handle,
            end_handle,
            active: false,
            attributes,
        })
    }

    /// Type of the group declaration attribute
    pub fn group_type(&self) -> Uuid {
        self.group_type
    }

    /// Handle of the group declaration
    pub fn start_handle(&self) -> Handle {
        self.start_handle
    }

    /// Last handle reserved for this grouping
    pub fn end_handle(&self) -> Handle {
        self.end_handle
    }

    /// True once every reserved handle holds an attribute
    pub fn complete(&self) -> bool {
        self.attributes.len() == (self.end_handle - self.start_handle) as usize + 1
    }

    /// Inactive groupings are hidden from lookups
    pub fn active(&self) -> bool {
        self.active
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Value of the group declaration
    pub fn decl_value(&self) -> &[u8] {
        self.attributes[0].value().unwrap_or_default()
    }

    /// Attributes added so far, in handle order
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Append an attribute at the next handle. Returns None once the grouping is
    /// complete.
    pub fn add_attribute(
        &mut self,
        attr_type: Uuid,
        read_reqs: AccessRequirements,
        write_reqs: AccessRequirements,
    ) -> Option<&mut Attribute> {
        if self.complete() {
            return None;
        }
        let handle = self.start_handle + self.attributes.len() as u16;
        self.attributes.push(Attribute::new(
            self.start_handle,
            handle,
            attr_type,
            read_reqs,
            write_reqs,
        ));
        self.attributes.last_mut()
    }

    /// Look up an attribute of this grouping by handle
    pub fn attribute(&self, handle: Handle) -> Option<&Attribute> {
        let index = handle.checked_sub(self.start_handle)? as usize;
        self.attributes.get(index)
    }

    pub fn attribute_mut(&mut self, handle: Handle) -> Option<&mut Attribute> {
        let index = handle.checked_sub(self.start_handle)? as usize;
        self.attributes.get_mut(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    const TEST_TYPE1: Uuid = Uuid::from_u16(0x0001);
    const TEST_TYPE2: Uuid = Uuid::from_u16(0x0002);
    const TEST_TYPE3: Uuid = Uuid::from_u16(0x0003);
    const DECL_VALUE: &[u8] = b"test";
    const PEER: PeerId = PeerId(1);

    #[test]
    fn test_access_requirements_default_is_not_allowed() {
        let reqs = AccessRequirements::default();
        assert!(!reqs.allowed());
        assert!(!reqs.allowed_without_security());

        let open = AccessRequirements::open();
        assert!(open.allowed());
        assert!(open.allowed_without_security());

        let secure = AccessRequirements::with_key_size(true, false, true, 7);
        assert!(secure.allowed());
        assert!(!secure.allowed_without_security());
        assert!(secure.encryption_required());
        assert!(!secure.authentication_required());
        assert!(secure.authorization_required());
        assert_eq!(secure.min_enc_key_size(), 7);
    }

    #[test]
    fn test_grouping_declaration() {
        let group = AttributeGrouping::new(TEST_TYPE1, 1, 2, DECL_VALUE).unwrap();
        assert_eq!(group.start_handle(), 1);
        assert_eq!(group.end_handle(), 3);
        assert!(!group.complete());
        assert!(!group.active());
        assert_eq!(group.group_type(), TEST_TYPE1);
        assert_eq!(group.decl_value(), DECL_VALUE);

        let decl = &group.attributes()[0];
        assert_eq!(decl.handle(), 1);
        assert_eq!(decl.attr_type(), TEST_TYPE1);
        assert!(decl.read_reqs().allowed_without_security());
        assert!(!decl.write_reqs().allowed());
        assert_eq!(decl.value(), Some(DECL_VALUE));
    }

    #[test]
    fn test_grouping_with_no_extra_attributes_is_complete() {
        let mut group = AttributeGrouping::new(TEST_TYPE1, 10, 0, DECL_VALUE).unwrap();
        assert!(group.complete());
        assert_eq!(group.end_handle(), 10);
        assert!(group
            .add_attribute(TEST_TYPE2, AccessRequirements::open(), AccessRequirements::default())
            .is_none());
    }

    #[test]
    fn test_grouping_handle_allocation() {
        let attr_count = 2;
        let mut group = AttributeGrouping::new(TEST_TYPE1, 1, attr_count, DECL_VALUE).unwrap();

        let attr = group
            .add_attribute(TEST_TYPE2, AccessRequirements::open(), AccessRequirements::default())
            .unwrap();
        assert_eq!(attr.handle(), 2);
        assert_eq!(attr.group_start(), 1);
        assert!(attr.set_value(b"x").is_ok());

        let attr = group
            .add_attribute(TEST_TYPE3, AccessRequirements::default(), AccessRequirements::open())
            .unwrap();
        assert_eq!(attr.handle(), 3);
        assert_eq!(attr.attr_type(), TEST_TYPE3);

        assert!(group.complete());
        assert!(group
            .add_attribute(TEST_TYPE3, AccessRequirements::open(), AccessRequirements::open())
            .is_none());

        let handles: Vec<Handle> = group.attributes().iter().map(|a| a.handle()).collect();
        assert_eq!(handles, vec![1, 2, 3]);
        assert_eq!(group.attribute(3).map(|a| a.attr_type()), Some(TEST_TYPE3));
        assert!(group.attribute(4).is_none());
        assert!(group.attribute(0).is_none());
    }

    #[test]
    fn test_grouping_rejects_bad_ranges() {
        assert!(AttributeGrouping::new(TEST_TYPE1, INVALID_HANDLE, 1, DECL_VALUE).is_err());
        assert!(AttributeGrouping::new(TEST_TYPE1, HANDLE_MAX, 1, DECL_VALUE).is_err());
        assert!(AttributeGrouping::new(TEST_TYPE1, HANDLE_MAX, 0, DECL_VALUE).is_ok());
        assert!(AttributeGrouping::new(TEST_TYPE1, 1, 0, &[]).is_err());
    }

    #[test]
    fn test_set_value_rules() {
        let mut group = AttributeGrouping::new(TEST_TYPE1, 1, 2, DECL_VALUE).unwrap();
        let attr = group
            .add_attribute(TEST_TYPE2, AccessRequirements::open(), AccessRequirements::open())
            .unwrap();
        assert!(attr.set_value(b"nope").is_err());
        assert!(attr.value().is_none());

        let attr = group
            .add_attribute(TEST_TYPE2, AccessRequirements::open(), AccessRequirements::default())
            .unwrap();
        assert_eq!(
            attr.set_value(&[]),
            Err(AttError::Protocol(AttErrorCode::InvalidAttributeValueLength))
        );
        assert!(attr
            .set_value(&vec![0u8; MAX_ATTRIBUTE_VALUE_LENGTH + 1])
            .is_err());
        assert!(attr.set_value(&vec![0u8; MAX_ATTRIBUTE_VALUE_LENGTH]).is_ok());
    }

    #[test]
    fn test_read_async_without_handler_or_permission() {
        let uninitialized = Attribute::default();
        assert!(!uninitialized.is_initialized());
        assert!(!uninitialized.read_async(PEER, 0, Box::new(|_| panic!("called"))));

        let mut group = AttributeGrouping::new(TEST_TYPE1, 1, 2, DECL_VALUE).unwrap();

        // Reads allowed but no handler
        let attr = group
            .add_attribute(TEST_TYPE2, AccessRequirements::open(), AccessRequirements::default())
            .unwrap();
        assert!(!attr.read_async(PEER, 0, Box::new(|_| panic!("called"))));

        // Handler present but reads not allowed
        let attr = group
            .add_attribute(TEST_TYPE2, AccessRequirements::default(), AccessRequirements::default())
            .unwrap();
        let called = Arc::new(Mutex::new(false));
        let flag = called.clone();
        attr.set_read_handler(Arc::new(move |_, _, _, _| *flag.lock() = true));
        assert!(!attr.read_async(PEER, 0, Box::new(|_| {})));
        assert!(!*called.lock());
    }

    #[test]
    fn test_read_async() {
        let mut group = AttributeGrouping::new(TEST_TYPE1, 1, 1, DECL_VALUE).unwrap();
        let attr = group
            .add_attribute(TEST_TYPE2, AccessRequirements::open(), AccessRequirements::default())
            .unwrap();

        attr.set_read_handler(Arc::new(|peer, handle, offset, result| {
            assert_eq!(peer, PEER);
            assert_eq!(handle, 2);
            assert_eq!(offset, 3);
            result(Ok(b"value".to_vec()));
        }));

        let received = Arc::new(Mutex::new(None));
        let sink = received.clone();
        assert!(attr.read_async(PEER, 3, Box::new(move |r| *sink.lock() = Some(r))));
        assert_eq!(*received.lock(), Some(Ok(b"value".to_vec())));
    }

    #[test]
    fn test_write_async() {
        let mut group = AttributeGrouping::new(TEST_TYPE1, 1, 1, DECL_VALUE).unwrap();
        let attr = group
            .add_attribute(TEST_TYPE2, AccessRequirements::default(), AccessRequirements::open())
            .unwrap();

        let written = Arc::new(Mutex::new(Vec::new()));
        let store = written.clone();
        attr.set_write_handler(Arc::new(move |_, handle, offset, value, result| {
            assert_eq!(handle, 2);
            assert_eq!(offset, 0);
            store.lock().extend_from_slice(value);
            result(Ok(()));
        }));

        let status = Arc::new(Mutex::new(None));
        let sink = status.clone();
        assert!(attr.write_async(PEER, 0, b"hello", Box::new(move |r| *sink.lock() = Some(r))));
        assert_eq!(*status.lock(), Some(Ok(())));
        assert_eq!(*written.lock(), b"hello".to_vec());
    }
}
