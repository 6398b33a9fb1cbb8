//! Attribute database
//!
//! Groupings are stored by start handle and allocated first-fit inside the database's
//! handle range. A grouping is invisible to lookups until it is complete and activated.

use super::attribute::{
    AccessRequirements, Attribute, AttributeGrouping, ReadResultCallback, WriteResultCallback,
};
use super::constants::*;
use super::error::{AttError, AttErrorCode, AttResult};
use super::permissions::{check_read_permissions, check_write_permissions};
use crate::gap::PeerId;
use crate::smp::SecurityProperties;
use crate::uuid::Uuid;
use log::{debug, trace, warn};
use std::collections::BTreeMap;

pub struct Database {
    range_start: Handle,
    range_end: Handle,
    groupings: BTreeMap<Handle, AttributeGrouping>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new(HANDLE_MIN, HANDLE_MAX)
    }
}

impl Database {
    /// A database that allocates handles in `[range_start, range_end]`
    pub fn new(range_start: Handle, range_end: Handle) -> Self {
        assert!(range_start != INVALID_HANDLE, "invalid start of handle range");
        assert!(range_start <= range_end, "empty handle range");
        Self {
            range_start,
            range_end,
            groupings: BTreeMap::new(),
        }
    }

    pub fn range_start(&self) -> Handle {
        self.range_start
    }

    pub fn range_end(&self) -> Handle {
        self.range_end
    }

    /// Reserve room for a grouping of `attr_count` attributes plus its declaration at the
    /// lowest free handles. The new grouping starts out inactive.
    pub fn new_grouping(
        &mut self,
        group_type: Uuid,
        attr_count: usize,
        decl_value: &[u8],
    ) -> AttResult<&mut AttributeGrouping> {
        // A grouping can never span more than the whole handle space
        if attr_count >= HANDLE_MAX as usize {
            warn!("att: grouping of {} attributes cannot fit any handle range", attr_count);
            return Err(AttError::OutOfHandles(attr_count.saturating_add(1)));
        }
        let needed = attr_count as u32 + 1;
        let mut candidate = self.range_start as u32;
        for grouping in self.groupings.values() {
            if grouping.start_handle() as u32 - candidate >= needed {
                break;
            }
            candidate = grouping.end_handle() as u32 + 1;
        }

        if candidate + needed - 1 > self.range_end as u32 {
            warn!(
                "att: no room for grouping of {} attributes in [0x{:04X}, 0x{:04X}]",
                needed, self.range_start, self.range_end
            );
            return Err(AttError::OutOfHandles(needed as usize));
        }

        let start = candidate as Handle;
        let grouping = AttributeGrouping::new(group_type, start, attr_count, decl_value)?;
        debug!(
            "att: new grouping {:?} at [0x{:04X}, 0x{:04X}]",
            group_type,
            start,
            grouping.end_handle()
        );
        Ok(self.groupings.entry(start).or_insert(grouping))
    }

    /// Remove the grouping that starts at `start_handle`, freeing its handles
    pub fn remove_grouping(&mut self, start_handle: Handle) -> bool {
        let removed = self.groupings.remove(&start_handle).is_some();
        if removed {
            debug!("att: removed grouping at 0x{:04X}", start_handle);
        }
        removed
    }

    /// Show or hide a grouping. Only complete groupings can be shown.
    pub fn set_grouping_active(&mut self, start_handle: Handle, active: bool) -> AttResult<()> {
        let grouping = self
            .groupings
            .get_mut(&start_handle)
            .ok_or(AttError::GroupingNotFound(start_handle))?;
        if active && !grouping.complete() {
            return Err(AttError::GroupingIncomplete(start_handle));
        }
        grouping.set_active(active);
        Ok(())
    }

    pub fn grouping(&self, start_handle: Handle) -> Option<&AttributeGrouping> {
        self.groupings.get(&start_handle)
    }

    pub fn grouping_mut(&mut self, start_handle: Handle) -> Option<&mut AttributeGrouping> {
        self.groupings.get_mut(&start_handle)
    }

    /// All groupings in handle order, active or not
    pub fn groupings(&self) -> impl Iterator<Item = &AttributeGrouping> {
        self.groupings.values()
    }

    /// The grouping an attribute belongs to
    pub fn grouping_of(&self, attr: &Attribute) -> Option<&AttributeGrouping> {
        self.groupings.get(&attr.group_start())
    }

    fn containing_grouping(&self, handle: Handle) -> Option<&AttributeGrouping> {
        let (_, grouping) = self.groupings.range(..=handle).next_back()?;
        (handle <= grouping.end_handle()).then_some(grouping)
    }

    /// Look up an attribute in an active grouping
    pub fn find_attribute(&self, handle: Handle) -> Option<&Attribute> {
        if handle == INVALID_HANDLE {
            return None;
        }
        let grouping = self.containing_grouping(handle)?;
        if !grouping.active() {
            return None;
        }
        grouping.attribute(handle)
    }

    /// Attributes of active groupings within `[start, end]`, in handle order.
    ///
    /// With `attr_type` set only attributes of that type are produced. With `groups_only`
    /// only group declarations are produced.
    pub fn iter(
        &self,
        start: Handle,
        end: Handle,
        attr_type: Option<Uuid>,
        groups_only: bool,
    ) -> impl Iterator<Item = &Attribute> + '_ {
        self.groupings
            .values()
            .filter(move |g| g.active() && g.end_handle() >= start && g.start_handle() <= end)
            .flat_map(move |g| {
                let attrs = g.attributes();
                if groups_only {
                    &attrs[..1]
                } else {
                    attrs
                }
            })
            .filter(move |a| a.handle() >= start && a.handle() <= end)
            .filter(move |a| attr_type.map_or(true, |t| a.attr_type() == t))
    }

    /// Serve a read: look up `handle`, check `security` against its read requirements,
    /// then answer from the static value or the read handler. `result` is called unless
    /// an error is returned.
    pub fn read_attribute(
        &self,
        peer_id: PeerId,
        handle: Handle,
        offset: u16,
        security: &SecurityProperties,
        result: ReadResultCallback,
    ) -> Result<(), AttErrorCode> {
        let attr = self
            .find_attribute(handle)
            .ok_or(AttErrorCode::InvalidHandle)?;
        check_read_permissions(attr.read_reqs(), security)?;

        if let Some(value) = attr.value() {
            let offset = offset as usize;
            if offset > value.len() {
                return Err(AttErrorCode::InvalidOffset);
            }
            trace!("att: static read of 0x{:04X} at offset {}", handle, offset);
            result(Ok(value[offset..].to_vec()));
            return Ok(());
        }

        if !attr.read_async(peer_id, offset, result) {
            return Err(AttErrorCode::ReadNotPermitted);
        }
        Ok(())
    }

    /// Serve a write: look up `handle`, check `security` against its write requirements,
    /// then hand the value to the write handler
    pub fn write_attribute(
        &self,
        peer_id: PeerId,
        handle: Handle,
        offset: u16,
        value: &[u8],
        security: &SecurityProperties,
        result: WriteResultCallback,
    ) -> Result<(), AttErrorCode> {
        let attr = self
            .find_attribute(handle)
            .ok_or(AttErrorCode::InvalidHandle)?;
        check_write_permissions(attr.write_reqs(), security)?;
        if value.len() > MAX_ATTRIBUTE_VALUE_LENGTH {
            return Err(AttErrorCode::InvalidAttributeValueLength);
        }
        if !attr.write_async(peer_id, offset, value, result) {
            return Err(AttErrorCode::WriteNotPermitted);
        }
        Ok(())
    }

    /// Add a complete, active grouping whose attributes all hold static values readable
    /// with `read_reqs`. Returns the start handle.
    pub fn add_static_grouping(
        &mut self,
        group_type: Uuid,
        decl_value: &[u8],
        read_reqs: AccessRequirements,
        attributes: &[(Uuid, &[u8])],
    ) -> AttResult<Handle> {
        let grouping = self.new_grouping(group_type, attributes.len(), decl_value)?;
        let start = grouping.start_handle();
        let filled = attributes.iter().try_for_each(|(attr_type, value)| {
            let attr = grouping
                .add_attribute(*attr_type, read_reqs, AccessRequirements::default())
                .ok_or(AttError::GroupingComplete(start))?;
            attr.set_value(value)
        });
        if let Err(err) = filled {
            self.remove_grouping(start);
            return Err(err);
        }
        self.set_grouping_active(start, true)?;
        Ok(start)
    }
}
