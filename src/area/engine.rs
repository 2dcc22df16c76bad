/*!
 * Area Engine
 *
 * Named shared-memory areas. The id names the mapping, the backing store
 * is what clones share; addresses are per mapping and never global.
 *
 * # Failure Policy
 *
 * Create and clone are all-or-nothing: the mapping is built before the
 * table slot, and a failed insert drops (unmaps) it again.
 */

use super::backing::{round_to_pages, BackingStore, Mapping};
use super::types::{AddressSpec, AreaEntry, AreaInfo, LockMode, Protection};
use crate::core::errors::{KernelResult, Status};
use crate::core::name::ObjectName;
use crate::core::types::{Address, AreaId, ObjectKind, Size, TeamId};
use crate::kernel::ObjectTable;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Area table and its operations
pub struct AreaEngine {
    table: ObjectTable<AreaEntry>,
}

impl AreaEngine {
    pub fn new(capacity: usize) -> Self {
        info!(capacity, "Area engine initialized");
        Self {
            table: ObjectTable::new(ObjectKind::Area, capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn placement(spec: AddressSpec, source: Option<Address>) -> (Option<Address>, bool) {
        match spec {
            AddressSpec::Any => (None, false),
            AddressSpec::Exact(address) => (Some(address), true),
            AddressSpec::Base(address) => (Some(address), false),
            AddressSpec::ClonePreferred => (source, false),
        }
    }

    /// Create an area of at least `size` bytes; returns its id and address
    pub fn create(
        &self,
        owner: TeamId,
        name: &str,
        spec: AddressSpec,
        size: Size,
        lock: LockMode,
        protection: Protection,
    ) -> KernelResult<(AreaId, Address)> {
        if size == 0 || spec == AddressSpec::ClonePreferred {
            return Err(Status::BadValue);
        }
        let size = round_to_pages(size).ok_or(Status::NoMemory)?;
        let store = Arc::new(BackingStore::create(name, size)?);
        let (hint, exact) = Self::placement(spec, None);
        let mapping = store.map(hint, exact, size, protection)?;
        let address = mapping.address();

        let id = self.table.insert(AreaEntry {
            owner,
            name: ObjectName::new(name),
            store,
            mapping,
            protection,
            lock,
        })?;
        debug!(area = id, owner, size, address, name, "Created area");
        Ok((id, address))
    }

    /// Map the backing store of `source` again under a new id
    pub fn clone_area(
        &self,
        owner: TeamId,
        name: &str,
        spec: AddressSpec,
        protection: Protection,
        source: AreaId,
    ) -> KernelResult<(AreaId, Address)> {
        let (store, source_address, lock) = self
            .table
            .with(source, |area| (area.store.clone(), area.address(), area.lock))?;

        let _resize = store.resize_lock();
        let size = store.size();
        let (hint, exact) = Self::placement(spec, Some(source_address));
        let mapping = store.map(hint, exact, size, protection)?;
        let address = mapping.address();

        let id = self.table.insert(AreaEntry {
            owner,
            name: ObjectName::new(name),
            store: store.clone(),
            mapping,
            protection,
            lock,
        })?;
        debug!(area = id, source, owner, address, "Cloned area");
        Ok((id, address))
    }

    pub fn delete(&self, id: AreaId) -> KernelResult<()> {
        self.delete_checked(id, |_| Ok(()))
    }

    /// Unmap and forget `id` once `check` accepts the owner
    ///
    /// Clones keep their own mappings; the store goes away with the last one.
    pub fn delete_checked(
        &self,
        id: AreaId,
        check: impl FnOnce(TeamId) -> KernelResult<()>,
    ) -> KernelResult<()> {
        let entry = self.table.remove_if(id, |area| check(area.owner))?;
        debug!(area = id, owner = entry.owner, size = entry.size(), "Deleted area");
        Ok(())
    }

    /// Resize the store behind `id` and remap every area sharing it
    ///
    /// New mappings are built before any old one is released, so a failure
    /// leaves every area as it was. Readers holding a slot lock never see a
    /// half-swapped mapping.
    pub fn resize(&self, id: AreaId, new_size: Size) -> KernelResult<()> {
        if new_size == 0 {
            return Err(Status::BadValue);
        }
        let size = round_to_pages(new_size).ok_or(Status::NoMemory)?;
        let store = self.table.with(id, |area| area.store.clone())?;

        let _resize = store.resize_lock();
        let old_size = store.size();
        if size == old_size {
            return Ok(());
        }

        if size > old_size {
            store.truncate(size)?;
        }

        let sharers = self
            .table
            .ids_where(|area| Arc::ptr_eq(&area.store, &store));
        let mut fresh: Vec<(AreaId, Mapping)> = Vec::with_capacity(sharers.len());
        for sharer in sharers {
            let Ok(protection) = self.table.with(sharer, |area| area.protection) else {
                continue;
            };
            match store.map(None, false, size, protection) {
                Ok(mapping) => fresh.push((sharer, mapping)),
                Err(status) => {
                    drop(fresh);
                    if size > old_size {
                        if let Err(rollback) = store.truncate(old_size) {
                            warn!(area = id, %rollback, "failed to roll back store growth");
                        }
                    }
                    return Err(status);
                }
            }
        }

        for (sharer, mapping) in fresh {
            let _ = self.table.with(sharer, move |area| {
                let _old = std::mem::replace(&mut area.mapping, mapping);
            });
        }

        // Every area already uses the new mappings; a file that will not
        // shrink only costs memory
        if size < old_size && !store.shrink(size) {
            warn!(area = id, old_size, size, "backing store kept its old length");
        }
        debug!(area = id, old_size, size, "Resized area");
        Ok(())
    }

    pub fn set_protection(&self, id: AreaId, protection: Protection) -> KernelResult<()> {
        self.table.with(id, |area| {
            area.mapping.protect(protection)?;
            area.protection = protection;
            Ok(())
        })?
    }

    /// Exact-name lookup
    pub fn find(&self, name: &str) -> KernelResult<AreaId> {
        self.table
            .find(|area| area.name.as_str() == name)
            .ok_or(Status::EntryNotFound)
    }

    /// Area of `team` whose mapping contains `address`
    pub fn area_for(&self, team: TeamId, address: Address) -> KernelResult<AreaId> {
        self.table
            .find(|area| area.owner == team && area.contains(address))
            .ok_or(Status::EntryNotFound)
    }

    pub fn owner(&self, id: AreaId) -> KernelResult<TeamId> {
        self.table.with(id, |area| area.owner)
    }

    pub fn info(&self, id: AreaId) -> KernelResult<AreaInfo> {
        self.table.with(id, |area| area.info(id))
    }

    /// Next area owned by `team` at or after `cookie`
    pub fn next_info(&self, team: TeamId, cookie: &mut i32) -> KernelResult<AreaInfo> {
        self.table
            .next_after(cookie, |id, area| (area.owner == team).then(|| area.info(id)))
            .ok_or(Status::BadValue)
    }

    /// Every area owned by `team`
    pub fn owned_by(&self, team: TeamId) -> Vec<AreaId> {
        self.table.ids_where(|area| area.owner == team)
    }

    /// Copy `buf.len()` bytes out of the area starting at `offset`
    pub fn read(&self, id: AreaId, offset: usize, buf: &mut [u8]) -> KernelResult<()> {
        self.table.with(id, |area| {
            if !area.protection.contains(Protection::READ) {
                return Err(Status::NotAllowed);
            }
            area.check_range(offset, buf.len())?;
            area.mapping.read(offset, buf);
            Ok(())
        })?
    }

    /// Copy `data` into the area starting at `offset`
    pub fn write(&self, id: AreaId, offset: usize, data: &[u8]) -> KernelResult<()> {
        self.table.with(id, |area| {
            if !area.protection.contains(Protection::WRITE) {
                return Err(Status::NotAllowed);
            }
            area.check_range(offset, data.len())?;
            area.mapping.write(offset, data);
            Ok(())
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::backing::page_size;

    fn engine() -> AreaEngine {
        AreaEngine::new(16)
    }

    fn create(engine: &AreaEngine, name: &str, size: Size) -> AreaId {
        engine
            .create(1, name, AddressSpec::Any, size, LockMode::NoLock, Protection::READ_WRITE)
            .unwrap()
            .0
    }

    #[test]
    fn test_size_rounded_to_pages() {
        let engine = engine();
        let area = create(&engine, "round", 10);
        assert_eq!(engine.info(area).unwrap().size, page_size());
    }

    #[test]
    fn test_zero_size_rejected() {
        let engine = engine();
        let result = engine.create(1, "zero", AddressSpec::Any, 0, LockMode::NoLock, Protection::READ);
        assert_eq!(result, Err(Status::BadValue));
    }

    #[test]
    fn test_clone_sees_writes() {
        let engine = engine();
        let source = create(&engine, "source", 4096);
        let (clone, address) = engine
            .clone_area(2, "clone", AddressSpec::Any, Protection::READ_WRITE, source)
            .unwrap();
        assert_ne!(address, engine.info(source).unwrap().address);

        engine.write(source, 0, b"x").unwrap();
        let mut buf = [0u8; 1];
        engine.read(clone, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"x");
        assert_eq!(engine.info(clone).unwrap().share_count, 2);
    }

    #[test]
    fn test_delete_source_keeps_clone() {
        let engine = engine();
        let source = create(&engine, "source", 4096);
        engine.write(source, 5, b"kept").unwrap();
        let (clone, _) = engine
            .clone_area(2, "clone", AddressSpec::ClonePreferred, Protection::READ, source)
            .unwrap();
        engine.delete(source).unwrap();

        let mut buf = [0u8; 4];
        engine.read(clone, 5, &mut buf).unwrap();
        assert_eq!(&buf, b"kept");
        assert_eq!(engine.info(source), Err(Status::BadValue));
    }

    #[test]
    fn test_protection_enforced_by_accessors() {
        let engine = engine();
        let area = create(&engine, "prot", 4096);
        engine.set_protection(area, Protection::READ).unwrap();
        assert_eq!(engine.write(area, 0, b"no"), Err(Status::NotAllowed));
        let mut buf = [0u8; 2];
        engine.read(area, 0, &mut buf).unwrap();
    }

    #[test]
    fn test_accessor_bounds() {
        let engine = engine();
        let area = create(&engine, "bounds", 4096);
        let size = engine.info(area).unwrap().size;
        let mut buf = [0u8; 8];
        assert_eq!(engine.read(area, size - 4, &mut buf), Err(Status::BadValue));
        assert_eq!(engine.write(area, usize::MAX, b"x"), Err(Status::BadValue));
    }

    #[test]
    fn test_resize_keeps_content_and_remaps_clones() {
        let engine = engine();
        let area = create(&engine, "resize", 4096);
        let (clone, _) = engine
            .clone_area(1, "resize clone", AddressSpec::Any, Protection::READ_WRITE, area)
            .unwrap();
        engine.write(area, 0, b"abc").unwrap();

        let grown = 3 * page_size();
        engine.resize(area, grown).unwrap();
        assert_eq!(engine.info(area).unwrap().size, grown);
        assert_eq!(engine.info(clone).unwrap().size, grown);

        engine.write(clone, grown - 1, b"z").unwrap();
        let mut buf = [0u8; 3];
        engine.read(area, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"abc");

        engine.resize(area, 1).unwrap();
        assert_eq!(engine.info(clone).unwrap().size, page_size());
    }

    #[test]
    fn test_refused_shrink_still_resizes() {
        let engine = engine();
        let area = create(&engine, "sealed", 4096);
        let grown = 2 * page_size();
        engine.resize(area, grown).unwrap();
        engine.write(area, 0, b"kept").unwrap();

        let store = engine.table.with(area, |entry| entry.store.clone()).unwrap();
        store.forbid_shrink().unwrap();
        assert_eq!(engine.resize(area, 1), Ok(()));
        assert_eq!(engine.info(area).unwrap().size, page_size());
        assert_eq!(store.size(), page_size());

        let mut buf = [0u8; 4];
        engine.read(area, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"kept");

        engine.resize(area, grown).unwrap();
        assert_eq!(engine.info(area).unwrap().size, grown);
    }

    #[test]
    fn test_find_and_area_for() {
        let engine = engine();
        let area = create(&engine, "lookup", 4096);
        let address = engine.info(area).unwrap().address;
        assert_eq!(engine.find("lookup"), Ok(area));
        assert_eq!(engine.find("missing"), Err(Status::EntryNotFound));
        assert_eq!(engine.area_for(1, address + 100), Ok(area));
        assert_eq!(engine.area_for(2, address + 100), Err(Status::EntryNotFound));
    }

    #[test]
    fn test_exhaustion_leaves_no_mapping() {
        let engine = AreaEngine::new(1);
        create(&engine, "only", 4096);
        let result = engine.create(1, "more", AddressSpec::Any, 4096, LockMode::NoLock, Protection::READ);
        assert_eq!(result, Err(Status::NoMemory));
        assert_eq!(engine.len(), 1);
    }
}
