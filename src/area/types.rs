/*!
 * Area Types
 */

use crate::core::errors::{KernelResult, Status};
use crate::core::name::ObjectName;
use crate::core::types::{Address, AreaId, Size, TeamId};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::backing::{BackingStore, Mapping};

bitflags! {
    /// Access rights of a mapping
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Protection: u32 {
        const READ = 0x01;
        const WRITE = 0x02;
        const EXEC = 0x04;
    }
}

impl Protection {
    pub const READ_WRITE: Protection = Protection::READ.union(Protection::WRITE);
}

/// Requested locking behaviour; recorded only, the host pages on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    NoLock,
    LazyLock,
    FullLock,
    Contiguous,
}

impl LockMode {
    pub fn from_legacy(value: u32) -> KernelResult<Self> {
        match value {
            0 => Ok(LockMode::NoLock),
            1 => Ok(LockMode::LazyLock),
            2 => Ok(LockMode::FullLock),
            3 => Ok(LockMode::Contiguous),
            _ => Err(Status::BadValue),
        }
    }
}

/// Where a new mapping should be placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressSpec {
    /// Anywhere the host likes
    Any,
    /// Exactly at the address, or fail with `NoMemory`
    Exact(Address),
    /// At the address if possible
    Base(Address),
    /// Near the source area's address (clones only)
    ClonePreferred,
}

impl AddressSpec {
    /// Decode a legacy `(address_spec, address)` pair
    pub fn from_legacy(spec: u32, address: Address) -> KernelResult<Self> {
        match spec {
            0 | 4 => Ok(AddressSpec::Any),
            1 => Ok(AddressSpec::Exact(address)),
            2 => Ok(AddressSpec::Base(address)),
            3 => Ok(AddressSpec::ClonePreferred),
            _ => Err(Status::BadValue),
        }
    }
}

/// Snapshot of an area
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaInfo {
    pub area: AreaId,
    pub name: String,
    pub team: TeamId,
    pub address: Address,
    pub size: Size,
    /// `Protection` bits
    pub protection: u32,
    pub lock: LockMode,
    /// Areas (this one included) mapping the same backing store
    pub share_count: usize,
}

pub(crate) struct AreaEntry {
    pub owner: TeamId,
    pub name: ObjectName,
    pub store: Arc<BackingStore>,
    pub mapping: Mapping,
    pub protection: Protection,
    pub lock: LockMode,
}

impl AreaEntry {
    #[inline]
    pub fn size(&self) -> Size {
        self.mapping.len()
    }

    #[inline]
    pub fn address(&self) -> Address {
        self.mapping.address()
    }

    pub fn contains(&self, address: Address) -> bool {
        address >= self.address() && address - self.address() < self.size()
    }

    pub fn info(&self, area: AreaId) -> AreaInfo {
        AreaInfo {
            area,
            name: self.name.to_string(),
            team: self.owner,
            address: self.address(),
            size: self.size(),
            protection: self.protection.bits(),
            lock: self.lock,
            // One count is held by the entry itself
            share_count: Arc::strong_count(&self.store),
        }
    }

    /// Bounds check for an accessor touching `len` bytes at `offset`
    pub fn check_range(&self, offset: usize, len: usize) -> KernelResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size() => Ok(()),
            _ => Err(Status::BadValue),
        }
    }
}
