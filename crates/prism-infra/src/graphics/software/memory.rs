// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Resource storage and the GPU virtual address space of the software device.

use prism_core::math::align_up;
use prism_core::renderer::api::{
    GpuVirtualAddress, HeapType, ResourceDimension, ResourceId, ResourceState,
};
use prism_core::renderer::ResourceError;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// First address handed out. Keeps zero free for the null address.
const ADDRESS_SPACE_BASE: u64 = 0x0000_0001_0000_0000;
/// Buffers are placed on 64 KiB boundaries, like committed D3D12 resources.
pub const PLACEMENT_ALIGNMENT: u64 = 64 * 1024;

#[derive(Debug)]
pub(crate) struct ResourceEntry {
    pub label: String,
    pub dimension: ResourceDimension,
    pub heap: HeapType,
    pub allow_unordered_access: bool,
    /// Buffers only.
    pub address: Option<GpuVirtualAddress>,
    /// State on the GPU timeline, updated when the queue executes barriers.
    pub state: ResourceState,
    pub data: Arc<RwLock<Vec<u8>>>,
}

impl ResourceEntry {
    pub fn size(&self) -> u64 {
        match self.dimension {
            ResourceDimension::Buffer { size } => size,
            ResourceDimension::Texture2D {
                width,
                height,
                format,
            } => u64::from(width) * u64::from(height) * u64::from(format.bytes_per_pixel()),
        }
    }
}

/// A resolved GPU address: the buffer it falls in and the offset inside it.
#[derive(Debug, Clone)]
pub(crate) struct AddressTarget {
    pub id: ResourceId,
    pub offset: u64,
    pub size: u64,
    pub state: ResourceState,
    pub data: Arc<RwLock<Vec<u8>>>,
}

impl AddressTarget {
    pub fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.offset)
    }
}

#[derive(Debug)]
pub(crate) struct ResourceTable {
    entries: HashMap<ResourceId, ResourceEntry>,
    /// Base address -> buffer, for range lookups.
    address_map: BTreeMap<u64, ResourceId>,
    next_address: u64,
    allocated_bytes: u64,
    budget_bytes: u64,
}

impl ResourceTable {
    pub fn new(budget_bytes: u64) -> Self {
        Self {
            entries: HashMap::new(),
            address_map: BTreeMap::new(),
            next_address: ADDRESS_SPACE_BASE,
            allocated_bytes: 0,
            budget_bytes,
        }
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes
    }

    /// Commits memory for a new resource and maps buffers into the address space.
    pub fn insert(
        &mut self,
        id: ResourceId,
        label: String,
        dimension: ResourceDimension,
        heap: HeapType,
        initial_state: ResourceState,
        allow_unordered_access: bool,
    ) -> Result<(), ResourceError> {
        let mut entry = ResourceEntry {
            label,
            dimension,
            heap,
            allow_unordered_access,
            address: None,
            state: initial_state,
            data: Arc::new(RwLock::new(Vec::new())),
        };
        let size = entry.size();
        let available = self.budget_bytes.saturating_sub(self.allocated_bytes);
        if size > available {
            return Err(ResourceError::AllocationFailure {
                label: entry.label,
                size,
                available,
            });
        }

        entry.data = Arc::new(RwLock::new(vec![0u8; size as usize]));
        if let ResourceDimension::Buffer { .. } = dimension {
            let base = self.next_address;
            self.next_address = base + align_up(size, PLACEMENT_ALIGNMENT);
            self.address_map.insert(base, id);
            entry.address = Some(GpuVirtualAddress(base));
        }
        self.allocated_bytes += size;
        self.entries.insert(id, entry);
        Ok(())
    }

    pub fn remove(&mut self, id: ResourceId) -> Result<ResourceEntry, ResourceError> {
        let entry = self
            .entries
            .remove(&id)
            .ok_or(ResourceError::InvalidHandle(id))?;
        if let Some(address) = entry.address {
            self.address_map.remove(&address.0);
        }
        self.allocated_bytes = self.allocated_bytes.saturating_sub(entry.size());
        Ok(entry)
    }

    pub fn get(&self, id: ResourceId) -> Result<&ResourceEntry, ResourceError> {
        self.entries.get(&id).ok_or(ResourceError::InvalidHandle(id))
    }

    pub fn get_mut(&mut self, id: ResourceId) -> Result<&mut ResourceEntry, ResourceError> {
        self.entries
            .get_mut(&id)
            .ok_or(ResourceError::InvalidHandle(id))
    }

    /// Finds the live buffer containing `address`.
    pub fn resolve(&self, address: GpuVirtualAddress) -> Result<AddressTarget, ResourceError> {
        let (base, id) = self
            .address_map
            .range(..=address.0)
            .next_back()
            .ok_or(ResourceError::InvalidAddress(address))?;
        let entry = self.get(*id)?;
        let offset = address.0 - base;
        let size = entry.size();
        if offset >= size {
            return Err(ResourceError::InvalidAddress(address));
        }
        Ok(AddressTarget {
            id: *id,
            offset,
            size,
            state: entry.state,
            data: Arc::clone(&entry.data),
        })
    }

    pub fn ids(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.entries.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(table: &mut ResourceTable, id: usize, size: u64) {
        table
            .insert(
                ResourceId(id),
                format!("buffer {id}"),
                ResourceDimension::Buffer { size },
                HeapType::Upload,
                ResourceState::GenericRead,
                false,
            )
            .unwrap();
    }

    #[test]
    fn addresses_resolve_to_owning_buffer() {
        let mut table = ResourceTable::new(u64::MAX);
        buffer(&mut table, 0, 100);
        buffer(&mut table, 1, 100);

        let b0 = table.get(ResourceId(0)).unwrap().address.unwrap();
        let b1 = table.get(ResourceId(1)).unwrap().address.unwrap();
        assert_eq!(b0.0 % PLACEMENT_ALIGNMENT, 0);
        assert_eq!(b1.0 - b0.0, PLACEMENT_ALIGNMENT);

        let target = table.resolve(b1.offset(40)).unwrap();
        assert_eq!(target.id, ResourceId(1));
        assert_eq!(target.offset, 40);
        assert_eq!(target.remaining(), 60);
    }

    #[test]
    fn address_past_the_end_is_invalid() {
        let mut table = ResourceTable::new(u64::MAX);
        buffer(&mut table, 0, 100);
        let base = table.get(ResourceId(0)).unwrap().address.unwrap();
        assert_eq!(
            table.resolve(base.offset(100)).unwrap_err(),
            ResourceError::InvalidAddress(base.offset(100))
        );
        assert!(table.resolve(GpuVirtualAddress(16)).is_err());
    }

    #[test]
    fn budget_is_enforced_and_released() {
        let mut table = ResourceTable::new(256);
        buffer(&mut table, 0, 200);
        let err = table
            .insert(
                ResourceId(1),
                "too big".into(),
                ResourceDimension::Buffer { size: 100 },
                HeapType::Default,
                ResourceState::Common,
                false,
            )
            .unwrap_err();
        assert!(matches!(err, ResourceError::AllocationFailure { available: 56, .. }));

        table.remove(ResourceId(0)).unwrap();
        assert_eq!(table.allocated_bytes(), 0);
        buffer(&mut table, 1, 100);
    }
}
