use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use ash::vk;

use crate::{
    AccelerationStructure, Buffer, Context, DescriptorPool, DescriptorSet, DescriptorSetLayout,
    Error, WriteDescriptorSet, WriteDescriptorSetKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingType {
    StorageBuffer,
    AccelerationStructure,
}

impl BindingType {
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            Self::AccelerationStructure => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
        }
    }
}

/// A resource written into a binding slot.
#[derive(Clone, Copy)]
pub enum BoundResource<'a> {
    StorageBuffer(&'a Buffer),
    AccelerationStructure(&'a AccelerationStructure),
}

impl BoundResource<'_> {
    pub fn binding_type(&self) -> BindingType {
        match self {
            Self::StorageBuffer(_) => BindingType::StorageBuffer,
            Self::AccelerationStructure(_) => BindingType::AccelerationStructure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotDeclaration {
    ty: BindingType,
    stages: vk::ShaderStageFlags,
}

/// Slot declarations of a single descriptor set. Consumed by
/// [`BindingLayout::finalize`].
#[derive(Debug, Default, Clone)]
pub struct BindingLayout {
    slots: BTreeMap<u32, SlotDeclaration>,
}

impl BindingLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_binding(
        &mut self,
        slot: u32,
        ty: BindingType,
        stages: vk::ShaderStageFlags,
    ) -> Result<&mut Self> {
        if self.slots.contains_key(&slot) {
            return Err(Error::DuplicateSlot(slot).into());
        }
        self.slots.insert(slot, SlotDeclaration { ty, stages });

        Ok(self)
    }

    pub fn binding_type(&self, slot: u32) -> Option<BindingType> {
        self.slots.get(&slot).map(|s| s.ty)
    }

    pub fn check_write(&self, slot: u32, written: BindingType) -> Result<()> {
        let declared = self.binding_type(slot).ok_or(Error::UnknownSlot(slot))?;
        if declared != written {
            return Err(Error::SlotTypeMismatch {
                slot,
                declared,
                written,
            }
            .into());
        }

        Ok(())
    }

    /// Checks a batch of writes, each slot named at most once.
    pub fn check_writes(&self, writes: &[(u32, BindingType)]) -> Result<()> {
        let mut seen = BTreeSet::new();
        for &(slot, written) in writes {
            if !seen.insert(slot) {
                return Err(Error::DuplicateSlot(slot).into());
            }
            self.check_write(slot, written)?;
        }

        Ok(())
    }

    pub fn first_unwritten(&self, written: &BTreeSet<u32>) -> Option<u32> {
        self.slots.keys().copied().find(|slot| !written.contains(slot))
    }

    pub fn pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        let mut counts = BTreeMap::<i32, u32>::new();
        for declaration in self.slots.values() {
            *counts
                .entry(declaration.ty.descriptor_type().as_raw())
                .or_default() += 1;
        }

        counts
            .into_iter()
            .map(|(ty, descriptor_count)| vk::DescriptorPoolSize {
                ty: vk::DescriptorType::from_raw(ty),
                descriptor_count,
            })
            .collect()
    }

    fn layout_bindings(&self) -> Vec<vk::DescriptorSetLayoutBinding> {
        self.slots
            .iter()
            .map(|(slot, declaration)| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(*slot)
                    .descriptor_type(declaration.ty.descriptor_type())
                    .descriptor_count(1)
                    .stage_flags(declaration.stages)
                    .build()
            })
            .collect()
    }

    /// Creates the descriptor set layout, a pool holding exactly one set and
    /// that set.
    pub fn finalize(self, context: &Context) -> Result<ResourceBinder> {
        let descriptor_set_layout = context.create_descriptor_set_layout(&self.layout_bindings())?;
        let pool = context.create_descriptor_pool(1, &self.pool_sizes())?;
        let set = pool.allocate_set(&descriptor_set_layout)?;

        Ok(ResourceBinder {
            layout: self,
            written: BTreeSet::new(),
            set,
            _pool: pool,
            descriptor_set_layout,
        })
    }
}

/// The single descriptor set of a compute pass plus the slots written so far.
pub struct ResourceBinder {
    layout: BindingLayout,
    written: BTreeSet<u32>,
    pub set: DescriptorSet,
    _pool: DescriptorPool,
    pub descriptor_set_layout: DescriptorSetLayout,
}

impl ResourceBinder {
    pub fn write(&mut self, slot: u32, resource: BoundResource) -> Result<()> {
        self.write_all(&[(slot, resource)])
    }

    /// Checks every write, then issues them as one descriptor update.
    pub fn write_all(&mut self, writes: &[(u32, BoundResource)]) -> Result<()> {
        let kinds = writes
            .iter()
            .map(|(slot, resource)| (*slot, resource.binding_type()))
            .collect::<Vec<_>>();
        self.layout.check_writes(&kinds)?;
        for (_, resource) in writes {
            if let BoundResource::StorageBuffer(buffer) = resource {
                buffer.ensure_usage(vk::BufferUsageFlags::STORAGE_BUFFER)?;
            }
        }

        let descriptor_writes = writes
            .iter()
            .map(|(slot, resource)| WriteDescriptorSet {
                binding: *slot,
                kind: match *resource {
                    BoundResource::StorageBuffer(buffer) => {
                        WriteDescriptorSetKind::StorageBuffer { buffer }
                    }
                    BoundResource::AccelerationStructure(acceleration_structure) => {
                        WriteDescriptorSetKind::AccelerationStructure {
                            acceleration_structure,
                        }
                    }
                },
            })
            .collect::<Vec<_>>();
        self.set.update(&descriptor_writes);

        self.written.extend(writes.iter().map(|(slot, _)| *slot));

        Ok(())
    }

    pub fn ensure_complete(&self) -> Result<()> {
        match self.layout.first_unwritten(&self.written) {
            Some(slot) => Err(Error::UnwrittenSlot(slot).into()),
            None => Ok(()),
        }
    }

    /// Forgets the write to `slot`, e.g. after the resource bound there was
    /// rebuilt. The slot must be written again before the next dispatch.
    pub fn mark_stale(&mut self, slot: u32) -> Result<()> {
        if self.layout.binding_type(slot).is_none() {
            return Err(Error::UnknownSlot(slot).into());
        }
        self.written.remove(&slot);

        Ok(())
    }
}
