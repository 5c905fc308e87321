mod acceleration_structure;
mod builder;

pub use acceleration_structure::*;
pub use builder::*;

use ash::{extensions::khr::AccelerationStructure as AshAccelerationStructure, vk};

use crate::{device::Device, instance::Instance, physical_device::PhysicalDevice};

pub struct RayTracingContext {
    pub acceleration_structure_properties: vk::PhysicalDeviceAccelerationStructurePropertiesKHR,
    pub acceleration_structure_fn: AshAccelerationStructure,
}

impl RayTracingContext {
    pub(crate) fn new(instance: &Instance, pdevice: &PhysicalDevice, device: &Device) -> Self {
        let acceleration_structure_properties =
            unsafe { AshAccelerationStructure::get_properties(&instance.inner, pdevice.inner) };
        let acceleration_structure_fn =
            AshAccelerationStructure::new(&instance.inner, &device.inner);

        Self {
            acceleration_structure_properties,
            acceleration_structure_fn,
        }
    }

    pub fn scratch_alignment(&self) -> u64 {
        u64::from(
            self.acceleration_structure_properties
                .min_acceleration_structure_scratch_offset_alignment,
        )
        .max(1)
    }
}
