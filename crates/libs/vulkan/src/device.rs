use std::{ffi::CString, sync::Arc};

use anyhow::Result;
use ash::{vk, Device as AshDevice};

use crate::{
    instance::Instance,
    physical_device::PhysicalDevice,
    queue::{Queue, QueueFamily},
};

pub struct Device {
    pub inner: AshDevice,
}

impl Device {
    pub(crate) fn new(
        instance: &Instance,
        physical_device: &PhysicalDevice,
        queue_family: QueueFamily,
        required_extensions: &[&str],
        device_features: &DeviceFeatures,
    ) -> Result<Self> {
        let queue_priorities = [1.0f32];

        let queue_create_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family.index)
            .queue_priorities(&queue_priorities)
            .build()];

        let device_extensions_ptrs = required_extensions
            .iter()
            .map(|e| CString::new(*e))
            .collect::<Result<Vec<_>, _>>()?;
        let device_extensions_ptrs = device_extensions_ptrs
            .iter()
            .map(|e| e.as_ptr())
            .collect::<Vec<_>>();

        let mut acceleration_struct_feature =
            vk::PhysicalDeviceAccelerationStructureFeaturesKHR::builder()
                .acceleration_structure(device_features.acceleration_structure);
        let mut ray_query_feature =
            vk::PhysicalDeviceRayQueryFeaturesKHR::builder().ray_query(device_features.ray_query);
        let mut vulkan_12_features = vk::PhysicalDeviceVulkan12Features::builder()
            .buffer_device_address(device_features.buffer_device_address);
        let mut vulkan_13_features = vk::PhysicalDeviceVulkan13Features::builder()
            .synchronization2(device_features.synchronization2);

        let mut features = vk::PhysicalDeviceFeatures2::builder()
            .push_next(&mut acceleration_struct_feature)
            .push_next(&mut ray_query_feature)
            .push_next(&mut vulkan_12_features)
            .push_next(&mut vulkan_13_features);

        let device_create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&device_extensions_ptrs)
            .push_next(&mut features);

        let inner = unsafe {
            instance
                .inner
                .create_device(physical_device.inner, &device_create_info, None)?
        };

        Ok(Self { inner })
    }

    pub fn get_queue(self: &Arc<Self>, queue_family: QueueFamily, queue_index: u32) -> Queue {
        let inner = unsafe { self.inner.get_device_queue(queue_family.index, queue_index) };
        Queue::new(self.clone(), inner)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            self.inner.destroy_device(None);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceFeatures {
    pub acceleration_structure: bool,
    pub ray_query: bool,
    pub buffer_device_address: bool,
    pub synchronization2: bool,
}

impl DeviceFeatures {
    pub fn is_compatible_with(&self, requirements: &Self) -> bool {
        self.missing(requirements).is_empty()
    }

    /// Names of the features in `requirements` this set does not provide.
    pub fn missing(&self, requirements: &Self) -> Vec<&'static str> {
        [
            (
                "accelerationStructure",
                requirements.acceleration_structure,
                self.acceleration_structure,
            ),
            ("rayQuery", requirements.ray_query, self.ray_query),
            (
                "bufferDeviceAddress",
                requirements.buffer_device_address,
                self.buffer_device_address,
            ),
            (
                "synchronization2",
                requirements.synchronization2,
                self.synchronization2,
            ),
        ]
        .into_iter()
        .filter(|(_, required, supported)| *required && !*supported)
        .map(|(name, _, _)| name)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAY_QUERY: DeviceFeatures = DeviceFeatures {
        acceleration_structure: true,
        ray_query: true,
        buffer_device_address: true,
        synchronization2: true,
    };

    #[test]
    fn full_support_is_compatible() {
        assert!(RAY_QUERY.is_compatible_with(&RAY_QUERY));
        assert!(RAY_QUERY.is_compatible_with(&DeviceFeatures::default()));
    }

    #[test]
    fn missing_features_are_named() {
        let supported = DeviceFeatures {
            ray_query: false,
            synchronization2: false,
            ..RAY_QUERY
        };

        assert!(!supported.is_compatible_with(&RAY_QUERY));
        assert_eq!(
            supported.missing(&RAY_QUERY),
            vec!["rayQuery", "synchronization2"]
        );
    }

    #[test]
    fn unrequested_features_are_ignored() {
        let requirements = DeviceFeatures {
            buffer_device_address: true,
            ..Default::default()
        };
        let supported = DeviceFeatures {
            buffer_device_address: true,
            ..Default::default()
        };

        assert!(supported.missing(&requirements).is_empty());
    }
}
