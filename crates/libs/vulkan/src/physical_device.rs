use std::ffi::CStr;

use anyhow::Result;
use ash::{vk, Instance};

use crate::{device::DeviceFeatures, queue::QueueFamily};

// Vertex formats worth probing for acceleration structure builds.
const AS_VERTEX_FORMAT_CANDIDATES: [vk::Format; 6] = [
    vk::Format::R32G32B32_SFLOAT,
    vk::Format::R32G32_SFLOAT,
    vk::Format::R16G16B16A16_SFLOAT,
    vk::Format::R16G16_SFLOAT,
    vk::Format::R16G16B16A16_SNORM,
    vk::Format::R16G16_SNORM,
];

#[derive(Debug, Clone)]
pub struct PhysicalDevice {
    pub(crate) inner: vk::PhysicalDevice,
    pub(crate) name: String,
    pub(crate) device_type: vk::PhysicalDeviceType,
    pub(crate) limits: vk::PhysicalDeviceLimits,
    pub(crate) queue_families: Vec<QueueFamily>,
    pub(crate) supported_extensions: Vec<String>,
    pub(crate) supported_device_features: DeviceFeatures,
    pub(crate) acceleration_structure_vertex_formats: Vec<vk::Format>,
}

impl PhysicalDevice {
    pub(crate) fn new(instance: &Instance, inner: vk::PhysicalDevice) -> Result<Self> {
        let props = unsafe { instance.get_physical_device_properties(inner) };

        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let device_type = props.device_type;
        let limits = props.limits;

        let queue_family_properties =
            unsafe { instance.get_physical_device_queue_family_properties(inner) };
        let queue_families = queue_family_properties
            .into_iter()
            .enumerate()
            .map(|(index, p)| QueueFamily::new(index as _, p))
            .collect();

        let extension_properties =
            unsafe { instance.enumerate_device_extension_properties(inner)? };
        let supported_extensions = extension_properties
            .into_iter()
            .map(|p| {
                let name = unsafe { CStr::from_ptr(p.extension_name.as_ptr()) };
                name.to_string_lossy().into_owned()
            })
            .collect();

        let mut acceleration_struct_feature =
            vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
        let mut ray_query_feature = vk::PhysicalDeviceRayQueryFeaturesKHR::default();
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut features = vk::PhysicalDeviceFeatures2::builder()
            .push_next(&mut acceleration_struct_feature)
            .push_next(&mut ray_query_feature)
            .push_next(&mut features12)
            .push_next(&mut features13);
        unsafe { instance.get_physical_device_features2(inner, &mut features) };

        let supported_device_features = DeviceFeatures {
            acceleration_structure: acceleration_struct_feature.acceleration_structure == vk::TRUE,
            ray_query: ray_query_feature.ray_query == vk::TRUE,
            buffer_device_address: features12.buffer_device_address == vk::TRUE,
            synchronization2: features13.synchronization2 == vk::TRUE,
        };

        let acceleration_structure_vertex_formats = AS_VERTEX_FORMAT_CANDIDATES
            .into_iter()
            .filter(|format| {
                let props =
                    unsafe { instance.get_physical_device_format_properties(inner, *format) };
                props
                    .buffer_features
                    .contains(vk::FormatFeatureFlags::ACCELERATION_STRUCTURE_VERTEX_BUFFER_KHR)
            })
            .collect();

        Ok(Self {
            inner,
            name,
            device_type,
            limits,
            queue_families,
            supported_extensions,
            supported_device_features,
            acceleration_structure_vertex_formats,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.limits
    }

    pub fn supports_extensions(&self, extensions: &[&str]) -> bool {
        self.missing_extensions(extensions).is_empty()
    }

    pub fn missing_extensions<'a>(&self, extensions: &[&'a str]) -> Vec<&'a str> {
        extensions
            .iter()
            .copied()
            .filter(|e| !self.supported_extensions.iter().any(|s| s == e))
            .collect()
    }

    pub fn supports_acceleration_structure_vertex_format(&self, format: vk::Format) -> bool {
        self.acceleration_structure_vertex_formats.contains(&format)
    }
}
