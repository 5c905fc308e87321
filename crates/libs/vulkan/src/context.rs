use std::sync::{Arc, Mutex};

use anyhow::Result;
use ash::{vk, Entry};
use gpu_allocator::{
    vulkan::{Allocator, AllocatorCreateDesc},
    AllocatorDebugSettings,
};

use crate::{
    device::{Device, DeviceFeatures},
    instance::Instance,
    physical_device::PhysicalDevice,
    queue::{Queue, QueueFamily},
    CommandBuffer, CommandPool, Error, RayTracingContext, Version, VERSION_1_3,
};

/// Headless device context: one graphics/compute/transfer queue and the
/// acceleration structure entry points.
pub struct Context {
    pub allocator: Arc<Mutex<Allocator>>,
    pub command_pool: CommandPool,
    pub ray_tracing: Arc<RayTracingContext>,
    pub queue: Queue,
    pub device: Arc<Device>,
    pub queue_family: QueueFamily,
    pub physical_device: PhysicalDevice,
    pub instance: Instance,
    _entry: Entry,
}

pub struct ContextBuilder<'a> {
    vulkan_version: Version,
    app_name: &'a str,
    required_extensions: &'a [&'a str],
    required_device_features: DeviceFeatures,
}

impl<'a> Default for ContextBuilder<'a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> ContextBuilder<'a> {
    pub fn new() -> Self {
        Self {
            vulkan_version: VERSION_1_3,
            app_name: "",
            required_extensions: &[],
            required_device_features: Default::default(),
        }
    }

    pub fn vulkan_version(self, vulkan_version: Version) -> Self {
        Self {
            vulkan_version,
            ..self
        }
    }

    pub fn app_name(self, app_name: &'a str) -> Self {
        Self { app_name, ..self }
    }

    pub fn required_extensions(self, required_extensions: &'a [&str]) -> Self {
        Self {
            required_extensions,
            ..self
        }
    }

    pub fn required_device_features(self, required_device_features: DeviceFeatures) -> Self {
        Self {
            required_device_features,
            ..self
        }
    }

    pub fn build(self) -> Result<Context> {
        Context::new(self)
    }
}

impl Context {
    fn new(
        ContextBuilder {
            vulkan_version,
            app_name,
            required_extensions,
            required_device_features,
        }: ContextBuilder,
    ) -> Result<Self> {
        // Vulkan instance
        let entry = unsafe { Entry::load() }
            .map_err(|e| Error::Configuration(format!("Vulkan loader unavailable: {e}")))?;
        let mut instance = Instance::new(&entry, vulkan_version, app_name)?;

        let physical_devices = instance.enumerate_physical_devices()?;
        let (physical_device, queue_family) = select_suitable_physical_device(
            physical_devices,
            required_extensions,
            &required_device_features,
        )?;
        log::info!("Selected physical device: {:?}", physical_device.name);

        let device = Arc::new(Device::new(
            &instance,
            &physical_device,
            queue_family,
            required_extensions,
            &required_device_features,
        )?);
        let queue = device.get_queue(queue_family, 0);

        let ray_tracing = Arc::new(RayTracingContext::new(
            &instance,
            &physical_device,
            &device,
        ));
        log::debug!(
            "Acceleration structure properties {:#?}",
            ray_tracing.acceleration_structure_properties
        );

        let command_pool = CommandPool::new(
            device.clone(),
            ray_tracing.clone(),
            queue_family,
            Some(vk::CommandPoolCreateFlags::TRANSIENT),
        )?;

        // Gpu allocator
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.inner.clone(),
            device: device.inner.clone(),
            physical_device: physical_device.inner,
            debug_settings: AllocatorDebugSettings {
                log_allocations: true,
                log_frees: true,
                ..Default::default()
            },
            buffer_device_address: required_device_features.buffer_device_address,
        })?;

        Ok(Self {
            allocator: Arc::new(Mutex::new(allocator)),
            command_pool,
            ray_tracing,
            queue,
            device,
            queue_family,
            physical_device,
            instance,
            _entry: entry,
        })
    }
}

fn select_suitable_physical_device(
    devices: &[PhysicalDevice],
    required_extensions: &[&str],
    required_device_features: &DeviceFeatures,
) -> Result<(PhysicalDevice, QueueFamily)> {
    log::debug!("Choosing Vulkan physical device");

    let mut rejections = vec![];

    for device in devices {
        let queue_family = device
            .queue_families
            .iter()
            .find(|family| family.supports_gct())
            .copied();
        let missing_extensions = device.missing_extensions(required_extensions);
        let missing_features = device
            .supported_device_features
            .missing(required_device_features);

        match queue_family {
            Some(family) if missing_extensions.is_empty() && missing_features.is_empty() => {
                return Ok((device.clone(), family));
            }
            _ => {
                let reason = format!(
                    "{}: gct queue: {}, missing extensions: {:?}, missing features: {:?}",
                    device.name,
                    queue_family.is_some(),
                    missing_extensions,
                    missing_features
                );
                log::debug!("Rejected {reason}");
                rejections.push(reason);
            }
        }
    }

    if rejections.is_empty() {
        rejections.push("no Vulkan physical device found".to_string());
    }

    Err(Error::Configuration(rejections.join("; ")).into())
}

impl Context {
    pub fn device_wait_idle(&self) -> Result<()> {
        unsafe { self.device.inner.device_wait_idle()? };

        Ok(())
    }

    /// Records `executor` into a fresh one-time command buffer, submits it and
    /// blocks until the queue finished it.
    pub fn execute_one_time_commands<R, F: FnOnce(&CommandBuffer) -> R>(
        &self,
        executor: F,
    ) -> Result<R> {
        let command_buffer = self
            .command_pool
            .allocate_command_buffer(vk::CommandBufferLevel::PRIMARY)?;

        let executed = self.record_and_submit(&command_buffer, executor);
        self.command_pool.free_command_buffer(&command_buffer);

        executed
    }

    fn record_and_submit<R, F: FnOnce(&CommandBuffer) -> R>(
        &self,
        command_buffer: &CommandBuffer,
        executor: F,
    ) -> Result<R> {
        command_buffer.begin(Some(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT))?;
        let executor_result = executor(command_buffer);
        command_buffer.end()?;

        let fence = self.create_fence(None)?;
        self.queue.submit(command_buffer, &fence)?;
        fence.wait(None)?;

        Ok(executor_result)
    }
}
