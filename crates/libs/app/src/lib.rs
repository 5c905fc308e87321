pub use anyhow;
pub use vulkan;

pub mod config;
pub mod dispatch;
pub mod readback;

use anyhow::Result;
pub use config::{RenderConfig, SHADER_RESOLUTION, SHADER_WORKGROUP_SIZE};
pub use dispatch::{clear_for_readback, Clear, Dispatch, DispatchGrid};
pub use readback::{read_image, read_output, write_hdr};
pub use resource_manager::load_spv;

use std::marker::PhantomData;
use std::sync::Arc;
use vulkan::ash::vk;
use vulkan::*;

pub const REQUIRED_EXTENSIONS: [&str; 3] = [
    "VK_KHR_acceleration_structure",
    "VK_KHR_ray_query",
    "VK_KHR_deferred_host_operations",
];

pub const REQUIRED_DEVICE_FEATURES: DeviceFeatures = DeviceFeatures {
    acceleration_structure: true,
    ray_query: true,
    buffer_device_address: true,
    synchronization2: true,
};

/// Headless Vulkan 1.3 context able to build acceleration structures and
/// trace ray queries from compute shaders.
pub fn create_context(app_name: &str) -> Result<Arc<Context>> {
    let context = ContextBuilder::new()
        .vulkan_version(VERSION_1_3)
        .app_name(app_name)
        .required_extensions(&REQUIRED_EXTENSIONS)
        .required_device_features(REQUIRED_DEVICE_FEATURES)
        .build()?;

    Ok(Arc::new(context))
}

/// Device state shared by every render: the context, the buffer arena and
/// the host-readable output image.
pub struct BaseApp<B: App> {
    phantom: PhantomData<B>,
    pub config: RenderConfig,
    pub output_buffer: BufferHandle,
    pub allocator: ResourceAllocator,
    pub context: Arc<Context>,
}

pub trait App: Sized {
    fn new(base: &mut BaseApp<Self>) -> Result<Self>;

    /// Runs the compute pass writing the output buffer. Must return only once
    /// the writes are visible to the host.
    fn render(&mut self, base: &mut BaseApp<Self>) -> Result<()>;

    /// Releases the buffers the app created in the base allocator.
    fn destroy(self, base: &mut BaseApp<Self>) -> Result<()> {
        let _ = base;

        Ok(())
    }
}

impl<B: App> BaseApp<B> {
    pub fn new(app_name: &str, config: RenderConfig) -> Result<Self> {
        log::info!("Create application: {}", app_name);
        config.validate()?;

        let context = create_context(app_name)?;
        let mut allocator = ResourceAllocator::new(context.clone());

        let output_buffer = allocator.create_buffer(
            config.output_size(),
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryClass::HostReadback,
        )?;

        Ok(Self {
            phantom: PhantomData,
            config,
            output_buffer,
            allocator,
            context,
        })
    }

    pub fn output(&self) -> Result<&Buffer> {
        self.allocator.get(self.output_buffer)
    }

    /// Output fill requested by the config, to be recorded before the pass.
    pub fn clear(&self) -> Result<Option<Clear<'_>>> {
        self.config
            .clear
            .map(|value| {
                Ok(Clear {
                    buffer: self.output()?,
                    value,
                })
            })
            .transpose()
    }

    pub fn read_output(&mut self) -> Result<Vec<f32>> {
        read_output(&mut self.allocator, self.output_buffer)
    }

    pub fn wait_for_gpu(&self) -> Result<()> {
        self.context.device_wait_idle()
    }
}

/// Creates the app, renders once and returns the output image.
pub fn render<A: App>(app_name: &str, config: RenderConfig) -> Result<Vec<f32>> {
    let mut base_app = BaseApp::<A>::new(app_name, config)?;
    let mut app = A::new(&mut base_app)?;

    let rendered = app.render(&mut base_app);
    let pixels = rendered.and_then(|_| base_app.read_output());

    app.destroy(&mut base_app)?;
    base_app.allocator.destroy(base_app.output_buffer)?;
    base_app.wait_for_gpu()?;

    pixels
}

/// Renders once and writes the image to the configured output path.
pub fn run<A: App>(app_name: &str, config: RenderConfig) -> Result<()> {
    if pretty_env_logger::try_init().is_err() {
        log::debug!("Logger already initialized");
    }

    let (width, height) = (config.width, config.height);
    let output_path = config.output_path.clone();
    let pixels = render::<A>(app_name, config)?;

    write_hdr(output_path, width, height, &pixels)
}
