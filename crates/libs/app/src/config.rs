use std::path::PathBuf;

use anyhow::Result;
use vulkan::{ash::vk, Error};

use crate::DispatchGrid;

/// Image size the compute shaders are compiled for.
pub const SHADER_RESOLUTION: [u32; 2] = [800, 600];
/// `local_size_x` and `local_size_y` of the compute shaders.
pub const SHADER_WORKGROUP_SIZE: [u32; 2] = [16, 8];

/// Compiled-in parameters of a render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    /// Local size of the compute shader in x and y.
    pub workgroup_size: [u32; 2],
    pub output_path: PathBuf,
    /// Value the output is filled with before the dispatch, if any.
    pub clear: Option<f32>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: SHADER_RESOLUTION[0],
            height: SHADER_RESOLUTION[1],
            workgroup_size: SHADER_WORKGROUP_SIZE,
            output_path: PathBuf::from("out.hdr"),
            clear: None,
        }
    }
}

impl RenderConfig {
    /// Rejects sizes the shaders were not compiled for: the output buffer is
    /// sized from the config while the shaders index it with their own
    /// constants.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Configuration(format!(
                "image size {}x{} is empty",
                self.width, self.height
            ))
            .into());
        }
        if self.workgroup_size.contains(&0) {
            return Err(Error::Configuration(format!(
                "workgroup size {:?} is empty",
                self.workgroup_size
            ))
            .into());
        }
        if [self.width, self.height] != SHADER_RESOLUTION {
            return Err(Error::Configuration(format!(
                "image size {}x{} differs from the shader resolution {}x{}",
                self.width, self.height, SHADER_RESOLUTION[0], SHADER_RESOLUTION[1]
            ))
            .into());
        }
        if self.workgroup_size != SHADER_WORKGROUP_SIZE {
            return Err(Error::Configuration(format!(
                "workgroup size {:?} differs from the shader local size {:?}",
                self.workgroup_size, SHADER_WORKGROUP_SIZE
            ))
            .into());
        }

        Ok(())
    }

    /// Number of f32 components in the output image.
    pub fn component_count(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    pub fn output_size(&self) -> vk::DeviceSize {
        (self.component_count() * std::mem::size_of::<f32>()) as _
    }

    pub fn grid(&self) -> DispatchGrid {
        DispatchGrid::covering(
            self.width,
            self.height,
            self.workgroup_size[0],
            self.workgroup_size[1],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_the_renderer() {
        let config = RenderConfig::default();

        assert_eq!((config.width, config.height), (800, 600));
        assert_eq!(config.workgroup_size, [16, 8]);
        assert_eq!(config.output_path, PathBuf::from("out.hdr"));
        assert_eq!(config.output_size(), 800 * 600 * 3 * 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_grid_covers_the_image_exactly() {
        let grid = RenderConfig::default().grid();
        assert_eq!((grid.x, grid.y, grid.z), (50, 75, 1));
    }

    #[test]
    fn empty_sizes_are_configuration_errors() {
        let config = RenderConfig {
            workgroup_size: [16, 0],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Configuration(_))
        ));

        let config = RenderConfig {
            height: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    fn is_configuration_error(config: RenderConfig) -> bool {
        matches!(
            config.validate().unwrap_err().downcast_ref::<Error>(),
            Some(Error::Configuration(_))
        )
    }

    #[test]
    fn smaller_image_than_the_shader_is_rejected() {
        let config = RenderConfig {
            width: 400,
            height: 300,
            ..Default::default()
        };
        assert!(config.component_count() < 800 * 600 * 3);
        assert!(is_configuration_error(config));
    }

    #[test]
    fn larger_image_than_the_shader_is_rejected() {
        assert!(is_configuration_error(RenderConfig {
            width: 1920,
            ..Default::default()
        }));
    }

    #[test]
    fn foreign_workgroup_size_is_rejected() {
        assert!(is_configuration_error(RenderConfig {
            workgroup_size: [8, 8],
            ..Default::default()
        }));
    }

    #[test]
    fn clear_and_output_path_are_free_to_change() {
        let config = RenderConfig {
            output_path: PathBuf::from("render.hdr"),
            clear: Some(0.5),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
