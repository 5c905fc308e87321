use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use crate::error::{Error, Result};

/// Triangle mesh with flattened `vec3` positions and `u32` triangle indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub positions: Vec<f32>,
    pub indices: Vec<u32>,
}

fn load_options() -> tobj::LoadOptions {
    tobj::LoadOptions {
        triangulate: true,
        ignore_points: true,
        ignore_lines: true,
        ..Default::default()
    }
}

impl Mesh {
    /// Parses an obj document holding exactly one shape. Materials are ignored.
    pub fn from_obj_reader<R: BufRead>(reader: &mut R) -> Result<Self> {
        let (models, _) = tobj::load_obj_buf(reader, &load_options(), |_| {
            Ok(Default::default())
        })
        .map_err(|e| Error::Load(e.to_string()))?;

        let mesh = match models.len() {
            0 => return Err(Error::NoShapes),
            1 => models.into_iter().next().map(|m| m.mesh).ok_or(Error::NoShapes)?,
            n => return Err(Error::MultipleShapes(n)),
        };

        let mesh = Self {
            positions: mesh.positions,
            indices: mesh.indices,
        };
        mesh.validate()?;

        Ok(mesh)
    }

    pub fn validate(&self) -> Result<()> {
        if self.positions.len() % 3 != 0 {
            return Err(Error::InvalidMesh(format!(
                "{} position components is not a whole number of vertices",
                self.positions.len()
            )));
        }
        if self.indices.is_empty() {
            return Err(Error::InvalidMesh("mesh has no triangles".to_string()));
        }
        if self.indices.len() % 3 != 0 {
            return Err(Error::InvalidMesh(format!(
                "{} indices is not a whole number of triangles",
                self.indices.len()
            )));
        }
        let vertex_count = self.vertex_count();
        if let Some(index) = self.indices.iter().find(|&&i| i >= vertex_count) {
            return Err(Error::InvalidMesh(format!(
                "index {index} out of range for {vertex_count} vertices"
            )));
        }

        Ok(())
    }

    pub fn vertex_count(&self) -> u32 {
        (self.positions.len() / 3) as _
    }

    pub fn triangle_count(&self) -> u32 {
        (self.indices.len() / 3) as _
    }

    /// Largest vertex index referenced by the triangles.
    pub fn max_index(&self) -> u32 {
        self.indices.iter().copied().max().unwrap_or_default()
    }
}

/// Loads an obj file found through the model search paths.
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Mesh> {
    let path = resource_manager::load_model(path).map_err(|e| Error::Load(e.to_string()))?;
    let file = File::open(&path).map_err(|e| Error::Load(format!("{}: {e}", path.display())))?;

    let mesh = Mesh::from_obj_reader(&mut BufReader::new(file))?;
    log::info!(
        "Loaded {}: {} vertices, {} triangles",
        path.display(),
        mesh.vertex_count(),
        mesh.triangle_count()
    );

    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Result<Mesh> {
        Mesh::from_obj_reader(&mut source.as_bytes())
    }

    const QUAD: &str = "
o quad
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
f 1 2 3 4
";

    #[test]
    fn quad_is_triangulated() {
        let mesh = parse(QUAD).unwrap();

        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.max_index(), 3);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn empty_file_has_no_shapes() {
        assert!(matches!(parse("# nothing here\n"), Err(Error::NoShapes)));
    }

    #[test]
    fn two_objects_are_rejected() {
        let source = "
o a
v 0 0 0
v 1 0 0
v 0 1 0
f 1 2 3
o b
v 0 0 1
v 1 0 1
v 0 1 1
f 4 5 6
";
        assert!(matches!(parse(source), Err(Error::MultipleShapes(2))));
    }

    #[test]
    fn out_of_range_index_is_invalid() {
        let mesh = Mesh {
            positions: vec![0.0; 9],
            indices: vec![0, 1, 3],
        };

        assert!(matches!(mesh.validate(), Err(Error::InvalidMesh(_))));
    }

    #[test]
    fn partial_triangle_is_invalid() {
        let mesh = Mesh {
            positions: vec![0.0; 9],
            indices: vec![0, 1],
        };

        assert!(matches!(mesh.validate(), Err(Error::InvalidMesh(_))));
    }
}
