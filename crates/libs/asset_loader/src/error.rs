use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Failed to load obj file: {0}")]
    Load(String),
    #[error("Obj file contains no shapes")]
    NoShapes,
    #[error("Obj file contains {0} shapes, expected exactly one")]
    MultipleShapes(usize),
    #[error("Invalid mesh: {0}")]
    InvalidMesh(String),
}
