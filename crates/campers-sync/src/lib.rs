pub mod error;
mod mutagen;

pub use error::SyncError;
pub use mutagen::{session_name, MutagenSync, SyncSessionSpec, DEFAULT_INITIAL_WAIT};
