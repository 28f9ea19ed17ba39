pub mod catalog;
pub mod size;

pub use catalog::{FileEntry, FileSpec, FileWarning, MalformedFile, PresetCatalog, PresetEntry};
pub use size::{format_bytes, parse_size_string, SizeSpec};
