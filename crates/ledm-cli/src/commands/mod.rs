//! Command implementations for ledm-scan

pub mod cancel;
pub mod scan;
pub mod status;

pub use cancel::cancel;
pub use scan::{resolve_output_path, scan, SizePreset};
pub use status::status;
