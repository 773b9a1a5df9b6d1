// Portal protocol layers: cipher, form extraction, transport and result detection.

pub mod core;
pub mod detectors;
