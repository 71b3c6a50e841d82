//! Cross-task plumbing shared by every protocol: timing, platform glue,
//! quality-control flags, and the summary record shape.

pub mod platform;
pub mod qc;
pub mod summary;
pub mod timing;
