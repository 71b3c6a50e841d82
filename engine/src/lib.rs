//! Vigil engine: the timing-critical core of a browser-delivered attention
//! battery.
//!
//! Hosts a generic continuous-performance task engine (letter and shape
//! protocols are two configurations of it), the metrics derived from its
//! trial log, and a heuristic risk interpretation. Rendering, navigation,
//! localization, and persistence are the surrounding application's job; it
//! talks to this crate through [`tasks::cpt::CptSession`] events and the
//! plain read-only structures the engine exposes.

pub mod core;
pub mod tasks;
