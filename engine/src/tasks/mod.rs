//! Task engines. Each protocol is a configuration of the generic CPT engine.

pub mod cpt;
