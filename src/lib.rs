//! Binary inspection core: whole-file format resolution and embedded
//! artifact carving over sources too large to buffer.

pub mod cache;
pub mod chunk;
pub mod cli;
pub mod config;
pub mod dissect;
pub mod engine;
pub mod evidence;
pub mod extract;
pub mod format;
pub mod logging;
pub mod metadata;
pub mod pattern;
pub mod region;
pub mod util;
