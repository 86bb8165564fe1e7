//! Pure, deterministic logic with no I/O.

pub mod decode;
pub mod fault;
pub mod types;
