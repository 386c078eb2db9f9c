//! # Architecture Port Layer
//!
//! Hardware-specific code lives behind this boundary. Only built for
//! bare-metal ARM targets; the rest of the kernel is portable logic that
//! host tests exercise directly.

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;
