//! Service layer
//!
//! Trait-based services used by the runner: log buffering for node blocks
//! and tool discovery for preflight checks.

mod capabilities;
mod log_buffer;

// Re-export traits
pub use capabilities::CapabilitiesService;
pub use log_buffer::LogBufferService;

// Re-export implementations
pub use capabilities::{StandardCapabilitiesService, WELL_KNOWN_TOOLS};
pub use log_buffer::InMemoryLogBuffer;
