//! Host backends implementing [`Dom`](crate::Dom) and the environment
//! capabilities.

pub mod memory;

#[cfg(feature = "web")]
pub mod browser;
