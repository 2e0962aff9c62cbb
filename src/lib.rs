//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (`core-service` and the provider plugins it links).
//! Host applications can depend on `social-sync-workspace` and enable the
//! documented features without needing to wire each crate individually.
