//! VLAN tagging and bridge membership
//!
//! Provides:
//! - Declared interface bindings (access or trunk)
//! - The reconciler that applies them to the bridge
//! - Status and binding-list reports

pub mod binding;
pub mod reconciler;
pub mod report;

pub use reconciler::TaggingReconciler;
