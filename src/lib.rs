//! Latchkey - hierarchical access-control decision engine
//!
//! Decides whether the principals acting in a request hold a permission on a
//! resource, combining code-level grants, per-resource grants inherited down
//! the resource tree, and role-mediated grants.
//! It exposes all modules for testing purposes.

pub mod authz;
pub mod errors;
pub mod settings;
