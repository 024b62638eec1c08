//! Cluster implementations usable without a live cluster.
//!
//! Each backend provides a concrete type implementing every collaborator
//! trait in [`crate::api`], and therefore [`crate::Cluster`].

pub mod memory;
