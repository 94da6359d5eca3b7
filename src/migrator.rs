//! Schema migrations live in the `migrations` workspace crate; this module
//! re-exports its migrator so callers only depend on `freightlink`.

pub use migrations::Migrator;
