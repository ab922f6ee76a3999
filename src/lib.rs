//! CFG reconstruction pipeline: ingest bftrace, cfggrind, or DCFG traces,
//! unify them into a single validated CFG model, and render canonical text
//! or graph-description dumps.

/// Command-line surface: argument parsing and address/range filtering.
pub mod cli;

/// Core CFG data types: addresses, instructions, nodes/edges, the CFG
/// container, and the validator.
pub mod core;

/// Error types and error handling.
pub mod error;

/// Logging and tracing infrastructure.
pub mod logging;

/// Format-specific CFG loaders (bftrace, cfggrind, DCFG).
pub mod readers;

/// Canonical text and graph-description renderers.
pub mod render;

/// Line-oriented token scanner shared by the bftrace and cfggrind readers.
pub mod token;
