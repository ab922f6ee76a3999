//! CFG loaders for the three supported source formats. Each reader consumes
//! its input in one pass and populates a shared [`crate::core::CfgTable`];
//! none of them open files themselves (the driver in `main.rs` owns I/O and
//! hands these readers a string or `serde_json::Value` to work from).

pub mod bftrace;
pub mod cfggrind;
pub mod dcfg;

pub use bftrace::BFTraceReader;
pub use cfggrind::CfgGrindReader;
pub use dcfg::DcfgReader;
