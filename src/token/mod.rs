//! Line-oriented token scanner shared by the bftrace and cfggrind readers.

mod scanner;

pub use scanner::{Scanner, Token};
