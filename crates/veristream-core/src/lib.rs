//! Shared data model for the veristream validation framework.
//!
//! The crates above this one exchange three things: typed [`Value`]s,
//! name-keyed [`Structure`] records (the scenario wire format), and
//! [`Report`]s flowing into a [`ReportSink`].

pub mod report;
pub mod structure;
pub mod time;
pub mod value;

pub use report::{
    CollectingSink, FatalityFlags, IssueId, LogSink, Report, ReportLevel, ReportSink, Reporter,
};
pub use structure::{Structure, StructureError};
pub use value::Value;
