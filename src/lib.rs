#![deny(missing_docs)]
//! Library form of vmupdate

/// Vmupdate configuration.
pub mod config;
/// Contains real time updates about machines being updated.
pub mod output;
pub mod parse;
/// Contains user interface code.
pub mod ui;
pub mod vbox;
/// Contains main vmupdate logic.
pub mod vmupdate;

pub use crate::config::*;
pub use crate::ui::*;
pub use crate::vbox::*;
pub use crate::vmupdate::*;
