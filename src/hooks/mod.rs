//! Hook execution for role transitions.
//!
//! [`system`] maps events to commands and applies failure policies,
//! [`template`] and [`env`] prepare the child's arguments and environment,
//! and [`executor`] runs the process.

pub mod env;
pub mod executor;
pub mod system;
pub mod template;
