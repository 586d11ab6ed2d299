//! Subcommand implementations.

pub mod approve;
pub mod changes;
pub mod clear;
pub mod compare;
pub mod copy_baseline;
pub mod decline;
pub mod hash;
