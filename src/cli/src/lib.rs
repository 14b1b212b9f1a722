//! Canopy CLI - inspect component registries from the command line.

pub mod commands;
