//! Operator CLI

pub mod commands;
