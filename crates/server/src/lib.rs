//! `regscore-server` -- Modbus TCP front-end and startup wiring for the
//! register-triggered scoring pipeline.

pub mod config;
pub mod modbus;
