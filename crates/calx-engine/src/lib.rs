//! calx_engine - Formula evaluation capability + Rhai integration.

pub mod engine;
