#[macro_use]
extern crate tracing;

pub mod checker;
pub mod client;
pub mod context;
pub mod error;
pub mod memory;
pub mod pod_spec;
pub mod resources;
pub mod whitelist;
