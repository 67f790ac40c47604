pub mod broker;
pub mod core;
pub mod observability;
