// System orchestrator
pub mod system;
