// Library crate for Mozo - exposes modules for testing
pub mod api;
pub mod flow;
pub mod settings;
