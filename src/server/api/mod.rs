pub mod domain_controller;
pub mod health_controller;
pub mod manifest_controller;
