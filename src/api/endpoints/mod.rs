//! Endpoint handlers, one module per cascade entry point.

pub mod diagnose;
pub mod epilepsy;
pub mod health;
pub mod images;
pub mod predict;
pub mod upload;
