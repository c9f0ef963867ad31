//! HTTP handlers for the annotation server

pub mod buildinfo;
pub mod health;
pub mod page;
pub mod review;
pub mod status;
pub mod ui;

pub use health::health_routes;
