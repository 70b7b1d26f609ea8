//! The web module for handling the Axum API.
//! This file declares the other files in this directory as sub-modules.

pub mod api;
pub mod models;
pub mod ws;

pub use api::create_router;
