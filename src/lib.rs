//! Library crate for crowdtune-back, exposing modules for binaries and integration tests.

pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod playback;
pub mod routes;
pub mod services;
pub mod state;
