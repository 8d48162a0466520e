//! Container registry, directory walk and the authenticate-then-decompress pipeline

pub mod auth;
pub mod compression;
pub mod config;
pub mod directory;
pub mod error;
pub mod header;
pub mod loader;
pub mod memory;
pub mod registry;
pub mod storage;
pub mod tag;
