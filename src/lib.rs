pub mod app;
pub mod cache;
pub mod config;
pub mod consensus;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod group;
pub mod input;
pub mod lifecycle;
pub mod output;
pub mod provider;
pub mod reconcile;
pub mod resolver;
pub mod store;
pub mod tables;
pub mod uniprot;
