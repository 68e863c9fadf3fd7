pub mod assets;
pub mod config;
pub mod dataset;
pub mod extract;
pub mod filesystem;
pub mod rewrite;
pub mod rules;
pub mod runtime;
