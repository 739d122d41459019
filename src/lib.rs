//! Watches which applications are running and which one holds focus, and
//! turns those periodic snapshots into per-application active/running time.
//! Related executables (versions, launchers, library imports) are clustered
//! into groups automatically, so "chrome.exe" and "chrome 2024.exe" count as
//! one thing.

pub mod cli;
pub mod grouping;
pub mod probes;
pub mod settings;
pub mod store;
pub mod tracker;
pub mod utils;
