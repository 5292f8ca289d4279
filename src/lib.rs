// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! tidyup: watch folders and sort incoming files by extension
//!
//! Files landing in a watched folder are classified by extension, moved
//! into `<organized>/<category>/`, tagged, and logged to SQLite. A small
//! web dashboard shows the log, storage use and a live feed of moves.

pub mod config;
pub mod db;
pub mod error;
pub mod organizer;
pub mod rules;
pub mod service;
pub mod watcher;
pub mod web;

pub use config::AppConfig;
pub use error::{Result, TidyError};
