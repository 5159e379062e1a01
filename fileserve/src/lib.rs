//! Fileserve - sandboxed HTTP file manager
//!
//! Lists, searches, previews and mutates files below a single configured
//! root directory. Nothing outside that root is ever read or written.

pub mod api;
pub mod app_state;
pub mod config;
pub mod files;
