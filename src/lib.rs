//! Core library for votuna-providers: multi-provider music service clients
//! behind one capability trait, plus the vote-threshold auto-add helper.
pub mod autoadd;
pub mod error;
pub mod models;
pub mod providers;
