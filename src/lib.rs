//! redub - Automated Video Dubbing
//!
//! Extracts the speech of a video, transcribes and translates it, synthesizes
//! the translation and records the original frames with the new audio.

pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod media;
pub mod model;
pub mod orchestrator;
pub mod output;
pub mod progress;
pub mod recombine;
pub mod services;
pub mod timing;
