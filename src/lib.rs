// SPDX-License-Identifier: MPL-2.0

//! Trackcam - video recording with live subject tracking
//!
//! Records camera video (optionally in slow motion) while sampling frames for
//! subject detection, and derives smooth subject trajectories from recordings
//! afterwards.
//!
//! # Architecture
//!
//! - [`backends`]: camera capture sources
//! - [`frame_processor`]: single-flight subject detection
//! - [`media`]: encoder selection and file decoding
//! - [`pipelines`]: recording sessions and trajectory extraction
//! - [`config`]: user configuration handling
//! - [`storage`]: where finished recordings and their detection logs go

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod frame_processor;
pub mod media;
pub mod pipelines;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use constants::BitratePreset;
pub use pipelines::video::{CapturePipeline, RecordingEvent};
