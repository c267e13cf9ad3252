// SPDX-License-Identifier: MPL-2.0

//! Processing pipelines for recording and trajectory extraction
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ CameraSource │ ──▶ │  Video Pipeline   │ ──▶ │   MP4 File   │
//! │              │     │  - slow motion    │     │ + detection  │
//! │              │     │  - HW encoding    │     │   log (JSON) │
//! │              │     │  - detection      │     │              │
//! └──────────────┘     └───────────────────┘     └──────────────┘
//!
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │  Video File  │ ──▶ │    Trajectory     │ ──▶ │   Smoothed   │
//! │              │     │  - sampling       │     │   centers    │
//! │              │     │  - detection      │     │              │
//! │              │     │  - smoothing      │     │              │
//! └──────────────┘     └───────────────────┘     └──────────────┘
//! ```
//!
//! - [`video`]: live capture sessions and the container writer
//! - [`trajectory`]: offline subject extraction and path smoothing

pub mod trajectory;
pub mod video;
