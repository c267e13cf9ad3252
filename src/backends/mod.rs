// SPDX-License-Identifier: MPL-2.0

//! Hardware access
//!
//! - [`camera`]: capture sources and the sample types they deliver

pub mod camera;
