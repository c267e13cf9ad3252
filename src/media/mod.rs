// SPDX-License-Identifier: MPL-2.0

//! Media encoding and decoding
//!
//! - [`encoders`]: video/audio encoder discovery and selection for recording
//! - [`decoders`]: file decoding for offline trajectory extraction

pub mod decoders;
pub mod encoders;
