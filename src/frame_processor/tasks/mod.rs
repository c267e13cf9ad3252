// SPDX-License-Identifier: MPL-2.0

//! Frame analysis tasks

pub mod qr_marker;
pub mod subject_detector;
