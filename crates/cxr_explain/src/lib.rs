//! # cxr_explain
//!
//! Grad-CAM attribution for chest X-ray classifiers.
//!
//! This crate provides:
//! - [`CaptureSession`] - activation and gradient capture at a named layer
//! - [`grad_cam`] - channel-weighted, rectified and normalized activation maps
//! - [`SaliencyMap`] - host-side map at the source image resolution
//! - [`GradCam`] - engine serializing attribution over a shared classifier

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod attribution;
mod capture;
mod engine;

#[cfg(test)]
pub(crate) mod testing;

pub use attribution::{grad_cam, resize_map, SaliencyMap};
pub use capture::{CaptureExt, CaptureSession};
pub use engine::GradCam;
