//! # Tensor Backend
//!
//! This module provides a unified interface for different tensor backends,
//! allowing the scheduling and cache bookkeeping layers to work in a
//! backend-agnostic manner.

//! ## Feature Flags
//!
//! The module uses feature flags to conditionally compile support for
//! different backends:
//!
//! - `candle`: Enables support for the Candle tensor library
//!
//! ## Usage
//!
//! Users of this crate can work with tensors in a backend-agnostic way by:
//!
//! 1. Importing the [`Backend`] trait
//! 2. Writing code against the trait interface
//! 3. Enabling the appropriate feature flag for their desired backend

mod core_trait;

#[cfg_attr(docsrs, doc(cfg(feature = "candle")))]
#[cfg(feature = "candle")]
/// Candle tensor backend implementation.
///
/// This module is only available when the `candle` feature flag is enabled.
/// It provides an implementation of the [`Backend`] trait for Candle's
/// `Tensor` type, wrapping candle-core's tensor operations to match the
/// expected behavior of the tensor backend abstraction.
pub mod candle;

// Re-export the core trait for convenient imports
pub use core_trait::*;
