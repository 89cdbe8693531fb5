//! Pipeline stages for notebook/markdown → esa markdown rendering.
//!
//! Each submodule implements one transformation step and is testable on
//! its own; only [`dedup`] touches the network, and only through the
//! [`crate::remote::Publisher`] trait.
//!
//! ## Data Flow
//!
//! ```text
//! cell ──▶ math ──▶ markdown/outputs ──▶ image ──▶ dedup ──▶ cell (fragment)
//!          (escape)  (image refs, MIME)   (bytes)   (hash → URL)
//! ```
//!
//! 1. [`math`]     — move display math into math fences, escape inline math
//! 2. [`markdown`] — find `![alt](target)` references and resolve them
//! 3. [`outputs`]  — pick a representation for each code-cell output
//! 4. [`image`]    — decode/read image bytes, hash them, manage the work dir
//! 5. [`dedup`]    — content-hash cache in front of the upload call
//! 6. [`cell`]     — wrap everything in `<details>` blocks per folding mode

pub mod cell;
pub mod dedup;
pub mod image;
pub mod markdown;
pub mod math;
pub mod outputs;
