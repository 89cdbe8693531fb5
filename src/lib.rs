//! # esapub
//!
//! Publish Jupyter notebooks, markdown and LaTeX documents to esa.io (or
//! Growi), images included.
//!
//! ## Why this crate?
//!
//! Pasting a notebook into a knowledge base loses everything that makes it
//! a notebook: figures are base64 blobs, math is mangled by the markdown
//! renderer, and long outputs drown the text. This crate renders each cell
//! into esa-flavoured markdown with collapsible sections, rewrites math into
//! a form that survives esa's renderer, uploads every image once (keyed by
//! content hash) and remembers the post it created, so the next run updates
//! the same post instead of creating a new one.
//!
//! ## Pipeline Overview
//!
//! ```text
//! .ipynb / .md / .tex
//!  │
//!  ├─ 1. Load     parse nbformat 4 (or pandoc the LaTeX into markdown)
//!  ├─ 2. Render   cells → <details> blocks, math rewritten, outputs picked
//!  ├─ 3. Images   extract → hash → reuse recorded URL or upload
//!  ├─ 4. Publish  create, or patch the recorded post
//!  └─ 5. Save     post info + hashdict written back into the notebook
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use esapub::{connect, publish, CredentialArgs, PublishConfig, RcFile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rc = RcFile::load_default()?;
//!     let remote = CredentialArgs::default().resolve(|k| std::env::var(k).ok(), rc.as_ref())?;
//!     let publisher = connect(&remote, 60)?;
//!
//!     let config = PublishConfig::default();
//!     let output = publish("analysis.ipynb", &config, publisher.as_ref()).await?;
//!     if let Some(post) = output.post {
//!         println!("{}", post.url);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `esapub` binary (clap + anyhow + tracing-subscriber + indicatif + arboard) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! esapub = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod helper;
pub mod notebook;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod publish;
pub mod remote;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    Backend, CredentialArgs, Credentials, FoldingMode, OutputMode, PostMode, PublishConfig,
    PublishConfigBuilder, PublishMode, RcFile, RemoteConfig,
};
pub use convert::{convert_to_markdown, InputKind};
pub use error::{EsaPubError, ImageError};
pub use helper::{format_listing, list_notebooks, reset_notebook, NotebookStatus};
pub use notebook::{EsaMetadata, Notebook, PostInfo};
pub use output::{PostSummary, PublishOutput, RenderStats, Stage};
pub use progress::{NoopProgressCallback, ProgressCallback, PublishProgressCallback};
pub use publish::publish;
pub use remote::{connect, PostId, Publisher, RemoteError};
