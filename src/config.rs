//! Configuration types for rendering and publishing.
//!
//! All run behaviour is controlled through [`PublishConfig`], built via its
//! [`PublishConfigBuilder`]. Remote access (which backend, which token) is
//! kept apart in [`RemoteConfig`] because it is resolved from three sources
//! with a fixed precedence:
//!
//! 1. explicit arguments (CLI flags),
//! 2. environment variables (`ESAPUB_*`),
//! 3. the YAML rc file `~/.esapubrc`.

use crate::error::EsaPubError;
use crate::progress::ProgressCallback;
use crate::remote::PostId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the rc file in the home directory.
pub const RC_FILE_NAME: &str = ".esapubrc";

pub const ENV_TOKEN: &str = "ESAPUB_TOKEN";
pub const ENV_TEAM: &str = "ESAPUB_TEAM";
pub const ENV_BACKEND: &str = "ESAPUB_BACKEND";
pub const ENV_GROWI_URL: &str = "ESAPUB_GROWI_URL";
pub const ENV_GROWI_USERNAME: &str = "ESAPUB_GROWI_USERNAME";
pub const ENV_PROXY: &str = "ESAPUB_PROXY";

/// Configuration for one render/publish run.
///
/// # Example
/// ```rust
/// use esapub::{FoldingMode, PublishConfig, PublishMode};
///
/// let config = PublishConfig::builder()
///     .folding(FoldingMode::AsShown)
///     .publish_mode(PublishMode::Skip)
///     .tags(vec!["notebook".into()])
///     .build()
///     .unwrap();
/// assert_eq!(config.folding, FoldingMode::AsShown);
/// ```
#[derive(Clone)]
pub struct PublishConfig {
    /// How cell folding hints are honoured. Default: [`FoldingMode::Auto`].
    pub folding: FoldingMode,

    /// Whether and how strictly to publish. Default: [`PublishMode::Check`].
    pub publish_mode: PublishMode,

    /// Update the recorded post or always create a new one. Default: [`PostMode::Auto`].
    pub post_mode: PostMode,

    /// Where the updated document goes. Default: [`OutputMode::Overwrite`].
    pub output_mode: OutputMode,

    /// Post title. Defaults to the recorded title, then the file stem.
    pub title: Option<String>,

    /// Post tags. Defaults to the recorded tags on create, untouched on update.
    pub tags: Option<Vec<String>>,

    /// Post category. Defaults like `tags`.
    pub category: Option<String>,

    /// Change message shown in the post history.
    pub message: Option<String>,

    /// Work-in-progress flag. New posts default to `true`; updates keep the server value.
    pub wip: Option<bool>,

    /// Post to update when the input carries no metadata (markdown / LaTeX inputs).
    pub post_number: Option<PostId>,

    /// Keep the temporary working directory after the run. Default: false.
    pub keep_workdir: bool,

    /// `max-height` of the scrolling container around scrolled outputs. Default: 300.
    pub scroll_height_px: u32,

    /// Per-request HTTP timeout in seconds. Default: 60.
    pub timeout_secs: u64,

    /// Optional progress events sink.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            folding: FoldingMode::default(),
            publish_mode: PublishMode::default(),
            post_mode: PostMode::default(),
            output_mode: OutputMode::default(),
            title: None,
            tags: None,
            category: None,
            message: None,
            wip: None,
            post_number: None,
            keep_workdir: false,
            scroll_height_px: 300,
            timeout_secs: 60,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PublishConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishConfig")
            .field("folding", &self.folding)
            .field("publish_mode", &self.publish_mode)
            .field("post_mode", &self.post_mode)
            .field("output_mode", &self.output_mode)
            .field("title", &self.title)
            .field("tags", &self.tags)
            .field("category", &self.category)
            .field("message", &self.message)
            .field("wip", &self.wip)
            .field("post_number", &self.post_number)
            .field("keep_workdir", &self.keep_workdir)
            .field("scroll_height_px", &self.scroll_height_px)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PublishProgressCallback>"),
            )
            .finish()
    }
}

impl PublishConfig {
    /// Create a new builder for `PublishConfig`.
    pub fn builder() -> PublishConfigBuilder {
        PublishConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PublishConfig`].
#[derive(Debug)]
pub struct PublishConfigBuilder {
    config: PublishConfig,
}

impl PublishConfigBuilder {
    pub fn folding(mut self, mode: FoldingMode) -> Self {
        self.config.folding = mode;
        self
    }

    pub fn publish_mode(mut self, mode: PublishMode) -> Self {
        self.config.publish_mode = mode;
        self
    }

    pub fn post_mode(mut self, mode: PostMode) -> Self {
        self.config.post_mode = mode;
        self
    }

    pub fn output_mode(mut self, mode: OutputMode) -> Self {
        self.config.output_mode = mode;
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.config.title = Some(title.into());
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.config.tags = Some(tags);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.config.category = Some(category.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.config.message = Some(message.into());
        self
    }

    pub fn wip(mut self, wip: bool) -> Self {
        self.config.wip = Some(wip);
        self
    }

    pub fn post_number(mut self, id: impl Into<PostId>) -> Self {
        self.config.post_number = Some(id.into());
        self
    }

    pub fn keep_workdir(mut self, keep: bool) -> Self {
        self.config.keep_workdir = keep;
        self
    }

    pub fn scroll_height_px(mut self, px: u32) -> Self {
        self.config.scroll_height_px = px;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PublishConfig, EsaPubError> {
        let c = &self.config;
        if c.scroll_height_px == 0 {
            return Err(EsaPubError::InvalidConfig(
                "scroll height must be at least 1px".into(),
            ));
        }
        if c.timeout_secs == 0 {
            return Err(EsaPubError::InvalidConfig("timeout must be ≥ 1s".into()));
        }
        if let Some(title) = &c.title {
            if title.trim().is_empty() {
                return Err(EsaPubError::InvalidConfig("title must not be blank".into()));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How folding hints turn into `<details>` open/closed state.
///
/// | Mode | Code source closed when | Outputs closed when |
/// |------|-------------------------|---------------------|
/// | `auto` | fold marker present **or** `source_hidden` | `outputs_hidden` |
/// | `as-shown` | `source_hidden` | `outputs_hidden` |
/// | `ignore` | never | never |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FoldingMode {
    #[default]
    Auto,
    AsShown,
    Ignore,
}

/// What happens at the publish stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublishMode {
    /// Publish even if some images failed (they stay annotated in the body).
    Force,
    /// Publish only if every image was resolved. (default)
    #[default]
    Check,
    /// Render (and upload images) but never create or update a post.
    Skip,
}

/// Create-vs-update policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PostMode {
    /// Update the recorded post, create one if none is recorded. (default)
    #[default]
    Auto,
    /// Always create a new post.
    New,
}

/// Where the updated document is written at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Replace the input file. (default)
    #[default]
    Overwrite,
    /// Write next to the input (or to `path`), leaving the input untouched.
    Copy { path: Option<PathBuf> },
    /// Do not write anything.
    Discard,
}

impl OutputMode {
    /// Resolve the destination for `input`, or `None` to discard.
    pub fn target(&self, input: &Path) -> Option<PathBuf> {
        match self {
            OutputMode::Overwrite => Some(input.to_path_buf()),
            OutputMode::Copy { path: Some(p) } => Some(p.clone()),
            OutputMode::Copy { path: None } => Some(default_copy_path(input)),
            OutputMode::Discard => None,
        }
    }
}

/// `dir/name.ipynb` → `dir/name_esapub.ipynb`.
pub fn default_copy_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match input.extension() {
        Some(ext) => format!("{stem}_esapub.{}", ext.to_string_lossy()),
        None => format!("{stem}_esapub"),
    };
    input.with_file_name(name)
}

/// Knowledge-base service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Esa,
    Growi,
}

impl std::str::FromStr for Backend {
    type Err = EsaPubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "esa" | "esa.io" => Ok(Backend::Esa),
            "growi" => Ok(Backend::Growi),
            other => Err(EsaPubError::InvalidConfig(format!(
                "unknown backend '{other}' (expected esa or growi)"
            ))),
        }
    }
}

// ── Credentials ──────────────────────────────────────────────────────────

/// Contents of `~/.esapubrc`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RcFile {
    #[serde(default)]
    pub backend: Option<Backend>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub tool: ToolSettings,
}

/// Tool-level preferences in the rc file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSettings {
    /// Copy the rendered body to the clipboard after `up`.
    #[serde(default)]
    pub goto_clipboard: bool,
}

impl RcFile {
    pub fn parse(text: &str) -> Result<Self, EsaPubError> {
        serde_yaml::from_str(text)
            .map_err(|e| EsaPubError::InvalidConfig(format!("{RC_FILE_NAME}: {e}")))
    }

    /// Load `path`; a missing file is `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>, EsaPubError> {
        if !path.exists() {
            debug!("No rc file at {}", path.display());
            return Ok(None);
        }
        let text = std::fs::read_to_string(path).map_err(|e| EsaPubError::io(path, e))?;
        Self::parse(&text).map(Some)
    }

    /// Load `~/.esapubrc` if there is a home directory and the file exists.
    pub fn load_default() -> Result<Option<Self>, EsaPubError> {
        match dirs::home_dir() {
            Some(home) => Self::load(&home.join(RC_FILE_NAME)),
            None => Ok(None),
        }
    }
}

/// Credentials given explicitly (CLI flags); every field optional.
#[derive(Debug, Clone, Default)]
pub struct CredentialArgs {
    pub backend: Option<Backend>,
    pub token: Option<String>,
    pub team: Option<String>,
    pub url: Option<String>,
    pub username: Option<String>,
    pub proxy: Option<String>,
}

/// Fully resolved remote access.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Esa {
        team: String,
        token: String,
    },
    Growi {
        url: String,
        token: String,
        username: String,
    },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Esa { team, token } => f
                .debug_struct("Esa")
                .field("team", team)
                .field("token", &mask(token))
                .finish(),
            Credentials::Growi {
                url,
                token,
                username,
            } => f
                .debug_struct("Growi")
                .field("url", url)
                .field("token", &mask(token))
                .field("username", username)
                .finish(),
        }
    }
}

/// Show only the last four characters of a secret.
pub fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), tail)
}

/// Resolved backend access plus transport options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub credentials: Credentials,
    pub proxy: Option<String>,
}

impl CredentialArgs {
    /// Resolve credentials: explicit > environment > rc file.
    ///
    /// `env` is injected so tests do not depend on the process environment;
    /// the CLI passes `|k| std::env::var(k).ok()`.
    pub fn resolve(
        &self,
        env: impl Fn(&str) -> Option<String>,
        rc: Option<&RcFile>,
    ) -> Result<RemoteConfig, EsaPubError> {
        let pick = |explicit: &Option<String>, key: &str, from_rc: Option<&String>| {
            explicit
                .clone()
                .filter(|v| !v.is_empty())
                .or_else(|| env(key).filter(|v| !v.is_empty()))
                .or_else(|| from_rc.cloned())
        };

        let backend = match self.backend {
            Some(b) => b,
            None => match env(ENV_BACKEND).filter(|v| !v.is_empty()) {
                Some(name) => name.parse()?,
                None => rc.and_then(|r| r.backend).unwrap_or_default(),
            },
        };
        let token = pick(&self.token, ENV_TOKEN, rc.and_then(|r| r.token.as_ref()));
        let proxy = pick(&self.proxy, ENV_PROXY, rc.and_then(|r| r.proxy.as_ref()));

        let credentials = match backend {
            Backend::Esa => {
                let team = pick(&self.team, ENV_TEAM, rc.and_then(|r| r.team.as_ref()));
                match (token, team) {
                    (Some(token), Some(team)) => Credentials::Esa { team, token },
                    _ => {
                        return Err(EsaPubError::CredentialsNotFound {
                            hint: format!(
                                "Pass --token and --team, set {ENV_TOKEN} and {ENV_TEAM}, \
                                 or write `token:` and `team:` to ~/{RC_FILE_NAME}."
                            ),
                        })
                    }
                }
            }
            Backend::Growi => {
                let url = pick(&self.url, ENV_GROWI_URL, rc.and_then(|r| r.url.as_ref()));
                let username = pick(
                    &self.username,
                    ENV_GROWI_USERNAME,
                    rc.and_then(|r| r.username.as_ref()),
                );
                match (token, url, username) {
                    (Some(token), Some(url), Some(username)) => Credentials::Growi {
                        url,
                        token,
                        username,
                    },
                    _ => {
                        return Err(EsaPubError::CredentialsNotFound {
                            hint: format!(
                                "Growi needs a token, a URL and a username: pass --token/--url/--username, \
                                 set {ENV_TOKEN}/{ENV_GROWI_URL}/{ENV_GROWI_USERNAME}, \
                                 or write them to ~/{RC_FILE_NAME}."
                            ),
                        })
                    }
                }
            }
        };

        Ok(RemoteConfig { credentials, proxy })
    }
}
