//! CLI binary for esapub.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PublishConfig` / `CredentialArgs` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use esapub::config::{mask, RC_FILE_NAME};
use esapub::{
    connect, convert_to_markdown, format_listing, list_notebooks, publish, reset_notebook,
    Backend, CredentialArgs, Credentials, FoldingMode, OutputMode, PostId, PostMode,
    ProgressCallback, PublishConfig, PublishMode, PublishOutput, PublishProgressCallback, RcFile,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over the notebook cells plus a log
/// line per image.
struct CliProgressCallback {
    bar: ProgressBar,
    failed_images: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_render_start` tells us how many cells there are.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Loading document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            failed_images: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} cells  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Rendering");
    }

    fn abandon(&self) {
        self.bar.finish_and_clear();
    }
}

impl PublishProgressCallback for CliProgressCallback {
    fn on_render_start(&self, total_cells: usize) {
        self.activate_bar(total_cells);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Rendering {total_cells} cells…"))
        ));
    }

    fn on_cell_complete(&self, _index: usize, _total: usize, kind: &str) {
        self.bar.set_message(kind.to_string());
        self.bar.inc(1);
    }

    fn on_image(&self, reference: &str, error: Option<&str>) {
        match error {
            None => self
                .bar
                .println(format!("  {} {}", green("✓"), dim(reference))),
            Some(err) => {
                self.failed_images.fetch_add(1, Ordering::SeqCst);
                // Keep long server messages on one line.
                let msg = if err.chars().count() > 80 {
                    format!("{}\u{2026}", err.chars().take(79).collect::<String>())
                } else {
                    err.to_string()
                };
                self.bar
                    .println(format!("  {} {}  {}", red("✗"), reference, red(&msg)));
            }
        }
    }

    fn on_publish_start(&self, updating: bool) {
        self.bar.set_prefix("Publishing");
        self.bar.set_message(if updating {
            "updating post…"
        } else {
            "creating post…"
        });
    }

    fn on_complete(&self, images: usize, failed_images: usize) {
        self.bar.finish_and_clear();
        if failed_images == 0 {
            eprintln!("{} {} images resolved", green("✔"), bold(&images.to_string()));
        } else {
            eprintln!(
                "{} {}/{} images resolved  ({} failed)",
                cyan("⚠"),
                bold(&(images - failed_images).to_string()),
                images,
                red(&failed_images.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Publish a notebook (creates the post, then updates it on later runs)
  esapub up analysis.ipynb

  # Publish even if some images could not be uploaded
  esapub up --publish-mode force analysis.ipynb

  # Always create a fresh post, keep the original notebook untouched
  esapub up --post-mode new --output-mode copy analysis.ipynb

  # Render and upload images only, copy the body to the clipboard
  esapub up --publish-mode skip --clipboard notes.md

  # Convert without uploading (images go to analysis_files/)
  esapub convert analysis.ipynb

  # Forget the recorded post and image URLs
  esapub reset analysis.ipynb

  # Show which notebooks in a directory were published
  esapub ls ./notebooks

FOLDING MODES:
  auto      fold code cells marked with %esa_fold or hidden in Jupyter (default)
  as-shown  fold exactly what is hidden in Jupyter
  ignore    never fold

ENVIRONMENT VARIABLES:
  ESAPUB_TOKEN           Access token (esa.io or Growi)
  ESAPUB_TEAM            esa.io team (the *** of https://***.esa.io/)
  ESAPUB_BACKEND         esa (default) or growi
  ESAPUB_GROWI_URL       Growi base URL
  ESAPUB_GROWI_USERNAME  Growi user; pages are created under /user/<name>/
  ESAPUB_PROXY           HTTP proxy, e.g. http://proxy:3128
  RUST_LOG               Override log filter

SETUP:
  Credentials are taken from flags, then the environment, then ~/.esapubrc:

    token: xxxxxxxx
    team: myteam
    tool:
      goto_clipboard: true
"#;

/// Publish notebooks, markdown and LaTeX to esa.io or Growi.
#[derive(Parser, Debug)]
#[command(
    name = "esapub",
    version,
    about = "Publish Jupyter notebooks, Markdown and LaTeX to esa.io or Growi",
    long_about = "Render Jupyter notebooks (and Markdown or LaTeX files) into esa-flavoured \
Markdown, upload every image once, and create or update the matching post. The post \
number and uploaded image URLs are stored in the notebook so re-running updates the same post.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "ESAPUB_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "ESAPUB_QUIET")]
    quiet: bool,

    /// Disable the progress bar.
    #[arg(long, global = true, env = "ESAPUB_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert, upload images, publish and save the updated document.
    Up(UpArgs),
    /// Convert to markdown only; images are copied next to the output.
    Convert(ConvertArgs),
    /// Remove esapub metadata from notebooks.
    Reset {
        /// Notebooks to reset.
        #[arg(required = true)]
        targets: Vec<PathBuf>,
    },
    /// List notebooks in a directory with their post numbers.
    Ls {
        /// Directory to scan.
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
    /// Show the resolved configuration (token masked).
    Config(CredentialFlags),
}

#[derive(Args, Debug)]
struct CredentialFlags {
    /// Backend: esa or growi.
    #[arg(long, env = "ESAPUB_BACKEND", value_enum)]
    backend: Option<BackendArg>,

    /// Access token (read/write).
    #[arg(long, env = "ESAPUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// esa.io team name.
    #[arg(long, env = "ESAPUB_TEAM")]
    team: Option<String>,

    /// Growi base URL.
    #[arg(long, env = "ESAPUB_GROWI_URL")]
    url: Option<String>,

    /// Growi user name.
    #[arg(long, env = "ESAPUB_GROWI_USERNAME")]
    username: Option<String>,

    /// HTTP proxy URL.
    #[arg(long, env = "ESAPUB_PROXY")]
    proxy: Option<String>,
}

impl CredentialFlags {
    fn to_args(&self) -> CredentialArgs {
        CredentialArgs {
            backend: self.backend.clone().map(Into::into),
            token: self.token.clone(),
            team: self.team.clone(),
            url: self.url.clone(),
            username: self.username.clone(),
            proxy: self.proxy.clone(),
        }
    }
}

#[derive(Args, Debug)]
struct RenderFlags {
    /// How Jupyter folding hints are honoured.
    #[arg(long, env = "ESAPUB_FOLDING", value_enum, default_value = "auto")]
    folding: FoldingArg,

    /// Keep the temporary working directory.
    #[arg(long, env = "ESAPUB_KEEP_WORKDIR")]
    keep_workdir: bool,

    /// max-height (px) of scrolled output blocks.
    #[arg(long, env = "ESAPUB_SCROLL_HEIGHT", default_value_t = 300)]
    scroll_height: u32,
}

#[derive(Args, Debug)]
struct UpArgs {
    /// Input file (.ipynb, .md or .tex).
    target: PathBuf,

    #[command(flatten)]
    credentials: CredentialFlags,

    #[command(flatten)]
    render: RenderFlags,

    /// force: publish despite image failures; check: refuse; skip: never publish.
    #[arg(long, env = "ESAPUB_PUBLISH_MODE", value_enum, default_value = "check")]
    publish_mode: PublishModeArg,

    /// auto: update the recorded post; new: always create one.
    #[arg(long, env = "ESAPUB_POST_MODE", value_enum, default_value = "auto")]
    post_mode: PostModeArg,

    /// overwrite the input, copy to a new file, or discard the updated document.
    #[arg(long, env = "ESAPUB_OUTPUT_MODE", value_enum, default_value = "overwrite")]
    output_mode: OutputModeArg,

    /// Destination for --output-mode copy (default: <name>_esapub.<ext>).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Post title.
    #[arg(long, env = "ESAPUB_TITLE")]
    title: Option<String>,

    /// Comma-separated tags.
    #[arg(long, env = "ESAPUB_TAGS", value_delimiter = ',')]
    tags: Option<Vec<String>>,

    /// Post category, e.g. notes/2024.
    #[arg(long, env = "ESAPUB_CATEGORY")]
    category: Option<String>,

    /// Change message.
    #[arg(short, long, env = "ESAPUB_MESSAGE")]
    message: Option<String>,

    /// Mark the post as work in progress.
    #[arg(long, overrides_with = "no_wip")]
    wip: bool,

    /// Publish as a finished post.
    #[arg(long = "no-wip", overrides_with = "wip")]
    no_wip: bool,

    /// Post number (or Growi page id) to update for markdown/LaTeX inputs.
    #[arg(long, env = "ESAPUB_NUMBER")]
    number: Option<String>,

    /// Copy the rendered markdown to the clipboard (default from the rc file).
    #[arg(short, long, env = "ESAPUB_CLIPBOARD", overrides_with = "no_clipboard")]
    clipboard: bool,

    /// Do not copy to the clipboard, even when the rc file asks for it.
    #[arg(long = "no-clipboard", overrides_with = "clipboard")]
    no_clipboard: bool,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, env = "ESAPUB_TIMEOUT", default_value_t = 60)]
    timeout: u64,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Input file (.ipynb, .md or .tex).
    target: PathBuf,

    /// Markdown output path (default: <stem>.md beside the input).
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    render: RenderFlags,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum BackendArg {
    Esa,
    Growi,
}

impl From<BackendArg> for Backend {
    fn from(v: BackendArg) -> Self {
        match v {
            BackendArg::Esa => Backend::Esa,
            BackendArg::Growi => Backend::Growi,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum FoldingArg {
    Auto,
    AsShown,
    Ignore,
}

impl From<FoldingArg> for FoldingMode {
    fn from(v: FoldingArg) -> Self {
        match v {
            FoldingArg::Auto => FoldingMode::Auto,
            FoldingArg::AsShown => FoldingMode::AsShown,
            FoldingArg::Ignore => FoldingMode::Ignore,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum PublishModeArg {
    Force,
    Check,
    Skip,
}

impl From<PublishModeArg> for PublishMode {
    fn from(v: PublishModeArg) -> Self {
        match v {
            PublishModeArg::Force => PublishMode::Force,
            PublishModeArg::Check => PublishMode::Check,
            PublishModeArg::Skip => PublishMode::Skip,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum PostModeArg {
    Auto,
    New,
}

impl From<PostModeArg> for PostMode {
    fn from(v: PostModeArg) -> Self {
        match v {
            PostModeArg::Auto => PostMode::Auto,
            PostModeArg::New => PostMode::New,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum OutputModeArg {
    Overwrite,
    Copy,
    Discard,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless verbose output was asked for.
    let renders = matches!(cli.command, Command::Up(_) | Command::Convert(_));
    let show_progress = renders && !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress = if show_progress {
        Some(CliProgressCallback::new_dynamic())
    } else {
        None
    };

    match &cli.command {
        Command::Up(args) => run_up(&cli, args, progress).await,
        Command::Convert(args) => run_convert(&cli, args, progress).await,
        Command::Reset { targets } => run_reset(&cli, targets),
        Command::Ls { dir } => run_ls(dir),
        Command::Config(flags) => run_config(flags),
    }
}

async fn run_up(cli: &Cli, args: &UpArgs, progress: Option<Arc<CliProgressCallback>>) -> Result<()> {
    let rc = RcFile::load_default().context("Failed to read rc file")?;
    let remote = args
        .credentials
        .to_args()
        .resolve(|k| std::env::var(k).ok(), rc.as_ref())?;
    let publisher = connect(&remote, args.timeout).context("Failed to set up the HTTP client")?;

    let config = build_up_config(args, progress.clone().map(|cb| cb as ProgressCallback))?;
    let output = match publish(&args.target, &config, publisher.as_ref()).await {
        Ok(output) => output,
        Err(e) => {
            if let Some(cb) = &progress {
                cb.abandon();
            }
            return Err(e).context("Publishing failed");
        }
    };

    let rc_clipboard = rc.map(|r| r.tool.goto_clipboard).unwrap_or(false);
    if flag_pair(args.clipboard, args.no_clipboard).unwrap_or(rc_clipboard) {
        copy_to_clipboard(&output.markdown);
    }

    if !cli.quiet {
        print_summary(&output);
    }
    Ok(())
}

async fn run_convert(
    cli: &Cli,
    args: &ConvertArgs,
    progress: Option<Arc<CliProgressCallback>>,
) -> Result<()> {
    let mut builder = render_builder(&args.render);
    if let Some(cb) = progress.clone() {
        builder = builder.progress_callback(cb as ProgressCallback);
    }
    let config = builder.build().context("Invalid configuration")?;

    let output = match convert_to_markdown(&args.target, args.output.as_deref(), &config).await {
        Ok(output) => output,
        Err(e) => {
            if let Some(cb) = &progress {
                cb.abandon();
            }
            return Err(e).context("Conversion failed");
        }
    };

    if !cli.quiet {
        match &output.saved_to {
            Some(path) => eprintln!("{}  →  {}", green("✔"), bold(&path.display().to_string())),
            None => eprintln!("{}", dim("Input is already markdown; nothing written.")),
        }
    }
    Ok(())
}

fn run_reset(cli: &Cli, targets: &[PathBuf]) -> Result<()> {
    for target in targets {
        let changed = reset_notebook(target)
            .with_context(|| format!("Failed to reset {}", target.display()))?;
        if !cli.quiet {
            let status = if changed {
                green("reset")
            } else {
                dim("no metadata")
            };
            eprintln!("{}  {}", status, target.display());
        }
    }
    Ok(())
}

fn run_ls(dir: &std::path::Path) -> Result<()> {
    let rows = list_notebooks(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?;
    if rows.is_empty() {
        println!("No ipynb in {}", dir.display());
    } else {
        print!("{}", format_listing(&rows));
    }
    Ok(())
}

fn run_config(flags: &CredentialFlags) -> Result<()> {
    let rc_path = dirs::home_dir().map(|h| h.join(RC_FILE_NAME));
    let rc = RcFile::load_default().context("Failed to read rc file")?;
    println!(
        "rc file:  {}",
        match (&rc_path, &rc) {
            (Some(path), Some(_)) => path.display().to_string(),
            (Some(path), None) => format!("{} (not found)", path.display()),
            (None, _) => "(no home directory)".to_string(),
        }
    );

    let remote = flags
        .to_args()
        .resolve(|k| std::env::var(k).ok(), rc.as_ref())?;
    match &remote.credentials {
        Credentials::Esa { team, token } => {
            println!("backend:  esa.io");
            println!("team:     {team}");
            println!("token:    {}", mask(token));
        }
        Credentials::Growi {
            url,
            token,
            username,
        } => {
            println!("backend:  Growi");
            println!("url:      {url}");
            println!("username: {username}");
            println!("token:    {}", mask(token));
        }
    }
    println!(
        "proxy:    {}",
        remote.proxy.as_deref().unwrap_or("(none)")
    );
    let clipboard = rc.map(|r| r.tool.goto_clipboard).unwrap_or(false);
    println!("clipboard: {clipboard}");
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn render_builder(render: &RenderFlags) -> esapub::PublishConfigBuilder {
    PublishConfig::builder()
        .folding(render.folding.clone().into())
        .keep_workdir(render.keep_workdir)
        .scroll_height_px(render.scroll_height)
}

/// Map `up` flags to `PublishConfig`.
fn build_up_config(args: &UpArgs, progress: Option<ProgressCallback>) -> Result<PublishConfig> {
    let output_mode = match args.output_mode {
        OutputModeArg::Overwrite => OutputMode::Overwrite,
        OutputModeArg::Copy => OutputMode::Copy {
            path: args.output.clone(),
        },
        OutputModeArg::Discard => OutputMode::Discard,
    };
    if args.output.is_some() && !matches!(output_mode, OutputMode::Copy { .. }) {
        warn!("--output only applies to --output-mode copy; ignoring it");
    }

    let mut builder = render_builder(&args.render)
        .publish_mode(args.publish_mode.clone().into())
        .post_mode(args.post_mode.clone().into())
        .output_mode(output_mode)
        .timeout_secs(args.timeout);

    if let Some(title) = &args.title {
        builder = builder.title(title.clone());
    }
    if let Some(tags) = &args.tags {
        builder = builder.tags(tags.iter().map(|t| t.trim().to_string()).collect());
    }
    if let Some(category) = &args.category {
        builder = builder.category(category.clone());
    }
    if let Some(message) = &args.message {
        builder = builder.message(message.clone());
    }
    if let Some(wip) = flag_pair(args.wip, args.no_wip) {
        builder = builder.wip(wip);
    }
    if let Some(number) = &args.number {
        builder = builder.post_number(parse_post_id(number));
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// `--x` / `--no-x` → `Some(true)` / `Some(false)`, neither → `None`.
fn flag_pair(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

/// `123` → esa post number, anything else → Growi page id.
fn parse_post_id(s: &str) -> PostId {
    match s.trim().parse::<u64>() {
        Ok(n) => PostId::Number(n),
        Err(_) => PostId::Page(s.trim().to_string()),
    }
}

fn copy_to_clipboard(markdown: &str) {
    match arboard::Clipboard::new().and_then(|mut cb| cb.set_text(markdown.to_string())) {
        Ok(()) => eprintln!("{} {}", cyan("◆"), dim("Markdown copied to clipboard")),
        Err(e) => warn!("Could not copy to clipboard: {}", e),
    }
}

fn print_summary(output: &PublishOutput) {
    match &output.post {
        Some(post) => eprintln!(
            "{}  {} post {}  →  {}",
            green("✔"),
            if post.updated { "Updated" } else { "Created" },
            bold(&post.id.to_string()),
            bold(&post.url),
        ),
        None => eprintln!("{}  {}", cyan("◆"), dim("Publishing skipped")),
    }
    if let Some(path) = &output.saved_to {
        eprintln!("   saved {}", dim(&path.display().to_string()));
    }
    if output.stats.failed() > 0 {
        for failure in &output.stats.failures {
            eprintln!("   {} {}", red("✗"), failure);
        }
    }
}
