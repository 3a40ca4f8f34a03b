use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

use prthreads::config::{Config, ViewMode};
use prthreads::headless::{self, HeadlessRequest};

#[derive(Parser, Debug)]
#[command(name = "prt")]
#[command(about = "Print a pull request file's diff with its review comment threads inline")]
#[command(version)]
struct Args {
    /// Repository name (e.g., "owner/repo")
    #[arg(short, long)]
    repo: String,

    /// Pull request number
    #[arg(short, long)]
    pr: u32,

    /// Path of the changed file to open
    #[arg(short, long)]
    file: String,

    /// Diff view (overrides config)
    #[arg(long, value_enum)]
    mode: Option<ViewMode>,

    /// Wrap width for comment bodies (overrides config)
    #[arg(long)]
    width: Option<u16>,

    /// Viewport rows for the plain view, 0 = whole file (overrides config)
    #[arg(long)]
    height: Option<u16>,

    /// First row to show in the plain view
    #[arg(long, default_value = "0")]
    scroll: usize,

    /// Post a new comment on this line (plain view) before printing
    #[arg(long, requires = "body")]
    comment_line: Option<u32>,

    /// Body of the comment posted with --comment-line
    #[arg(long, requires = "comment_line")]
    body: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .with_env_var("PRT_LOG")
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = Config::load()?;
    if let Some(mode) = args.mode {
        config.view.mode = mode;
    }
    if let Some(width) = args.width {
        config.view.width = width;
    }
    if let Some(height) = args.height {
        config.view.height = height;
    }

    let request = HeadlessRequest {
        repo: args.repo,
        pr_number: args.pr,
        filename: args.file,
        scroll: args.scroll,
        comment: args.comment_line.zip(args.body),
    };
    headless::run(&request, &config).await
}
