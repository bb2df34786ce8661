use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use monocr::{cmd, prelude::*, ui::Ui};

/// Recognize traditional Mongolian script in images and PDFs.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - MONOCR_CACHE_DIR (optional): Where to cache the model and charset.
  - MONOCR_MODEL_URL (optional): Base URL to download them from.
  - RUST_LOG (optional): Logging filter, such as `debug` or `monocr=trace`.

  These variables may be set in a standard `.env` file.

  PDF support requires `pdftocairo` and `pdfinfo` from poppler-utils.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Recognize text in a single image.
    Image(cmd::image::ImageOpts),
    /// Recognize text on every page of a PDF.
    Pdf(cmd::pdf::PdfOpts),
    /// Recognize every image and PDF in a directory.
    Batch(cmd::batch::BatchOpts),
    /// Download the model and charset into the local cache.
    Download(cmd::download::DownloadOpts),
}

impl Cmd {
    /// Are we using stdout for output?
    fn using_stdout_for_output(&self) -> bool {
        match self {
            Cmd::Image(opts) => opts.output.output_path.is_none(),
            Cmd::Pdf(opts) => opts.output.output_path.is_none(),
            Cmd::Batch(opts) => opts.output.output_path.is_none(),
            Cmd::Download(_) => false,
        }
    }
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);
    tracing_subscriber::registry().with(subscriber).init();

    real_main(ui).await
}

/// Our real entry point, once logging is up.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    dotenvy::dotenv().ok();

    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Progress bars would interleave with results on stdout.
    if opts.subcmd.using_stdout_for_output() {
        ui.hide_progress_bars();
    }

    match &opts.subcmd {
        Cmd::Image(opts) => cmd::image::cmd_image(ui, opts).await,
        Cmd::Pdf(opts) => cmd::pdf::cmd_pdf(ui, opts).await,
        Cmd::Batch(opts) => cmd::batch::cmd_batch(ui, opts).await,
        Cmd::Download(opts) => cmd::download::cmd_download(ui, opts).await,
    }
}
