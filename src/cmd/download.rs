//! The `download` subcommand.

use clap::Args;

use super::CacheOpts;
use crate::{models::Resource, prelude::*, ui::Ui};

/// Download the recognition model and charset into the cache.
#[derive(Debug, Args)]
pub struct DownloadOpts {
    /// Download again even if the files are already cached.
    #[clap(long)]
    pub force: bool,

    #[clap(flatten)]
    pub cache: CacheOpts,
}

/// Run the `download` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_download(ui: Ui, opts: &DownloadOpts) -> Result<()> {
    let store = opts.cache.model_store(&ui)?;
    info!(cache_dir = %store.cache_dir().display(), "using model cache");
    for resource in Resource::ALL {
        // A forced download replaces the cached copy only once it completes.
        let path = if opts.force {
            store.download(resource).await?
        } else {
            store.resolve(resource, None).await?
        };
        ui.display_message(
            "✅",
            &format!("{} ready at {}", resource.description(), path.display()),
        );
    }
    Ok(())
}
