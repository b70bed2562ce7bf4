//! `porter serve`: answer requests from the engine and reload edited
//! modules until interrupted.

use porter::Porter;

use crate::cli::ServeArgs;
use crate::commands::{load_options, resolve_root};
use crate::error::Result;
use crate::server;
use crate::ui;

pub async fn execute(args: ServeArgs) -> Result<()> {
    let root = resolve_root(args.root.as_deref())?;
    let options = load_options(&root, |_| {})?;
    let porter = Porter::new(options);

    ui::info("Preparing bundles...");
    porter.ready(false).await?;
    if !args.no_watch {
        porter.watch().await?;
    }

    let result = server::serve(porter.clone(), &args.host, args.port).await;
    porter.destroy();
    result
}
