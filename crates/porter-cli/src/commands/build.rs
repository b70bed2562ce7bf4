//! `porter build`: compile every reachable bundle with its source map and
//! write `manifest.json`.

use std::time::Instant;

use porter::Porter;
use tracing::debug;

use crate::cli::BuildArgs;
use crate::commands::{load_options, resolve_root};
use crate::error::{CliError, Result};
use crate::ui;

pub async fn execute(args: BuildArgs) -> Result<()> {
    let start_time = Instant::now();
    let root = resolve_root(args.root.as_deref())?;

    let options = load_options(&root, |config| {
        if let Some(output) = &args.output {
            config.output.path = output.clone();
        }
        if args.clean {
            config.output.clean = true;
        }
    })?;
    if options.entries.is_empty() && options.preload.is_empty() && args.entries.is_empty() {
        return Err(CliError::InvalidArgument(
            "no entries configured; pass ENTRY or set \"entries\" in the porter config".to_string(),
        ));
    }
    debug!("building {} into {}", root.display(), options.output.display());

    let output = options.output.clone();
    let porter = Porter::new(options);
    let manifest = porter.compile_all(&args.entries).await?;

    for (entry, file) in &manifest {
        ui::bundle_line(entry, file);
    }
    ui::success(&format!(
        "Compiled {} bundles to {} in {}",
        manifest.len(),
        output.display(),
        ui::format_duration(start_time.elapsed())
    ));
    Ok(())
}
