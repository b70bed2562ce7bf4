//! Command-line interface definition.
//!
//! - `porter build` - compile every reachable bundle and write `manifest.json`
//! - `porter serve` - serve bundles on demand and reload edited modules

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Porter - a browser module bundler
#[derive(Parser, Debug)]
#[command(
    name = "porter",
    version,
    about = "A browser module bundler",
    long_about = "Porter resolves CommonJS and ES modules against installed packages,\n\
                  transpiles and caches each file, and assembles content-hashed bundles\n\
                  for a small client-side loader."
)]
pub struct Cli {
    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile all bundles to the output directory
    Build(BuildArgs),

    /// Start the development server
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
    /// Entries compiled in addition to the configured ones
    #[arg(value_name = "ENTRY")]
    pub entries: Vec<String>,

    /// Project root (defaults to the current directory)
    #[arg(short, long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Output directory, relative to the root
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Remove the output directory before compiling
    #[arg(long)]
    pub clean: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Project root (defaults to the current directory)
    #[arg(short, long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, default_value_t = 5000)]
    pub port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Do not watch sources for changes
    #[arg(long)]
    pub no_watch: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_build_entries_and_overrides() {
        let cli = Cli::parse_from([
            "porter", "build", "home.js", "about.js", "--output", "dist", "--clean",
        ]);
        let Command::Build(args) = cli.command else {
            panic!("expected build");
        };
        assert_eq!(args.entries, vec!["home.js", "about.js"]);
        assert_eq!(args.output, Some(PathBuf::from("dist")));
        assert!(args.clean);
        assert!(args.root.is_none());
    }

    #[test]
    fn serve_defaults() {
        let cli = Cli::parse_from(["porter", "serve"]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.port, 5000);
        assert_eq!(args.host, "127.0.0.1");
        assert!(!args.no_watch);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["porter", "build", "--verbose", "--no-color"]);
        assert!(cli.verbose);
        assert!(cli.no_color);
        assert!(Cli::try_parse_from(["porter", "build", "-v", "-q"]).is_err());
    }
}
