use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "formsd",
    version,
    about = "Form and exam sidecar speaking JSON lines over stdio."
)]
pub struct Config {
    /// Workspace directory to open before reading requests.
    #[arg(long, env = "FORMSD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// tracing filter directive; logs go to stderr.
    #[arg(long = "log", env = "FORMSD_LOG", default_value = "formsd=info")]
    pub log_filter: String,
}
