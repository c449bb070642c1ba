use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "quorum-server", about = "Scheduling poll and event bot")]
pub struct Args {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "quorum.toml")]
    pub config: String,
}
