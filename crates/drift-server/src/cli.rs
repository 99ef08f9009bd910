use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "drift-server",
    about = "Anonymous matchmaking chat with durable private conversations"
)]
pub struct Args {
    /// Path to the TOML configuration file. Created with defaults when
    /// missing.
    #[arg(short, long, default_value = "drift.toml")]
    pub config: String,
}
