use clap::Subcommand;

pub mod config;
pub mod init;
pub mod server;

pub use config::cmd_config;
pub use init::cmd_init;
pub use server::cmd_server;

#[derive(clap::Parser, Debug)]
#[command(name = "dopefs", about = "An encrypted FUSE filesystem over an embedded key/value store")]
pub struct Cli {
    #[command(subcommand)]
    pub subcommands: Subcommands,
}

#[derive(Subcommand, Debug)]
pub enum Subcommands {
    /// Create a new volume: password, quota and an initial config section.
    Init(init::Cli),
    /// Resize an existing volume's quota in place.
    Config(config::Cli),
    /// Start, stop, restart or query the FUSE mount daemon for a volume.
    Server(server::Cli),
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.subcommands {
        Subcommands::Init(args) => cmd_init(args),
        Subcommands::Config(args) => cmd_config(args),
        Subcommands::Server(args) => cmd_server(args),
    }
}
