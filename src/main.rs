//! Rich Store CLI Application
//!
//! Export, import, recover and query secondary indices of a block store.

use clap::{Parser, Subcommand};
use rich_store::cli::{self, AddressFilter};
use rich_store::core::Address;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rich-store")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "Secondary indices for a block store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a store snapshot into bulk-load files
    Export {
        /// Store snapshot (JSON)
        store: PathBuf,

        /// Output directory
        out_dir: PathBuf,

        /// Write a header row into every file
        #[arg(long)]
        header: bool,
    },

    /// Bulk-load exported files into a relational index
    Import {
        /// Directory of exported files
        dir: PathBuf,

        /// SQLite database file
        #[arg(long)]
        database: PathBuf,

        /// Staging directory of the index instance
        #[arg(long, default_value = ".rich_store/staging")]
        staging_dir: PathBuf,
    },

    /// List indexed transactions
    Transactions {
        /// Rich store configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Store snapshot (JSON)
        #[arg(short, long)]
        store: PathBuf,

        /// Only transactions signed by this address
        #[arg(long, conflicts_with = "involved")]
        signer: Option<Address>,

        /// Only transactions that updated this address
        #[arg(long)]
        involved: Option<Address>,

        /// Highest nonce first
        #[arg(long)]
        desc: bool,

        /// Rows to skip; negative values count back from the tip
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        offset: i64,

        /// Maximum rows to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// List indexed blocks
    Blocks {
        /// Rich store configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Store snapshot (JSON)
        #[arg(short, long)]
        store: PathBuf,

        /// Only blocks mined by this address
        #[arg(long)]
        miner: Option<Address>,

        /// Skip blocks without transactions
        #[arg(long)]
        exclude_empty: bool,

        /// Highest index first
        #[arg(long)]
        desc: bool,

        /// Rows to skip; negative values count back from the tip
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        offset: i64,

        /// Maximum rows to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Load staging files left behind by a crashed instance
    Recover {
        /// Rich store configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Export {
            store,
            out_dir,
            header,
        } => {
            cli::cmd_export(&store, &out_dir, header)?;
        }

        Commands::Import {
            dir,
            database,
            staging_dir,
        } => {
            cli::cmd_import(&dir, &database, &staging_dir)?;
        }

        Commands::Transactions {
            config,
            store,
            signer,
            involved,
            desc,
            offset,
            limit,
        } => {
            let filter = signer
                .map(AddressFilter::Signer)
                .or(involved.map(AddressFilter::Involved));
            cli::cmd_transactions(&config, &store, filter, desc, offset, limit)?;
        }

        Commands::Blocks {
            config,
            store,
            miner,
            exclude_empty,
            desc,
            offset,
            limit,
        } => {
            cli::cmd_blocks(&config, &store, miner, exclude_empty, desc, offset, limit)?;
        }

        Commands::Recover { config } => {
            cli::cmd_recover(&config)?;
        }
    }

    Ok(())
}
