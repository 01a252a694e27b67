use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use code_rag::Result;
use code_rag::commands::{
    exit_code, load_config, normalize_extensions, run_config, run_index, serve_http, serve_stdio,
};
use code_rag::indexer::{IndexMode, IndexOptions};
use code_rag::mcp::PROJECT_ROOT_ENV;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "code-rag")]
#[command(about = "Local semantic code search with an MCP server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a project directory
    Index {
        /// Project root to index
        #[arg(default_value = ".")]
        path: PathBuf,
        /// Re-embed every file, ignoring stored content hashes
        #[arg(long)]
        full: bool,
        /// Drop all stored records before indexing
        #[arg(long)]
        clear: bool,
        /// Comma-separated extensions replacing the configured list, e.g. "py,rs"
        #[arg(long, value_delimiter = ',')]
        extensions: Option<Vec<String>>,
        /// Comma-separated directories excluded in addition to the active rules
        #[arg(long, value_delimiter = ',')]
        exclude_dirs: Vec<String>,
        /// Index files that look generated
        #[arg(long)]
        no_ast_filter: bool,
        /// Process at most this many files
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Start the MCP server over HTTP
    Serve {
        /// Address to bind (overrides the configuration)
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (overrides the configuration)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Start the MCP server on stdio for a single project
    Stdio {
        /// Project root; defaults to the current directory
        #[arg(long, env = PROJECT_ROOT_ENV)]
        project_root: Option<PathBuf>,
    },
    /// Create or show the configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Index {
            path,
            full,
            clear,
            extensions,
            exclude_dirs,
            no_ast_filter,
            limit,
        } => {
            let options = IndexOptions {
                mode: if full {
                    IndexMode::Full
                } else {
                    IndexMode::Incremental
                },
                clear,
                extensions: extensions.as_deref().map(normalize_extensions),
                exclude_dirs,
                no_generated_filter: no_ast_filter,
                limit,
            };
            run_index(path, options).await
        }
        Commands::Serve { host, port } => serve_http(load_config()?, host, port).await,
        Commands::Stdio { project_root } => serve_stdio(load_config()?, project_root).await,
        Commands::Config { show } => run_config(show),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("code_rag=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}
