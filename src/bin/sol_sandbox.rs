//! sol-sandbox: build, deploy and call Anchor programs from the command line
//!
//! ## Commands
//!
//! - **serve**: Run the HTTP API
//! - **compile**: Build a program from one source file
//! - **deploy**: Publish a binary, or compile and publish source
//! - **status**: Reconcile and show a deployment
//! - **invoke**: Call a program method through its IDL
//!
//! ## Example Usage
//!
//! ```bash
//! # Serve the API against devnet
//! sol-sandbox serve --network devnet --keypair ~/.config/solana/id.json
//!
//! # Compile and deploy in one step on the in-process chain
//! sol-sandbox --local deploy --source lib.rs --name counter
//!
//! # Check a deployment
//! sol-sandbox status 7xKX...
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use sol_sandbox_core::Pipeline;

mod sandbox_cli;

use sandbox_cli::{
    compile::CompileCmd, deploy::DeployCmd, invoke::InvokeCmd, output::format_error,
    serve::ServeCmd, status::StatusCmd, GlobalArgs,
};

#[derive(Parser)]
#[command(
    name = "sol-sandbox",
    author,
    version,
    about = "Build-and-deploy sandbox for Anchor programs",
    long_about = "Compile Anchor programs in throwaway workspaces, deploy them with a single \
                  transaction and invoke their methods through the IDL."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalArgs,

    /// Output as JSON instead of human-readable format
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve(ServeCmd),

    /// Compile a program from a source file
    Compile(CompileCmd),

    /// Deploy a program binary or source
    Deploy(DeployCmd),

    /// Show the on-chain status of a deployed program
    Status(StatusCmd),

    /// Invoke a method of a deployed program
    Invoke(InvokeCmd),
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Serve(_) => "serve",
            Commands::Compile(_) => "compile",
            Commands::Deploy(_) => "deploy",
            Commands::Status(_) => "status",
            Commands::Invoke(_) => "invoke",
        }
    }
}

async fn run(command: Commands, global: &GlobalArgs, json: bool) -> Result<()> {
    let config = global.config()?;
    let pipeline = Pipeline::from_config(&config)?;

    match command {
        Commands::Serve(cmd) => cmd.execute(&config, pipeline).await,
        Commands::Compile(cmd) => cmd.execute(&pipeline, json).await,
        Commands::Deploy(cmd) => cmd.execute(&pipeline, json).await,
        Commands::Status(cmd) => cmd.execute(&pipeline, json).await,
        Commands::Invoke(cmd) => cmd.execute(&pipeline, json).await,
    }
}

#[tokio::main]
async fn main() {
    let Cli {
        command,
        global,
        json,
    } = Cli::parse();
    let command_name = command.name();

    let directive = if command_name == "serve" {
        "sol_sandbox=info"
    } else {
        "sol_sandbox=warn"
    };
    if let Err(e) = sol_sandbox_server::init_tracing(directive, true) {
        eprintln!("{}", format_error(&e, json));
    }

    if let Err(e) = run(command, &global, json).await {
        eprintln!("{}", format_error(&e, json));
        std::process::exit(1);
    }
}
