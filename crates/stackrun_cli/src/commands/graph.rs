//! Graph-dependencies command - print the stack's dependency graph.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use super::{load_stack, StackArgs};

#[derive(Args, Debug)]
pub struct GraphArgs {
    #[command(flatten)]
    pub stack: StackArgs,

    /// Write the DOT graph to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub async fn execute(args: GraphArgs) -> Result<()> {
    let config = args.stack.load_config()?;
    let working_dir = args.stack.working_dir()?;
    let stack = load_stack(&working_dir, &config)?;
    let dot = stack.graph();

    match &args.output {
        Some(path) => {
            std::fs::write(path, &dot)
                .with_context(|| format!("Failed to write graph to {}", path.display()))?;
            info!("Wrote dependency graph of {} modules to {:?}", stack.len(), path);
        }
        None => print!("{}", dot),
    }
    Ok(())
}
