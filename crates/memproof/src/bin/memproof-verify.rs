//! Offline inclusion proof checker.
//!
//! Reads a proof document (`{hash, root, proof, sides}`) from a file or
//! stdin and exits 0 if it folds to its root, 1 otherwise.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use memproof::api::GenerateProofResponse;
use memproof::core::{check_proof, check_proof_at, hash_memory};

#[derive(Debug, Parser)]
#[command(name = "memproof-verify", version, about = "Check a memproof inclusion proof offline")]
struct Args {
    /// Proof JSON file; reads stdin when omitted or "-".
    proof: Option<PathBuf>,

    /// Raw memory text the proof should be for.
    #[arg(long)]
    memory: Option<String>,

    /// Also check the path shape for this leaf index.
    #[arg(long, requires = "leaf_count")]
    index: Option<usize>,

    /// Number of leaves in the batch.
    #[arg(long, requires = "index")]
    leaf_count: Option<usize>,

    /// Only set the exit status.
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("MEMPROOF_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => {
            if !args.quiet {
                println!("valid");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            if !args.quiet {
                println!("invalid: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let input = read_input(args.proof.as_ref())?;
    let document: GenerateProofResponse =
        serde_json::from_str(&input).context("proof is not a valid proof document")?;
    let proof = document.to_proof()?;
    tracing::debug!(leaf = %proof.leaf_hash, root = %proof.root_hash, steps = proof.siblings.len(), "checking proof");

    if let Some(memory) = &args.memory {
        let expected = hash_memory(memory);
        anyhow::ensure!(
            expected == proof.leaf_hash,
            "memory hashes to {expected}, proof is for {}",
            proof.leaf_hash
        );
    }

    match (args.index, args.leaf_count) {
        (Some(index), Some(leaf_count)) => check_proof_at(&proof, index, leaf_count)?,
        _ => check_proof(&proof)?,
    }
    Ok(())
}

fn read_input(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            Ok(buf)
        }
    }
}
