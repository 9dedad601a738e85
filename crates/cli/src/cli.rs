use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about = "Cortex inference engine CLI", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Interactive chat REPL (default)
    Chat(ChatArgs),

    /// Run a single prompt non-interactively
    Run(RunArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ChatArgs {
    /// Directory containing config.txt, vocab.txt, weight files, etc.
    #[arg(short, long, default_value = ".")]
    pub model: PathBuf,

    #[arg(long)]
    pub system: Option<String>,

    #[arg(long)]
    pub temperature: Option<f32>,

    #[arg(long)]
    pub top_p: Option<f32>,

    #[arg(long)]
    pub top_k: Option<usize>,

    #[arg(long)]
    pub max_tokens: Option<usize>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(short, long, default_value = ".")]
    pub model: PathBuf,

    pub prompt: String,

    #[arg(long)]
    pub temperature: Option<f32>,

    #[arg(long)]
    pub top_p: Option<f32>,

    #[arg(long)]
    pub top_k: Option<usize>,

    #[arg(long)]
    pub max_tokens: Option<usize>,
}
