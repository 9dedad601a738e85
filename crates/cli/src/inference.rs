//! Non-interactive single-prompt generation (`cortex run`).

use anyhow::Result;
use cortex_engine::generation::GenerationOptions;
use cortex_engine::tokenizer::ChatMessage;
use cortex_engine::Session;

use crate::cli::RunArgs;

pub fn run(args: RunArgs) -> Result<()> {
    let mut session = Session::load(&args.model)?;

    let messages = vec![ChatMessage {
        role: "user".to_string(),
        content: args.prompt,
    }];

    let options = GenerationOptions {
        temperature: args.temperature,
        top_p: args.top_p,
        top_k: args.top_k,
        max_tokens: args.max_tokens,
        ..Default::default()
    };

    let response = session.generate(&messages, &options, None, None)?;
    println!("{}", response.response);
    tracing::info!(
        ttft_ms = response.time_to_first_token_ms,
        tps = response.tokens_per_second,
        prompt_tokens = response.prompt_tokens,
        completion_tokens = response.completion_tokens,
        outcome = ?response.outcome,
        "generation finished"
    );
    Ok(())
}
