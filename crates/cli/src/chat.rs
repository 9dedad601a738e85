//! Interactive chat REPL, grounded on the teacher's `cli_mode.rs`/
//! `chat.rs` (`/reset`, `/temp`, `/len` commands; `<<READY>>` prompt
//! marker for driving the CLI from another process).

use std::io::{self, Write};

use anyhow::Result;
use cortex_engine::generation::GenerationOptions;
use cortex_engine::tokenizer::ChatMessage;
use cortex_engine::Session;

use crate::cli::ChatArgs;

pub fn run(args: ChatArgs) -> Result<()> {
    println!("Loading model from {:?}", args.model);
    let mut session = Session::load(&args.model)?;
    println!("Model loaded. Type /bye to exit, /reset to clear context.\n");

    let mut history = Vec::new();
    if let Some(system) = &args.system {
        history.push(ChatMessage {
            role: "system".to_string(),
            content: system.clone(),
        });
    }

    let mut options = GenerationOptions {
        temperature: args.temperature,
        top_p: args.top_p,
        top_k: args.top_k,
        max_tokens: args.max_tokens,
        ..Default::default()
    };

    loop {
        eprintln!("<<READY>>");
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }
        if input == "/bye" || input == "/exit" {
            break;
        }
        if input == "/reset" {
            session.reset();
            history.clear();
            println!("Context cleared.");
            continue;
        }
        if let Some(rest) = input.strip_prefix("/temp ") {
            if let Ok(v) = rest.parse::<f32>() {
                options.temperature = Some(v);
                println!("temperature set to {v:.2}");
            } else {
                println!("invalid temperature");
            }
            continue;
        }
        if let Some(rest) = input.strip_prefix("/len ") {
            if let Ok(v) = rest.parse::<usize>() {
                options.max_tokens = Some(v);
                println!("max_tokens set to {v}");
            } else {
                println!("invalid length");
            }
            continue;
        }

        history.push(ChatMessage {
            role: "user".to_string(),
            content: input.to_string(),
        });

        let mut callback = |text: &str, _id: u32| {
            print!("{text}");
            let _ = io::stdout().flush();
        };

        match session.generate(&history, &options, None, Some(&mut callback)) {
            Ok(response) => {
                println!();
                tracing::debug!(
                    ttft_ms = response.time_to_first_token_ms,
                    tps = response.tokens_per_second,
                    prompt_tokens = response.prompt_tokens,
                    completion_tokens = response.completion_tokens,
                    outcome = ?response.outcome,
                    "generation finished"
                );
                history.push(ChatMessage {
                    role: "assistant".to_string(),
                    content: response.response,
                });
            }
            Err(e) => {
                println!("error: {e}");
                history.pop();
            }
        }
    }

    println!("bye");
    Ok(())
}
