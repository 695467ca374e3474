//! The `ragcoder validate` and `ragcoder preview` commands.
//!
//! Both work offline: they load the configured inputs without contacting
//! the model, so a study can be checked before any tokens are spent.

use anyhow::{bail, Result};

use rag_coder_core::models::SelectionStrategy;
use rag_coder_core::{prompt, select};

use crate::config::Config;
use crate::input;

/// Load the codebook and responses and report what a run would see.
pub fn run_validate(config: &Config) -> Result<()> {
    let codebook = input::load_codebook(&config.codebook)?;
    let responses = input::load_responses(&config.responses)?;
    let blank = responses.iter().filter(|r| r.is_blank()).count();
    let with_examples = codebook
        .entries()
        .iter()
        .filter(|e| !e.examples.is_empty())
        .count();

    println!("Configuration OK");
    println!(
        "  codebook:   {} entries ({} with examples)",
        codebook.len(),
        with_examples
    );
    println!(
        "  responses:  {} ({} blank, not sent to the model)",
        responses.len(),
        blank
    );
    println!(
        "  gateway:    {} / {}",
        config.gateway.provider,
        config.gateway.model_name()
    );
    println!(
        "  context:    {}",
        if codebook.len() <= config.context_selection.max_full_codebook {
            "full codebook".to_string()
        } else {
            format!("top {} entries per response", config.context_selection.k)
        }
    );
    Ok(())
}

/// Print the exact prompt that would be sent for `response_id`.
pub fn run_preview(config: &Config, response_id: &str) -> Result<()> {
    let codebook = input::load_codebook(&config.codebook)?;
    let responses = input::load_responses(&config.responses)?;

    let Some(response) = responses.iter().find(|r| r.response_id == response_id) else {
        bail!("No response with id '{}' in {}", response_id, config.responses.path.display());
    };
    if response.is_blank() {
        println!("Response '{}' is blank and would not be sent to the model.", response_id);
        return Ok(());
    }

    let context = select::select(response, &codebook, &config.context_selection.params())?;
    let text = prompt::build(response, &context, &config.prompt.instructions());

    let strategy = match context.strategy {
        SelectionStrategy::Full => "full codebook",
        SelectionStrategy::Ranked => "ranked",
    };
    eprintln!(
        "# {} candidate code(s), {}, prompt sha256 {}",
        context.entries.len(),
        strategy,
        prompt::prompt_hash(&text)
    );
    print!("{}", text);
    Ok(())
}
