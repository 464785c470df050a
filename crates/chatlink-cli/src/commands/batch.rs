use anyhow::{bail, Context, Result};
use chatlink::predictor::{PredictOptions, Predictor};
use cliclack::spinner;
use console::style;
use std::path::Path;

use super::conversation_for;

/// Non-empty, trimmed lines of a prompt file
pub fn read_prompts(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read prompt file {}", path.display()))?;
    let prompts: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();

    if prompts.is_empty() {
        bail!("Prompt file {} contains no prompts", path.display());
    }
    Ok(prompts)
}

pub async fn execute(
    predictor: &Predictor,
    path: &Path,
    system: Option<&str>,
    max_concurrent: usize,
    options: &PredictOptions,
) -> Result<()> {
    let prompts = read_prompts(path)?;
    let conversations = prompts
        .iter()
        .map(|prompt| conversation_for(prompt, system))
        .collect();

    let spin = spinner();
    spin.start(format!(
        "predicting {} prompts, {} at a time",
        prompts.len(),
        max_concurrent
    ));
    let result = predictor.batch(conversations, options, max_concurrent).await;
    spin.stop("");

    for (prompt, conversation) in prompts.iter().zip(result?) {
        let reply = conversation.last().map(|m| m.content.as_str()).unwrap_or("");
        println!("{} {}", style(">").dim(), style(prompt).bold());
        println!("{}\n", reply);
    }
    Ok(())
}
