use anyhow::{Context, Result};
use chatlink::predictor::{PredictOptions, Predictor};
use cliclack::spinner;
use console::style;
use futures::StreamExt;
use std::io::Write;

use super::conversation_for;

pub async fn execute(
    predictor: &Predictor,
    prompt: &str,
    system: Option<&str>,
    stream: bool,
    options: &PredictOptions,
) -> Result<()> {
    let mut conversation = conversation_for(prompt, system);

    if stream {
        let mut fragments = predictor.stream(&mut conversation, options).await?;
        let mut stdout = std::io::stdout();
        while let Some(fragment) = fragments.next().await {
            write!(stdout, "{}", fragment?)?;
            stdout.flush()?;
        }
        writeln!(stdout)?;
        return Ok(());
    }

    let spin = spinner();
    spin.start("awaiting reply");
    let result = predictor.predict(&mut conversation, options).await;
    spin.stop("");
    result?;

    let reply = conversation
        .last()
        .context("Conversation is empty after prediction")?;
    println!("{} {}", style("chatlink:").green().bold(), reply.content);
    Ok(())
}
