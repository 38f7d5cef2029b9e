//! Interactive questions on the terminal.

use anyhow::Result;
use inquire::{Confirm, Select};
use swapenv_core::SwapenvError;

/// Yes/no question defaulting to no.
pub fn confirm(question: &str) -> Result<bool> {
    Confirm::new(question)
        .with_default(false)
        .prompt()
        .map_err(|e| anyhow::anyhow!("Failed to read input: {e}"))
}

/// Pick among the waiting senders, returned as a 0-based index.
pub fn choose_stream(codes: &[String]) -> swapenv_core::Result<usize> {
    Select::new("Multiple active streams, pick one:", codes.to_vec())
        .with_help_message("Session code shown on the sending device")
        .raw_prompt()
        .map(|choice| choice.index)
        .map_err(|e| SwapenvError::InvalidInput(format!("No stream selected: {e}")))
}
