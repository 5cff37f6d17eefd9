use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Someone who acknowledges pauses: after a mismatch, after each replayed
/// wrapper and in step mode.
#[async_trait]
pub trait Operator: Send + Sync {
    async fn acknowledge(&self, prompt: &str);
}

/// Waits for a line on stdin.
#[derive(Debug, Default)]
pub struct StdinOperator;

#[async_trait]
impl Operator for StdinOperator {
    async fn acknowledge(&self, prompt: &str) {
        log::warn!("{prompt} Press enter to continue");
        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        if let Err(e) = stdin.read_line(&mut line).await {
            log::error!("Failed to read operator input: {e}");
        }
    }
}
