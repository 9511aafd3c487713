//! Interactive consent prompt.

use async_trait::async_trait;
use sandcode_tools::{ConsentHandler, ConsentRequest};
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;
use tracing::warn;

/// Asks on stderr and reads the answer from `R`, stdin by default.
///
/// The reader lives behind the lock, so prompts never interleave and lines
/// buffered past one answer are kept for the next prompt.
pub struct PromptConsent<R = BufReader<Stdin>> {
    input: Mutex<R>,
}

impl PromptConsent {
    pub fn stdin() -> Self {
        Self::with_reader(BufReader::new(tokio::io::stdin()))
    }
}

impl<R> PromptConsent<R> {
    pub fn with_reader(reader: R) -> Self {
        Self {
            input: Mutex::new(reader),
        }
    }
}

#[async_trait]
impl<R> ConsentHandler for PromptConsent<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn request_consent(&self, request: &ConsentRequest) -> bool {
        let mut input = self.input.lock().await;

        let mut stderr = std::io::stderr();
        let _ = writeln!(stderr, "\nAllow {} ({})?", request.tool, request.call_id);
        if let Some(preview) = &request.preview {
            for line in preview.lines() {
                let _ = writeln!(stderr, "  {line}");
            }
        }
        let _ = write!(stderr, "[y/N] ");
        let _ = stderr.flush();

        let mut answer = String::new();
        if let Err(e) = input.read_line(&mut answer).await {
            warn!(error = %e, "Failed to read consent answer");
            return false;
        }
        is_yes(&answer)
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
