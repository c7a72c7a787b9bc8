use std::path::PathBuf;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::info;

use crate::error::Result;
use crate::llm::LanguageModel;
use crate::session::{ChatSession, SessionReply};

const BANNER: &str = "\n===== Interactive Blog Writer Chat =====\n\
Type 'exit' or 'quit' to end the conversation\n\
Type 'clear' to clear conversation history\n\
========================================\n";

/// Terminal front end: reads lines from `input` and writes the dialogue to
/// `output` until `exit`, `quit` or end of input.
pub struct Repl<'a, M: LanguageModel + ?Sized> {
    session: &'a ChatSession<M>,
    html_out: Option<PathBuf>,
}

impl<'a, M: LanguageModel + ?Sized> Repl<'a, M> {
    pub fn new(session: &'a ChatSession<M>) -> Self {
        Self {
            session,
            html_out: None,
        }
    }

    /// Writes every newly generated HTML post to `path`.
    pub fn with_html_out(mut self, path: impl Into<PathBuf>) -> Self {
        self.html_out = Some(path.into());
        self
    }

    pub async fn run<R, W>(&self, input: R, mut output: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        output.write_all(BANNER.as_bytes()).await?;
        let mut lines = input.lines();

        loop {
            output.write_all(b"\nYou: ").await?;
            output.flush().await?;

            let Some(line) = lines.next_line().await? else {
                output.write_all(b"\n").await?;
                break;
            };

            match self.session.handle(&line).await {
                Ok(SessionReply::Ignored) => continue,
                Ok(SessionReply::Exit) => {
                    output.write_all(b"Ending conversation...\n").await?;
                    break;
                }
                Ok(reply @ SessionReply::Cleared) => {
                    output.write_all(format!("{}\n", reply.text()).as_bytes()).await?;
                }
                Ok(reply) => {
                    output
                        .write_all(format!("\nAssistant: {}\n", reply.text()).as_bytes())
                        .await?;
                    self.save_html().await?;
                }
                Err(err) => {
                    output.write_all(format!("\nError: {err}\n").as_bytes()).await?;
                }
            }
        }

        output.flush().await?;
        Ok(())
    }

    async fn save_html(&self) -> Result<()> {
        let (Some(path), Some(html)) = (&self.html_out, self.session.latest_html().await) else {
            return Ok(());
        };
        tokio::fs::write(path, html).await?;
        info!(path = %path.display(), "saved generated HTML");
        Ok(())
    }
}
