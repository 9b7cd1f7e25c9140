//! A [`MessageHandler`] that runs an executable per message.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, bail};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::model::Envelope;
use crate::receiver::MessageHandler;

/// Runs `command` with the message body on stdin.
///
/// Headers are passed as JSON in `REDISQ_HEADERS`. A zero exit status acks
/// the message; anything else rejects it. A command may exit without reading
/// all of stdin.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    command: PathBuf,
    args: Vec<String>,
}

impl CommandHandler {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
        }
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl MessageHandler for CommandHandler {
    async fn handle(&self, envelope: &Envelope) -> anyhow::Result<()> {
        let headers = serde_json::to_string(envelope.headers())?;
        debug!(command = %self.command.display(), "running message command");

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .env("REDISQ_HEADERS", headers)
            .stdin(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.command.display()))?;

        let stdin = child.stdin.take();
        let body = envelope.body();
        let write = async move {
            match stdin {
                // Dropping stdin closes the pipe so the command sees EOF.
                Some(mut stdin) => stdin.write_all(body).await,
                None => Ok(()),
            }
        };
        let (written, status) = tokio::join!(write, child.wait());

        let status = status?;
        match written {
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
            written => written?,
        }
        if !status.success() {
            bail!(
                "{} exited with status {}",
                self.command.display(),
                status.code().unwrap_or(-1)
            );
        }
        Ok(())
    }
}
