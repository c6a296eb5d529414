//! The console-like collaborators the session talks to: a line source for
//! user input and line sinks for chat resp. status output.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

#[async_trait]
pub trait LineSource: Send {
    /// the next input line, or `None` on end-of-input (a regular signal, not an error)
    async fn next_line(&mut self) -> anyhow::Result<Option<String>>;
}

pub trait LineSink: Send + Sync {
    fn line(&self, text: &str);
}

pub struct StdinSource {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinSource {
    pub fn new() -> StdinSource {
        StdinSource {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

#[async_trait]
impl LineSource for StdinSource {
    async fn next_line(&mut self) -> anyhow::Result<Option<String>> {
        Ok(self.lines.next_line().await?)
    }
}

pub struct StdoutSink;
impl LineSink for StdoutSink {
    fn line(&self, text: &str) {
        println!("{}", text);
    }
}

pub struct StderrSink;
impl LineSink for StderrSink {
    fn line(&self, text: &str) {
        eprintln!("{}", text);
    }
}
