use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

/// The agent's input and output channel.
#[async_trait]
pub trait Console: Send {
    /// Next line of input, or `None` once input is closed.
    ///
    /// Must be cancel-safe: the loop races it against a heartbeat timer and
    /// Ctrl-C, and a cancelled read must not lose buffered input.
    async fn read_input(&mut self) -> std::io::Result<Option<String>>;

    async fn write_output(&mut self, text: &str) -> std::io::Result<()>;
}

/// Line-based console on stdin and stdout.
pub struct StdConsole {
    lines: Lines<BufReader<Stdin>>,
    prompt: String,
}

impl StdConsole {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            prompt: prompt.into(),
        }
    }
}

#[async_trait]
impl Console for StdConsole {
    async fn read_input(&mut self) -> std::io::Result<Option<String>> {
        self.lines.next_line().await
    }

    async fn write_output(&mut self, text: &str) -> std::io::Result<()> {
        let mut out = tokio::io::stdout();
        out.write_all(format!("{}{text}\n", self.prompt).as_bytes()).await?;
        out.flush().await
    }
}
