// Evpipe Delivery - Consumer Processes
// Spawning the downstream consumer (typically `ssh host evpipe-recv`)

use std::io::{self, Write};
use std::process::{Child, ChildStdin, Command, Stdio};

/// A running downstream consumer that accepts protocol lines.
pub trait Consumer: Write {
    /// Close the input pipe and wait for the consumer to exit.
    fn close(&mut self);

    /// Kill the consumer and reap it.
    fn kill(&mut self);
}

/// Starts fresh consumers on demand.
pub trait Launcher {
    fn launch(&mut self) -> io::Result<Box<dyn Consumer>>;

    /// Human readable description for logs.
    fn describe(&self) -> String;
}

/// Runs a shell command line with a piped stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLauncher {
    command: String,
}

impl CommandLauncher {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl Launcher for CommandLauncher {
    fn launch(&mut self) -> io::Result<Box<dyn Consumer>> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .spawn()?;
        let stdin = child.stdin.take();
        log::info!("Started consumer (pid {}): {}", child.id(), self.command);
        Ok(Box::new(ChildConsumer { child, stdin }))
    }

    fn describe(&self) -> String {
        self.command.clone()
    }
}

/// Consumer backed by a child process.
pub struct ChildConsumer {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl ChildConsumer {
    fn stdin(&mut self) -> io::Result<&mut ChildStdin> {
        self.stdin
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))
    }

    fn reap(&mut self) {
        match self.child.wait() {
            Ok(status) => log::debug!("Consumer {} exited: {}", self.child.id(), status),
            Err(e) => log::warn!("Failed to wait for consumer {}: {}", self.child.id(), e),
        }
    }
}

impl Write for ChildConsumer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stdin()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stdin()?.flush()
    }
}

impl Consumer for ChildConsumer {
    fn close(&mut self) {
        self.stdin.take();
        self.reap();
    }

    fn kill(&mut self) {
        self.stdin.take();
        if let Err(e) = self.child.kill() {
            // Already exited
            log::debug!("Kill of consumer {}: {}", self.child.id(), e);
        }
        self.reap();
    }
}
