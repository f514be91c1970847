// Evpipe Delivery Channel
// Line sink with respawn-and-replay for consumer processes

use std::io::{self, Write};

use super::process::{Consumer, Launcher};
use crate::protocol::{EventMessage, Handshake};

/// Respawns attempted for a single write before giving up.
const MAX_RESPAWNS_PER_WRITE: u32 = 1;

/// Result type for delivery operations
pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// Errors that can occur while delivering lines
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Output stream broken: {0}")]
    Broken(#[source] io::Error),

    #[error("Consumer failed again after respawn: {0}")]
    ReplayFailed(#[source] io::Error),

    #[error("Failed to spawn consumer `{command}`: {source}")]
    Spawn { command: String, source: io::Error },
}

enum Sink {
    Stream(Box<dyn Write + Send>),
    Process {
        launcher: Box<dyn Launcher>,
        consumer: Box<dyn Consumer>,
    },
}

/// Delivers encoded protocol lines to a stream or an owned consumer process.
///
/// The handshake is sent on construction and replayed to every respawned
/// consumer. Owned consumers are killed on drop unless `finish` ran.
pub struct DeliveryChannel {
    sink: Sink,
    handshake: Handshake,
    respawns: u64,
    finished: bool,
}

impl DeliveryChannel {
    /// Deliver to a direct output stream. Write failures are fatal.
    pub fn to_stream(stream: Box<dyn Write + Send>, handshake: Handshake) -> DeliveryResult<Self> {
        let mut channel = Self {
            sink: Sink::Stream(stream),
            handshake,
            respawns: 0,
            finished: false,
        };
        channel.send_handshake().map_err(DeliveryError::Broken)?;
        Ok(channel)
    }

    /// Deliver to a consumer started by `launcher`, respawning it when its
    /// pipe breaks.
    pub fn to_process(mut launcher: Box<dyn Launcher>, handshake: Handshake) -> DeliveryResult<Self> {
        let consumer = launcher.launch().map_err(|source| DeliveryError::Spawn {
            command: launcher.describe(),
            source,
        })?;
        let mut channel = Self {
            sink: Sink::Process { launcher, consumer },
            handshake,
            respawns: 0,
            finished: false,
        };
        channel.send_handshake().map_err(DeliveryError::Broken)?;
        Ok(channel)
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// Number of consumers started after the first.
    pub fn respawn_count(&self) -> u64 {
        self.respawns
    }

    /// Encode and deliver one event.
    pub fn send(&mut self, event: &EventMessage) -> DeliveryResult<()> {
        self.write_line(&event.encode())
    }

    /// Deliver one already-encoded line and flush it.
    pub fn write_line(&mut self, line: &str) -> DeliveryResult<()> {
        let framed = format!("{}\n", line);

        let (launcher, consumer) = match &mut self.sink {
            Sink::Stream(stream) => {
                return write_framed(stream.as_mut(), &framed).map_err(DeliveryError::Broken)
            }
            Sink::Process { launcher, consumer } => (launcher, consumer),
        };

        let mut last_error = match write_framed(consumer.as_mut(), &framed) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        for _ in 0..MAX_RESPAWNS_PER_WRITE {
            log::warn!(
                "Consumer pipe failed ({}), respawning `{}`",
                last_error,
                launcher.describe()
            );
            consumer.kill();
            *consumer = launcher.launch().map_err(|source| DeliveryError::Spawn {
                command: launcher.describe(),
                source,
            })?;
            self.respawns += 1;

            let replayed = self
                .handshake
                .lines()
                .iter()
                .try_for_each(|l| write_framed(consumer.as_mut(), &format!("{}\n", l)))
                .and_then(|()| write_framed(consumer.as_mut(), &framed));
            match replayed {
                Ok(()) => return Ok(()),
                Err(e) => last_error = e,
            }
        }

        Err(DeliveryError::ReplayFailed(last_error))
    }

    /// Close the consumer's input and wait for it to exit.
    pub fn finish(mut self) {
        if let Sink::Process { consumer, .. } = &mut self.sink {
            consumer.close();
        }
        self.finished = true;
    }

    /// Kill the consumer and reap it without waiting for it to drain.
    pub fn terminate(self) {
        // Drop kills unless finished
        drop(self);
    }

    fn send_handshake(&mut self) -> io::Result<()> {
        let lines = self.handshake.lines().map(|l| format!("{}\n", l));
        match &mut self.sink {
            Sink::Stream(stream) => lines.iter().try_for_each(|l| write_framed(stream.as_mut(), l)),
            Sink::Process { consumer, .. } => {
                lines.iter().try_for_each(|l| write_framed(consumer.as_mut(), l))
            }
        }
    }
}

impl Drop for DeliveryChannel {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Sink::Process { consumer, .. } = &mut self.sink {
            consumer.kill();
        }
    }
}

fn write_framed<W: Write + ?Sized>(target: &mut W, framed: &str) -> io::Result<()> {
    target.write_all(framed.as_bytes())?;
    target.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::codes::EV_KEY;
    use crate::protocol::DeviceDescriptor;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Lines received per consumer generation.
    type Received = Arc<Mutex<Vec<Vec<String>>>>;

    struct FakeConsumer {
        received: Received,
        generation: usize,
        /// Writes accepted before the pipe breaks
        budget: Option<usize>,
        killed: Arc<Mutex<usize>>,
    }

    impl Write for FakeConsumer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some(budget) = self.budget.as_mut() {
                if *budget == 0 {
                    return Err(io::Error::from(io::ErrorKind::BrokenPipe));
                }
                *budget -= 1;
            }
            let text = String::from_utf8_lossy(buf);
            let mut received = self.received.lock();
            received[self.generation].extend(text.lines().map(str::to_string));
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Consumer for FakeConsumer {
        fn close(&mut self) {}

        fn kill(&mut self) {
            *self.killed.lock() += 1;
        }
    }

    struct FakeLauncher {
        received: Received,
        budgets: VecDeque<Option<usize>>,
        killed: Arc<Mutex<usize>>,
    }

    impl Launcher for FakeLauncher {
        fn launch(&mut self) -> io::Result<Box<dyn Consumer>> {
            let budget = self
                .budgets
                .pop_front()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no more consumers"))?;
            let mut received = self.received.lock();
            received.push(Vec::new());
            Ok(Box::new(FakeConsumer {
                received: self.received.clone(),
                generation: received.len() - 1,
                budget,
                killed: self.killed.clone(),
            }))
        }

        fn describe(&self) -> String {
            "fake".to_string()
        }
    }

    fn handshake() -> Handshake {
        Handshake::new(vec![DeviceDescriptor::new("kbd", 1, 1).with_codes(EV_KEY, [30])]).unwrap()
    }

    fn fake_launcher(budgets: &[Option<usize>]) -> (FakeLauncher, Received, Arc<Mutex<usize>>) {
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let killed = Arc::new(Mutex::new(0));
        let launcher = FakeLauncher {
            received: received.clone(),
            budgets: budgets.iter().copied().collect(),
            killed: killed.clone(),
        };
        (launcher, received, killed)
    }

    #[test]
    fn test_handshake_sent_on_open() {
        let (launcher, received, _) = fake_launcher(&[None]);
        let channel = DeliveryChannel::to_process(Box::new(launcher), handshake()).unwrap();
        let [version, devices] = channel.handshake().lines();
        assert_eq!(received.lock()[0], vec![version.to_string(), devices.to_string()]);
    }

    #[test]
    fn test_broken_consumer_is_respawned_with_handshake_replay() {
        // First consumer takes the handshake and one event, then breaks.
        let (launcher, received, killed) = fake_launcher(&[Some(3), None]);
        let mut channel = DeliveryChannel::to_process(Box::new(launcher), handshake()).unwrap();

        channel.send(&EventMessage::new(0, 1, 30, 1)).unwrap();
        channel.send(&EventMessage::new(0, 1, 30, 0)).unwrap();

        assert_eq!(channel.respawn_count(), 1);
        assert_eq!(*killed.lock(), 1);

        let received = received.lock();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].len(), 3);
        assert_eq!(received[0][2], "[0, 1, 30, 1]");
        assert_eq!(received[1][0], "2");
        assert_eq!(received[1][1], received[0][1]);
        assert_eq!(received[1][2], "[0, 1, 30, 0]");
    }

    #[test]
    fn test_second_failure_after_replay_is_fatal() {
        let (launcher, _, _) = fake_launcher(&[Some(2), Some(1), None]);
        let mut channel = DeliveryChannel::to_process(Box::new(launcher), handshake()).unwrap();

        match channel.send(&EventMessage::new(0, 1, 30, 1)) {
            Err(DeliveryError::ReplayFailed(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("Expected replay failure, got {:?}", other),
        }
        assert_eq!(channel.respawn_count(), 1);
    }

    #[test]
    fn test_spawn_failure_during_respawn() {
        let (launcher, _, _) = fake_launcher(&[Some(2)]);
        let mut channel = DeliveryChannel::to_process(Box::new(launcher), handshake()).unwrap();

        assert!(matches!(
            channel.send(&EventMessage::new(0, 1, 30, 1)),
            Err(DeliveryError::Spawn { .. })
        ));
    }

    #[test]
    fn test_each_write_gets_its_own_respawn() {
        let (launcher, received, _) = fake_launcher(&[Some(3), Some(3), None]);
        let mut channel = DeliveryChannel::to_process(Box::new(launcher), handshake()).unwrap();

        for value in [1, 0, 1] {
            channel.send(&EventMessage::new(0, 1, 30, value)).unwrap();
        }
        assert_eq!(channel.respawn_count(), 2);
        assert_eq!(received.lock().len(), 3);
    }

    #[test]
    fn test_drop_kills_consumer_but_finish_does_not() {
        let (launcher, _, killed) = fake_launcher(&[None]);
        let channel = DeliveryChannel::to_process(Box::new(launcher), handshake()).unwrap();
        drop(channel);
        assert_eq!(*killed.lock(), 1);

        let (launcher, _, killed) = fake_launcher(&[None]);
        let channel = DeliveryChannel::to_process(Box::new(launcher), handshake()).unwrap();
        channel.finish();
        assert_eq!(*killed.lock(), 0);
    }

    #[test]
    fn test_terminate_kills_consumer() {
        let (launcher, _, killed) = fake_launcher(&[None]);
        let channel = DeliveryChannel::to_process(Box::new(launcher), handshake()).unwrap();
        channel.terminate();
        assert_eq!(*killed.lock(), 1);
    }

    #[test]
    fn test_terminate_does_not_wait_for_consumer() {
        let launcher = crate::delivery::CommandLauncher::new("sleep 30");
        let channel = DeliveryChannel::to_process(Box::new(launcher), handshake()).unwrap();

        let started = std::time::Instant::now();
        channel.terminate();
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    struct BrokenStream;

    impl Write for BrokenStream {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_stream_failure_is_not_retried() {
        assert!(matches!(
            DeliveryChannel::to_stream(Box::new(BrokenStream), handshake()),
            Err(DeliveryError::Broken(_))
        ));
    }

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_stream_delivery() {
        let buffer = SharedBuffer::default();
        let mut channel =
            DeliveryChannel::to_stream(Box::new(buffer.clone()), handshake()).unwrap();
        channel.send(&EventMessage::new(0, 1, 30, 1)).unwrap();

        let text = String::from_utf8(buffer.0.lock().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "2");
        assert_eq!(lines[2], "[0, 1, 30, 1]");
    }
}
