use std::io::{ErrorKind, Read, Write};
use std::thread;

use anyhow::{Context, Result};
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;

use super::backend::{ProcessEvent, TerminalProcess, TerminalSize};

/// A process running inside a pseudo-terminal
pub struct PtyHandler {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
}

impl PtyHandler {
    /// Spawn `cmd` in a new PTY and start the background reader
    ///
    /// The reader thread forwards decoded output and, once the PTY reaches EOF,
    /// reaps the child and sends a single `Exit`.
    pub fn spawn(
        cmd: CommandBuilder,
        size: TerminalSize,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ProcessEvent>)> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(pty_size(size))
            .context("Failed to open PTY")?;

        let child = pair
            .slave
            .spawn_command(cmd)
            .context("Failed to spawn command in PTY")?;
        // The child holds its own copy; keeping ours would stop EOF from arriving.
        drop(pair.slave);

        let master = pair.master;
        let reader = master
            .try_clone_reader()
            .context("Failed to clone PTY reader")?;
        let writer = master.take_writer().context("Failed to take PTY writer")?;
        let killer = child.clone_killer();
        let pid = child.process_id();

        let (tx, rx) = mpsc::unbounded_channel();
        thread::Builder::new()
            .name(format!("forge-pty-{}", pid.unwrap_or_default()))
            .spawn(move || read_until_exit(reader, child, tx))
            .context("Failed to start PTY reader thread")?;

        Ok((
            Self {
                master,
                writer,
                killer,
                pid,
            },
            rx,
        ))
    }
}

impl TerminalProcess for PtyHandler {
    fn write(&mut self, data: &str) -> Result<()> {
        self.writer
            .write_all(data.as_bytes())
            .context("Failed to write to PTY")?;
        self.writer.flush().context("Failed to flush PTY writer")?;
        Ok(())
    }

    fn resize(&mut self, size: TerminalSize) -> Result<()> {
        self.master
            .resize(pty_size(size))
            .context("Failed to resize PTY")?;
        Ok(())
    }

    fn kill(&mut self) -> Result<()> {
        self.killer.kill().context("Failed to kill child process")?;
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn read_until_exit(
    mut reader: Box<dyn Read + Send>,
    mut child: Box<dyn Child + Send + Sync>,
    tx: mpsc::UnboundedSender<ProcessEvent>,
) {
    let mut buffer = [0u8; 4096];
    let mut decoder = Utf8Decoder::default();

    loop {
        match reader.read(&mut buffer) {
            // EOF - process exited
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.decode(&buffer[..n]);
                if !text.is_empty() && tx.send(ProcessEvent::Output(text)).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            // EIO once the slave side is gone
            Err(_) => break,
        }
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        let _ = tx.send(ProcessEvent::Output(tail));
    }

    let code = child
        .wait()
        .ok()
        .map(|status| status.exit_code() as i32);
    let _ = tx.send(ProcessEvent::Exit(code));
}

/// Incremental UTF-8 decoder that never splits a character across chunks
#[derive(Debug, Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decode as much of `bytes` (plus any carried tail) as forms complete characters
    pub(crate) fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Incomplete sequence at the end: keep it for the next read
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is left, replacing an unfinished sequence
    pub(crate) fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_passes_ascii_through() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"hello"), "hello");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoder_carries_split_characters() {
        let bytes = "héllo ✓".as_bytes();
        // 'é' is two bytes starting at index 1; split inside it
        let mut decoder = Utf8Decoder::default();
        let first = decoder.decode(&bytes[..2]);
        let second = decoder.decode(&bytes[2..bytes.len() - 1]);
        let third = decoder.decode(&bytes[bytes.len() - 1..]);
        assert_eq!(first, "h");
        assert_eq!(format!("{}{}{}", first, second, third), "héllo ✓");
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_decoder_finish_flushes_unfinished_tail() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(&[b'x', 0xe2, 0x9c]), "x");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }
}
