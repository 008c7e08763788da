//! Run one command and stream its output as envelopes.

use std::process::ExitStatus;

use session_relay_core::Envelope;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
};

use crate::Shell;

/// Bytes requested per read from a child pipe.
const READ_CHUNK: usize = 8 * 1024;

/// Close text when the child could not be started.
pub const FAILED_TO_START: &str = "Process failed to start";

/// Spawn `command` through `shell` and forward everything it produces.
///
/// Each stdout read becomes an `output` envelope and each stderr read an
/// `error` envelope. Exactly one `close` envelope follows, after both pipes
/// hit EOF and the child has been reaped.
pub async fn run_command(
    shell: &Shell,
    session_id: &str,
    command: &str,
    tx: &mpsc::UnboundedSender<Envelope>,
) {
    let mut child = match shell.command(command).spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(session_id, command, "Failed to start command: {e}");
            let _ = tx.send(Envelope::stderr(
                session_id,
                format!("Failed to start command: {e}"),
            ));
            let _ = tx.send(Envelope::close(session_id, FAILED_TO_START));
            return;
        }
    };

    tracing::debug!(session_id, pid = ?child.id(), "Command started");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    tokio::join!(
        async {
            if let Some(out) = stdout {
                pump(out, tx, |text| Envelope::output(session_id, text)).await;
            }
        },
        async {
            if let Some(err) = stderr {
                pump(err, tx, |text| Envelope::stderr(session_id, text)).await;
            }
        },
    );

    let notice = match child.wait().await {
        Ok(status) => exit_message(status),
        Err(e) => {
            tracing::error!(session_id, "Failed to wait for command: {e}");
            "Process exited with unknown status".to_string()
        }
    };
    tracing::debug!(session_id, %notice, "Command finished");
    let _ = tx.send(Envelope::close(session_id, notice));
}

async fn pump<R, F>(mut reader: R, tx: &mpsc::UnboundedSender<Envelope>, wrap: F)
where
    R: AsyncRead + Unpin,
    F: Fn(String) -> Envelope,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut decoder = ChunkDecoder::default();

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.push(&buf[..n]);
                if !text.is_empty() {
                    let _ = tx.send(wrap(text));
                }
            }
            Err(e) => {
                tracing::warn!("Pipe read failed: {e}");
                break;
            }
        }
    }

    let rest = decoder.finish();
    if !rest.is_empty() {
        let _ = tx.send(wrap(rest));
    }
}

/// Human-readable exit notice.
#[must_use]
pub fn exit_message(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("Process exited with code {code}");
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("Process terminated by signal {signal}");
        }
    }

    "Process exited with unknown status".to_string()
}

/// Turns raw pipe reads into text without splitting UTF-8 sequences.
///
/// A multi-byte character cut by a read boundary is held back until the
/// next read. Invalid bytes are replaced.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    pending: Vec<u8>,
}

impl ChunkDecoder {
    /// Feed one read and return the text that is complete so far.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let keep = incomplete_tail(&self.pending);
        let ready = self.pending.len() - keep;
        let text = String::from_utf8_lossy(&self.pending[..ready]).into_owned();
        self.pending.drain(..ready);
        text
    }

    /// Flush whatever is still held back.
    #[must_use]
    pub fn finish(self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }
}

/// Length of a trailing, not yet complete UTF-8 sequence.
fn incomplete_tail(bytes: &[u8]) -> usize {
    let start = bytes.len().saturating_sub(3);
    for i in (start..bytes.len()).rev() {
        let b = bytes[i];
        if b & 0xC0 == 0x80 {
            continue;
        }
        let width = match b {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        let have = bytes.len() - i;
        return if width > have { have } else { 0 };
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_passes_ascii() {
        let mut decoder = ChunkDecoder::default();
        assert_eq!(decoder.push(b"hi\n"), "hi\n");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoder_holds_split_character() {
        let snowman = "☃".as_bytes();
        let mut decoder = ChunkDecoder::default();
        assert_eq!(decoder.push(&[b'a', snowman[0]]), "a");
        assert_eq!(decoder.push(&snowman[1..2]), "");
        assert_eq!(decoder.push(&[snowman[2], b'b']), "☃b");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = ChunkDecoder::default();
        assert_eq!(decoder.push(&[b'x', 0xff, b'y']), "x\u{fffd}y");
    }

    #[test]
    fn test_decoder_flushes_truncated_tail() {
        let mut decoder = ChunkDecoder::default();
        assert_eq!(decoder.push(&[0xe2, 0x98]), "");
        assert_eq!(decoder.finish(), "\u{fffd}");
    }

    #[cfg(unix)]
    mod unix {
        use super::super::*;

        async fn collect(shell: &Shell, command: &str) -> Vec<Envelope> {
            let (tx, mut rx) = mpsc::unbounded_channel();
            run_command(shell, "s1", command, &tx).await;
            drop(tx);
            let mut out = Vec::new();
            while let Some(env) = rx.recv().await {
                out.push(env);
            }
            out
        }

        fn joined(envelopes: &[Envelope], kind: &str) -> String {
            envelopes
                .iter()
                .filter(|e| e.kind == kind)
                .filter_map(|e| e.content.clone())
                .collect()
        }

        #[tokio::test]
        async fn test_echo_streams_output_then_close() {
            let got = collect(&Shell::platform_default(), "echo hi").await;
            assert_eq!(
                got,
                vec![
                    Envelope::output("s1", "hi\n"),
                    Envelope::close("s1", "Process exited with code 0"),
                ]
            );
        }

        #[tokio::test]
        async fn test_stderr_and_exit_code() {
            let got = collect(&Shell::platform_default(), "echo oops >&2; exit 3").await;
            assert_eq!(joined(&got, "error"), "oops\n");
            assert_eq!(joined(&got, "output"), "");
            assert_eq!(
                got.last(),
                Some(&Envelope::close("s1", "Process exited with code 3"))
            );
        }

        #[tokio::test]
        async fn test_close_is_last_even_with_lots_of_output() {
            let got = collect(&Shell::platform_default(), "seq 1 20000").await;
            let expected: String = (1..=20000).map(|n| format!("{n}\n")).collect();
            assert_eq!(joined(&got, "output"), expected);
            assert_eq!(got.iter().filter(|e| e.kind == "close").count(), 1);
            assert_eq!(got.last().map(|e| e.kind.as_str()), Some("close"));
        }

        #[tokio::test]
        async fn test_signal_death() {
            let got = collect(&Shell::platform_default(), "kill -9 $$").await;
            assert_eq!(
                got.last(),
                Some(&Envelope::close("s1", "Process terminated by signal 9"))
            );
        }

        #[tokio::test]
        async fn test_spawn_failure_is_reported() {
            let shell = Shell::from_program("/nonexistent/shell");
            let got = collect(&shell, "echo hi").await;
            assert_eq!(got.len(), 2);
            assert_eq!(got[0].kind, "error");
            assert!(
                got[0]
                    .content
                    .as_deref()
                    .is_some_and(|c| c.starts_with("Failed to start command:"))
            );
            assert_eq!(got[1], Envelope::close("s1", FAILED_TO_START));
        }
    }
}
