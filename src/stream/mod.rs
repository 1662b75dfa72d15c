//! Lazy views over the terminal stage's output.
//!
//! Each view pulls from the output pipe only when asked for the next item.
//! Reaching end of output, hitting a read error or dropping the view all run
//! the same teardown, so an endless producer can be abandoned at any point.
//! Every call that returns a view launches the pipeline again.

use std::io::{self, BufRead, Read};
use std::iter::FusedIterator;
use std::ops::{Deref, DerefMut};

use crate::cmd::{CommandSpec, PipelineSpec};
use crate::error::PipeError;
use crate::exec::{ExecResult, Execution, Executor, LifecycleState, PipeStatus};

/// A launched pipeline plus the read end of its output.
#[derive(Debug)]
pub struct OutputStream {
    execution: Execution,
}

impl OutputStream {
    pub(crate) fn new(execution: Execution) -> Self { OutputStream { execution } }

    pub fn pids(&self) -> Vec<u32> { self.execution.pids() }

    pub fn state(&self) -> LifecycleState { self.execution.state() }

    /// Terminal stage status; unknown until the stream has been finished.
    pub fn status(&self) -> PipeStatus { self.execution.status() }

    /// Stop reading and tear the pipeline down. Safe to call more than once.
    pub fn finish(&mut self) -> PipeStatus { self.execution.finish() }

    pub fn lines(self) -> Lines { Lines(self) }

    pub fn chars(self) -> Chars { Chars(self) }

    pub fn bytes(self) -> Bytes { Bytes(self) }

    fn next_line(&mut self) -> Option<String> {
        let mut buf = Vec::new();
        let read = self.execution.output_mut().map(|r| r.read_until(b'\n', &mut buf));
        match self.settle(read)? {
            0 => self.end(),
            _ => {
                chomp(&mut buf);
                Some(String::from_utf8_lossy(&buf).into_owned())
            }
        }
    }

    fn next_byte(&mut self) -> Option<u8> {
        let read = self.execution.output_mut().map(read_byte);
        match self.settle(read)? {
            Some(b) => Some(b),
            None => self.end(),
        }
    }

    fn next_char(&mut self) -> Option<char> {
        let read = self.execution.output_mut().map(read_char);
        match self.settle(read)? {
            Some(c) => Some(c),
            None => self.end(),
        }
    }

    /// Unwraps a read attempt, tearing down on a missing pipe or an error.
    fn settle<T>(&mut self, read: Option<io::Result<T>>) -> Option<T> {
        match read {
            Some(Ok(v)) => Some(v),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "read from pipeline output failed");
                self.end()
            }
            None => self.end(),
        }
    }

    fn end<T>(&mut self) -> Option<T> {
        self.execution.finish();
        None
    }
}

impl Read for OutputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.execution.output_mut() {
            Some(r) => r.read(buf),
            None => Ok(0),
        }
    }
}

fn chomp(buf: &mut Vec<u8>) {
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
}

fn peek_byte(r: &mut impl BufRead) -> io::Result<Option<u8>> {
    loop {
        match r.fill_buf() {
            Ok(buf) => return Ok(buf.first().copied()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

fn read_byte(r: &mut impl BufRead) -> io::Result<Option<u8>> {
    let b = peek_byte(r)?;
    if b.is_some() {
        r.consume(1);
    }
    Ok(b)
}

/// Decode one UTF-8 scalar. Each maximal invalid subpart yields one U+FFFD,
/// the same split `String::from_utf8_lossy` makes, and the byte that broke
/// the sequence is left for the next call.
fn read_char(r: &mut impl BufRead) -> io::Result<Option<char>> {
    let lead = match read_byte(r)? {
        Some(b) => b,
        None => return Ok(None),
    };
    let (width, second) = match lead {
        0x00..=0x7f => return Ok(Some(lead as char)),
        0xc2..=0xdf => (2, 0x80..=0xbf),
        0xe0 => (3, 0xa0..=0xbf),
        0xed => (3, 0x80..=0x9f),
        0xe1..=0xef => (3, 0x80..=0xbf),
        0xf0 => (4, 0x90..=0xbf),
        0xf4 => (4, 0x80..=0x8f),
        0xf1..=0xf3 => (4, 0x80..=0xbf),
        _ => return Ok(Some(char::REPLACEMENT_CHARACTER)),
    };
    let mut bytes = [lead, 0, 0, 0];
    for (i, slot) in bytes.iter_mut().enumerate().take(width).skip(1) {
        match peek_byte(r)? {
            Some(b) if (i == 1 && second.contains(&b)) || (i > 1 && b & 0xc0 == 0x80) => {
                r.consume(1);
                *slot = b;
            }
            _ => return Ok(Some(char::REPLACEMENT_CHARACTER)),
        }
    }
    Ok(Some(
        std::str::from_utf8(&bytes[..width])
            .ok()
            .and_then(|s| s.chars().next())
            .unwrap_or(char::REPLACEMENT_CHARACTER),
    ))
}

macro_rules! stream_view {
    ($(#[$meta:meta])* $name:ident, $item:ty, $next:ident) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name(OutputStream);

        impl $name {
            pub fn into_stream(self) -> OutputStream { self.0 }
        }

        impl Iterator for $name {
            type Item = $item;
            fn next(&mut self) -> Option<$item> { self.0.$next() }
        }

        impl FusedIterator for $name {}

        impl Deref for $name {
            type Target = OutputStream;
            fn deref(&self) -> &OutputStream { &self.0 }
        }

        impl DerefMut for $name {
            fn deref_mut(&mut self) -> &mut OutputStream { &mut self.0 }
        }
    };
}

stream_view!(
    /// Output lines with `\n` / `\r\n` stripped.
    Lines, String, next_line
);
stream_view!(
    /// Output decoded as UTF-8, one char at a time.
    Chars, char, next_char
);
stream_view!(Bytes, u8, next_byte);

impl Executor {
    pub fn spawn(&self, pipe: &PipelineSpec) -> Result<OutputStream, PipeError> {
        self.launch(pipe).map(OutputStream::new)
    }

    /// Run to completion and join the output lines with the configured separator.
    pub fn run(&self, pipe: &PipelineSpec) -> Result<ExecResult, PipeError> {
        let mut lines = self.spawn(pipe)?.lines();
        let stdout = lines.by_ref().collect::<Vec<_>>().join(&self.config.line_separator);
        let status = lines.finish();
        Ok(ExecResult { status, stdout })
    }
}

impl PipelineSpec {
    pub fn spawn(&self) -> Result<OutputStream, PipeError> { Executor::default().spawn(self) }

    pub fn lines(&self) -> Result<Lines, PipeError> { self.spawn().map(OutputStream::lines) }

    pub fn chars(&self) -> Result<Chars, PipeError> { self.spawn().map(OutputStream::chars) }

    pub fn bytes(&self) -> Result<Bytes, PipeError> { self.spawn().map(OutputStream::bytes) }

    pub fn run(&self) -> Result<ExecResult, PipeError> { Executor::default().run(self) }

    pub fn spawn_with(&self, executor: &Executor) -> Result<OutputStream, PipeError> { executor.spawn(self) }

    pub fn run_with(&self, executor: &Executor) -> Result<ExecResult, PipeError> { executor.run(self) }

    pub fn read(&self) -> Result<String, PipeError> { self.run().map(|r| r.stdout) }

    /// Run, discard the output, and report the terminal stage's status.
    pub fn status(&self) -> Result<PipeStatus, PipeError> {
        let mut stream = self.spawn()?;
        if let Err(e) = io::copy(&mut stream, &mut io::sink()) {
            tracing::warn!(error = %e, "read from pipeline output failed");
        }
        Ok(stream.finish())
    }

    pub fn success(&self) -> Result<bool, PipeError> { self.status().map(|s| s.success()) }
}

impl CommandSpec {
    pub fn spawn(&self) -> Result<OutputStream, PipeError> { PipelineSpec::from(self).spawn() }

    pub fn lines(&self) -> Result<Lines, PipeError> { PipelineSpec::from(self).lines() }

    pub fn chars(&self) -> Result<Chars, PipeError> { PipelineSpec::from(self).chars() }

    pub fn bytes(&self) -> Result<Bytes, PipeError> { PipelineSpec::from(self).bytes() }

    pub fn run(&self) -> Result<ExecResult, PipeError> { PipelineSpec::from(self).run() }

    pub fn read(&self) -> Result<String, PipeError> { PipelineSpec::from(self).read() }

    pub fn status(&self) -> Result<PipeStatus, PipeError> { PipelineSpec::from(self).status() }

    pub fn success(&self) -> Result<bool, PipeError> { PipelineSpec::from(self).success() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn chars_of(bytes: &[u8]) -> Vec<char> {
        let mut r = Cursor::new(bytes.to_vec());
        std::iter::from_fn(|| read_char(&mut r).unwrap()).collect()
    }

    #[test]
    fn chomp_strips_one_terminator() {
        let mut a = b"abc\r\n".to_vec();
        chomp(&mut a);
        assert_eq!(a, b"abc");
        let mut b = b"abc\n\n".to_vec();
        chomp(&mut b);
        assert_eq!(b, b"abc\n");
        let mut c = b"abc".to_vec();
        chomp(&mut c);
        assert_eq!(c, b"abc");
    }

    #[test]
    fn decodes_multibyte_chars() {
        assert_eq!(chars_of("aé€😀".as_bytes()), ['a', 'é', '€', '😀']);
    }

    #[test]
    fn malformed_utf8_becomes_replacement() {
        assert_eq!(chars_of(&[0xff, b'a']), ['\u{fffd}', 'a']);
        // truncated sequence keeps the following byte
        assert_eq!(chars_of(&[0xe2, 0x82, b'x']), ['\u{fffd}', 'x']);
    }

    #[test]
    fn invalid_sequences_split_like_lossy_conversion() {
        let inputs: [&[u8]; 5] = [
            &[0xe0, 0x80, 0x80, b'a'],
            &[0xed, 0xa0, 0x80, b'z'],
            &[0xf4, 0x90, 0x80, 0x80],
            &[0xc0, 0xaf, b'/'],
            &[b'x', 0xf0, 0x9f, 0x98],
        ];
        for bytes in inputs {
            let expected: Vec<char> = String::from_utf8_lossy(bytes).chars().collect();
            assert_eq!(chars_of(bytes), expected, "{:02x?}", bytes);
        }
    }

    #[test]
    fn read_byte_until_end() {
        let mut r = Cursor::new(vec![1u8, 2]);
        assert_eq!(read_byte(&mut r).unwrap(), Some(1));
        assert_eq!(read_byte(&mut r).unwrap(), Some(2));
        assert_eq!(read_byte(&mut r).unwrap(), None);
    }
}
