//! Kernel event records and their decoding
//!
//! inotify hands out variable-length records: a fixed 16-byte header
//! `{wd: i32, mask: u32, cookie: u32, len: u32}` (native endian) followed by
//! `len` bytes of NUL-padded name. A single `read(2)` may end in the middle
//! of a record, so the decoder keeps the incomplete tail and prepends it to
//! the next read.

use crate::error::SourceError;
use bitflags::bitflags;
use std::ffi::OsString;
use std::io::{self, Read};
use std::iter::FusedIterator;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

/// Size of the fixed record header
pub const HEADER_LEN: usize = 16;

/// Longest file name the kernel reports
pub const NAME_MAX: usize = 255;

/// Free space guaranteed before each read (64 maximal records)
pub const READ_CHUNK: usize = 64 * (HEADER_LEN + NAME_MAX + 1);

/// Kernel-issued identifier of one monitored directory
///
/// Only meaningful together with the index that maps it back to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchHandle(i32);

impl WatchHandle {
    pub fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> i32 {
        self.0
    }
}

bitflags! {
    /// Event kinds carried in a record's mask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u32 {
        const MODIFY = 0x0000_0002;
        const MOVED_FROM = 0x0000_0040;
        const MOVED_TO = 0x0000_0080;
        const CREATE = 0x0000_0100;
        const DELETE = 0x0000_0200;
        /// The watched directory itself was deleted
        const DELETE_SELF = 0x0000_0400;
        /// The watched directory itself was moved
        const MOVE_SELF = 0x0000_0800;
        const UNMOUNT = 0x0000_2000;
        /// Kernel queue overflowed; events were lost
        const Q_OVERFLOW = 0x0000_4000;
        /// The handle was removed (explicitly or by the kernel)
        const IGNORED = 0x0000_8000;
        /// Subject of the event is a directory
        const IS_DIR = 0x4000_0000;
    }
}

impl EventMask {
    /// Kinds requested for every watched directory
    pub const WATCHED: EventMask = EventMask::CREATE
        .union(EventMask::DELETE)
        .union(EventMask::MODIFY)
        .union(EventMask::MOVED_FROM)
        .union(EventMask::MOVED_TO)
        .union(EventMask::DELETE_SELF)
        .union(EventMask::MOVE_SELF);

    /// Kinds that describe a change to a directory's contents
    pub const CONTENT: EventMask = EventMask::CREATE
        .union(EventMask::DELETE)
        .union(EventMask::MODIFY)
        .union(EventMask::MOVED_FROM)
        .union(EventMask::MOVED_TO);

    /// Kinds that end the life of the handle they arrive on
    pub const RETIRING: EventMask = EventMask::DELETE_SELF
        .union(EventMask::MOVE_SELF)
        .union(EventMask::IGNORED)
        .union(EventMask::UNMOUNT);
}

/// One decoded record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub handle: WatchHandle,
    pub mask: EventMask,
    /// Pairs MOVED_FROM with MOVED_TO
    pub cookie: u32,
    /// Child name, absent for events about the watched directory itself
    pub name: Option<OsString>,
}

/// A raw event whose handle was mapped back to a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEvent {
    pub path: PathBuf,
    pub mask: EventMask,
}

/// What the event source yields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Raw(RawEvent),
    /// The kernel dropped events; the watched set must be rebuilt
    OverflowResync,
}

/// Reassembles records from arbitrarily split reads
#[derive(Debug, Default)]
pub struct EventDecoder {
    buf: Vec<u8>,
    /// Start of the first unconsumed byte in `buf`
    start: usize,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read once from `reader`, appending to whatever tail is pending
    ///
    /// Returns the number of bytes read; `Ok(0)` means end of stream.
    pub fn fill<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<usize> {
        self.compact();
        let len = self.buf.len();
        self.buf.resize(len + READ_CHUNK, 0);
        match reader.read(&mut self.buf[len..]) {
            Ok(n) => {
                self.buf.truncate(len + n);
                Ok(n)
            }
            Err(e) => {
                self.buf.truncate(len);
                Err(e)
            }
        }
    }

    /// Append bytes directly
    pub fn push(&mut self, bytes: &[u8]) {
        self.compact();
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes received but not yet decoded
    pub fn pending(&self) -> usize {
        self.buf.len() - self.start
    }

    /// Decode the next complete record, if one is buffered
    pub fn next_event(&mut self) -> Option<RawEvent> {
        let rest = &self.buf[self.start..];
        if rest.len() < HEADER_LEN {
            return None;
        }

        let wd = i32::from_ne_bytes(word(rest, 0));
        let mask = u32::from_ne_bytes(word(rest, 4));
        let cookie = u32::from_ne_bytes(word(rest, 8));
        let name_len = u32::from_ne_bytes(word(rest, 12)) as usize;

        let total = HEADER_LEN + name_len;
        if rest.len() < total {
            return None;
        }

        let raw_name = &rest[HEADER_LEN..total];
        let trimmed = match raw_name.iter().position(|&b| b == 0) {
            Some(nul) => &raw_name[..nul],
            None => raw_name,
        };
        let name = if trimmed.is_empty() {
            None
        } else {
            Some(std::ffi::OsStr::from_bytes(trimmed).to_os_string())
        };

        self.start += total;
        Some(RawEvent {
            handle: WatchHandle(wd),
            mask: EventMask::from_bits_retain(mask),
            cookie,
            name,
        })
    }

    fn compact(&mut self) {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
    }
}

fn word(bytes: &[u8], offset: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&bytes[offset..offset + 4]);
    out
}

/// Encode one record the way the kernel lays it out (name padded to 16)
pub fn encode_record(handle: i32, mask: u32, cookie: u32, name: Option<&str>) -> Vec<u8> {
    let name = name.map(str::as_bytes).unwrap_or_default();
    let padded = if name.is_empty() {
        0
    } else {
        (name.len() + 1).div_ceil(HEADER_LEN) * HEADER_LEN
    };

    let mut out = Vec::with_capacity(HEADER_LEN + padded);
    out.extend_from_slice(&handle.to_ne_bytes());
    out.extend_from_slice(&mask.to_ne_bytes());
    out.extend_from_slice(&cookie.to_ne_bytes());
    out.extend_from_slice(&(padded as u32).to_ne_bytes());
    out.extend_from_slice(name);
    out.resize(HEADER_LEN + padded, 0);
    out
}

/// Lazy, non-restartable stream of events from a notification channel
///
/// Ends on a zero-length read (channel closed). A read failure other than
/// `EINTR` is yielded exactly once as `Err`, after which the stream is
/// exhausted.
pub struct EventSource<R> {
    reader: R,
    decoder: EventDecoder,
    done: bool,
}

impl<R: Read> EventSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: EventDecoder::new(),
            done: false,
        }
    }
}

impl<R: Read> Iterator for EventSource<R> {
    type Item = Result<SourceEvent, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            if let Some(event) = self.decoder.next_event() {
                if event.mask.contains(EventMask::Q_OVERFLOW) {
                    return Some(Ok(SourceEvent::OverflowResync));
                }
                return Some(Ok(SourceEvent::Raw(event)));
            }

            match self.decoder.fill(&mut self.reader) {
                Ok(0) => {
                    if self.decoder.pending() > 0 {
                        tracing::warn!(
                            "notification channel closed with {} undecoded bytes",
                            self.decoder.pending()
                        );
                    }
                    self.done = true;
                    return None;
                }
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(SourceError::Read(e)));
                }
            }
        }
    }
}

impl<R: Read> FusedIterator for EventSource<R> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Reader that replays a script of chunks and errors
    struct Script(VecDeque<io::Result<Vec<u8>>>);

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                None => Ok(0),
                Some(Err(e)) => Err(e),
                Some(Ok(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
            }
        }
    }

    fn raw(item: Option<Result<SourceEvent, SourceError>>) -> RawEvent {
        match item {
            Some(Ok(SourceEvent::Raw(ev))) => ev,
            other => panic!("expected raw event, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_single_record() {
        let mut decoder = EventDecoder::new();
        decoder.push(&encode_record(3, EventMask::CREATE.bits(), 0, Some("a.txt")));

        let event = decoder.next_event().unwrap();
        assert_eq!(event.handle, WatchHandle::from_raw(3));
        assert_eq!(event.mask, EventMask::CREATE);
        assert_eq!(event.name, Some(OsString::from("a.txt")));
        assert!(decoder.next_event().is_none());
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_name_padding_is_stripped() {
        // 16-byte name with no room for the terminator needs a full extra block
        let record = encode_record(1, EventMask::MODIFY.bits(), 0, Some("exactly16bytes!!"));
        assert_eq!(record.len(), HEADER_LEN + 32);

        let mut decoder = EventDecoder::new();
        decoder.push(&record);
        assert_eq!(
            decoder.next_event().unwrap().name,
            Some(OsString::from("exactly16bytes!!"))
        );
    }

    #[test]
    fn test_self_event_has_no_name() {
        let mut decoder = EventDecoder::new();
        decoder.push(&encode_record(9, EventMask::DELETE_SELF.bits(), 0, None));
        let event = decoder.next_event().unwrap();
        assert_eq!(event.name, None);
        assert_eq!(event.mask, EventMask::DELETE_SELF);
    }

    #[test]
    fn test_record_split_across_reads() {
        let mut stream = encode_record(1, EventMask::CREATE.bits(), 0, Some("first"));
        stream.extend(encode_record(
            2,
            (EventMask::CREATE | EventMask::IS_DIR).bits(),
            0,
            Some("second-dir"),
        ));

        // Split inside the first header and inside the second name
        let cuts = [5, HEADER_LEN + 20, stream.len()];
        let mut chunks = VecDeque::new();
        let mut prev = 0;
        for cut in cuts {
            chunks.push_back(Ok(stream[prev..cut].to_vec()));
            prev = cut;
        }

        let mut source = EventSource::new(Script(chunks));
        let first = raw(source.next());
        assert_eq!(first.name, Some(OsString::from("first")));
        let second = raw(source.next());
        assert_eq!(second.handle, WatchHandle::from_raw(2));
        assert!(second.mask.contains(EventMask::IS_DIR));
        assert_eq!(second.name, Some(OsString::from("second-dir")));
        assert!(source.next().is_none());
    }

    #[test]
    fn test_overflow_is_a_signal() {
        let chunks = VecDeque::from(vec![Ok(encode_record(
            -1,
            EventMask::Q_OVERFLOW.bits(),
            0,
            None,
        ))]);
        let mut source = EventSource::new(Script(chunks));
        assert!(matches!(source.next(), Some(Ok(SourceEvent::OverflowResync))));
        assert!(source.next().is_none());
    }

    #[test]
    fn test_interrupted_read_is_retried() {
        let chunks = VecDeque::from(vec![
            Err(io::Error::from(io::ErrorKind::Interrupted)),
            Ok(encode_record(4, EventMask::DELETE.bits(), 0, Some("gone"))),
        ]);
        let mut source = EventSource::new(Script(chunks));
        assert_eq!(raw(source.next()).mask, EventMask::DELETE);
    }

    #[test]
    fn test_fatal_error_reported_once() {
        let chunks = VecDeque::from(vec![
            Ok(encode_record(4, EventMask::MODIFY.bits(), 0, Some("f"))),
            Err(io::Error::from_raw_os_error(libc::EBADF)),
            Ok(encode_record(4, EventMask::MODIFY.bits(), 0, Some("never"))),
        ]);
        let mut source = EventSource::new(Script(chunks));
        raw(source.next());
        assert!(matches!(source.next(), Some(Err(SourceError::Read(_)))));
        assert!(source.next().is_none());
        assert!(source.next().is_none());
    }

    #[test]
    fn test_many_records_in_one_read() {
        let mut stream = Vec::new();
        for i in 0..200 {
            stream.extend(encode_record(1, EventMask::MODIFY.bits(), 0, Some(&format!("f{}", i))));
        }
        let mut source = EventSource::new(Script(VecDeque::from(vec![Ok(stream)])));
        assert_eq!(source.by_ref().count(), 200);
    }
}
