// src/seek_avoiding.rs
//
// Wrapper that turns short forward seeks into read-and-discard, so a remote
// reader keeps its current download instead of starting a new ranged request.

use std::io::{self, Read, Seek, SeekFrom};
use tracing::trace;

const DISCARD_BUF: usize = 64 * 1024;

pub struct SeekAvoidingReader<R> {
    inner: R,
    min_bytes_for_seek: u64,
    position: u64,
}

impl<R: Read + Seek> SeekAvoidingReader<R> {
    /// `inner` must be positioned at offset 0.
    pub fn new(inner: R, min_bytes_for_seek: u64) -> Self {
        Self { inner, min_bytes_for_seek, position: 0 }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn skip(&mut self, mut n: u64) -> io::Result<()> {
        let mut scratch = [0u8; DISCARD_BUF];
        while n > 0 {
            let want = n.min(DISCARD_BUF as u64) as usize;
            let got = self.inner.read(&mut scratch[..want])?;
            if got == 0 {
                // Past EOF: let the inner reader record the target position.
                self.inner.seek(SeekFrom::Start(self.position + n))?;
                self.position += n;
                return Ok(());
            }
            self.position += got as u64;
            n -= got as u64;
        }
        Ok(())
    }
}

impl<R: Read> Read for SeekAvoidingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for SeekAvoidingReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => p,
            SeekFrom::Current(d) => self.position.checked_add_signed(d).ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position")
            })?,
            SeekFrom::End(_) => {
                self.position = self.inner.seek(pos)?;
                return Ok(self.position);
            }
        };

        if target > self.position && target - self.position < self.min_bytes_for_seek {
            trace!("skipping {} bytes instead of seeking", target - self.position);
            self.skip(target - self.position)?;
        } else if target != self.position {
            self.position = self.inner.seek(SeekFrom::Start(target))?;
        }
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Cursor that counts real seeks.
    struct CountingCursor {
        inner: Cursor<Vec<u8>>,
        seeks: usize,
    }

    impl Read for CountingCursor {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl Seek for CountingCursor {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.seeks += 1;
            self.inner.seek(pos)
        }
    }

    fn reader(threshold: u64) -> SeekAvoidingReader<CountingCursor> {
        let data: Vec<u8> = (0..=255u8).collect();
        SeekAvoidingReader::new(CountingCursor { inner: Cursor::new(data), seeks: 0 }, threshold)
    }

    #[test]
    fn short_forward_seek_reads_through() {
        let mut r = reader(100);
        r.seek(SeekFrom::Start(10)).unwrap();
        r.seek(SeekFrom::Current(50)).unwrap();
        let mut b = [0u8; 1];
        r.read_exact(&mut b).unwrap();
        assert_eq!(b[0], 60);
        assert_eq!(r.get_ref().seeks, 0);
    }

    #[test]
    fn long_and_backward_seeks_hit_the_inner_reader() {
        let mut r = reader(100);
        r.seek(SeekFrom::Start(200)).unwrap();
        r.seek(SeekFrom::Start(5)).unwrap();
        let mut b = [0u8; 1];
        r.read_exact(&mut b).unwrap();
        assert_eq!(b[0], 5);
        assert_eq!(r.get_ref().seeks, 2);
    }

    #[test]
    fn skipping_past_eof_lands_on_target() {
        let mut r = reader(1000);
        assert_eq!(r.seek(SeekFrom::Start(300)).unwrap(), 300);
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }
}
