//! Checkpoint playback reader.
//!
//! [`CheckpointReader`] reads frames from any `Read` source. The header is
//! validated on construction and every frame's stored hash is checked
//! against its snapshot as it is read.

use std::io::Read;

use crate::codec::{decode_frame, decode_header};
use crate::error::CheckpointError;
use crate::hash::snapshot_hash;
use crate::types::{CheckpointHeader, Frame};

fn verified(frame: Frame) -> Result<Frame, CheckpointError> {
    let computed = snapshot_hash(&frame.snapshot);
    if computed != frame.snapshot_hash {
        return Err(CheckpointError::HashMismatch {
            region: frame.region(),
            time: frame.time(),
            recorded: frame.snapshot_hash,
            computed,
        });
    }
    Ok(frame)
}

/// Reads checkpoint data from a byte stream.
///
/// Generic over `R: Read` so tests can use `&[u8]` and production
/// code can use `BufReader<File>`.
pub struct CheckpointReader<R: Read> {
    reader: R,
    header: CheckpointHeader,
    frames_read: u64,
}

impl<R: Read> CheckpointReader<R> {
    /// Open a checkpoint stream, reading and validating the header.
    pub fn open(mut reader: R) -> Result<Self, CheckpointError> {
        let header = decode_header(&mut reader)?;
        Ok(Self {
            reader,
            header,
            frames_read: 0,
        })
    }

    /// Run description from the file header.
    pub fn header(&self) -> &CheckpointHeader {
        &self.header
    }

    /// Fail unless the file was written under `current` configuration hash.
    pub fn expect_config(&self, current: u64) -> Result<(), CheckpointError> {
        if self.header.config_hash != current {
            return Err(CheckpointError::ConfigMismatch {
                recorded: self.header.config_hash,
                current,
            });
        }
        Ok(())
    }

    /// Read the next frame, or `None` if the stream is exhausted.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, CheckpointError> {
        let Some(frame) = decode_frame(&mut self.reader)? else {
            return Ok(None);
        };
        self.frames_read += 1;
        verified(frame).map(Some)
    }

    /// Number of frames read so far.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Convert into a frame iterator.
    pub fn frames(self) -> FrameIter<R> {
        FrameIter {
            reader: self.reader,
            frames_read: self.frames_read,
            done: false,
        }
    }
}

impl<R: Read> std::fmt::Debug for CheckpointReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointReader")
            .field("header", &self.header)
            .field("frames_read", &self.frames_read)
            .finish()
    }
}

/// Iterator adapter over checkpoint frames.
///
/// Stops after the first error.
pub struct FrameIter<R: Read> {
    reader: R,
    frames_read: u64,
    done: bool,
}

impl<R: Read> FrameIter<R> {
    /// Number of frames read so far, including those read before
    /// conversion.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }
}

impl<R: Read> Iterator for FrameIter<R> {
    type Item = Result<Frame, CheckpointError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match decode_frame(&mut self.reader).and_then(|f| f.map(verified).transpose()) {
            Ok(Some(frame)) => {
                self.frames_read += 1;
                Some(Ok(frame))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
