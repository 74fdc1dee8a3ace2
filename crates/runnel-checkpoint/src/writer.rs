//! Checkpoint recording writer.
//!
//! [`CheckpointWriter`] streams frames to any `Write` sink. The header is
//! written immediately on construction. It implements [`OutputSink`], so a
//! region can write to it directly; [`SharedCheckpointWriter`] lets every
//! region of a run write into one stream.

use std::io::Write;
use std::sync::{Arc, Mutex};

use runnel_element::{OutputError, OutputSink, RegionSnapshot};

use crate::codec::{encode_frame, encode_header};
use crate::error::CheckpointError;
use crate::hash::snapshot_hash;
use crate::types::{CheckpointHeader, Frame};

/// Writes checkpoint data to a byte stream.
///
/// Generic over `W: Write` so tests can use `Vec<u8>` and production
/// code can use `BufWriter<File>`.
///
/// # Examples
///
/// ```
/// use runnel_checkpoint::{CheckpointHeader, CheckpointReader, CheckpointWriter};
/// use runnel_core::RegionId;
/// use runnel_element::RegionSnapshot;
///
/// let header = CheckpointHeader {
///     runnel_version: "0.1.0".into(),
///     config_hash: 0,
///     simulation_start: 0.0,
///     simulation_end: 7200.0,
///     sync_interval: 3600.0,
///     region_count: 1,
/// };
///
/// // Write two sync points to an in-memory buffer.
/// let mut buf = Vec::new();
/// let mut writer = CheckpointWriter::new(&mut buf, &header).unwrap();
/// for time in [0.0, 3600.0] {
///     let snapshot = RegionSnapshot { region: RegionId(0), time, elements: vec![] };
///     writer.write_snapshot(&snapshot).unwrap();
/// }
/// assert_eq!(writer.frames_written(), 2);
/// drop(writer);
///
/// // Read them back.
/// let mut reader = CheckpointReader::open(buf.as_slice()).unwrap();
/// assert_eq!(reader.header(), &header);
/// assert_eq!(reader.next_frame().unwrap().unwrap().time(), 0.0);
/// assert_eq!(reader.next_frame().unwrap().unwrap().time(), 3600.0);
/// assert!(reader.next_frame().unwrap().is_none());
/// ```
pub struct CheckpointWriter<W: Write> {
    writer: W,
    frames_written: u64,
}

impl<W: Write> CheckpointWriter<W> {
    /// Create a new checkpoint writer, immediately writing the header.
    pub fn new(mut writer: W, header: &CheckpointHeader) -> Result<Self, CheckpointError> {
        encode_header(&mut writer, header)?;
        Ok(Self {
            writer,
            frames_written: 0,
        })
    }

    /// Record a frame: hash the snapshot and write both.
    pub fn write_snapshot(&mut self, snapshot: &RegionSnapshot) -> Result<(), CheckpointError> {
        let frame = Frame {
            snapshot_hash: snapshot_hash(snapshot),
            snapshot: snapshot.clone(),
        };
        self.write_raw_frame(&frame)
    }

    /// Write a pre-built frame directly, hash included as given.
    pub fn write_raw_frame(&mut self, frame: &Frame) -> Result<(), CheckpointError> {
        encode_frame(&mut self.writer, frame)?;
        self.frames_written += 1;
        Ok(())
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> Result<(), CheckpointError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Number of frames written so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Consume the writer and return the underlying `Write` sink.
    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Wrap the writer so several regions can share it.
    pub fn shared(self) -> SharedCheckpointWriter<W> {
        SharedCheckpointWriter {
            inner: Arc::new(Mutex::new(self)),
        }
    }
}

impl<W: Write + Send> OutputSink for CheckpointWriter<W> {
    fn write(&mut self, snapshot: &RegionSnapshot) -> Result<(), OutputError> {
        self.write_snapshot(snapshot)?;
        Ok(())
    }
}

impl<W: Write> std::fmt::Debug for CheckpointWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointWriter")
            .field("frames_written", &self.frames_written)
            .finish()
    }
}

// ── Shared writer ───────────────────────────────────────────────

/// A [`CheckpointWriter`] behind a mutex, one clone per region.
///
/// Frames from different regions interleave in the order the regions
/// reach their sync points. Each region's own frames stay in time order.
pub struct SharedCheckpointWriter<W: Write> {
    inner: Arc<Mutex<CheckpointWriter<W>>>,
}

impl<W: Write> Clone for SharedCheckpointWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: Write> SharedCheckpointWriter<W> {
    /// Number of frames written by every clone so far.
    pub fn frames_written(&self) -> u64 {
        self.inner
            .lock()
            .map(|w| w.frames_written())
            .unwrap_or_default()
    }

    /// Flush and return the underlying sink.
    ///
    /// Fails with [`CheckpointError::WriterInUse`] while any other clone
    /// is alive; take every region's output back first.
    pub fn finish(self) -> Result<W, CheckpointError> {
        let mutex = Arc::try_unwrap(self.inner).map_err(|_| CheckpointError::WriterInUse)?;
        let mut writer = mutex.into_inner().map_err(|_| CheckpointError::WriterInUse)?;
        writer.flush()?;
        Ok(writer.into_inner())
    }
}

impl<W: Write + Send> OutputSink for SharedCheckpointWriter<W> {
    fn write(&mut self, snapshot: &RegionSnapshot) -> Result<(), OutputError> {
        let mut writer = self.inner.lock().map_err(|_| OutputError::Rejected {
            reason: "checkpoint writer poisoned by a panicking region".to_string(),
        })?;
        writer.write_snapshot(snapshot)?;
        Ok(())
    }
}

impl<W: Write> std::fmt::Debug for SharedCheckpointWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCheckpointWriter")
            .field("clones", &Arc::strong_count(&self.inner))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::CheckpointReader;
    use runnel_core::RegionId;

    fn header() -> CheckpointHeader {
        CheckpointHeader {
            runnel_version: "0.1.0".into(),
            config_hash: 1,
            simulation_start: 0.0,
            simulation_end: 3600.0,
            sync_interval: 3600.0,
            region_count: 2,
        }
    }

    fn empty(region: u32, time: f64) -> RegionSnapshot {
        RegionSnapshot {
            region: RegionId(region),
            time,
            elements: Vec::new(),
        }
    }

    #[test]
    fn shared_writer_collects_every_region() {
        let shared = CheckpointWriter::new(Vec::new(), &header()).unwrap().shared();
        let mut a = shared.clone();
        let mut b = shared.clone();
        a.write(&empty(0, 0.0)).unwrap();
        b.write(&empty(1, 0.0)).unwrap();
        a.write(&empty(0, 3600.0)).unwrap();
        assert_eq!(shared.frames_written(), 3);
        drop(a);
        drop(b);

        let bytes = shared.finish().unwrap();
        let frames: Vec<Frame> = CheckpointReader::open(bytes.as_slice())
            .unwrap()
            .frames()
            .collect::<Result<_, _>>()
            .unwrap();
        let keys: Vec<(RegionId, f64)> = frames.iter().map(|f| (f.region(), f.time())).collect();
        assert_eq!(
            keys,
            vec![(RegionId(0), 0.0), (RegionId(1), 0.0), (RegionId(0), 3600.0)]
        );
    }

    #[test]
    fn finish_fails_while_a_clone_lives() {
        let shared = CheckpointWriter::new(Vec::new(), &header()).unwrap().shared();
        let _held = shared.clone();
        match shared.finish() {
            Err(CheckpointError::WriterInUse) => {}
            other => panic!("expected WriterInUse, got {other:?}"),
        }
    }

    #[test]
    fn io_failure_fails_construction() {
        struct Full;
        impl Write for Full {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::StorageFull, "disk full"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        assert!(CheckpointWriter::new(Full, &header()).is_err());
    }
}
