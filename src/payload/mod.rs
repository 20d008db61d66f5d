//! Presents a payload path as a single readable byte stream.
//!
//! A regular file is passed through untouched. A directory is rendered as
//! a tar archive of every regular file beneath it (gzip-compressed under
//! bundle format version 2), produced lazily by a dedicated worker thread
//! writing into a bounded pipe so that nothing is ever materialized in
//! memory.

pub mod pipe;

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::thread::{self, JoinHandle};

use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use walkdir::WalkDir;

use crate::bundle::version::BundleFormatVersion;
use crate::constants::PIPE_BUFFER_SIZE;
use crate::errors::{Error, Result};
use pipe::{bounded, PipeReader, PipeWriter};

enum Source {
    File(File),
    Piped(PipeReader),
}

/// A lazy payload byte stream plus the shape of its contents.
///
/// Reading to EOF (or calling [`PayloadStream::close`]) joins the producer
/// worker, so archive failures always surface to the consumer instead of
/// silently truncating the stream. Dropping the stream mid-read closes the
/// pipe, which terminates the producer.
pub struct PayloadStream {
    source: Option<Source>,
    producer: Option<JoinHandle<Result<()>>>,
    is_archive: bool,
}

/// Open `path` as a payload stream under the given bundle format version.
pub fn stream(path: &Path, version: BundleFormatVersion) -> Result<PayloadStream> {
    if path.is_dir() {
        let (writer, reader) = bounded(PIPE_BUFFER_SIZE);
        let root = path.to_path_buf();
        let compress = version.compresses_payload();
        let producer = thread::Builder::new()
            .name("payload-streamer".to_string())
            .spawn(move || produce_archive(&root, compress, writer))?;
        Ok(PayloadStream {
            source: Some(Source::Piped(reader)),
            producer: Some(producer),
            is_archive: true,
        })
    } else if path.is_file() {
        let file = File::open(path)?;
        Ok(PayloadStream {
            source: Some(Source::File(file)),
            producer: None,
            is_archive: false,
        })
    } else {
        Err(Error::BadInput(format!(
            "payload path {} is neither a file nor a directory",
            path.display()
        )))
    }
}

impl PayloadStream {
    /// Whether the stream carries a tar / tar.gz archive rather than a
    /// single file's bytes.
    pub fn is_archive(&self) -> bool {
        self.is_archive
    }

    /// Close the stream, waiting for the producer worker to terminate.
    /// An outstanding producer failure surfaces here.
    pub fn close(mut self) -> Result<()> {
        self.source.take();
        self.join_producer()
    }

    fn join_producer(&mut self) -> Result<()> {
        match self.producer.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(Error::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "payload producer panicked",
                ))),
            },
            None => Ok(()),
        }
    }
}

impl Read for PayloadStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = match self.source.as_mut() {
            Some(Source::File(file)) => file.read(buf)?,
            Some(Source::Piped(reader)) => reader.read(buf)?,
            None => 0,
        };
        if n == 0 {
            // the producer finished (or failed); surface its verdict now
            if let Err(e) = self.join_producer() {
                return Err(io::Error::new(io::ErrorKind::Other, e));
            }
        }
        Ok(n)
    }
}

impl Drop for PayloadStream {
    fn drop(&mut self) {
        self.source.take();
        if let Some(handle) = self.producer.take() {
            let _ = handle.join();
        }
    }
}

fn produce_archive(root: &Path, compress: bool, writer: PipeWriter) -> Result<()> {
    if compress {
        let encoder = GzEncoder::new(writer, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        append_tree(&mut builder, root)?;
        builder.into_inner()?.finish()?;
    } else {
        let mut builder = tar::Builder::new(writer);
        append_tree(&mut builder, root)?;
        builder.into_inner()?;
    }
    Ok(())
}

/// Append every regular file under `root`, named by its path relative to
/// `root`. Directories themselves are not emitted.
fn append_tree<W: Write>(builder: &mut tar::Builder<W>, root: &Path) -> Result<()> {
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        debug!("archiving {}", rel.display());
        builder.append_path_with_name(entry.path(), rel)?;
    }
    Ok(())
}
