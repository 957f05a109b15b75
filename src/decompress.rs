//! Compressed dump handling.
//!
//! Dumps are published as `.bz2` (and occasionally recompressed as `.zst`). They can either be
//! decompressed next to the archive with [`DumpDecompressor`] or streamed with [`open_dump`].

use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Read},
    path::{Path, PathBuf},
};

#[derive(Debug, thiserror::Error)]
pub enum DecompressError {
    #[error("`{}` is not a supported archive (expected .bz2 or .zst)", .0.display())]
    UnsupportedFormat(PathBuf),
    #[error("`{}` already exists, refusing to overwrite", .0.display())]
    AlreadyExists(PathBuf),
    #[error("I/O error on `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DecompressError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        DecompressError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Bzip2,
    Zstd,
}

impl Compression {
    pub fn detect(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "bz2" => Some(Compression::Bzip2),
            "zst" => Some(Compression::Zstd),
            _ => None,
        }
    }

    fn decoder<'a, R: BufRead + 'a>(self, reader: R) -> std::io::Result<Box<dyn Read + 'a>> {
        Ok(match self {
            // dumps are multi-stream archives
            Compression::Bzip2 => Box::new(bzip2::bufread::MultiBzDecoder::new(reader)),
            Compression::Zstd => Box::new(zstd::stream::Decoder::with_buffer(reader)?),
        })
    }
}

/// Open a dump for reading, decompressing on the fly if the extension asks for it.
pub fn open_dump(path: &Path) -> Result<Box<dyn BufRead>, DecompressError> {
    let file = File::open(path).map_err(|e| DecompressError::io(path, e))?;
    let reader = BufReader::new(file);

    match Compression::detect(path) {
        Some(compression) => {
            let decoder = compression
                .decoder(reader)
                .map_err(|e| DecompressError::io(path, e))?;
            Ok(Box::new(BufReader::new(decoder)))
        }
        None => Ok(Box::new(reader)),
    }
}

/// Decompresses an archive to a file next to it, named without the archive extension.
#[derive(Debug)]
pub struct DumpDecompressor {
    source: PathBuf,
    target: PathBuf,
    compression: Compression,
    overwrite: bool,
}

impl DumpDecompressor {
    pub fn new(source: impl Into<PathBuf>) -> Result<Self, DecompressError> {
        let source = source.into();
        let compression = Compression::detect(&source)
            .ok_or_else(|| DecompressError::UnsupportedFormat(source.clone()))?;
        let target = source.with_extension("");

        Ok(Self {
            source,
            target,
            compression,
            overwrite: false,
        })
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Write the decompressed dump and return its path.
    pub fn decompress(&self) -> Result<PathBuf, DecompressError> {
        if self.target.exists() && !self.overwrite {
            return Err(DecompressError::AlreadyExists(self.target.clone()));
        }

        tracing::info!(
            message = "decompressing dump",
            source = %self.source.display(),
            target = %self.target.display()
        );

        let source = File::open(&self.source).map_err(|e| DecompressError::io(&self.source, e))?;
        let mut decoder = self
            .compression
            .decoder(BufReader::new(source))
            .map_err(|e| DecompressError::io(&self.source, e))?;

        let target = File::create(&self.target).map_err(|e| DecompressError::io(&self.target, e))?;
        let mut target = BufWriter::new(target);
        let bytes = std::io::copy(&mut decoder, &mut target)
            .map_err(|e| DecompressError::io(&self.source, e))?;
        std::io::Write::flush(&mut target).map_err(|e| DecompressError::io(&self.target, e))?;

        tracing::info!(message = "decompressed dump", bytes);
        Ok(self.target.clone())
    }

    /// Delete the decompressed file.
    pub fn remove(&self) -> Result<(), DecompressError> {
        std::fs::remove_file(&self.target).map_err(|e| DecompressError::io(&self.target, e))
    }
}
