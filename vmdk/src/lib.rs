//! Descriptor extraction for VMware VMDK disk images.
//!
//! Two container layouts are understood:
//!
//! - descriptor-only files, where the whole file is the descriptor text and
//!   starts with `# Disk DescriptorFile`;
//! - monolithic sparse files starting with the `KDMV` magic, whose header
//!   points at a descriptor embedded elsewhere in the file.
//!
//! Only the descriptor region is ever read. Grain tables and extent data are
//! left untouched.

use positioned_io2::ReadAt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::header::SparseHeaderPrefix;
use crate::util::ReadAtExt;

pub mod header;
mod util;

/// Prefix of a descriptor-only VMDK.
pub const DESCRIPTOR_FILE_SIGNATURE: &[u8] = b"# Disk DescriptorFile";
pub const SECTOR_SIZE: u64 = 512;
/// Default upper bound for an embedded descriptor, in bytes.
pub const DEFAULT_MAX_DESCRIPTOR_SIZE: u64 = 16 * 1024 * 1024;

const SNIFF_SIZE: usize = 256;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read initial bytes: {0}")]
    Sniff(#[source] std::io::Error),
    #[error("file is empty")]
    Empty,
    #[error("too small to contain a format magic value ({0} bytes)")]
    TooSmall(usize),
    #[error("unrecognized format (neither descriptor-only nor KDMV)")]
    UnrecognizedFormat,
    #[error(
        "header truncated: {0} bytes available, {needed} needed for the descriptor fields",
        needed = SparseHeaderPrefix::SIZE
    )]
    HeaderTruncated(usize),
    #[error("zero-length descriptor declared")]
    ZeroLengthDescriptor,
    #[error("descriptor size {size} bytes exceeds sanity limit of {limit} bytes")]
    DescriptorTooLarge { size: u64, limit: u64 },
    #[error(
        "descriptor location out of range (offset {offset_sectors} sectors, size {size_sectors} sectors)"
    )]
    DescriptorOutOfRange {
        offset_sectors: u64,
        size_sectors: u64,
    },
    #[error("failed to read descriptor: {0}")]
    Read(#[source] std::io::Error),
    #[error(
        "descriptor read truncated; fewer bytes available than declared ({read} of {expected} bytes at offset {offset})"
    )]
    DescriptorTruncated {
        read: usize,
        expected: u64,
        offset: u64,
    },
    #[error("{}: {inner}", path.display())]
    InFile { path: PathBuf, inner: Box<Error> },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The source could not be opened or read, or was empty.
    Io,
    /// The bytes match neither container layout.
    Unrecognized,
    /// The bytes look like a VMDK but the header is corrupt or inconsistent.
    Malformed,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Open { .. } | Error::Sniff(_) | Error::Empty | Error::Read(_) => ErrorKind::Io,
            Error::TooSmall(_) | Error::UnrecognizedFormat => ErrorKind::Unrecognized,
            Error::HeaderTruncated(_)
            | Error::ZeroLengthDescriptor
            | Error::DescriptorTooLarge { .. }
            | Error::DescriptorOutOfRange { .. }
            | Error::DescriptorTruncated { .. } => ErrorKind::Malformed,
            Error::InFile { inner, .. } => inner.kind(),
        }
    }

    /// Whether the source had already been identified as a VMDK when the
    /// error occurred.
    pub fn is_recognized(&self) -> bool {
        match self {
            // only reachable after a layout was detected
            Error::Read(_) => true,
            Error::InFile { inner, .. } => inner.is_recognized(),
            _ => self.kind() == ErrorKind::Malformed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    DescriptorOnly,
    EmbeddedBinary,
    Unrecognized,
}

impl ContainerFormat {
    /// Classifies a source from the first bytes of its content.
    pub fn detect(window: &[u8]) -> Self {
        if window.starts_with(DESCRIPTOR_FILE_SIGNATURE) {
            return Self::DescriptorOnly;
        }
        match window.first_chunk::<4>() {
            Some(magic) if u32::from_le_bytes(*magic) == SparseHeaderPrefix::MAGIC => {
                Self::EmbeddedBinary
            }
            _ => Self::Unrecognized,
        }
    }

    pub fn is_recognized(self) -> bool {
        self != Self::Unrecognized
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorResult {
    pub text: String,
    pub format: ContainerFormat,
}

impl DescriptorResult {
    pub fn recognized(&self) -> bool {
        self.format.is_recognized()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Embedded descriptors declaring more bytes than this are rejected
    /// before any allocation.
    pub max_descriptor_size: u64,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            max_descriptor_size: DEFAULT_MAX_DESCRIPTOR_SIZE,
        }
    }
}

impl ExtractOptions {
    pub fn with_max_descriptor_size(mut self, max_descriptor_size: u64) -> Self {
        self.max_descriptor_size = max_descriptor_size;
        self
    }
}

/// Extracts the descriptor text of the VMDK at `path` with default options.
pub fn extract_descriptor<P: AsRef<Path>>(path: P) -> Result<DescriptorResult> {
    extract_descriptor_with(path, &ExtractOptions::default())
}

pub fn extract_descriptor_with<P: AsRef<Path>>(
    path: P,
    options: &ExtractOptions,
) -> Result<DescriptorResult> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })?;

    read_descriptor(&file, options).map_err(|e| Error::InFile {
        path: path.to_path_buf(),
        inner: Box::new(e),
    })
}

/// Extracts the descriptor text from any positioned reader.
pub fn read_descriptor<R: ReadAt + ?Sized>(
    reader: &R,
    options: &ExtractOptions,
) -> Result<DescriptorResult> {
    let mut head = [0u8; SNIFF_SIZE];
    let n = reader.read_full_at(0, &mut head).map_err(Error::Sniff)?;
    if n == 0 {
        return Err(Error::Empty);
    }
    let window = &head[..n];

    let format = ContainerFormat::detect(window);
    tracing::debug!("Detected {:?} container ({} header bytes)", format, n);

    match format {
        ContainerFormat::DescriptorOnly => {
            let content = reader.read_to_end_at(0).map_err(Error::Read)?;
            Ok(DescriptorResult {
                text: into_text(content),
                format,
            })
        }
        ContainerFormat::EmbeddedBinary => {
            let text = read_embedded_descriptor(reader, window, options)?;
            Ok(DescriptorResult { text, format })
        }
        ContainerFormat::Unrecognized if window.len() < 4 => Err(Error::TooSmall(window.len())),
        ContainerFormat::Unrecognized => Err(Error::UnrecognizedFormat),
    }
}

fn read_embedded_descriptor<R: ReadAt + ?Sized>(
    reader: &R,
    window: &[u8],
    options: &ExtractOptions,
) -> Result<String> {
    let header =
        SparseHeaderPrefix::from_bytes(window).ok_or(Error::HeaderTruncated(window.len()))?;
    tracing::debug!(
        version = header.version(),
        flags = header.flags(),
        capacity_sectors = header.capacity_sectors(),
        grain_size_sectors = header.grain_size_sectors(),
        "KDMV sparse header"
    );

    let offset_sectors = header.descriptor_offset_sectors();
    let size_sectors = header.descriptor_size_sectors();
    if size_sectors == 0 {
        return Err(Error::ZeroLengthDescriptor);
    }

    let size = size_sectors.saturating_mul(SECTOR_SIZE);
    if size > options.max_descriptor_size {
        return Err(Error::DescriptorTooLarge {
            size,
            limit: options.max_descriptor_size,
        });
    }

    let out_of_range = Error::DescriptorOutOfRange {
        offset_sectors,
        size_sectors,
    };
    // positioned reads take a signed file offset
    let offset = match offset_sectors.checked_mul(SECTOR_SIZE) {
        Some(offset) if offset.checked_add(size).is_some_and(|end| end <= i64::MAX as u64) => {
            offset
        }
        _ => return Err(out_of_range),
    };
    let len = usize::try_from(size).map_err(|_| Error::DescriptorTooLarge {
        size,
        limit: options.max_descriptor_size,
    })?;

    tracing::debug!("Reading {} descriptor bytes at offset {}", len, offset);
    let mut buf = vec![0u8; len];
    let read = reader.read_full_at(offset, &mut buf).map_err(Error::Read)?;
    if read < len {
        return Err(Error::DescriptorTruncated {
            read,
            expected: size,
            offset,
        });
    }

    Ok(into_text(buf))
}

fn into_text(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes)
        .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}
