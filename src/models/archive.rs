//! Tar archive extraction

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tar::Archive;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Unpack `archive` into `dest`, gunzipping first when the file is gzip-compressed.
///
/// Compression is detected from the file contents, not the extension.
pub fn extract_tar(archive: &Path, dest: &Path) -> io::Result<()> {
    let mut file = File::open(archive)?;

    let mut magic = [0u8; 2];
    let read = file.read(&mut magic)?;
    file.seek(SeekFrom::Start(0))?;

    let reader = BufReader::new(file);
    if read == 2 && magic == GZIP_MAGIC {
        Archive::new(GzDecoder::new(reader)).unpack(dest)
    } else {
        Archive::new(reader).unpack(dest)
    }
}
