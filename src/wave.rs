use std::{
    ffi::OsString,
    fs::{self, File},
    io::{BufWriter, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use log::{debug, trace, warn};
use uuid::Uuid;

use crate::{
    audio::{AudioFormatInfo, CaptureError},
    Nothing, Res,
};

const HEADER_SIZE: usize = 44;

/// Canonical 44 byte WAVE header: a `RIFF` chunk holding a 16 byte `fmt ` chunk followed by the
/// `data` chunk header. All fields are little endian.
/// Some resources describing the file format (last accessed 16/09/24):
/// - <http://www.ringthis.com/dev/wave_format.htm>
/// - <http://soundfile.sapp.org/doc/WaveFormat>
struct WaveHeader {
    format: AudioFormatInfo,
    data_size: u32,
}

impl WaveHeader {
    const BYTES_IN_HEADER: usize = HEADER_SIZE;
    const FMT_CHUNK_SIZE: u32 = 16;

    fn new(format: AudioFormatInfo, data_size: u32) -> Self {
        WaveHeader { format, data_size }
    }

    /// File size less the 8 bytes of the `RIFF` marker and this field. Chunks are word aligned,
    /// so an odd data chunk is followed by a pad byte that counts here but not in the data size.
    fn riff_size(&self) -> u32 {
        (Self::BYTES_IN_HEADER as u32 - 8) + self.data_size + (self.data_size % 2)
    }

    fn as_bytes(&self) -> [u8; HEADER_SIZE] {
        trace!("Preparing WAV header data");
        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(b"RIFF");
        header[4..8].copy_from_slice(&self.riff_size().to_le_bytes());
        header[8..12].copy_from_slice(b"WAVE");
        header[12..16].copy_from_slice(b"fmt ");
        header[16..20].copy_from_slice(&Self::FMT_CHUNK_SIZE.to_le_bytes());
        header[20..22].copy_from_slice(&self.format.type_format_header().to_le_bytes());
        header[22..24].copy_from_slice(&self.format.num_channels.to_le_bytes());
        header[24..28].copy_from_slice(&self.format.sample_rate.to_le_bytes());
        header[28..32].copy_from_slice(&self.format.bytes_per_second().to_le_bytes());
        header[32..34].copy_from_slice(&self.format.block_alignment().to_le_bytes());
        header[34..36].copy_from_slice(&self.format.bit_depth().to_le_bytes());
        header[36..40].copy_from_slice(b"data");
        header[40..44].copy_from_slice(&self.data_size.to_le_bytes());
        header
    }
}

/// Streaming WAV file writer.
///
/// Audio is appended to a staging file next to the destination as it arrives. The header is
/// finalized and the staging file moved into place by [`WaveWriter::commit`]; a writer dropped
/// without committing removes its staging file and leaves the destination untouched.
pub struct WaveWriter {
    writer: Option<BufWriter<File>>,
    file_name: PathBuf,
    part_file_name: PathBuf,
    bytes_written: u64,
    format: AudioFormatInfo,
    committed: bool,
}

impl WaveWriter {
    /// Largest data chunk that still fits the 32-bit RIFF size field, pad byte included.
    const MAX_DATA_SIZE: u64 = u32::MAX as u64 - (WaveHeader::BYTES_IN_HEADER as u64 - 8) - 1;

    /// Create the staging file and reserve space for the header.
    pub fn open(file_name: &Path, format: AudioFormatInfo) -> Res<Self> {
        let part_file_name = Self::part_path(file_name);
        debug!("Creating staging file: {}", part_file_name.display());

        let mut writer = BufWriter::new(File::create(&part_file_name)?);
        writer.write_all(&WaveHeader::new(format, 0).as_bytes())?;

        Ok(Self {
            writer: Some(writer),
            file_name: file_name.to_owned(),
            part_file_name,
            bytes_written: 0,
            format,
            committed: false,
        })
    }

    fn part_path(file_name: &Path) -> PathBuf {
        let mut part: OsString = file_name.as_os_str().to_owned();
        part.push(format!(".{}.part", Uuid::new_v4()));
        PathBuf::from(part)
    }

    pub fn format(&self) -> AudioFormatInfo {
        self.format
    }

    /// Append a chunk of interleaved audio data, already in the writer's sample format.
    pub fn write(&mut self, data: &[u8]) -> Nothing {
        if self.bytes_written + data.len() as u64 > Self::MAX_DATA_SIZE {
            return Err(Box::new(CaptureError::WaveTooLarge));
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| CaptureError::WriteFailure(String::from("writer already closed")))?;
        writer.write_all(data)?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Finalize the header and move the file to its destination. Returns the data size in bytes.
    pub fn commit(&mut self) -> Res<u64> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| CaptureError::WriteFailure(String::from("writer already closed")))?;

        if self.bytes_written % 2 == 1 {
            writer.write_all(&[0])?;
        }
        let header = WaveHeader::new(self.format, self.bytes_written as u32);
        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(&header.as_bytes())?;

        let file = writer.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()?;
        drop(file);

        debug!("Writing to file: {}", self.file_name.display());
        fs::rename(&self.part_file_name, &self.file_name)?;
        self.committed = true;
        Ok(self.bytes_written)
    }
}

impl Drop for WaveWriter {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        drop(self.writer.take());
        if self.part_file_name.exists() {
            debug!("Removing staging file");
            if let Err(err) = fs::remove_file(&self.part_file_name) {
                warn!(
                    "Unable to remove staging file {}: {err}",
                    self.part_file_name.display()
                );
            }
        }
    }
}
