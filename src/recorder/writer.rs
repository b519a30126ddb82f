//! Frame writers.
//!
//! A [`ClipWriter`] receives the frames of one camera view for one output unit.
//! Two backends are provided:
//!
//! - [`RawClipWriter`]: a single append-only clip file of bincode-encoded
//!   [`FrameRecord`]s, the "video" form of an episode. Encoding to a compressed
//!   codec is left to offline tooling.
//! - [`ImageSequenceWriter`]: one binary PPM (RGB) or PGM (mono) file per frame.
//!
//! Writers create their files lazily on the first frame, so a unit that never
//! receives a frame leaves nothing on disk.

use crate::error::{AppResult, DaqError};
use crate::observation::{CameraView, Frame, PixelFormat};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// One frame as stored in a clip file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    /// Frame index within the phase
    pub index: u64,
    /// Sampling time
    pub timestamp: DateTime<Utc>,
    /// Pixel data
    pub frame: Frame,
}

/// Files produced by a finished writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFiles {
    /// Frames written
    pub frames: u64,
    /// Files on disk, empty if no frame was written
    pub paths: Vec<PathBuf>,
}

/// Sink for the frames of one camera view.
pub trait ClipWriter: Send {
    /// Append one frame.
    fn write_frame(&mut self, index: u64, timestamp: DateTime<Utc>, frame: &Frame) -> AppResult<()>;

    /// Flush and close. Calling it again returns the same summary.
    fn finish(&mut self) -> AppResult<WrittenFiles>;

    /// Frames written so far.
    fn frames(&self) -> u64;

    /// Whether `frame` can be appended to this unit.
    fn fits(&self, frame: &Frame) -> bool {
        frame.is_well_formed()
    }
}

// ============================================================================
// Raw clip file
// ============================================================================

/// Writes one `clip_<n>.frames` file. Every frame of a clip has the same shape.
pub struct RawClipWriter {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    shape: Option<(u32, u32, PixelFormat)>,
    frames: u64,
    finished: bool,
}

impl RawClipWriter {
    /// Writer for the clip at `path`, created on the first frame.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
            shape: None,
            frames: 0,
            finished: false,
        }
    }
}

impl ClipWriter for RawClipWriter {
    fn write_frame(&mut self, index: u64, timestamp: DateTime<Utc>, frame: &Frame) -> AppResult<()> {
        if self.finished {
            return Err(DaqError::Io(std::io::Error::new(
                ErrorKind::BrokenPipe,
                format!("clip {} is already finished", self.path.display()),
            )));
        }

        let shape = (frame.width, frame.height, frame.format);
        match self.shape {
            Some(expected) if expected != shape => {
                return Err(DaqError::Capture(format!(
                    "frame shape {:?} does not match clip shape {:?}",
                    shape, expected
                )));
            }
            Some(_) => {}
            None => {
                if let Some(parent) = self.path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                self.writer = Some(BufWriter::new(File::create(&self.path)?));
                self.shape = Some(shape);
            }
        }

        if let Some(writer) = self.writer.as_mut() {
            let record = FrameRecord {
                index,
                timestamp,
                frame: frame.clone(),
            };
            bincode::serialize_into(writer, &record)?;
            self.frames += 1;
        }
        Ok(())
    }

    fn finish(&mut self) -> AppResult<WrittenFiles> {
        self.finished = true;
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        let paths = if self.frames > 0 {
            vec![self.path.clone()]
        } else {
            Vec::new()
        };
        Ok(WrittenFiles {
            frames: self.frames,
            paths,
        })
    }

    fn frames(&self) -> u64 {
        self.frames
    }

    fn fits(&self, frame: &Frame) -> bool {
        let shape = (frame.width, frame.height, frame.format);
        !self.finished && frame.is_well_formed() && self.shape.map_or(true, |expected| expected == shape)
    }
}

/// Read every frame record of a raw clip file, in write order.
pub fn read_clip(path: &Path) -> AppResult<Vec<FrameRecord>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    loop {
        match bincode::deserialize_from::<_, FrameRecord>(&mut reader) {
            Ok(record) => records.push(record),
            Err(err) => {
                if let bincode::ErrorKind::Io(io) = err.as_ref() {
                    if io.kind() == ErrorKind::UnexpectedEof {
                        break;
                    }
                }
                return Err(err.into());
            }
        }
    }
    Ok(records)
}

// ============================================================================
// Image sequence
// ============================================================================

/// Writes one netpbm file per frame into a directory.
pub struct ImageSequenceWriter {
    dir: PathBuf,
    view: CameraView,
    paths: Vec<PathBuf>,
}

impl ImageSequenceWriter {
    /// Writer for `view` frames in `dir`.
    pub fn new(dir: impl Into<PathBuf>, view: CameraView) -> Self {
        Self {
            dir: dir.into(),
            view,
            paths: Vec::new(),
        }
    }
}

impl ClipWriter for ImageSequenceWriter {
    fn write_frame(&mut self, index: u64, _timestamp: DateTime<Utc>, frame: &Frame) -> AppResult<()> {
        if !frame.is_well_formed() {
            return Err(DaqError::Capture(format!(
                "{} frame {} has {} bytes, expected {}",
                self.view.as_str(),
                index,
                frame.data.len(),
                frame.expected_len()
            )));
        }
        if self.paths.is_empty() {
            std::fs::create_dir_all(&self.dir)?;
        }

        let extension = match frame.format {
            PixelFormat::Mono8 => "pgm",
            PixelFormat::Rgb8 => "ppm",
        };
        let path = self
            .dir
            .join(format!("image_{}_{}.{}", self.view.as_str(), index, extension));
        let mut file = BufWriter::new(File::create(&path)?);
        write_netpbm(&mut file, frame)?;
        file.flush()?;

        self.paths.push(path);
        Ok(())
    }

    fn finish(&mut self) -> AppResult<WrittenFiles> {
        Ok(WrittenFiles {
            frames: self.paths.len() as u64,
            paths: self.paths.clone(),
        })
    }

    fn frames(&self) -> u64 {
        self.paths.len() as u64
    }
}

/// Binary PGM (P5) or PPM (P6), maxval 255.
fn write_netpbm<W: Write>(out: &mut W, frame: &Frame) -> std::io::Result<()> {
    let magic = match frame.format {
        PixelFormat::Mono8 => "P5",
        PixelFormat::Rgb8 => "P6",
    };
    write!(out, "{}\n{} {}\n255\n", magic, frame.width, frame.height)?;
    out.write_all(&frame.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::tests::solid_frame;

    #[test]
    fn test_raw_clip_round_trip_in_order() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("Video").join("clip_0.frames");
        let mut writer = RawClipWriter::new(&path);

        assert!(!path.exists());
        for i in 0..3u8 {
            writer
                .write_frame(u64::from(i), Utc::now(), &solid_frame(4, 3, i))
                .unwrap();
        }
        let written = writer.finish().unwrap();
        assert_eq!(written.frames, 3);
        assert_eq!(written.paths, vec![path.clone()]);
        assert_eq!(writer.finish().unwrap(), written);

        let records = read_clip(&path).unwrap();
        let indices: Vec<u64> = records.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(records[2].frame, solid_frame(4, 3, 2));
    }

    #[test]
    fn test_raw_clip_rejects_shape_change_and_late_writes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut writer = RawClipWriter::new(temp_dir.path().join("clip_0.frames"));

        writer.write_frame(0, Utc::now(), &solid_frame(4, 3, 0)).unwrap();
        assert!(writer.fits(&solid_frame(4, 3, 1)));
        assert!(!writer.fits(&solid_frame(8, 6, 0)));
        let err = writer
            .write_frame(1, Utc::now(), &solid_frame(8, 6, 0))
            .unwrap_err();
        assert!(matches!(err, DaqError::Capture(_)));

        writer.finish().unwrap();
        assert!(!writer.fits(&solid_frame(4, 3, 0)));
        assert!(writer.write_frame(2, Utc::now(), &solid_frame(4, 3, 0)).is_err());
        assert_eq!(writer.frames(), 1);
    }

    #[test]
    fn test_empty_clip_leaves_no_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("clip_0.frames");
        let mut writer = RawClipWriter::new(&path);
        let written = writer.finish().unwrap();
        assert_eq!(written.frames, 0);
        assert!(written.paths.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_image_sequence_writes_netpbm() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("Bottom_Images");
        let mut writer = ImageSequenceWriter::new(&dir, CameraView::Bottom);

        writer.write_frame(5, Utc::now(), &solid_frame(2, 2, 9)).unwrap();
        let mono = Frame {
            width: 2,
            height: 1,
            format: PixelFormat::Mono8,
            data: vec![1, 2],
        };
        writer.write_frame(6, Utc::now(), &mono).unwrap();

        let ppm = std::fs::read(dir.join("image_bottom_5.ppm")).unwrap();
        assert!(ppm.starts_with(b"P6\n2 2\n255\n"));
        assert_eq!(ppm.len(), "P6\n2 2\n255\n".len() + 12);

        let pgm = std::fs::read(dir.join("image_bottom_6.pgm")).unwrap();
        assert_eq!(pgm, b"P5\n2 1\n255\n\x01\x02".to_vec());
        assert_eq!(writer.finish().unwrap().frames, 2);
    }
}
