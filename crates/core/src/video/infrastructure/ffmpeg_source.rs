use std::path::Path;

use ffmpeg_next::format::context::Input;
use ffmpeg_next::software::scaling;
use ffmpeg_next::util::frame::video::Video as VideoFrame;

use crate::shared::constants::DEFAULT_SEQUENCE_FPS;
use crate::shared::frame::Frame;
use crate::shared::stream_metadata::{timestamp_for, StreamMetadata};
use crate::video::domain::frame_source::FrameSource;

type SourceError = Box<dyn std::error::Error>;

/// Video file source backed by ffmpeg-next.
///
/// Frames come out as packed RGB24, stamped `index / fps` so a recorded
/// clip replays on the clock it was captured with.
pub struct FfmpegFrameSource {
    opened: Option<OpenedInput>,
}

struct OpenedInput {
    input: Input,
    stream_index: usize,
    fps: f64,
}

// Safety: the ffmpeg contexts are owned by this source and only touched by
// whichever thread currently owns it.
unsafe impl Send for FfmpegFrameSource {}

impl FfmpegFrameSource {
    pub fn new() -> Self {
        Self { opened: None }
    }
}

impl Default for FfmpegFrameSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Best video stream of `input` with a fresh decoder for it.
fn video_decoder(input: &Input) -> Result<(usize, ffmpeg_next::decoder::Video), SourceError> {
    let stream = input
        .streams()
        .best(ffmpeg_next::media::Type::Video)
        .ok_or("No video stream found")?;
    let context = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
    Ok((stream.index(), context.decoder().video()?))
}

fn frame_rate(rate: ffmpeg_next::Rational) -> Option<f64> {
    (rate.denominator() > 0 && rate.numerator() > 0)
        .then(|| f64::from(rate.numerator()) / f64::from(rate.denominator()))
}

impl FrameSource for FfmpegFrameSource {
    fn open(&mut self, path: &Path) -> Result<StreamMetadata, SourceError> {
        ffmpeg_next::init()?;
        let input = ffmpeg_next::format::input(path)?;
        let (stream_index, decoder) = video_decoder(&input)?;
        let stream = input.stream(stream_index).ok_or("Video stream vanished")?;

        let fps = frame_rate(stream.rate()).unwrap_or_else(|| {
            log::warn!(
                "{} reports no frame rate, assuming {DEFAULT_SEQUENCE_FPS} fps",
                path.display()
            );
            DEFAULT_SEQUENCE_FPS
        });
        let metadata = StreamMetadata {
            width: decoder.width(),
            height: decoder.height(),
            fps,
            total_frames: usize::try_from(stream.frames()).unwrap_or(0),
            source_path: Some(path.to_path_buf()),
        };
        let codec = decoder.codec().map(|c| c.name().to_string());
        log::info!(
            "Opened {} ({}x{} @ {fps:.2} fps, codec {})",
            path.display(),
            metadata.width,
            metadata.height,
            codec.as_deref().unwrap_or("unknown")
        );

        self.opened = Some(OpenedInput {
            input,
            stream_index,
            fps,
        });
        Ok(metadata)
    }

    fn frames(&mut self) -> Box<dyn Iterator<Item = Result<Frame, SourceError>> + '_> {
        let Some(opened) = self.opened.as_mut() else {
            return Box::new(std::iter::once(Err("FfmpegFrameSource: not opened".into())));
        };
        match DecodeIter::start(opened) {
            Ok(iter) => Box::new(iter),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }

    fn close(&mut self) {
        self.opened = None;
    }
}

/// Where the decoder is in the file.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Packets,
    Draining,
    Finished,
}

struct DecodeIter<'a> {
    input: &'a mut Input,
    stream_index: usize,
    fps: f64,
    decoder: ffmpeg_next::decoder::Video,
    converter: RgbConverter,
    next_index: usize,
    phase: Phase,
}

impl<'a> DecodeIter<'a> {
    fn start(opened: &'a mut OpenedInput) -> Result<Self, SourceError> {
        let (_, decoder) = video_decoder(&opened.input)?;
        let converter = RgbConverter::new(&decoder)?;
        Ok(Self {
            input: &mut opened.input,
            stream_index: opened.stream_index,
            fps: opened.fps,
            decoder,
            converter,
            next_index: 0,
            phase: Phase::Packets,
        })
    }

    /// Pulls one decoded picture if the decoder has one ready.
    fn receive(&mut self) -> Option<Result<Frame, SourceError>> {
        let mut decoded = VideoFrame::empty();
        self.decoder.receive_frame(&mut decoded).ok()?;

        let index = self.next_index;
        self.next_index += 1;
        Some(
            self.converter
                .convert(&decoded)
                .map(|pixels| {
                    Frame::new(
                        pixels,
                        self.converter.width,
                        self.converter.height,
                        3,
                        index,
                        timestamp_for(index, self.fps),
                    )
                })
                .map_err(Into::into),
        )
    }

    fn feed_next_packet(&mut self) {
        loop {
            let Some((stream, packet)) = self.input.packets().next() else {
                if let Err(e) = self.decoder.send_eof() {
                    log::debug!("Decoder flush failed: {e}");
                }
                self.phase = Phase::Draining;
                return;
            };
            if stream.index() != self.stream_index {
                continue;
            }
            match self.decoder.send_packet(&packet) {
                Ok(()) => return,
                Err(e) => log::debug!("Skipping undecodable packet: {e}"),
            }
        }
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = Result<Frame, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.phase != Phase::Finished {
            if let Some(frame) = self.receive() {
                return Some(frame);
            }
            match self.phase {
                Phase::Packets => self.feed_next_packet(),
                _ => self.phase = Phase::Finished,
            }
        }
        None
    }
}

/// Scales decoder output to RGB24 and strips row padding.
struct RgbConverter {
    scaler: scaling::Context,
    width: u32,
    height: u32,
}

impl RgbConverter {
    fn new(decoder: &ffmpeg_next::decoder::Video) -> Result<Self, ffmpeg_next::Error> {
        let (width, height) = (decoder.width(), decoder.height());
        let scaler = scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg_next::format::Pixel::RGB24,
            width,
            height,
            scaling::Flags::BILINEAR,
        )?;
        Ok(Self {
            scaler,
            width,
            height,
        })
    }

    fn convert(&mut self, decoded: &VideoFrame) -> Result<Vec<u8>, ffmpeg_next::Error> {
        let mut rgb = VideoFrame::empty();
        self.scaler.run(decoded, &mut rgb)?;

        let row_bytes = self.width as usize * 3;
        let stride = rgb.stride(0);
        Ok(rgb
            .data(0)
            .chunks(stride)
            .take(self.height as usize)
            .flat_map(|row| &row[..row_bytes])
            .copied()
            .collect())
    }
}
