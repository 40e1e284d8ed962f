//! YUV4MPEG2 decoder
//!
//! A stream is a `YUV4MPEG2` header line followed by pictures, each a
//! `FRAME` line and the raw Y, U and V planes. A fresh header may appear
//! between pictures and changes geometry and rate from then on.

use super::{
    convert::{yuv_to_rgba, YuvPicture},
    ChromaFormat, Decoder, FrameSink, PictureRate, SequenceHeader,
};
use crate::buffer::Frame;
use crate::stream::StreamReader;
use crate::utils::config::DecoderConfig;
use crate::utils::error::{DecodeCause, PlayerError, Result};
use log::{debug, trace};

const SIGNATURE: &[u8] = b"YUV4MPEG2";
const FRAME_MARKER: &[u8] = b"FRAME";

/// Decoder for YUV4MPEG2 (`.y4m`) streams
pub struct Y4mDecoder {
    reader: StreamReader,
    config: DecoderConfig,
    picture: Option<YuvPicture>,
    next_index: u64,
    frames_decoded: u64,
}

impl Y4mDecoder {
    pub fn new(reader: StreamReader, config: DecoderConfig) -> Self {
        Self {
            reader,
            config,
            picture: None,
            next_index: 0,
            frames_decoded: 0,
        }
    }

    /// Number frames starting at `index`
    pub fn starting_at(mut self, index: u64) -> Self {
        self.next_index = index;
        self
    }

    fn read_header(&mut self) -> Result<SequenceHeader> {
        let offset = self.reader.offset();
        let line = self.reader.read_line(self.config.max_header_length)?;
        let header = parse_header(&line, offset, self.config.max_dimension)?;

        debug!(
            "Sequence header at byte {}: {}x{} (coded {}x{}), {:?}, {:?} fps",
            offset,
            header.width,
            header.height,
            header.coded_width,
            header.coded_height,
            header.chroma,
            header.picture_rate.as_f64()
        );

        Ok(header)
    }

    fn decode_picture(&mut self, header: &SequenceHeader, sink: &mut dyn FrameSink) -> Result<()> {
        let offset = self.reader.offset();
        let line = self.reader.read_line(self.config.max_header_length)?;
        if line.len() > FRAME_MARKER.len() && line[FRAME_MARKER.len()] != b' ' {
            return Err(PlayerError::decode(offset, DecodeCause::UnexpectedToken(token_text(&line))));
        }

        // checkpoint: blocks while paused, fails once cancelled
        let mut pixels = sink.fetch_buffer(header.width, header.height)?;

        let picture = match self.picture.take() {
            Some(picture) if picture.fits(header) => picture,
            _ => YuvPicture::for_header(header),
        };
        let picture = self.picture.insert(picture);
        read_planes(&mut self.reader, header, picture)?;
        yuv_to_rgba(picture, header.width, header.height, header.full_range, &mut pixels);

        let frame = Frame {
            width: header.width,
            height: header.height,
            coded_width: header.coded_width,
            coded_height: header.coded_height,
            pixels,
            sequence_index: self.next_index,
        };

        trace!("Decoded picture {} at byte {}", self.next_index, offset);
        self.next_index += 1;
        self.frames_decoded += 1;

        sink.picture_decoded(frame)
    }
}

impl Decoder for Y4mDecoder {
    fn decode_sequence(&mut self, sink: &mut dyn FrameSink) -> Result<()> {
        if !self.reader.starts_with(SIGNATURE)? {
            return Err(PlayerError::decode(self.reader.offset(), DecodeCause::BadSignature));
        }

        let mut header = self.read_header()?;
        sink.sequence_started(&header)?;

        loop {
            if self.reader.at_eof()? {
                break;
            }

            if self.reader.starts_with(FRAME_MARKER)? {
                self.decode_picture(&header, sink)?;
            } else if self.reader.starts_with(SIGNATURE)? {
                header = self.read_header()?;
                sink.sequence_started(&header)?;
            } else {
                let offset = self.reader.offset();
                let token = token_text(self.reader.peek(16)?);
                return Err(PlayerError::decode(offset, DecodeCause::UnexpectedToken(token)));
            }
        }

        debug!("End of sequence after {} pictures", self.frames_decoded);
        sink.sequence_ended()
    }

    fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    fn next_index(&self) -> u64 {
        self.next_index
    }
}

/// Read the visible rows of every plane into the coded-size picture
fn read_planes(reader: &mut StreamReader, header: &SequenceHeader, picture: &mut YuvPicture) -> Result<()> {
    let width = header.width as usize;
    for row in picture.y.chunks_exact_mut(picture.y_stride).take(header.height as usize) {
        reader.read_exact(&mut row[..width])?;
    }

    if header.chroma == ChromaFormat::Mono {
        return Ok(());
    }

    let (c_width, c_height) = header.chroma.chroma_size(header.width, header.height);
    for plane in [&mut picture.u, &mut picture.v] {
        for row in plane.chunks_exact_mut(picture.c_stride).take(c_height as usize) {
            reader.read_exact(&mut row[..c_width as usize])?;
        }
    }

    Ok(())
}

/// First whitespace-delimited word of `bytes`, for error messages
fn token_text(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .position(|b| b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn parse_ratio(value: &str) -> Option<(u32, u32)> {
    let (num, den) = value.split_once(':')?;
    Some((num.parse().ok()?, den.parse().ok()?))
}

/// Parse a stream header line that started at byte `line_offset`
pub(crate) fn parse_header(line: &[u8], line_offset: u64, max_dimension: u32) -> Result<SequenceHeader> {
    let mut width = None;
    let mut height = None;
    let mut rate = PictureRate::UNKNOWN;
    let mut chroma = ChromaFormat::Yuv420;
    let mut full = false;

    let mut position = 0usize;
    for (index, token) in line.split(|&b| b == b' ').enumerate() {
        let token_offset = line_offset + position as u64;
        position += token.len() + 1;

        if index == 0 {
            if token != SIGNATURE {
                return Err(PlayerError::decode(token_offset, DecodeCause::BadSignature));
            }
            continue;
        }

        if token.is_empty() {
            continue;
        }

        let invalid = || PlayerError::decode(token_offset, DecodeCause::InvalidTag(token_text(token)));
        let value = std::str::from_utf8(&token[1..]).map_err(|_| invalid())?;

        match token[0] {
            b'W' => width = Some(value.parse::<u32>().map_err(|_| invalid())?),
            b'H' => height = Some(value.parse::<u32>().map_err(|_| invalid())?),
            b'F' => {
                let (num, den) = parse_ratio(value).ok_or_else(invalid)?;
                rate = PictureRate::new(num, den);
            }
            b'A' => {
                parse_ratio(value).ok_or_else(invalid)?;
            }
            b'I' => {
                if !matches!(value, "p" | "t" | "b" | "m" | "?") {
                    return Err(invalid());
                }
            }
            b'C' => {
                chroma = match value {
                    "420" | "420jpeg" | "420paldv" | "420mpeg2" => ChromaFormat::Yuv420,
                    "422" => ChromaFormat::Yuv422,
                    "444" => ChromaFormat::Yuv444,
                    "mono" => ChromaFormat::Mono,
                    other => {
                        return Err(PlayerError::decode(
                            token_offset,
                            DecodeCause::UnsupportedColorspace(other.to_string()),
                        ));
                    }
                };
            }
            b'X' => {
                if value.eq_ignore_ascii_case("COLORRANGE=FULL") {
                    full = true;
                } else if value.eq_ignore_ascii_case("COLORRANGE=LIMITED") {
                    full = false;
                }
            }
            _ => return Err(invalid()),
        }
    }

    let width = width.ok_or_else(|| PlayerError::decode(line_offset, DecodeCause::MissingDimension('W')))?;
    let height = height.ok_or_else(|| PlayerError::decode(line_offset, DecodeCause::MissingDimension('H')))?;

    if width == 0 || height == 0 || width > max_dimension || height > max_dimension {
        return Err(PlayerError::decode(line_offset, DecodeCause::InvalidDimensions { width, height }));
    }

    let mut header = SequenceHeader::new(width, height, rate, chroma);
    header.full_range = full;
    Ok(header)
}
