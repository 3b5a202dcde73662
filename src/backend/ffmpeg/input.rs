use super::{
    NativeParameters, from_native_pixel_format, from_native_sample_format, from_native_time_base,
    to_native_time_base,
};
use crate::backend::InputContainer;
use crate::error::{Error, Result};
use crate::media::{MediaKind, Packet, StreamMetadata};
use ac_ffmpeg::format::demuxer::{Demuxer, DemuxerWithStreamInfo, SeekTarget};
use ac_ffmpeg::format::io::IO;
use ac_ffmpeg::time::Timestamp;
use bytes::Bytes;
use std::fs::File;
use std::path::Path;

pub(super) struct FfmpegInput {
    demuxer: DemuxerWithStreamInfo<File>,
    streams: Vec<StreamMetadata>,
}

// The demuxer is only driven by the thread that owns it.
unsafe impl Send for FfmpegInput {}

impl FfmpegInput {
    pub(super) fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::open(path.display(), e))?;
        let io = IO::from_seekable_read_stream(file);

        let demuxer = Demuxer::builder()
            .build(io)
            .map_err(|e| Error::open(path.display(), e))?
            .find_stream_info(None)
            .map_err(|(_, e)| Error::open(path.display(), e))?;

        let streams = demuxer
            .streams()
            .iter()
            .enumerate()
            .filter_map(|(index, stream)| describe_stream(index, stream))
            .collect();

        Ok(Self { demuxer, streams })
    }
}

fn describe_stream(index: usize, stream: &ac_ffmpeg::format::stream::Stream) -> Option<StreamMetadata> {
    let parameters = stream.codec_parameters();
    let time_base = from_native_time_base(stream.time_base());
    let codec = parameters.decoder_name().unwrap_or("unknown");

    let mut metadata = if let Some(video) = parameters.as_video_codec_parameters() {
        let mut metadata = StreamMetadata::video(
            index,
            codec,
            time_base,
            video.width() as u32,
            video.height() as u32,
        );
        metadata.format_name =
            from_native_pixel_format(video.pixel_format()).map(|f| f.name().to_string());
        metadata
    } else if let Some(audio) = parameters.as_audio_codec_parameters() {
        let mut metadata = StreamMetadata::audio(
            index,
            codec,
            time_base,
            audio.sample_rate(),
            audio.channel_layout().channels() as u16,
        );
        metadata.format_name =
            from_native_sample_format(audio.sample_format()).map(|f| f.name().to_string());
        metadata
    } else {
        return None;
    };

    let start = stream.start_time();
    if !start.is_null() {
        metadata.start_time = Some(start.timestamp());
    }
    let duration = stream.duration();
    if !duration.is_null() {
        metadata.duration = Some(time_base.to_seconds(duration.timestamp()));
    }
    metadata.frame_count = stream.frames();
    metadata.bit_rate = parameters.bit_rate();

    if metadata.kind == MediaKind::Video
        && let (Some(frames), Some(seconds)) = (metadata.frame_count, metadata.duration)
        && seconds > 0.0
    {
        metadata.frame_rate = Some(frames as f64 / seconds);
    }

    metadata.native = Some(NativeParameters(parameters));
    Some(metadata)
}

impl InputContainer for FfmpegInput {
    fn streams(&self) -> &[StreamMetadata] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            let Some(packet) = self
                .demuxer
                .take()
                .map_err(|e| Error::Decode(e.to_string()))?
            else {
                return Ok(None);
            };

            // Streams of other media types (subtitles, data) are not exposed.
            let index = packet.stream_index();
            let Some(stream) = self.streams.iter().find(|s| s.index == index) else {
                continue;
            };

            let mut out = Packet::new(Bytes::copy_from_slice(packet.data()), stream.time_base)
                .with_stream_index(index)
                .with_key_flag(packet.is_key());
            let pts = packet.pts();
            if !pts.is_null() {
                out = out.with_pts(pts.timestamp());
            }
            let dts = packet.dts();
            if !dts.is_null() {
                out = out.with_dts(dts.timestamp());
            }
            return Ok(Some(out));
        }
    }

    fn seek(&mut self, stream_index: usize, timestamp: i64) -> Result<()> {
        let stream = self
            .streams
            .iter()
            .find(|s| s.index == stream_index)
            .ok_or_else(|| Error::Seek(format!("no stream {}", stream_index)))?;
        let target = Timestamp::new(timestamp, to_native_time_base(stream.time_base));

        self.demuxer
            .seek_to_timestamp(target, SeekTarget::UpTo)
            .map_err(|e| Error::Seek(e.to_string()))
    }
}
