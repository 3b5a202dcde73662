use super::{
    NativeParameters, from_native_time_base, to_native_pixel_format, to_native_sample_format,
    to_native_time_base,
};
use crate::backend::ContainerWriter;
use crate::error::{Error, Result};
use crate::media::{CodecParameters, PixelFormat, SampleFormat, TimeBase};
use crate::muxer::MuxerConfig;
use ac_ffmpeg::codec::audio::ChannelLayout;
use ac_ffmpeg::codec::{AudioCodecParameters, VideoCodecParameters};
use ac_ffmpeg::format::io::IO;
use ac_ffmpeg::format::muxer::{Muxer, OutputFormat};
use ac_ffmpeg::packet::PacketMut;
use ac_ffmpeg::time::Timestamp;
use std::fs::File;

pub(super) struct FfmpegWriter {
    path: String,
    format: OutputFormat,
    fast_start: bool,
    interleaved: bool,
    /// Taken when the header is written.
    file: Option<File>,
    muxer: Option<Muxer<File>>,
    time_bases: Vec<TimeBase>,
}

// The muxer is only driven by the thread that owns it.
unsafe impl Send for FfmpegWriter {}

impl FfmpegWriter {
    pub(super) fn create(config: &MuxerConfig) -> Result<Self> {
        let format = config
            .format_name()
            .and_then(|name| OutputFormat::find_by_name(&name))
            .ok_or_else(|| Error::CodecNotFound(config.describe_format()))?;

        let path = config.output_path.display().to_string();
        let file = File::create(&config.output_path).map_err(|e| Error::open(&path, e))?;

        Ok(Self {
            path,
            format,
            fast_start: config.fast_start,
            interleaved: config.interleaved,
            file: Some(file),
            muxer: None,
            time_bases: Vec::new(),
        })
    }

    fn muxer(&mut self) -> Result<&mut Muxer<File>> {
        self.muxer
            .as_mut()
            .ok_or_else(|| Error::Write(String::from("header not written")))
    }
}

/// Native parameters for streams whose encoder did not produce any, such as
/// stream-copied PCM.
fn native_parameters(parameters: &CodecParameters) -> Result<ac_ffmpeg::codec::CodecParameters> {
    if let Some(NativeParameters(native)) = &parameters.native {
        return Ok(native.clone());
    }

    let codec = parameters.codec.as_str();
    if parameters.is_video() {
        let pixel_format = parameters.pixel_format.unwrap_or(PixelFormat::Yuv420p);
        let built = VideoCodecParameters::builder(codec)
            .map_err(|e| Error::Write(e.to_string()))?
            .pixel_format(to_native_pixel_format(pixel_format))
            .width(parameters.width as usize)
            .height(parameters.height as usize)
            .bit_rate(parameters.bit_rate)
            .build();
        Ok(built.into())
    } else {
        let layout = ChannelLayout::from_channels(parameters.channels as u32)
            .ok_or_else(|| Error::Write(format!("{} channels", parameters.channels)))?;
        let sample_format = parameters.sample_format.unwrap_or(SampleFormat::S16);
        let built = AudioCodecParameters::builder(codec)
            .map_err(|e| Error::Write(e.to_string()))?
            .sample_rate(parameters.sample_rate)
            .sample_format(to_native_sample_format(sample_format))
            .channel_layout(&layout)
            .bit_rate(parameters.bit_rate)
            .build();
        Ok(built.into())
    }
}

impl ContainerWriter for FfmpegWriter {
    fn write_header(&mut self, streams: &[CodecParameters]) -> Result<Vec<TimeBase>> {
        let file = self
            .file
            .take()
            .ok_or_else(|| Error::Write(String::from("header already written")))?;

        let mut builder = Muxer::builder();
        for parameters in streams {
            builder
                .add_stream(&native_parameters(parameters)?)
                .map_err(|e| Error::Write(e.to_string()))?;
        }
        builder = builder.interleaved(self.interleaved);
        if self.fast_start {
            builder = builder.set_option("movflags", "+faststart");
        }

        let muxer = builder
            .build(IO::from_seekable_write_stream(file), self.format.clone())
            .map_err(|e| Error::open(&self.path, e))?;

        self.time_bases = muxer
            .streams()
            .iter()
            .map(|stream| from_native_time_base(stream.time_base()))
            .collect();
        self.muxer = Some(muxer);
        Ok(self.time_bases.clone())
    }

    fn write_packet(&mut self, packet: &crate::media::Packet) -> Result<()> {
        let time_base = *self
            .time_bases
            .get(packet.stream_index)
            .ok_or_else(|| Error::Write(format!("unknown stream {}", packet.stream_index)))?;
        let native_tb = to_native_time_base(time_base);

        let mut native = PacketMut::from(packet.data.as_ref())
            .with_stream_index(packet.stream_index)
            .with_key_flag(packet.key);
        if let Some(pts) = packet.pts {
            native = native.with_pts(Timestamp::new(pts, native_tb));
        }
        if let Some(dts) = packet.dts {
            native = native.with_dts(Timestamp::new(dts, native_tb));
        }

        self.muxer()?
            .push(native.freeze())
            .map_err(|e| Error::Write(e.to_string()))
    }

    fn write_trailer(&mut self) -> Result<()> {
        let Some(mut muxer) = self.muxer.take() else {
            return Ok(());
        };
        muxer.flush().map_err(|e| Error::Write(e.to_string()))?;
        muxer
            .close()
            .map(|_| ())
            .map_err(|e| Error::Write(e.to_string()))
    }
}
