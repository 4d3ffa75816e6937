use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::config::ContainerFormat;
use crate::error::{DubError, Result};
use super::{MIX_CHANNELS, MIX_SAMPLE_RATE};

/// Abstract media processing command representation
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl MediaCommand {
    /// Create a new media processing command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Only report errors on stderr
    pub fn quiet(self) -> Self {
        self.arg("-hide_banner").arg("-loglevel").arg("error")
    }

    /// Read the next input at its native rate, like a player would
    pub fn realtime(self) -> Self {
        self.arg("-re")
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Read input from stdin
    pub fn stdin_input(self) -> Self {
        self.arg("-i").arg("pipe:0")
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Write output to stdout
    pub fn stdout_output(self) -> Self {
        self.arg("pipe:1")
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    /// Set the container format of the next input or of the output
    pub fn format<S: Into<String>>(self, format: S) -> Self {
        self.arg("-f").arg(format)
    }

    /// Select a stream for the output
    pub fn map<S: Into<String>>(self, specifier: S) -> Self {
        self.arg("-map").arg(specifier)
    }

    /// Set video codec
    pub fn video_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:v").arg(codec)
    }

    /// Set audio codec
    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    /// Copy video stream
    pub fn copy_video(self) -> Self {
        self.video_codec("copy")
    }

    /// Disable video
    pub fn no_video(self) -> Self {
        self.arg("-vn")
    }

    /// Disable audio
    pub fn no_audio(self) -> Self {
        self.arg("-an")
    }

    /// Set audio sample rate
    pub fn audio_sample_rate(self, rate: u32) -> Self {
        self.arg("-ar").arg(rate.to_string())
    }

    /// Set audio channels
    pub fn audio_channels(self, channels: u32) -> Self {
        self.arg("-ac").arg(channels.to_string())
    }

    /// Raw PCM in the mixing graph's layout, for the next input or the output
    pub fn mix_pcm(self) -> Self {
        self.format("s16le")
            .audio_sample_rate(MIX_SAMPLE_RATE)
            .audio_channels(MIX_CHANNELS)
    }

    /// Raw RGBA frames, for the next input or the output
    pub fn rgba_frames(self) -> Self {
        self.format("rawvideo").arg("-pix_fmt").arg("rgba")
    }

    /// Limit the output duration
    pub fn duration_limit(self, seconds: f64) -> Self {
        self.arg("-t").arg(format!("{:.3}", seconds))
    }

    /// Execute the command to completion and return its stdout
    pub async fn execute(&self) -> Result<Vec<u8>> {
        debug!("Executing media processing command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DubError::Media(format!("Failed to execute media processor: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DubError::Media(format!(
                "{} failed: {}",
                self.description,
                stderr.trim()
            )));
        }

        Ok(output.stdout)
    }

    /// Spawn the command with piped stdout, optionally piped stdin.
    ///
    /// The child is killed when its handle is dropped.
    pub fn spawn(&self, pipe_stdin: bool) -> Result<Child> {
        debug!("Spawning media processing command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        Command::new(&self.binary_path)
            .args(&self.args)
            .stdin(if pipe_stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DubError::Media(format!("Failed to start {}: {}", self.description, e)))
    }
}

/// Builder for the commands the FFmpeg backend runs
pub struct MediaCommandBuilder {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl MediaCommandBuilder {
    /// Create a new command builder
    pub fn new<S1: Into<String>, S2: Into<String>>(ffmpeg_path: S1, ffprobe_path: S2) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Build metadata probe command (JSON on stdout)
    pub fn probe<P: AsRef<Path>>(&self, media_path: P) -> MediaCommand {
        MediaCommand::new(&self.ffprobe_path, "Metadata probe")
            .arg("-v").arg("error")
            .arg("-show_entries")
            .arg("format=duration:stream=codec_type,width,height,avg_frame_rate,duration")
            .arg("-of").arg("json")
            .output(media_path)
    }

    /// Build live audio capture command: plays the source and streams its
    /// first audio track, re-encoded to Opus in WebM, on stdout
    pub fn capture_audio<P: AsRef<Path>>(&self, video_path: P, realtime: bool) -> MediaCommand {
        let cmd = MediaCommand::new(&self.ffmpeg_path, "Audio capture").quiet();
        let cmd = if realtime { cmd.realtime() } else { cmd };

        cmd.input(video_path)
            .map("0:a:0")
            .no_video()
            .audio_codec("libopus")
            .format("webm")
            .stdout_output()
    }

    /// Build video playback command: raw RGBA frames on stdout at the
    /// source's native rate, so the decoded count tracks the play position
    pub fn decode_frames<P: AsRef<Path>>(&self, video_path: P) -> MediaCommand {
        MediaCommand::new(&self.ffmpeg_path, "Video playback")
            .quiet()
            .realtime()
            .input(video_path)
            .map("0:v:0")
            .no_audio()
            .rgba_frames()
            .stdout_output()
    }

    /// Build audio playback command: mixing graph PCM on stdout at native rate
    pub fn decode_audio<P: AsRef<Path>>(&self, audio_path: P) -> MediaCommand {
        MediaCommand::new(&self.ffmpeg_path, "Audio playback")
            .quiet()
            .realtime()
            .input(audio_path)
            .no_video()
            .mix_pcm()
            .stdout_output()
    }

    /// Build the encoder fed with raw frames on stdin, tuned to keep up
    /// with frames arriving at playback rate
    pub fn encode_frames<P: AsRef<Path>>(
        &self,
        width: u32,
        height: u32,
        fps: u32,
        format: ContainerFormat,
        output_path: P,
    ) -> MediaCommand {
        let cmd = MediaCommand::new(&self.ffmpeg_path, "Frame encoding")
            .quiet()
            .overwrite()
            .rgba_frames()
            .arg("-s")
            .arg(format!("{}x{}", width, height))
            .arg("-r")
            .arg(fps.to_string())
            .stdin_input()
            .video_codec(format.video_codec());

        format
            .realtime_encoder_options()
            .iter()
            .fold(cmd, |cmd, option| cmd.arg(*option))
            .arg("-pix_fmt")
            .arg("yuv420p")
            .format(format.muxer())
            .output(output_path)
    }

    /// Build the final mux of the encoded video track with recorded PCM
    pub fn mux_recording<P: AsRef<Path>>(
        &self,
        video_path: P,
        pcm_path: Option<P>,
        audio_codec: &str,
        muxer: &str,
        max_seconds: f64,
        output_path: P,
    ) -> MediaCommand {
        let cmd = MediaCommand::new(&self.ffmpeg_path, "Recording mux")
            .quiet()
            .overwrite()
            .input(video_path);

        let cmd = match pcm_path {
            Some(pcm_path) => cmd
                .mix_pcm()
                .input(pcm_path)
                .map("0:v")
                .map("1:a")
                .audio_codec(audio_codec),
            None => cmd.map("0:v"),
        };

        cmd.copy_video()
            .duration_limit(max_seconds)
            .format(muxer)
            .output(output_path)
    }
}
