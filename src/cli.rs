use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Dub a video into another language
    Dub {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,

        /// Spoken language of the video
        #[arg(short, long, default_value = "english")]
        source: String,

        /// Language to dub into
        #[arg(short, long)]
        target: String,

        /// Synthesis voice (defaults to the first configured voice)
        #[arg(long)]
        voice: Option<String>,

        /// Output file (defaults to dubbed_video_<source>_to_<target>_<ms>.<ext>)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also write the transcript and translation next to the output
        #[arg(long)]
        export_text: bool,
    },

    /// Extract the audio track of a video file
    Extract {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,

        /// Output audio file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// List supported languages
    Languages,

    /// List available synthesis voices
    Voices,

    /// Write the default configuration to a file
    InitConfig {
        /// Destination path
        #[arg(default_value = "redub.toml")]
        path: PathBuf,
    },
}
