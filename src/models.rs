pub mod ffmpeg;
pub mod title_info;
