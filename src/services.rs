pub mod dumper;
pub mod ffmpeg;
pub mod ffmpeg_command;
pub mod ffmpeg_parser;
pub mod filename;
pub mod shell;
