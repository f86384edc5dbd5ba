#![forbid(unsafe_code)]

//! Library half of the toolbox service: configuration, the yt-dlp
//! orchestration and the output-file lookup shared by the binaries.

pub mod config;
pub mod error;
pub mod locator;
pub mod logging;
pub mod media;
pub mod runner;
