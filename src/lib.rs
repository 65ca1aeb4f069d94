#![forbid(unsafe_code)]

pub mod book;
pub mod chunk;
pub mod cli;
pub mod config;
pub mod document;
pub mod logging;
pub mod ollama;
pub mod run;
pub mod source;
pub mod state;
pub mod summarize;
pub mod toc;
