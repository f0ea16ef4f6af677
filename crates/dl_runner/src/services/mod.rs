//! Business logic services

pub mod archiver;
pub mod command;
pub mod downloader;
pub mod gofile;
pub mod manager;
pub mod openlist;
pub mod pipeline;
pub mod progress;
pub mod rclone;
