// SPDX-License-Identifier: Apache-2.0

//! Tailing: incremental extraction of appended lines from monitored files,
//! tolerant of rotation, truncation and partial writes.

pub mod cursor;
pub mod error;
pub mod file_id;
pub mod lines;
pub mod tailer;

pub use cursor::FileCursor;
pub use error::TailError;
pub use file_id::FileId;
pub use lines::LineExtractor;
pub use tailer::{MonitoredFile, TailedLine};
