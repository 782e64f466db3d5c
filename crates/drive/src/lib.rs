//! dc-drive: Google Drive adapter for drive-clone
//!
//! Implements the `RemoteStore` trait from dc-core on top of the Drive v3
//! REST API.

pub mod client;

pub use client::{DriveClient, FOLDER_MIME_TYPE, SHORTCUT_MIME_TYPE};
