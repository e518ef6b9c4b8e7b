//! Edges where ferry output meets external systems.
//!
//! Nothing here speaks a vendor protocol. Each adapter holds the policy a
//! job applies around its own SDK call:
//! - `csv_export`: CSV files and UTF-8/Shift_JIS re-encoding
//! - `drive`: naming of archived shared-drive uploads
//! - `sms`: classification of delivery-status responses

pub mod csv_export;
pub mod drive;
pub mod sms;

pub use csv_export::{
    convert_newlines, decode_text, encode_text, reencode_file, render_csv, write_table,
    write_table_to_path, EncodingErrors, ExportSettings, FileEncoding, Newline,
};
pub use drive::{dated_file_name, plan_upload, DriveSettings, UploadPlan};
pub use sms::{classify_delivery, poll_delivery, Delivered, DeliveryError};
