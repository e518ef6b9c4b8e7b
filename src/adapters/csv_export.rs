//! CSV export and text re-encoding.
//!
//! Spreadsheet consumers on Windows expect either Shift_JIS or a UTF-8
//! byte order mark, and CRLF line endings, so encoding and newline are
//! configurable per export.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use encoding_rs::{EncoderResult, SHIFT_JIS};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::Table;

/// UTF-8 byte order mark
pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Character encoding of a written or read file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum FileEncoding {
    /// Plain UTF-8
    #[serde(rename = "utf_8")]
    #[value(name = "utf_8")]
    Utf8,

    /// UTF-8 with a byte order mark
    #[serde(rename = "utf_8_sig")]
    #[value(name = "utf_8_sig")]
    Utf8Sig,

    /// Shift_JIS (Windows-31J)
    #[serde(rename = "shift_jis")]
    #[value(name = "shift_jis")]
    ShiftJis,
}

/// What to do with characters the target encoding cannot represent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum EncodingErrors {
    /// Write `?` in their place
    Replace,

    /// Drop them
    Ignore,
}

/// Output line ending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Newline {
    /// `\n`
    Unix,

    /// `\r\n`
    Windows,
}

impl Newline {
    pub fn as_str(&self) -> &'static str {
        match self {
            Newline::Unix => "\n",
            Newline::Windows => "\r\n",
        }
    }
}

/// Encoding and line-ending policy for written files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSettings {
    /// Character encoding (default: utf_8_sig)
    #[serde(default = "default_encoding")]
    pub encoding: FileEncoding,

    /// Line ending (default: unix)
    #[serde(default = "default_newline")]
    pub newline: Newline,

    /// Unrepresentable characters, Shift_JIS only (default: replace)
    #[serde(default = "default_errors")]
    pub errors: EncodingErrors,
}

fn default_encoding() -> FileEncoding {
    FileEncoding::Utf8Sig
}
fn default_newline() -> Newline {
    Newline::Unix
}
fn default_errors() -> EncodingErrors {
    EncodingErrors::Replace
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            encoding: default_encoding(),
            newline: default_newline(),
            errors: default_errors(),
        }
    }
}

/// Encode `text` for writing under `settings`
///
/// UTF-8 never fails. Shift_JIS replaces or drops characters it cannot
/// represent, as `settings.errors` says.
pub fn encode_text(text: &str, settings: &ExportSettings) -> Vec<u8> {
    match settings.encoding {
        FileEncoding::Utf8 => text.as_bytes().to_vec(),
        FileEncoding::Utf8Sig => {
            let mut out = Vec::with_capacity(UTF8_BOM.len() + text.len());
            out.extend_from_slice(UTF8_BOM);
            out.extend_from_slice(text.as_bytes());
            out
        }
        FileEncoding::ShiftJis => encode_shift_jis(text, settings.errors),
    }
}

fn encode_shift_jis(text: &str, errors: EncodingErrors) -> Vec<u8> {
    let mut encoder = SHIFT_JIS.new_encoder();
    let mut out = Vec::with_capacity(text.len());
    let mut rest = text;
    let mut unmappable = 0usize;

    loop {
        let needed = encoder
            .max_buffer_length_from_utf8_without_replacement(rest.len())
            .unwrap_or(rest.len().saturating_mul(2).saturating_add(16));
        out.reserve(needed);

        let (result, read) = encoder.encode_from_utf8_to_vec_without_replacement(rest, &mut out, true);
        rest = &rest[read..];

        match result {
            EncoderResult::InputEmpty => break,
            EncoderResult::OutputFull => {}
            EncoderResult::Unmappable(_) => {
                unmappable += 1;
                if errors == EncodingErrors::Replace {
                    out.push(b'?');
                }
            }
        }
    }

    if unmappable > 0 {
        warn!(unmappable, errors = ?errors, "Characters not representable in Shift_JIS");
    }
    out
}

/// Decode file content read in `encoding`; a UTF-8 BOM is dropped
pub fn decode_text(bytes: &[u8], encoding: FileEncoding) -> Result<String> {
    match encoding {
        FileEncoding::Utf8 | FileEncoding::Utf8Sig => {
            let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
            let text = std::str::from_utf8(body).context("not valid UTF-8")?;
            Ok(text.to_string())
        }
        FileEncoding::ShiftJis => SHIFT_JIS
            .decode_without_bom_handling_and_without_replacement(bytes)
            .map(|text| text.into_owned())
            .context("not valid Shift_JIS"),
    }
}

/// Render a table as CSV text: one header line, then one line per row
pub fn render_csv(table: &Table, newline: Newline) -> Result<String> {
    let terminator = match newline {
        Newline::Unix => csv::Terminator::Any(b'\n'),
        Newline::Windows => csv::Terminator::CRLF,
    };
    let mut csv_writer = csv::WriterBuilder::new()
        .terminator(terminator)
        .from_writer(Vec::new());

    csv_writer
        .write_record(table.columns())
        .context("Failed to write CSV header")?;
    for row in table.rows() {
        csv_writer
            .write_record(row.iter().map(|v| v.to_string()))
            .context("Failed to write CSV row")?;
    }

    let bytes = csv_writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to finish CSV output: {}", e.error()))?;
    String::from_utf8(bytes).context("CSV output is not valid UTF-8")
}

/// Write a table as CSV in the configured encoding
pub fn write_table<W: Write>(table: &Table, mut writer: W, settings: &ExportSettings) -> Result<()> {
    let text = render_csv(table, settings.newline)?;
    writer
        .write_all(&encode_text(&text, settings))
        .context("Failed to write CSV output")?;
    writer.flush().context("Failed to flush CSV output")?;
    Ok(())
}

/// Write a table as CSV to `path`, creating parent directories
pub fn write_table_to_path(table: &Table, path: &Path, settings: &ExportSettings) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let file = File::create(path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
    write_table(table, BufWriter::new(file), settings)
        .with_context(|| format!("Failed to write CSV file: {}", path.display()))
}

/// Normalise every line ending in `text` to `newline`
pub fn convert_newlines(text: &str, newline: Newline) -> String {
    let unix = text.replace("\r\n", "\n").replace('\r', "\n");
    match newline {
        Newline::Unix => unix,
        Newline::Windows => unix.replace('\n', "\r\n"),
    }
}

/// Convert a text file from `source` encoding to the encoding and
/// line-ending policy of `settings`
pub fn reencode_file(
    from: &Path,
    to: &Path,
    source: FileEncoding,
    settings: &ExportSettings,
) -> Result<()> {
    let bytes = std::fs::read(from)
        .with_context(|| format!("Failed to read file: {}", from.display()))?;
    let text = decode_text(&bytes, source)
        .with_context(|| format!("Failed to decode file: {}", from.display()))?;

    let out = encode_text(&convert_newlines(&text, settings.newline), settings);
    std::fs::write(to, out).with_context(|| format!("Failed to write file: {}", to.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Value;

    fn sample_table() -> Table {
        let mut table = Table::new(vec!["city".to_string(), "2020-01-01".to_string()]);
        table.push_row(vec![Value::from("Osaka, Kita"), Value::Int(3)]);
        table.push_row(vec![Value::from("Tokyo"), Value::Null]);
        table
    }

    fn shift_jis(errors: EncodingErrors) -> ExportSettings {
        ExportSettings {
            encoding: FileEncoding::ShiftJis,
            newline: Newline::Windows,
            errors,
        }
    }

    #[test]
    fn test_default_settings() {
        let settings = ExportSettings::default();
        assert_eq!(settings.encoding, FileEncoding::Utf8Sig);
        assert_eq!(settings.newline, Newline::Unix);
        assert_eq!(settings.errors, EncodingErrors::Replace);
    }

    #[test]
    fn test_settings_yaml() {
        let settings: ExportSettings =
            serde_yaml::from_str("encoding: shift_jis\nnewline: windows\nerrors: ignore").unwrap();
        assert_eq!(settings.encoding, FileEncoding::ShiftJis);
        assert_eq!(settings.newline, Newline::Windows);
        assert_eq!(settings.errors, EncodingErrors::Ignore);
    }

    #[test]
    fn test_write_plain_unix() {
        let settings = ExportSettings {
            encoding: FileEncoding::Utf8,
            newline: Newline::Unix,
            ..Default::default()
        };
        let mut buf = Vec::new();
        write_table(&sample_table(), &mut buf, &settings).unwrap();

        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "city,2020-01-01\n\"Osaka, Kita\",3\nTokyo,\n"
        );
    }

    #[test]
    fn test_write_bom_crlf() {
        let settings = ExportSettings {
            encoding: FileEncoding::Utf8Sig,
            newline: Newline::Windows,
            ..Default::default()
        };
        let mut buf = Vec::new();
        write_table(&sample_table(), &mut buf, &settings).unwrap();

        assert!(buf.starts_with(UTF8_BOM));
        let text = std::str::from_utf8(&buf[UTF8_BOM.len()..]).unwrap();
        assert_eq!(text, "city,2020-01-01\r\n\"Osaka, Kita\",3\r\nTokyo,\r\n");
    }

    #[test]
    fn test_shift_jis_known_bytes() {
        let bytes = encode_text("あ,A\r\n", &shift_jis(EncodingErrors::Replace));
        assert_eq!(bytes, vec![0x82, 0xA0, b',', b'A', b'\r', b'\n']);
    }

    #[test]
    fn test_shift_jis_round_trip() {
        let text = "都道府県,指標,2020-01-01\r\n東京都,オーダー数,5\r\n";
        let bytes = encode_text(text, &shift_jis(EncodingErrors::Replace));

        assert!(std::str::from_utf8(&bytes).is_err());
        assert_eq!(decode_text(&bytes, FileEncoding::ShiftJis).unwrap(), text);
    }

    #[test]
    fn test_shift_jis_unmappable_characters() {
        let text = "東京🗼タワー";

        let replaced = encode_text(text, &shift_jis(EncodingErrors::Replace));
        assert_eq!(decode_text(&replaced, FileEncoding::ShiftJis).unwrap(), "東京?タワー");

        let ignored = encode_text(text, &shift_jis(EncodingErrors::Ignore));
        assert_eq!(decode_text(&ignored, FileEncoding::ShiftJis).unwrap(), "東京タワー");
    }

    #[test]
    fn test_invalid_shift_jis_rejected() {
        assert!(decode_text(&[0x82], FileEncoding::ShiftJis).is_err());
    }

    #[test]
    fn test_convert_newlines() {
        assert_eq!(convert_newlines("a\r\nb\rc\n", Newline::Unix), "a\nb\nc\n");
        assert_eq!(convert_newlines("a\nb\r\n", Newline::Windows), "a\r\nb\r\n");
    }
}
