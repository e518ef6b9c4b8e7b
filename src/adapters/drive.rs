//! Upload naming policy for shared-drive exports.
//!
//! Reports are re-uploaded under the same name every day. With
//! `date_suffix` enabled, a same-named file from an earlier day is kept
//! under a dated name (`report.csv` -> `report_20200101.csv`) before the
//! new one is uploaded; a file created earlier today is simply replaced.

use std::path::Path;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};

/// Drive upload behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveSettings {
    /// Keep older same-named files under a dated name (default: false)
    #[serde(default)]
    pub date_suffix: bool,

    /// Offset used to decide what "today" is (default: +9, JST)
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
}

fn default_utc_offset_hours() -> i32 {
    9
}

impl Default for DriveSettings {
    fn default() -> Self {
        Self {
            date_suffix: false,
            utc_offset_hours: default_utc_offset_hours(),
        }
    }
}

impl DriveSettings {
    /// Fixed offset for date decisions; out-of-range values fall back to UTC
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours.saturating_mul(3600))
            .unwrap_or_else(|| Utc.fix())
    }

    /// Today's date in the configured offset
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.offset()).date_naive()
    }

    /// Plan an upload of `file_name` as of today
    pub fn plan(&self, file_name: &str, existing_created_at: Option<DateTime<Utc>>) -> UploadPlan {
        plan_upload(file_name, existing_created_at, self.today(), self)
    }
}

/// What to do before uploading
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadPlan {
    /// Nothing to move out of the way
    Upload,

    /// Delete the existing file, then upload
    ReplaceExisting,

    /// Re-upload the existing file as `archived_name`, delete it, then upload
    ArchiveExisting { archived_name: String },
}

/// Insert `_YYYYMMDD` before the file extension
pub fn dated_file_name(file_name: &str, date: NaiveDate) -> String {
    let suffix = date.format("%Y%m%d");
    let path = Path::new(file_name);

    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => {
            let dated = format!("{}_{}.{}", stem.to_string_lossy(), suffix, ext.to_string_lossy());
            match path.parent().filter(|p| !p.as_os_str().is_empty()) {
                Some(parent) => parent.join(dated).to_string_lossy().into_owned(),
                None => dated,
            }
        }
        _ => format!("{}_{}", file_name, suffix),
    }
}

/// Decide how to handle an existing file before uploading `file_name`
pub fn plan_upload(
    file_name: &str,
    existing_created_at: Option<DateTime<Utc>>,
    today: NaiveDate,
    settings: &DriveSettings,
) -> UploadPlan {
    let created_at = match existing_created_at {
        Some(created_at) if settings.date_suffix => created_at,
        _ => return UploadPlan::Upload,
    };

    let created = created_at.with_timezone(&settings.offset()).date_naive();
    if created == today {
        UploadPlan::ReplaceExisting
    } else {
        UploadPlan::ArchiveExisting {
            archived_name: dated_file_name(file_name, created),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn suffixed() -> DriveSettings {
        DriveSettings {
            date_suffix: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_dated_file_name() {
        assert_eq!(dated_file_name("report.csv", date(2020, 1, 1)), "report_20200101.csv");
        assert_eq!(dated_file_name("report", date(2020, 1, 1)), "report_20200101");
        assert_eq!(
            dated_file_name("out/report.tar.gz", date(2021, 12, 31)),
            "out/report.tar_20211231.gz"
        );
    }

    #[test]
    fn test_no_existing_file() {
        assert_eq!(
            plan_upload("report.csv", None, date(2020, 1, 2), &suffixed()),
            UploadPlan::Upload
        );
    }

    #[test]
    fn test_suffix_disabled_overwrites() {
        let created = Utc.with_ymd_and_hms(2019, 12, 1, 0, 0, 0).unwrap();
        assert_eq!(
            plan_upload("report.csv", Some(created), date(2020, 1, 2), &DriveSettings::default()),
            UploadPlan::Upload
        );
    }

    #[test]
    fn test_created_today_in_offset_is_replaced() {
        // 2020-01-01 20:00 UTC is already 2020-01-02 in JST
        let created = Utc.with_ymd_and_hms(2020, 1, 1, 20, 0, 0).unwrap();
        assert_eq!(
            plan_upload("report.csv", Some(created), date(2020, 1, 2), &suffixed()),
            UploadPlan::ReplaceExisting
        );
    }

    #[test]
    fn test_plan_as_of_today() {
        let settings = suffixed();
        let created = Utc::now() - chrono::Duration::days(400);
        let expected = dated_file_name("report.csv", created.with_timezone(&settings.offset()).date_naive());

        assert_eq!(
            settings.plan("report.csv", Some(created)),
            UploadPlan::ArchiveExisting {
                archived_name: expected
            }
        );
        assert_eq!(settings.plan("report.csv", None), UploadPlan::Upload);
    }

    #[test]
    fn test_older_file_is_archived() {
        let created = Utc.with_ymd_and_hms(2020, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(
            plan_upload("report.csv", Some(created), date(2020, 1, 2), &suffixed()),
            UploadPlan::ArchiveExisting {
                archived_name: "report_20200101.csv".to_string()
            }
        );
    }
}
