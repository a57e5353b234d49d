//! Webhook reporting of grade-check results.
//!
//! The payload never contains a letter grade: each course is redacted to a
//! boolean "has a grade been released" flag before anything leaves the
//! process. The API key rides in the payload's `token` field, which is what
//! the bot server expects.

use crate::grades::CourseRecord;
use reqwest::Client;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info};

/// Production endpoint of the report server.
const REPORT_URL: &str = "http://automarkcheck.kwiius.com:4567/yeet";

#[derive(Debug, Error)]
pub enum ReportError {
    /// The webhook could not be reached.
    #[error("report transport failure: {message}")]
    Transport { message: String },

    /// The webhook answered with a non-200 status.
    #[error("report rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl From<reqwest::Error> for ReportError {
    fn from(err: reqwest::Error) -> Self {
        ReportError::Transport {
            message: err.to_string(),
        }
    }
}

/// Configuration for the report client.
#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub endpoint: String,
    pub user_agent: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            endpoint: REPORT_URL.to_string(),
            user_agent: format!("AutoMarkCheckBot/1.0 ({})", std::env::consts::OS),
        }
    }
}

/// Grade report wire format. Field names are part of the webhook contract.
#[derive(Debug, Serialize)]
struct GradeReport<'a> {
    courses: BTreeMap<String, bool>,
    uptime: String,
    hostname: &'a str,
    #[serde(rename = "coursesPublic")]
    courses_public: bool,
    token: &'a str,
}

/// Error report wire format, sent when a check cycle fails so the remote
/// operator still hears about it.
#[derive(Debug, Serialize)]
struct ErrorReport<'a> {
    error: &'a str,
    uptime: String,
    hostname: &'a str,
    #[serde(rename = "coursesPublic")]
    courses_public: bool,
    token: &'a str,
}

/// Client for the grade report webhook.
pub struct ReportClient {
    client: Client,
    endpoint: String,
    hostname: String,
    courses_public: bool,
    started_at: Instant,
}

impl ReportClient {
    /// Creates a client with the default endpoint.
    pub fn new(hostname: impl Into<String>, courses_public: bool) -> Result<Self, ReportError> {
        Self::with_config(ReportConfig::default(), hostname, courses_public)
    }

    /// Creates a client with custom configuration.
    pub fn with_config(
        config: ReportConfig,
        hostname: impl Into<String>,
        courses_public: bool,
    ) -> Result<Self, ReportError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ReportError::Transport {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint,
            hostname: hostname.into(),
            courses_public,
            started_at: Instant::now(),
        })
    }

    /// Reports the scraped courses, redacted to has-grade booleans.
    pub async fn report_grades(
        &self,
        courses: &[CourseRecord],
        api_key: &str,
    ) -> Result<(), ReportError> {
        debug!(count = courses.len(), "grade report started");

        let payload = GradeReport {
            courses: redact_courses(courses),
            uptime: format_uptime(self.started_at.elapsed()),
            hostname: &self.hostname,
            courses_public: self.courses_public,
            token: api_key,
        };
        self.upload(&payload).await?;

        info!("successfully reported grades to the bot server");
        Ok(())
    }

    /// Reports a grade-check failure.
    pub async fn report_error(&self, message: &str, api_key: &str) -> Result<(), ReportError> {
        debug!("error report started");

        let payload = ErrorReport {
            error: message,
            uptime: format_uptime(self.started_at.elapsed()),
            hostname: &self.hostname,
            courses_public: self.courses_public,
            token: api_key,
        };
        self.upload(&payload).await?;

        info!("successfully reported the error to the bot server");
        Ok(())
    }

    async fn upload<T: Serialize>(&self, payload: &T) -> Result<(), ReportError> {
        let response = self.client.post(&self.endpoint).json(payload).send().await?;

        let status = response.status();
        if status.as_u16() != 200 {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body, "report upload rejected");
            return Err(ReportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!("report upload finished");
        Ok(())
    }
}

/// Best-effort machine name for the report payload.
///
/// Tries `/etc/hostname`, then the `HOSTNAME` and `COMPUTERNAME` environment
/// variables; headless deployments without any of these should set
/// `CustomHostname` in the settings file.
pub fn machine_name() -> Option<String> {
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|name| !name.is_empty()))
        .or_else(|| std::env::var("COMPUTERNAME").ok().filter(|name| !name.is_empty()))
}

/// Maps courses to `{code: has_grade}`, dropping everything else.
fn redact_courses(courses: &[CourseRecord]) -> BTreeMap<String, bool> {
    courses
        .iter()
        .map(|course| (course.code(), course.has_grade()))
        .collect()
}

/// Formats process uptime as `"D days, HH:MM:SS"` ("day" when D is 1).
fn format_uptime(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    let day_word = if days == 1 { "day" } else { "days" };
    format!("{days} {day_word}, {hours:02}:{minutes:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_courses() -> Vec<CourseRecord> {
        vec![
            CourseRecord {
                subject: "COMP".to_string(),
                course_number: "102".to_string(),
                title: "Intro to Program Design".to_string(),
                grade: "A+".to_string(),
                crn: None,
            },
            CourseRecord {
                subject: "CGRA".to_string(),
                course_number: "151".to_string(),
                title: "Intro to Computer Graphics".to_string(),
                grade: String::new(),
                crn: None,
            },
        ]
    }

    #[test]
    fn test_redaction_never_leaks_grades() {
        let courses = sample_courses();
        let payload = GradeReport {
            courses: redact_courses(&courses),
            uptime: format_uptime(Duration::from_secs(0)),
            hostname: "test-host",
            courses_public: false,
            token: "key-123",
        };

        let json = serde_json::to_string(&payload).unwrap();
        assert!(!json.contains("A+"));

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["courses"]["COMP102"], true);
        assert_eq!(value["courses"]["CGRA151"], false);
        assert_eq!(value["coursesPublic"], false);
        assert_eq!(value["token"], "key-123");
    }

    #[test]
    fn test_error_report_shape() {
        let payload = ErrorReport {
            error: "Grade list empty.",
            uptime: format_uptime(Duration::from_secs(61)),
            hostname: "test-host",
            courses_public: true,
            token: "key-123",
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["error"], "Grade list empty.");
        assert_eq!(value["uptime"], "0 days, 00:01:01");
        assert_eq!(value["coursesPublic"], true);
    }

    #[test]
    fn test_machine_name_is_clean_when_found() {
        // The sources vary by machine, but whatever comes back must be a
        // usable single-line name.
        if let Some(name) = machine_name() {
            assert!(!name.is_empty());
            assert_eq!(name, name.trim());
            assert!(!name.contains('\n'));
        }
    }

    #[test]
    fn test_uptime_formatting() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "0 days, 00:00:00");
        assert_eq!(
            format_uptime(Duration::from_secs(86_400 + 6 * 3_600 + 22 * 60 + 33)),
            "1 day, 06:22:33"
        );
        assert_eq!(
            format_uptime(Duration::from_secs(2 * 86_400 + 20 * 3_600 + 37 * 60 + 9)),
            "2 days, 20:37:09"
        );
    }
}
