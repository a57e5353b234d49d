//! Grade sources: the two interchangeable scraping backends.
//!
//! `StudentRecordsSource` drives the SAML-federated Student Records system;
//! `PortalSource` drives the legacy MyVictoria CMS. Both log in by emulating
//! a browser against undocumented third-party infrastructure, so every step
//! is logged and every expected-structure miss is a typed failure.

pub mod error;
mod portal;
mod student_records;

pub use portal::{PortalConfig, PortalSource};
pub use student_records::{StudentRecordsConfig, StudentRecordsSource};

use error::GradeError;

/// One row of the scraped grade table.
///
/// An empty `grade` means "not yet graded", which is an expected state, not
/// an error. Deliberately not serializable: only the redacted per-course
/// booleans ever reach the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseRecord {
    /// Subject prefix, e.g. `COMP`.
    pub subject: String,
    /// Course number, e.g. `102`.
    pub course_number: String,
    /// Human-readable course title.
    pub title: String,
    /// Letter grade, or empty when none has been released.
    pub grade: String,
    /// Course reference number, only present on the legacy portal.
    pub crn: Option<String>,
}

impl CourseRecord {
    /// The combined course code, e.g. `COMP102`.
    pub fn code(&self) -> String {
        format!("{}{}", self.subject, self.course_number)
    }

    /// Whether a grade has been released for this course.
    pub fn has_grade(&self) -> bool {
        !self.grade.trim().is_empty()
    }
}

/// A scraping backend that can log in and fetch the current grade table.
///
/// Implementations own their credentials and internal scheduling state
/// (`&mut self` because the legacy portal tracks a year-set window). Each
/// `get_grades` call builds a fresh session; nothing persists across calls.
pub trait GradeSource {
    /// Runs a full login and scrape cycle.
    fn get_grades(
        &mut self,
    ) -> impl std::future::Future<Output = Result<Vec<CourseRecord>, GradeError>> + Send;

    /// Attempts a login to validate the stored credentials.
    fn check_credentials(&mut self) -> impl std::future::Future<Output = bool> + Send;

    /// Replaces the credentials used for subsequent logins.
    fn set_credentials(&mut self, credentials: crate::credentials::Credentials);
}
