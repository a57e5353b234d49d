//! The check-cycle scheduler.
//!
//! One login+scrape+report sequence runs at a time; nothing about a cycle
//! survives into the next one except the schedule itself. Any failed cycle
//! pushes the next attempt out by four hours, because hammering a login
//! endpoint with a wrong password is how accounts get locked.

use crate::config::Settings;
use crate::credentials::{scrub_string, CredentialStore};
use crate::grades::GradeSource;
use crate::report::ReportClient;
use chrono::Utc;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How often the scheduler wakes up to see whether a check is due.
const POLL_TICK: Duration = Duration::from_secs(30);

/// Cooldown applied after any failed cycle.
const FAILURE_COOLDOWN: Duration = Duration::from_secs(4 * 60 * 60);

/// Polling scheduler around one grade source and one report client.
pub struct Daemon<S: GradeSource, C: CredentialStore> {
    source: S,
    reporter: ReportClient,
    store: C,
    settings: Settings,
    settings_path: PathBuf,
    cooldown_until: Option<Instant>,
}

impl<S: GradeSource, C: CredentialStore> Daemon<S, C> {
    pub fn new(
        source: S,
        reporter: ReportClient,
        store: C,
        settings: Settings,
        settings_path: PathBuf,
    ) -> Self {
        Self {
            source,
            reporter,
            store,
            settings,
            settings_path,
            cooldown_until: None,
        }
    }

    /// Polls forever, running a cycle whenever the interval has elapsed.
    pub async fn run(mut self) {
        info!(interval = ?self.settings.check_interval(), "daemon started");

        loop {
            tokio::time::sleep(POLL_TICK).await;

            if !self.settings.checking_enabled {
                continue;
            }
            if !self.due() {
                debug!("skipping mark check, interval has not passed");
                continue;
            }

            self.run_once().await;
        }
    }

    /// Runs a single login+scrape+report cycle. Returns whether the grade
    /// check itself succeeded (a failed report upload does not count against
    /// the schedule).
    pub async fn run_once(&mut self) -> bool {
        let Some(credentials) = self.store.get_credentials() else {
            error!("cannot check grades without credentials");
            return false;
        };

        // The key outlives the credentials by one report call, then is wiped.
        let mut api_key = credentials.api_key().to_string();
        self.source.set_credentials(credentials);

        info!("grade check started");
        let succeeded = match self.source.get_grades().await {
            Ok(records) if records.is_empty() => {
                error!("grade check produced an empty course list");
                self.try_report_error("Grade list empty.", &api_key).await;
                false
            }
            Ok(records) => {
                if let Err(e) = self.reporter.report_grades(&records, &api_key).await {
                    // Logged only; report failures do not reschedule checks.
                    error!(error = %e, "failed to report grades");
                }
                true
            }
            Err(e) => {
                error!(error = %e, "grade check failed");
                self.try_report_error(&e.to_string(), &api_key).await;
                false
            }
        };
        scrub_string(&mut api_key);

        self.settings.last_grade_check = Some(Utc::now());
        if !succeeded {
            warn!("delaying the next grade check for 4 hours");
            self.cooldown_until = Some(Instant::now() + FAILURE_COOLDOWN);
        }

        if let Err(e) = self.settings.save(&self.settings_path) {
            warn!(error = %e, "failed to persist settings after the check");
        }

        succeeded
    }

    /// Best-effort error report; its own failure is tolerated silently.
    async fn try_report_error(&self, message: &str, api_key: &str) {
        if let Err(e) = self.reporter.report_error(message, api_key).await {
            debug!(error = %e, "error report also failed");
        }
    }

    /// Whether a check is due under the interval and any active cooldown.
    fn due(&self) -> bool {
        if let Some(until) = self.cooldown_until {
            if Instant::now() < until {
                return false;
            }
        }

        match self.settings.last_grade_check {
            None => true,
            Some(last) => Utc::now()
                .signed_duration_since(last)
                .to_std()
                .map_or(true, |elapsed| elapsed >= self.settings.check_interval()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credentials;
    use crate::grades::error::GradeError;
    use crate::grades::CourseRecord;
    use crate::report::ReportConfig;
    use chrono::TimeDelta;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StubStore;

    impl CredentialStore for StubStore {
        fn get_credentials(&self) -> Option<Credentials> {
            Some(Credentials::new("alice", "hunter2", "key-123"))
        }
        fn set_credentials(&self, _credentials: &Credentials) {}
        fn delete_credentials(&self) {}
    }

    /// Grade source that returns a canned result without any network.
    struct StubSource {
        result: Option<Result<Vec<CourseRecord>, GradeError>>,
    }

    impl GradeSource for StubSource {
        async fn get_grades(&mut self) -> Result<Vec<CourseRecord>, GradeError> {
            self.result.take().expect("single use stub")
        }
        async fn check_credentials(&mut self) -> bool {
            true
        }
        fn set_credentials(&mut self, _credentials: Credentials) {}
    }

    fn daemon_with(
        result: Result<Vec<CourseRecord>, GradeError>,
        endpoint: String,
        settings_dir: &std::path::Path,
    ) -> Daemon<StubSource, StubStore> {
        let reporter = ReportClient::with_config(
            ReportConfig {
                endpoint,
                user_agent: "test-agent".to_string(),
            },
            "test-host",
            false,
        )
        .unwrap();
        Daemon::new(
            StubSource {
                result: Some(result),
            },
            reporter,
            StubStore,
            Settings::default(),
            settings_dir.join("settings.json"),
        )
    }

    #[tokio::test]
    async fn test_successful_cycle_reports_grades() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/yeet"))
            .and(body_string_contains("\"COMP102\":true"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let records = vec![CourseRecord {
            subject: "COMP".to_string(),
            course_number: "102".to_string(),
            title: "Intro".to_string(),
            grade: "A+".to_string(),
            crn: None,
        }];
        let mut daemon = daemon_with(Ok(records), format!("{}/yeet", server.uri()), dir.path());

        assert!(daemon.run_once().await);
        assert!(daemon.cooldown_until.is_none());
        assert!(daemon.settings.last_grade_check.is_some());
    }

    #[tokio::test]
    async fn test_failed_cycle_reports_error_and_cools_down() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/yeet"))
            .and(body_string_contains("\"error\""))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut daemon = daemon_with(
            Err(GradeError::InvalidCredentials),
            format!("{}/yeet", server.uri()),
            dir.path(),
        );

        assert!(!daemon.run_once().await);
        assert!(daemon.cooldown_until.is_some());
        assert!(!daemon.due());
    }

    #[tokio::test]
    async fn test_empty_grade_list_is_a_failed_cycle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/yeet"))
            .and(body_string_contains("Grade list empty."))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut daemon = daemon_with(Ok(Vec::new()), format!("{}/yeet", server.uri()), dir.path());

        assert!(!daemon.run_once().await);
        assert!(daemon.cooldown_until.is_some());
    }

    #[test]
    fn test_due_respects_interval() {
        let dir = tempfile::tempdir().unwrap();
        let reporter =
            ReportClient::with_config(
                ReportConfig {
                    endpoint: "http://127.0.0.1:9/yeet".to_string(),
                    user_agent: "test-agent".to_string(),
                },
                "test-host",
                false,
            )
            .unwrap();
        let mut daemon = Daemon::new(
            StubSource { result: None },
            reporter,
            StubStore,
            Settings::default(),
            dir.path().join("settings.json"),
        );

        assert!(daemon.due());

        daemon.settings.last_grade_check = Some(Utc::now());
        assert!(!daemon.due());

        daemon.settings.last_grade_check = Some(Utc::now() - TimeDelta::hours(1));
        assert!(daemon.due());
    }
}
