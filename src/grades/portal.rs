//! The legacy MyVictoria CMS grade source.
//!
//! A far simpler flow than Student Records: scrape a UUID out of the login
//! page's inline script, POST it with the credentials, then visit two
//! warm-up URLs the site's server-side state machine insists on. The portal
//! also pins the grades page to whatever academic year the account last
//! viewed, so the source periodically forces the year back to the current
//! one through an edit-mode toggle.

use crate::credentials::{scrub_string, Credentials};
use crate::extract;
use crate::grades::error::GradeError;
use crate::grades::{CourseRecord, GradeSource};
use crate::session::{form_escape, SessionClient};
use chrono::{Datelike, Local};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const BASE_URL: &str = "https://my.vuw.ac.nz";

const LOGIN_PAGE_PATH: &str = "/cp/home/displaylogin";
const LOGIN_POST_PATH: &str = "/cp/home/login";
const LOGIN_OK_PATH: &str = "/cps/welcome/loginok.html";
const LOGIN_NEXT_PATH: &str = "/cp/home/next";

// These URLs are a bit funky; alternates exist for some of them but these
// all work. The opaque tags come from the portal's layout engine.
const HOME_PATH: &str = "/render.userLayoutRootNode.uP?uP_root=root";
const MY_STUDY_PATH: &str = "/tag.c56f3aaeaf27f1c8.render.userLayoutRootNode.uP?uP_root=root&uP_sparam=activeTab&activeTab=u12l1s8&uP_tparam=frm&frm=";
const GRADE_PATH: &str = "/tag.c56f3aaeaf27f1c8.render.userLayoutRootNode.uP?uP_root=u12l1n642";
const TERM_UPDATE_PATH: &str =
    "/tag.c56f3aaeaf27f1c8.render.userLayoutRootNode.uP?uP_edit_target=u12l1n642";
const TERM_UPDATE_POST_PATH: &str =
    "/tag.c56f3aaeaf27f1c8.render.userLayoutRootNode.target.u12l1n642.uP";

/// Marker the login response contains when the portal rejects a login.
const LOGIN_FAILED_MARKER: &str = "Failed";

/// How often the displayed grade year is forced back to the current year,
/// in case the account has an old year selected.
const YEAR_SET_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Endpoint configuration; only the host varies between production and
/// tests, the portal's paths are fixed.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub base_url: String,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
        }
    }
}

/// Grade source backed by the legacy MyVictoria portal.
pub struct PortalSource {
    config: PortalConfig,
    credentials: Credentials,
    /// Force the year-set sub-flow on the next fetch (set after an empty
    /// scrape, which usually means a stale term is selected).
    set_year_on_next: bool,
    last_year_set: Option<Instant>,
}

impl PortalSource {
    pub fn new(credentials: Credentials) -> Self {
        Self::with_config(PortalConfig::default(), credentials)
    }

    pub fn with_config(config: PortalConfig, credentials: Credentials) -> Self {
        Self {
            config,
            credentials,
            set_year_on_next: false,
            last_year_set: None,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }

    /// Logs into the portal and warms up the session.
    async fn login(&self) -> Result<SessionClient, GradeError> {
        debug!("login started");

        let mut client = SessionClient::new()
            .map_err(|e| GradeError::transport("client setup", e))?;

        // Loading the login page issues session cookies and a one-shot UUID.
        let page = client
            .get(&self.url(LOGIN_PAGE_PATH), None)
            .await
            .map_err(|e| GradeError::transport("login page fetch", e))?;
        let uuid = extract::extract_login_uuid(page.body())?;

        let mut fields = vec![
            ("uuid", uuid),
            ("user", self.credentials.username().to_string()),
            ("pass", form_escape(self.credentials.password())),
        ];

        let result = client
            .post(&self.url(LOGIN_POST_PATH), &fields, None)
            .await;

        for (_, value) in fields.iter_mut() {
            scrub_string(value);
        }

        let response = result.map_err(|e| GradeError::transport("login post", e))?;

        if response.body().contains(LOGIN_FAILED_MARKER) {
            error!("login rejected by the portal, credentials may be incorrect");
            return Err(GradeError::InvalidCredentials);
        }

        // The site misbehaves on later requests unless these are visited.
        client
            .get(&self.url(LOGIN_OK_PATH), None)
            .await
            .map_err(|e| GradeError::transport("login warm-up", e))?;
        client
            .get(&self.url(LOGIN_NEXT_PATH), None)
            .await
            .map_err(|e| GradeError::transport("login warm-up", e))?;

        info!("successfully logged into the portal");
        Ok(client)
    }

    /// Forces the displayed term/year to the current year.
    ///
    /// The setting does not take until the listed pages have been visited,
    /// and the edit mode must be entered and left through two sequential
    /// posts.
    async fn set_grade_year(&self, client: &mut SessionClient) -> Result<(), GradeError> {
        let term = format!("{}01", Local::now().year());
        debug!(term, "setting grade year");

        client
            .get(&self.url(HOME_PATH), None)
            .await
            .map_err(|e| GradeError::transport("year-set warm-up", e))?;
        client
            .get(&self.url(MY_STUDY_PATH), None)
            .await
            .map_err(|e| GradeError::transport("year-set warm-up", e))?;
        client
            .get(&self.url(TERM_UPDATE_PATH), None)
            .await
            .map_err(|e| GradeError::transport("year-set warm-up", e))?;

        // Switch into edit mode and update the setting. TEXTDATA is the row
        // limit on the Courses and Grades page.
        client
            .post(
                &self.url(TERM_UPDATE_POST_PATH),
                &[
                    ("MODE", "EDIT".to_string()),
                    ("VIEW", "EDUPDATE".to_string()),
                    ("TEXTDATA", "999".to_string()),
                    ("TERMLIST", term.clone()),
                ],
                None,
            )
            .await
            .map_err(|e| GradeError::transport("year-set edit", e))?;

        // Switch back out so grades can be viewed.
        client
            .post(
                &self.url(TERM_UPDATE_POST_PATH),
                &[
                    ("MODE", "DEFAULT".to_string()),
                    ("VIEW", "DEFAULT".to_string()),
                    ("TEXTDATA", "999".to_string()),
                    ("TERMLIST", term.clone()),
                ],
                None,
            )
            .await
            .map_err(|e| GradeError::transport("year-set commit", e))?;

        info!(term, "grade year has been set");
        Ok(())
    }
}

impl GradeSource for PortalSource {
    async fn get_grades(&mut self) -> Result<Vec<CourseRecord>, GradeError> {
        debug!("grade grab started");

        let mut client = self.login().await?;

        let year_set_due = self
            .last_year_set
            .map_or(true, |at| at.elapsed() > YEAR_SET_INTERVAL);
        if self.set_year_on_next || year_set_due {
            self.set_year_on_next = false;
            // Stamped before the attempt: a failed year set waits out the
            // window like a successful one instead of rerunning every cycle.
            self.last_year_set = Some(Instant::now());
            // A failed year set is not fatal; the scrape may still work.
            if let Err(e) = self.set_grade_year(&mut client).await {
                warn!(error = %e, "failed to set the grade year");
            }
        }

        let page = client
            .get(&self.url(GRADE_PATH), None)
            .await
            .map_err(|e| GradeError::transport("grade page fetch", e))?;

        let records = extract::extract_portal_rows(page.body());

        if records.is_empty() {
            self.set_year_on_next = true;
            warn!("no courses found, the year will be reset on the next check");
        } else {
            info!(count = records.len(), "got grades from the portal");
        }

        debug!("grade grab finished");
        Ok(records)
    }

    async fn check_credentials(&mut self) -> bool {
        self.login().await.is_ok()
    }

    fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = credentials;
    }
}
