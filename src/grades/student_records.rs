//! The SAML-federated Student Records grade source.
//!
//! Login is a nine-step POST-binding dance across three hosts:
//!
//! ```text
//!        The student (not logged in)
//!           | GET the protected resource
//!           v
//! studentrecords.vuw.ac.nz  -- SAMLRequest -->  auth-eis.vuw.ac.nz/samlsso
//!           | second SAMLRequest + RelayState
//!           v
//! federation.vuw.ac.nz      (session cookie set, then credentials POSTed)
//!           | SAMLResponse
//!           v
//! auth-eis.vuw.ac.nz/commonauth  -- second SAMLResponse -->  studentrecords (logged in)
//! ```
//!
//! Every hidden-form value is consumed by exactly the next hop. None of this
//! is documented by the university; the flow mirrors what a browser does.

use crate::credentials::{scrub_string, Credentials};
use crate::extract;
use crate::grades::error::GradeError;
use crate::grades::{CourseRecord, GradeSource};
use crate::session::{form_escape, SessionClient};
use tracing::{debug, error, info, warn};

const BASE_URL: &str = "https://studentrecords.vuw.ac.nz";
const SSO_URL: &str = "https://auth-eis.vuw.ac.nz/samlsso";
const SSO_CALLBACK_URL: &str = "https://auth-eis.vuw.ac.nz/commonauth";
const FEDERATION_URL: &str = "https://federation.vuw.ac.nz/adfs/ls";
const HISTORY_URL: &str = "https://student-records.vuw.ac.nz/pls/webprod/bwsxacdh.P_FacStuInfo";
const HOME_URL: &str =
    "https://student-records.vuw.ac.nz/pls/webprod/twbkwbis.P_GenMenu?name=bmenu.P_MainMnu";

const SAML_INITIATE_PATH: &str = "/ssomanager/saml/login?relayState=";
const SAML_CALLBACK_PATH: &str = "/ssomanager/saml/SSO";
const FINAL_CALLBACK_PATH: &str = "/ssomanager/c/auth/SSB";

/// Opaque value threaded through the whole exchange so the final endpoint
/// knows where to resume.
const RELAY_STATE: &str = "/c/auth/SSB";

/// Name of the session cookie the grades page needs at path `/`.
const SESSION_COOKIE: &str = "SESSID";

/// Rejection strings the federation login page embeds in its response body.
const BAD_CREDENTIALS_MARKER: &str = "Incorrect user ID or password";
const UPSTREAM_ERROR_MARKER: &str = "An error occurred";

/// Endpoint set for the Student Records flow.
///
/// Defaults are the production constants; tests point everything at a mock
/// server. The university versions these URLs, not this crate.
#[derive(Debug, Clone)]
pub struct StudentRecordsConfig {
    pub base_url: String,
    pub sso_url: String,
    pub sso_callback_url: String,
    pub federation_url: String,
    pub history_url: String,
    pub home_url: String,
}

impl Default for StudentRecordsConfig {
    fn default() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            sso_url: SSO_URL.to_string(),
            sso_callback_url: SSO_CALLBACK_URL.to_string(),
            federation_url: FEDERATION_URL.to_string(),
            history_url: HISTORY_URL.to_string(),
            home_url: HOME_URL.to_string(),
        }
    }
}

/// Grade source backed by the Student Records website.
pub struct StudentRecordsSource {
    config: StudentRecordsConfig,
    credentials: Credentials,
}

impl StudentRecordsSource {
    /// Creates a source against the production endpoints.
    pub fn new(credentials: Credentials) -> Self {
        Self::with_config(StudentRecordsConfig::default(), credentials)
    }

    /// Creates a source with custom endpoints.
    pub fn with_config(config: StudentRecordsConfig, credentials: Credentials) -> Self {
        Self {
            config,
            credentials,
        }
    }

    /// Runs the full login, returning an authenticated session.
    async fn login(&self) -> Result<SessionClient, GradeError> {
        debug!("login started");

        let mut client = SessionClient::new()
            .map_err(|e| GradeError::transport("client setup", e))?;

        self.initiate_login(&mut client).await?;
        self.submit_credentials(&mut client).await?;
        self.finalize_login(&mut client).await?;

        info!("successfully logged into Student Records");
        Ok(client)
    }

    /// Steps 1-3: follows the SAML relay until the federation endpoint has
    /// set its session cookie. No user credentials are sent yet.
    async fn initiate_login(&self, client: &mut SessionClient) -> Result<(), GradeError> {
        debug!("initiating login");

        // Ask the service to start a SAML login.
        let initiate_url = format!("{}{}{}", self.config.base_url, SAML_INITIATE_PATH, RELAY_STATE);
        let page = client
            .get(&initiate_url, None)
            .await
            .map_err(|e| GradeError::transport("saml initiate", e))?;
        let saml_request = extract::extract_hidden_field(page.body(), "SAMLRequest")?;

        // The identity provider answers with a fresh request aimed at the
        // federation endpoint, plus the relay state for this session.
        let page = client
            .post(
                &self.config.sso_url,
                &[
                    ("RelayState", form_escape(RELAY_STATE)),
                    ("SAMLRequest", form_escape(&saml_request)),
                ],
                None,
            )
            .await
            .map_err(|e| GradeError::transport("sso forward", e))?;
        let saml_request = extract::extract_hidden_field(page.body(), "SAMLRequest")?;
        let relay_state = extract::extract_hidden_field(page.body(), "RelayState")?;

        // Hand the second request to the federation endpoint; this only sets
        // the SAML session cookie.
        client
            .post(
                &self.config.federation_url,
                &[
                    ("RelayState", form_escape(&relay_state)),
                    ("SAMLRequest", form_escape(&saml_request)),
                ],
                None,
            )
            .await
            .map_err(|e| GradeError::transport("federation forward", e))?;

        debug!("finished login initiation");
        Ok(())
    }

    /// Steps 4-5: POSTs the credentials to the federation endpoint.
    ///
    /// A 302 here is the expected success path; the rejection strings appear
    /// in the response body either way.
    async fn submit_credentials(&self, client: &mut SessionClient) -> Result<(), GradeError> {
        debug!("submitting credentials");

        // "student\username" selects the student login domain.
        let mut fields = vec![
            ("AuthMethod", "FormsAuthentication".to_string()),
            (
                "UserName",
                format!("student%5C{}", form_escape(self.credentials.username())),
            ),
            ("Password", form_escape(self.credentials.password())),
        ];

        let result = client
            .post(&self.config.federation_url, &fields, None)
            .await;

        // The escaped password copy is not needed past the request.
        for (_, value) in fields.iter_mut() {
            scrub_string(value);
        }

        let response = result.map_err(|e| GradeError::transport("credential post", e))?;
        let body = response.body();

        if body.contains(BAD_CREDENTIALS_MARKER) {
            error!("login rejected: incorrect user ID or password");
            return Err(GradeError::InvalidCredentials);
        }
        if body.contains(UPSTREAM_ERROR_MARKER) {
            error!("login rejected: the server reported an error");
            return Err(GradeError::Upstream {
                message: "federation login page reported an error".to_string(),
            });
        }

        debug!(status = %response.status(), "credentials accepted");
        Ok(())
    }

    /// Steps 6-8: carries the SAML assertion back through the identity
    /// provider to the service, then warms up the session.
    async fn finalize_login(&self, client: &mut SessionClient) -> Result<(), GradeError> {
        debug!("finalizing login");

        // With the federation session cookie set, the endpoint now serves
        // the assertion form.
        let page = client
            .get(&self.config.federation_url, None)
            .await
            .map_err(|e| GradeError::transport("assertion fetch", e))?;
        let saml_response = extract::extract_hidden_field(page.body(), "SAMLResponse")?;
        let relay_state = extract::extract_hidden_field(page.body(), "RelayState")?;

        let response = client
            .post(
                &self.config.sso_callback_url,
                &[
                    ("SAMLResponse", form_escape(&saml_response)),
                    ("RelayState", form_escape(&relay_state)),
                ],
                None,
            )
            .await
            .map_err(|e| GradeError::transport("sso callback", e))?;

        let redirect_url = response
            .redirect_location()
            .ok_or_else(|| GradeError::missing("redirect from the SSO callback"))?
            .to_string();

        let page = client
            .get(&redirect_url, None)
            .await
            .map_err(|e| GradeError::transport("sso redirect", e))?;
        let saml_response = extract::extract_hidden_field(page.body(), "SAMLResponse")?;

        // Deliver the final assertion to the original service.
        client
            .post(
                &format!("{}{}", self.config.base_url, SAML_CALLBACK_PATH),
                &[
                    ("RelayState", form_escape(RELAY_STATE)),
                    ("SAMLResponse", form_escape(&saml_response)),
                ],
                None,
            )
            .await
            .map_err(|e| GradeError::transport("service callback", e))?;

        client
            .get(&format!("{}{}", self.config.base_url, FINAL_CALLBACK_PATH), None)
            .await
            .map_err(|e| GradeError::transport("final callback", e))?;

        // The server refuses direct navigation to protected resources until
        // the home page has been visited once.
        client
            .get(&self.config.home_url, None)
            .await
            .map_err(|e| GradeError::transport("home page visit", e))?;

        debug!("finished finalizing login");
        Ok(())
    }
}

impl GradeSource for StudentRecordsSource {
    async fn get_grades(&mut self) -> Result<Vec<CourseRecord>, GradeError> {
        debug!("grade grab started");

        let mut client = self.login().await?;

        // The server scopes the session cookie to the home page only.
        client.force_root_path(SESSION_COOKIE);

        // The grades page returns 403 unless the referer is the home page.
        let page = client
            .get(&self.config.history_url, Some(&self.config.home_url))
            .await
            .map_err(|e| GradeError::transport("history fetch", e))?;

        let records = extract::extract_history_rows(page.body());

        if records.is_empty() {
            warn!("no courses found in the academic history table");
        } else {
            info!(count = records.len(), "got grades from Student Records");
            for record in &records {
                debug!(code = %record.code(), has_grade = record.has_grade(), "scraped course");
            }
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
