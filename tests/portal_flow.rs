//! End-to-end tests for the legacy MyVictoria portal flow.

use automark::credentials::Credentials;
use automark::grades::error::GradeError;
use automark::grades::{GradeSource, PortalConfig, PortalSource};
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LOGIN_PAGE_HTML: &str = r#"
    <html><body>
    <form name="cplogin"><input name="uuid" type="hidden"></form>
    <script>document.cplogin.uuid.value="3f2a-11d4-BEEF";</script>
    </body></html>"#;

const GRADE_PAGE_HTML: &str = r#"
    <table class="datadisplaytable">
      <tr class="uportal-background-light"><td>CRN</td><td>Subject</td>
          <td>Course</td><td>Title</td><td>Grade</td></tr>
      <tr><td>9041</td><td>COMP</td><td>102</td>
          <td>Intro to Program Design</td><td>A+</td></tr>
      <tr><td>9299</td><td>CGRA</td><td>151</td>
          <td>Intro to Computer Graphics</td><td></td></tr>
    </table>"#;

fn source_for(server: &MockServer, password: &str) -> PortalSource {
    PortalSource::with_config(
        PortalConfig {
            base_url: server.uri(),
        },
        Credentials::new("alice", password, "key-123"),
    )
}

/// Mounts the login page, the success login POST, and the two warm-up pages.
/// `logins` is how many times the test will log in.
async fn mount_login(server: &MockServer, logins: u64) {
    Mock::given(method("GET"))
        .and(path("/cp/home/displaylogin"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE_HTML))
        .expect(logins)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/cp/home/login"))
        .and(body_string_contains("uuid=3f2a-11d4-BEEF"))
        .and(body_string_contains("user=alice"))
        .and(body_string_contains("pass=p%40ss+word"))
        .respond_with(ResponseTemplate::new(200).set_body_string("welcome"))
        .expect(logins)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cps/welcome/loginok.html"))
        .respond_with(ResponseTemplate::new(200))
        .expect(logins)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cp/home/next"))
        .respond_with(ResponseTemplate::new(200))
        .expect(logins)
        .mount(server)
        .await;
}

/// Mounts the three warm-up pages and the two edit-mode POSTs of the
/// year-set sub-flow, each expected to run `runs` times. The layout-engine
/// URLs share a path and differ only in query parameters.
async fn mount_year_set(server: &MockServer, runs: u64) {
    Mock::given(method("GET"))
        .and(path("/render.userLayoutRootNode.uP"))
        .respond_with(ResponseTemplate::new(200))
        .expect(runs)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/tag.c56f3aaeaf27f1c8.render.userLayoutRootNode.uP"))
        .and(query_param("activeTab", "u12l1s8"))
        .respond_with(ResponseTemplate::new(200))
        .expect(runs)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/tag.c56f3aaeaf27f1c8.render.userLayoutRootNode.uP"))
        .and(query_param("uP_edit_target", "u12l1n642"))
        .respond_with(ResponseTemplate::new(200))
        .expect(runs)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/tag.c56f3aaeaf27f1c8.render.userLayoutRootNode.target.u12l1n642.uP"))
        .and(body_string_contains("MODE=EDIT"))
        .and(body_string_contains("TEXTDATA=999"))
        .respond_with(ResponseTemplate::new(200))
        .expect(runs)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/tag.c56f3aaeaf27f1c8.render.userLayoutRootNode.target.u12l1n642.uP"))
        .and(body_string_contains("MODE=DEFAULT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(runs)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_login_year_set_and_scrape() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    mount_year_set(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/tag.c56f3aaeaf27f1c8.render.userLayoutRootNode.uP"))
        .and(query_param("uP_root", "u12l1n642"))
        .respond_with(ResponseTemplate::new(200).set_body_string(GRADE_PAGE_HTML))
        .expect(1)
        .mount(&server)
        .await;

    let mut source = source_for(&server, "p@ss word");
    let records = source.get_grades().await.expect("login and scrape");

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].crn.as_deref(), Some("9041"));
    assert_eq!(records[0].code(), "COMP102");
    assert!(records[0].has_grade());
    assert_eq!(records[1].code(), "CGRA151");
    assert!(!records[1].has_grade());
}

#[tokio::test]
async fn test_year_set_runs_once_per_window() {
    let server = MockServer::start().await;
    mount_login(&server, 2).await;
    // The year-set stamp is taken when the sub-flow starts, so the second
    // fetch lands inside the 6 h window and must skip all five requests.
    mount_year_set(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/tag.c56f3aaeaf27f1c8.render.userLayoutRootNode.uP"))
        .and(query_param("uP_root", "u12l1n642"))
        .respond_with(ResponseTemplate::new(200).set_body_string(GRADE_PAGE_HTML))
        .expect(2)
        .mount(&server)
        .await;

    let mut source = source_for(&server, "p@ss word");
    assert_eq!(source.get_grades().await.unwrap().len(), 2);
    assert_eq!(source.get_grades().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_empty_scrape_forces_year_set() {
    let server = MockServer::start().await;
    mount_login(&server, 2).await;
    // An empty first scrape forces the sub-flow on the second fetch even
    // though the window has not elapsed.
    mount_year_set(&server, 2).await;

    // The first grade fetch finds no rows, the second finds the table.
    Mock::given(method("GET"))
        .and(path("/tag.c56f3aaeaf27f1c8.render.userLayoutRootNode.uP"))
        .and(query_param("uP_root", "u12l1n642"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>no courses</html>"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/tag.c56f3aaeaf27f1c8.render.userLayoutRootNode.uP"))
        .and(query_param("uP_root", "u12l1n642"))
        .respond_with(ResponseTemplate::new(200).set_body_string(GRADE_PAGE_HTML))
        .expect(1)
        .mount(&server)
        .await;

    let mut source = source_for(&server, "p@ss word");
    assert!(source.get_grades().await.unwrap().is_empty());
    assert_eq!(source.get_grades().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_rejected_login() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cp/home/displaylogin"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE_HTML))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/cp/home/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<title>Failed Login</title>"))
        .expect(1)
        .mount(&server)
        .await;

    // The warm-up pages must not be touched after a rejection.
    Mock::given(method("GET"))
        .and(path("/cps/welcome/loginok.html"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut source = source_for(&server, "wrong");
    let err = source.get_grades().await.unwrap_err();
    assert!(matches!(err, GradeError::InvalidCredentials));
}

#[tokio::test]
async fn test_missing_uuid_is_an_extraction_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cp/home/displaylogin"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let mut source = source_for(&server, "p@ss word");
    let err = source.get_grades().await.unwrap_err();
    assert!(matches!(err, GradeError::Extraction { .. }));
}
