//! automark: a personal agent that logs into Victoria University's web
//! portals, scrapes course grades, and reports a privacy-redacted summary
//! (a has-grade flag per course) to a bot server.
//!
//! The interesting part is the login emulation: a hand-rolled browser
//! session ([`session::SessionClient`]) that the two grade sources in
//! [`grades`] drive through either a multi-hop SAML exchange or the legacy
//! CMS form login, scraping tokens out of HTML along the way ([`extract`]).

pub mod config;
pub mod credentials;
pub mod daemon;
pub mod extract;
pub mod grades;
pub mod report;
pub mod session;
