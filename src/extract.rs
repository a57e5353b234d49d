//! Structural HTML extraction for login forms and grade tables.
//!
//! Everything in here is deliberately fragile: the selectors mirror the
//! markup the university ships today, and a layout change is supposed to
//! surface as an [`GradeError::Extraction`] rather than silently wrong data.

use crate::grades::error::GradeError;
use crate::grades::CourseRecord;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use tracing::debug;

// Static selectors and patterns, compiled once.
static HISTORY_TABLE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        "div.pagebodydiv table[summary=\"This table displays the student course history information.\"]",
    )
    .unwrap()
});
static PORTAL_ROW_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table.datadisplaytable tr").unwrap());
static ROW_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static CELL_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").unwrap());

static SUBJECT_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z]+").unwrap());
static NUMBER_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+$").unwrap());
static LOGIN_UUID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"document\.cplogin\.uuid\.value="([\da-zA-Z-]+)";"#).unwrap()
});

/// Extracts the `value` of the `<input>` named `field`.
///
/// When several inputs share the name, the first in document order wins.
/// That mirrors the behavior the login flows were built against and is a
/// documented fragility, not a considered choice.
pub fn extract_hidden_field(html: &str, field: &str) -> Result<String, GradeError> {
    let selector = Selector::parse(&format!("input[name=\"{field}\"]"))
        .map_err(|e| GradeError::missing(format!("unusable field selector for {field:?}: {e}")))?;

    let document = Html::parse_document(html);
    let mut matches = document.select(&selector);

    let input = matches
        .next()
        .ok_or_else(|| GradeError::missing(format!("hidden input {field:?}")))?;
    if matches.next().is_some() {
        debug!(field, "multiple inputs share this name, taking the first");
    }

    input
        .value()
        .attr("value")
        .map(str::to_string)
        .ok_or_else(|| GradeError::missing(format!("value attribute on input {field:?}")))
}

/// Parses the Student Records academic-history table.
///
/// A missing table yields an empty list rather than an error: the server
/// sometimes defaults to a term with no rows, which is a soft condition the
/// caller logs and escalates.
pub fn extract_history_rows(html: &str) -> Vec<CourseRecord> {
    let document = Html::parse_document(html);

    let Some(table) = document.select(&HISTORY_TABLE_SELECTOR).next() else {
        debug!("course history table not found");
        return Vec::new();
    };

    let mut records = Vec::new();
    for row in table.select(&ROW_SELECTOR).skip(1) {
        let cells: Vec<String> = row.select(&CELL_SELECTOR).map(cell_text).collect();
        if cells.len() < 7 {
            continue;
        }

        // The first cell holds the combined code, e.g. "COMP102".
        let code = &cells[0];
        records.push(CourseRecord {
            subject: SUBJECT_REGEX
                .find(code)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            course_number: NUMBER_REGEX
                .find(code)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            title: cells[1].clone(),
            grade: cells[6].clone(),
            crn: None,
        });
    }

    records
}

/// Parses the legacy portal's grade table.
///
/// Grade rows have exactly five cells; header and shading rows carry the
/// `uportal-background-light` class and are skipped.
pub fn extract_portal_rows(html: &str) -> Vec<CourseRecord> {
    let document = Html::parse_document(html);

    let mut records = Vec::new();
    for row in document.select(&PORTAL_ROW_SELECTOR) {
        let class = row.value().attr("class").unwrap_or_default();
        if class.contains("uportal-background-light") {
            continue;
        }

        let cells: Vec<String> = row.select(&CELL_SELECTOR).map(cell_text).collect();
        if cells.len() != 5 {
            continue;
        }

        records.push(CourseRecord {
            crn: Some(cells[0].clone()),
            subject: cells[1].clone(),
            course_number: cells[2].clone(),
            title: cells[3].clone(),
            grade: cells[4].clone(),
        });
    }

    records
}

/// Scrapes the login UUID the legacy portal embeds in inline script text.
pub fn extract_login_uuid(html: &str) -> Result<String, GradeError> {
    LOGIN_UUID_REGEX
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| GradeError::missing("login uuid in page script"))
}

/// Collects a cell's text, mapping the `&nbsp;` placeholder to empty.
fn cell_text(cell: ElementRef) -> String {
    cell.text()
        .collect::<String>()
        .replace('\u{a0}', "")
        .trim()
        .to_string()
}
