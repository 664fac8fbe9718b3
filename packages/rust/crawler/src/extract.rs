//! Listing and detail page extraction for the notice board.
//!
//! [`NoticeLayout`] holds the compiled selectors for one site layout and turns
//! raw HTML into [`NoticeItem`]s (listing) and [`NoticeDetail`]s (detail page).

use std::sync::LazyLock;

use boardsync_shared::{BoardSyncError, NoticeItem, Result, SelectorSection, kst_date};
use chrono::{DateTime, NaiveDate};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// `YYYY-MM-DD`, `YYYY.MM.DD`, `YYYY/MM/DD`, optionally followed by a time.
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4})\s*[.\-/]\s*(\d{1,2})\s*[.\-/]\s*(\d{1,2})").expect("valid date regex")
});

/// Fields pulled from a notice detail page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeDetail {
    /// Publish date in UTC+9.
    pub published_at: NaiveDate,
    /// Paragraph (or div) text blocks, each trimmed and newline-terminated.
    pub body: String,
    /// First image in the body, made absolute against the origin.
    pub image_url: Option<String>,
}

/// Compiled selectors for the notice-board HTML structure.
#[derive(Debug)]
pub struct NoticeLayout {
    list_item: Selector,
    item_title: Selector,
    item_link: Selector,
    notice_marker: Selector,
    published_at: Selector,
    body: Selector,
    paragraph: Selector,
    division: Selector,
    image: Selector,
    title_markers: Vec<String>,
}

impl NoticeLayout {
    /// Compile the configured selectors.
    pub fn new(selectors: &SelectorSection, title_markers: &[String]) -> Result<Self> {
        Ok(Self {
            list_item: compile(&selectors.list_item)?,
            item_title: compile(&selectors.item_title)?,
            item_link: compile(&selectors.item_link)?,
            notice_marker: compile(&selectors.notice_marker)?,
            published_at: compile(&selectors.published_at)?,
            body: compile(&selectors.body)?,
            paragraph: compile("p")?,
            division: compile("div")?,
            image: compile("img[src]")?,
            title_markers: title_markers.to_vec(),
        })
    }

    /// Parse the listing page into rows, in document order.
    ///
    /// A row without a link yields an `Err` in its slot so the caller can log
    /// it and move on to the next row.
    pub fn parse_listing(&self, html: &str) -> Vec<Result<NoticeItem>> {
        let doc = Html::parse_document(html);

        doc.select(&self.list_item)
            .enumerate()
            .map(|(index, row)| self.parse_row(index, row))
            .collect()
    }

    fn parse_row(&self, index: usize, row: ElementRef<'_>) -> Result<NoticeItem> {
        let raw_title = row
            .select(&self.item_title)
            .next()
            .map(|el| el.text().collect::<String>())
            .unwrap_or_default();

        let relative_url = row
            .select(&self.item_link)
            .find_map(|el| el.value().attr("href"))
            .map(str::trim)
            .filter(|href| !href.is_empty())
            .ok_or_else(|| BoardSyncError::parse(format!("listing row {index} has no link")))?;

        Ok(NoticeItem {
            title: self.clean_title(&raw_title),
            relative_url: relative_url.to_string(),
            is_notice: row.select(&self.notice_marker).next().is_some(),
        })
    }

    /// Strip edit/new markers and tabs from a listing title.
    pub fn clean_title(&self, raw: &str) -> String {
        let mut title = raw.trim().to_string();
        for marker in &self.title_markers {
            title = title.replace(marker.as_str(), "");
        }
        title.replace('\t', "").trim().to_string()
    }

    /// Parse a detail page.
    pub fn parse_detail(&self, html: &str, origin: &Url) -> Result<NoticeDetail> {
        let doc = Html::parse_document(html);

        let stamp = doc
            .select(&self.published_at)
            .next()
            .map(|el| el.text().collect::<String>())
            .ok_or_else(|| BoardSyncError::parse("detail page has no publish timestamp"))?;
        let published_at = parse_publish_date(&stamp)?;

        let containers: Vec<ElementRef<'_>> = doc.select(&self.body).collect();

        let mut blocks = self.text_blocks(&containers, &self.paragraph);
        if blocks.is_empty() {
            blocks = self.text_blocks(&containers, &self.division);
        }
        let body: String = blocks.iter().map(|b| format!("{b}\n")).collect();

        let image_url = containers
            .iter()
            .flat_map(|c| c.select(&self.image))
            .find_map(|img| img.value().attr("src"))
            .and_then(|src| origin.join(src.trim()).ok())
            .map(|u| u.to_string());

        Ok(NoticeDetail {
            published_at,
            body,
            image_url,
        })
    }

    /// Non-empty trimmed text of every `block` inside the containers, in document order.
    fn text_blocks(&self, containers: &[ElementRef<'_>], block: &Selector) -> Vec<String> {
        containers
            .iter()
            .flat_map(|c| c.select(block))
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|text| !text.is_empty())
            .collect()
    }
}

fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| BoardSyncError::config(format!("invalid selector '{selector}': {e}")))
}

/// Normalize a publish timestamp to its calendar date in UTC+9.
///
/// RFC 3339 stamps are converted into UTC+9 first. Anything else is scanned
/// for a `YYYY-MM-DD`-like date and taken to already be local time.
pub fn parse_publish_date(raw: &str) -> Result<NaiveDate> {
    let text = raw.trim();

    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Ok(kst_date(&instant));
    }

    let caps = DATE_RE
        .captures(text)
        .ok_or_else(|| BoardSyncError::parse(format!("no date in timestamp '{text}'")))?;

    let part = |i: usize| caps[i].parse::<u32>().unwrap_or(0);
    let year = caps[1].parse::<i32>().unwrap_or(0);

    NaiveDate::from_ymd_opt(year, part(2), part(3))
        .ok_or_else(|| BoardSyncError::parse(format!("invalid date in timestamp '{text}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> NoticeLayout {
        NoticeLayout::new(
            &SelectorSection::default(),
            &["수정됨".to_string(), "새 글".to_string()],
        )
        .expect("default selectors compile")
    }

    fn origin() -> Url {
        Url::parse("https://www.example.ac.kr").unwrap()
    }

    fn load_fixture(name: &str) -> String {
        let path = format!("../../../fixtures/html/{name}");
        std::fs::read_to_string(&path).unwrap_or_else(|_| panic!("missing fixture: {path}"))
    }

    #[test]
    fn listing_fixture_parses_rows_in_order() {
        let items = layout().parse_listing(&load_fixture("notice_list.html"));
        assert_eq!(items.len(), 4);

        let first = items[0].as_ref().expect("first row");
        assert_eq!(first.title, "2024학년도 1학기 수강신청 안내");
        assert_eq!(first.relative_url, "/front/student/notice/view?id=101");
        assert!(first.is_notice);

        let second = items[1].as_ref().expect("second row");
        assert_eq!(second.title, "Scholarship application");
        assert!(!second.is_notice);

        // Row without a link
        assert!(items[2].is_err());

        let last = items[3].as_ref().expect("last row");
        assert_eq!(last.relative_url, "/front/student/notice/view?id=104");
    }

    #[test]
    fn clean_title_strips_markers_and_tabs() {
        let l = layout();
        assert_eq!(l.clean_title("\t\t기숙사 공지 수정됨\t새 글 "), "기숙사 공지");
        assert_eq!(l.clean_title("Plain"), "Plain");
    }

    #[test]
    fn detail_fixture_extracts_paragraphs_and_image() {
        let detail = layout()
            .parse_detail(&load_fixture("notice_detail.html"), &origin())
            .expect("parse detail");

        assert_eq!(detail.published_at, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert_eq!(detail.body, "첫 번째 문단입니다.\n두 번째 문단입니다.\n");
        assert_eq!(
            detail.image_url.as_deref(),
            Some("https://www.example.ac.kr/upload/notice/poster.png")
        );
    }

    #[test]
    fn detail_falls_back_to_div_blocks() {
        let html = r#"<html><body>
            <span class="datetime">2024-05-01 09:00:00</span>
            <div class="content"><div> first </div><div></div><div>second</div></div>
        </body></html>"#;
        let detail = layout().parse_detail(html, &origin()).unwrap();
        assert_eq!(detail.body, "first\nsecond\n");
        assert_eq!(detail.image_url, None);
    }

    #[test]
    fn detail_without_timestamp_is_parse_error() {
        let html = r#"<div class="content"><p>text</p></div>"#;
        let err = layout().parse_detail(html, &origin()).unwrap_err();
        assert!(matches!(err, BoardSyncError::Parse { .. }));
    }

    #[test]
    fn publish_date_formats() {
        let may_first = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(parse_publish_date("2024-05-01 13:45:10").unwrap(), may_first);
        assert_eq!(parse_publish_date(" 2024.05.01 13:45 ").unwrap(), may_first);
        assert_eq!(parse_publish_date("작성일 2024/5/1").unwrap(), may_first);
        // 16:30 UTC on Apr 30 is already May 1 in UTC+9.
        assert_eq!(parse_publish_date("2024-04-30T16:30:00Z").unwrap(), may_first);
        assert!(parse_publish_date("yesterday").is_err());
        assert!(parse_publish_date("2024-13-01").is_err());
    }
}
