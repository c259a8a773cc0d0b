//! Page-number pagination over newest-first listings.
//!
//! Page 1 holds the newest items. A window is computed from the total item
//! count before any rows are read, so `has_next` never needs an extra look-ahead query.

use crate::config::OutOfRangePolicy;
use crate::errors::ChirpError;

pub const DEFAULT_PAGE_SIZE: u32 = 20;

const PAGE_PARAM: &str = "page";

/// A requested page number, as given by the caller. It is not range-checked
/// until it meets a total in [`window`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cursor(i64);

impl Cursor {
    pub const FIRST: Cursor = Cursor(1);

    pub fn page(page: i64) -> Self {
        Self(page)
    }

    pub fn number(self) -> i64 {
        self.0
    }

    pub fn parse(raw: &str) -> Result<Self, ChirpError> {
        raw.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|_| ChirpError::MalformedCursor(raw.to_string()))
    }

    /// The `page` parameter of a URL query string, percent-decoded. When the
    /// parameter repeats, the last one wins.
    pub fn from_query(query: &str) -> Result<Option<Self>, ChirpError> {
        url::form_urlencoded::parse(query.as_bytes())
            .filter(|(key, _)| key == PAGE_PARAM)
            .last()
            .map(|(_, value)| Self::parse(&value))
            .transpose()
    }

    pub fn to_query(self) -> String {
        format!("{PAGE_PARAM}={}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    /// 1-based, always within `1..=last_page`.
    pub page: u32,
    pub page_size: u32,
    pub last_page: u32,
    pub total: u64,
}

impl PageWindow {
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    pub fn has_previous(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.offset() + u64::from(self.page_size) < self.total
    }

    pub fn next(&self) -> Option<Cursor> {
        self.has_next().then(|| Cursor(i64::from(self.page) + 1))
    }

    pub fn previous(&self) -> Option<Cursor> {
        self.has_previous().then(|| Cursor(i64::from(self.page) - 1))
    }
}

/// Number of pages needed for `total` items; an empty listing still has
/// one (empty) page.
pub fn last_page(total: u64, page_size: u32) -> u32 {
    let size = u64::from(page_size.max(1));
    let pages = total.div_ceil(size).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

pub fn window(
    total: u64,
    cursor: Option<Cursor>,
    page_size: u32,
    policy: OutOfRangePolicy,
) -> Result<PageWindow, ChirpError> {
    if page_size == 0 {
        return Err(ChirpError::InvalidConfig(
            "pagination.page_size must be greater than zero".to_string(),
        ));
    }
    let last = last_page(total, page_size);
    let requested = cursor.unwrap_or(Cursor::FIRST).number();
    let page = if (1..=i64::from(last)).contains(&requested) {
        requested
    } else {
        match policy {
            OutOfRangePolicy::Reject => {
                return Err(ChirpError::InvalidCursor {
                    page: requested,
                    last_page: last,
                })
            }
            OutOfRangePolicy::Clamp => requested.clamp(1, i64::from(last)),
        }
    };
    Ok(PageWindow {
        page: u32::try_from(page).unwrap_or(last),
        page_size,
        last_page: last,
        total,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPage<T> {
    pub items: Vec<T>,
    pub window: PageWindow,
}

impl<T> FeedPage<T> {
    pub fn has_previous(&self) -> bool {
        self.window.has_previous()
    }

    pub fn has_next(&self) -> bool {
        self.window.has_next()
    }

    pub fn next_cursor(&self) -> Option<Cursor> {
        self.window.next()
    }

    pub fn previous_cursor(&self) -> Option<Cursor> {
        self.window.previous()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> FeedPage<U> {
        FeedPage {
            items: self.items.into_iter().map(f).collect(),
            window: self.window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{last_page, window, Cursor, FeedPage, PageWindow, DEFAULT_PAGE_SIZE};
    use crate::config::OutOfRangePolicy;
    use crate::errors::ChirpError;

    fn slice<T: Clone>(items: &[T], window: &PageWindow) -> Vec<T> {
        let start = usize::try_from(window.offset()).unwrap_or(usize::MAX);
        items
            .iter()
            .skip(start)
            .take(window.page_size as usize)
            .cloned()
            .collect()
    }

    fn page_of(items: &[u64], cursor: Option<Cursor>, size: u32) -> FeedPage<u64> {
        let window = window(items.len() as u64, cursor, size, OutOfRangePolicy::Reject)
            .expect("in range");
        FeedPage {
            items: slice(items, &window),
            window,
        }
    }

    #[test]
    fn page_count_and_flags_hold_for_every_small_listing() {
        for size in 1..=7_u32 {
            for total in 0..=40_u64 {
                let items = (0..total).rev().collect::<Vec<_>>();
                let pages = last_page(total, size);
                assert_eq!(u64::from(pages), total.div_ceil(u64::from(size)).max(1));

                let mut seen = Vec::new();
                for page in 1..=pages {
                    let current = page_of(&items, Some(Cursor::page(i64::from(page))), size);
                    assert!(current.items.len() <= size as usize);
                    assert_eq!(current.has_previous(), page > 1);
                    assert_eq!(current.has_next(), page < pages, "size {size} total {total}");
                    if total > 0 {
                        assert!(!current.items.is_empty());
                    }
                    seen.extend(current.items);
                }
                assert_eq!(seen, items, "pages must cover every item exactly once");
            }
        }
    }

    #[test]
    fn default_page_size_gives_the_observed_page_counts() {
        assert_eq!(DEFAULT_PAGE_SIZE, 20);
        assert_eq!(last_page(30, DEFAULT_PAGE_SIZE), 2);
        assert_eq!(last_page(54, DEFAULT_PAGE_SIZE), 3);
        assert_eq!(last_page(20, DEFAULT_PAGE_SIZE), 1);

        let items = (0..54_u64).rev().collect::<Vec<_>>();
        let second = page_of(&items, Some(Cursor::page(2)), DEFAULT_PAGE_SIZE);
        assert!(second.has_previous());
        assert!(second.has_next());
    }

    #[test]
    fn next_then_previous_round_trips() {
        let items = (0..54_u64).rev().collect::<Vec<_>>();
        let first = page_of(&items, None, DEFAULT_PAGE_SIZE);
        let second = page_of(&items, first.next_cursor(), DEFAULT_PAGE_SIZE);
        let back = page_of(&items, second.previous_cursor(), DEFAULT_PAGE_SIZE);
        assert_eq!(first, back);
        assert_eq!(first, page_of(&items, None, DEFAULT_PAGE_SIZE));
    }

    #[test]
    fn empty_listing_is_a_single_empty_first_page() {
        let page = page_of(&[], None, DEFAULT_PAGE_SIZE);
        assert!(page.items.is_empty());
        assert_eq!(page.window.page, 1);
        assert_eq!(page.window.last_page, 1);
        assert!(!page.has_previous());
        assert!(!page.has_next());
    }

    #[test]
    fn out_of_range_cursor_is_rejected_or_clamped_by_policy() {
        let err = window(30, Some(Cursor::page(3)), 20, OutOfRangePolicy::Reject)
            .expect_err("beyond last page");
        assert!(matches!(err, ChirpError::InvalidCursor { page: 3, last_page: 2 }));
        let err = window(30, Some(Cursor::page(0)), 20, OutOfRangePolicy::Reject)
            .expect_err("page zero");
        assert_eq!(err.to_string(), "invalid cursor: page 0 is outside 1..=2");

        let clamped = window(30, Some(Cursor::page(99)), 20, OutOfRangePolicy::Clamp).expect("clamp");
        assert_eq!(clamped.page, 2);
        let clamped = window(30, Some(Cursor::page(-4)), 20, OutOfRangePolicy::Clamp).expect("clamp");
        assert_eq!(clamped.page, 1);
    }

    #[test]
    fn query_parsing_finds_the_page_parameter() {
        assert_eq!(Cursor::from_query("").expect("empty"), None);
        assert_eq!(
            Cursor::from_query("foo=bar&page=2").expect("page"),
            Some(Cursor::page(2))
        );
        assert_eq!(Cursor::page(3).to_query(), "page=3");
        let err = Cursor::from_query("page=two").expect_err("non-numeric");
        assert!(matches!(err, ChirpError::MalformedCursor(raw) if raw == "two"));
    }

    #[test]
    fn query_values_are_percent_decoded_before_parsing() {
        assert_eq!(Cursor::from_query("page=%32").expect("encoded"), Some(Cursor::page(2)));
        assert_eq!(
            Cursor::from_query("page=1&page=%33").expect("last wins"),
            Some(Cursor::page(3))
        );
        assert_eq!(Cursor::from_query("pag%65=4").expect("encoded key"), Some(Cursor::page(4)));
        let err = Cursor::from_query("page=%2B").expect_err("plus sign only");
        assert!(matches!(err, ChirpError::MalformedCursor(raw) if raw == "+"));
    }
}
