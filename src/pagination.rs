//! Page arithmetic for feeds, replies and import views

use serde::Serialize;

/// One entry of an elided page range
///
/// Serializes as the page number, or `"…"` for a gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLink {
    Page(usize),
    Ellipsis,
}

impl Serialize for PageLink {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Page(number) => serializer.serialize_u64(*number as u64),
            Self::Ellipsis => serializer.serialize_str("…"),
        }
    }
}

/// Splits `count` items into pages of `per_page`
#[derive(Debug, Clone, Copy)]
pub struct Paginator {
    count: usize,
    per_page: usize,
}

/// A resolved page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Page {
    pub number: usize,
    pub num_pages: usize,
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn has_next(&self) -> bool {
        self.number < self.num_pages
    }

    pub fn has_previous(&self) -> bool {
        self.number > 1
    }
}

impl Paginator {
    /// `per_page` of zero is treated as one
    pub fn new(count: usize, per_page: usize) -> Self {
        Self {
            count,
            per_page: per_page.max(1),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Always at least one, so an empty listing still has a first page
    pub fn num_pages(&self) -> usize {
        self.count.div_ceil(self.per_page).max(1)
    }

    /// Resolve a raw `?page=` value
    ///
    /// Missing or non-numeric input gives the first page; any number out
    /// of range, zero and negatives included, gives the last page.
    pub fn get_page(&self, raw: Option<&str>) -> Page {
        let num_pages = self.num_pages();
        let number = match raw.and_then(|value| value.trim().parse::<i64>().ok()) {
            None => 1,
            Some(n) if n < 1 => num_pages,
            Some(n) => usize::try_from(n).map_or(num_pages, |n| n.min(num_pages)),
        };

        Page {
            number,
            num_pages,
            offset: (number - 1) * self.per_page,
            limit: self.per_page,
        }
    }

    /// Page numbers around `number` with the gaps collapsed to ellipses
    pub fn elided_page_range(
        &self,
        number: usize,
        on_each_side: usize,
        on_ends: usize,
    ) -> Vec<PageLink> {
        let num_pages = self.num_pages();
        let number = number.clamp(1, num_pages);
        let mut links = Vec::new();

        if num_pages <= (on_each_side + on_ends) * 2 {
            links.extend((1..=num_pages).map(PageLink::Page));
            return links;
        }

        if number > 1 + on_each_side + on_ends + 1 {
            links.extend((1..=on_ends).map(PageLink::Page));
            links.push(PageLink::Ellipsis);
            links.extend((number - on_each_side..=number).map(PageLink::Page));
        } else {
            links.extend((1..=number).map(PageLink::Page));
        }

        if number + on_each_side + on_ends + 1 < num_pages {
            links.extend((number + 1..=number + on_each_side).map(PageLink::Page));
            links.push(PageLink::Ellipsis);
            links.extend((num_pages - on_ends + 1..=num_pages).map(PageLink::Page));
        } else {
            links.extend((number + 1..=num_pages).map(PageLink::Page));
        }

        links
    }
}
