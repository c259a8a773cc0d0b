//! View models for the in-process app, plus their HTML and Atom renderings.
//!
//! Assertions should prefer [`PageView`]; the HTML exists because some
//! contracts are about literal labels (`Next`, `Previous`, `Post to`) and
//! because the CLI prints it.

use chrono::{DateTime, SecondsFormat};

use crate::pagination::FeedPage;
use crate::types::{Feed, Provider, Update, UpdateId};

pub const NEXT_LINK_ID: &str = "next_button";
pub const PREVIOUS_LINK_ID: &str = "previous_button";
pub const TEXT_FIELD: &str = "text";
pub const TEXT_FIELD_ID: &str = "update-textarea";
pub const SHARE_BUTTON_ID: &str = "update-button";
pub const SHARE_BUTTON_LABEL: &str = "Share";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub id: &'static str,
    pub label: &'static str,
    pub href: String,
}

impl Link {
    pub fn next(path: &str, page: i64) -> Self {
        Self {
            id: NEXT_LINK_ID,
            label: "Next",
            href: format!("{path}?page={page}"),
        }
    }

    pub fn previous(path: &str, page: i64) -> Self {
        Self {
            id: PREVIOUS_LINK_ID,
            label: "Previous",
            href: format!("{path}?page={page}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateView {
    pub update_id: UpdateId,
    pub author: String,
    pub text: String,
    pub referral: Option<Box<UpdateView>>,
}

impl From<&Update> for UpdateView {
    fn from(update: &Update) -> Self {
        Self {
            update_id: update.update_id,
            author: update.author.clone(),
            text: update.text.clone(),
            referral: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashKind {
    Notice,
    Error,
}

impl FlashKind {
    fn css_class(self) -> &'static str {
        match self {
            Self::Notice => "notice",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flash {
    pub kind: FlashKind,
    pub message: String,
}

impl Flash {
    pub fn notice(message: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Notice,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Error,
            message: message.into(),
        }
    }
}

/// The update form shown to signed-in users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareForm {
    pub action: String,
    pub return_to: String,
    /// Providers offered as "Post to <Provider>" cross-post targets.
    pub post_to: Vec<Provider>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageView {
    pub title: String,
    pub path: String,
    pub flash: Option<Flash>,
    pub share_form: Option<ShareForm>,
    pub updates: Vec<UpdateView>,
    pub previous: Option<Link>,
    pub next: Option<Link>,
}

impl PageView {
    pub fn new(title: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            path: path.into(),
            flash: None,
            share_form: None,
            updates: Vec::new(),
            previous: None,
            next: None,
        }
    }

    /// Fill the update list and navigation links from one page of a listing.
    pub fn with_page(mut self, page: &FeedPage<Update>) -> Self {
        self.updates = page.items.iter().map(UpdateView::from).collect();
        self.previous = page
            .previous_cursor()
            .map(|cursor| Link::previous(&self.path, cursor.number()));
        self.next = page
            .next_cursor()
            .map(|cursor| Link::next(&self.path, cursor.number()));
        self
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.previous.iter().chain(self.next.iter())
    }

    /// Find a link by element id or visible label.
    pub fn link(&self, id_or_label: &str) -> Option<&Link> {
        self.links()
            .find(|link| link.id == id_or_label || link.label == id_or_label)
    }

    pub fn contains_text(&self, text: &str) -> bool {
        self.updates.iter().any(|update| {
            update.text.contains(text)
                || update
                    .referral
                    .as_ref()
                    .is_some_and(|referral| referral.text.contains(text))
        })
    }
}

pub fn render_html(view: &PageView) -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html>\n<head><title>");
    out.push_str(&escape(&view.title));
    out.push_str("</title></head>\n<body>\n");

    if let Some(flash) = &view.flash {
        out.push_str(&format!(
            "<div id=\"flash\" class=\"{}\">{}</div>\n",
            flash.kind.css_class(),
            escape(&flash.message)
        ));
    }

    if let Some(form) = &view.share_form {
        out.push_str(&format!(
            "<form id=\"update-form\" method=\"post\" action=\"{}\">\n",
            escape(&form.action)
        ));
        out.push_str(&format!(
            "<textarea id=\"{TEXT_FIELD_ID}\" name=\"{TEXT_FIELD}\"></textarea>\n"
        ));
        out.push_str(&format!(
            "<input type=\"hidden\" name=\"return_to\" value=\"{}\">\n",
            escape(&form.return_to)
        ));
        for provider in &form.post_to {
            out.push_str(&format!(
                "<label><input type=\"checkbox\" name=\"post_to\" value=\"{}\"> Post to {}</label>\n",
                provider.as_str(),
                provider.display_name()
            ));
        }
        out.push_str(&format!(
            "<button id=\"{SHARE_BUTTON_ID}\" type=\"submit\">{SHARE_BUTTON_LABEL}</button>\n</form>\n"
        ));
    }

    out.push_str("<ul class=\"updates\">\n");
    for update in &view.updates {
        render_update(&mut out, update);
    }
    out.push_str("</ul>\n");

    if view.previous.is_some() || view.next.is_some() {
        out.push_str("<nav class=\"pagination\">\n");
        for link in view.links() {
            out.push_str(&format!(
                "<a id=\"{}\" href=\"{}\">{}</a>\n",
                link.id,
                escape(&link.href),
                link.label
            ));
        }
        out.push_str("</nav>\n");
    }

    out.push_str("</body>\n</html>\n");
    out
}

fn render_update(out: &mut String, update: &UpdateView) {
    out.push_str(&format!(
        "<li class=\"update\" id=\"update-{}\">\n<span class=\"author\">{}</span>\n<p class=\"text\">{}</p>\n",
        update.update_id,
        escape(&update.author),
        escape(&update.text)
    ));
    if let Some(referral) = &update.referral {
        out.push_str(&format!(
            "<blockquote class=\"referral\" id=\"update-{}\">In reply to <span class=\"author\">{}</span>: {}</blockquote>\n",
            referral.update_id,
            escape(&referral.author),
            escape(&referral.text)
        ));
    }
    out.push_str("</li>\n");
}

/// Atom document for one feed. `updates` are expected newest first.
pub fn render_atom(feed: &Feed, updates: &[Update], base_url: &str) -> String {
    let feed_url = format!("{base_url}/feeds/{}", feed.feed_id);
    let updated = updates
        .iter()
        .map(|update| update.created_at)
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<feed xmlns=\"http://www.w3.org/2005/Atom\">\n");
    out.push_str(&format!("  <id>{}</id>\n", escape(&feed_url)));
    out.push_str(&format!("  <title>{}</title>\n", escape(&feed.title)));
    out.push_str(&format!("  <updated>{}</updated>\n", atom_timestamp(updated)));
    out.push_str(&format!(
        "  <link rel=\"self\" href=\"{}.atom\"/>\n",
        escape(&feed_url)
    ));
    for update in updates {
        out.push_str("  <entry>\n");
        out.push_str(&format!(
            "    <id>{}/updates/{}</id>\n",
            escape(base_url),
            update.update_id
        ));
        out.push_str(&format!("    <title>{}</title>\n", escape(&update.text)));
        out.push_str(&format!(
            "    <content type=\"text\">{}</content>\n",
            escape(&update.text)
        ));
        out.push_str(&format!(
            "    <author><name>{}</name></author>\n",
            escape(&update.author)
        ));
        out.push_str(&format!(
            "    <updated>{}</updated>\n",
            atom_timestamp(update.created_at)
        ));
        out.push_str("  </entry>\n");
    }
    out.push_str("</feed>\n");
    out
}

fn atom_timestamp(unix_millis: i64) -> String {
    DateTime::from_timestamp_millis(unix_millis)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Escapes the five characters that are special in both HTML and XML.
pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
