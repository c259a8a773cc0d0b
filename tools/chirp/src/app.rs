//! In-process request router for the microblog surface the acceptance
//! scenarios drive: world, home and replies listings, update detail pages,
//! per-feed Atom documents and posting new updates.

use serde_json::json;

use crate::config::AppConfig;
use crate::errors::ChirpError;
use crate::feed_store::{FeedStore, NewUpdate};
use crate::logging::append_run_log;
use crate::pagination::Cursor;
use crate::runtime::{HttpRequest, HttpResponse, HttpTransport};
use crate::types::{FeedId, UpdateId, UpdateScope, User, UserId};
use crate::views::{render_atom, render_html, Flash, PageView, ShareForm, UpdateView, TEXT_FIELD};

pub const STATUS_TOO_SHORT: &str = "Your status is too short!";
pub const STATUS_TOO_LONG: &str = "Your status is too long!";
pub const UPDATE_CREATED: &str = "Update created.";

/// Routes a successful post may return to.
const RETURN_ROUTES: [&str; 3] = ["/", "/updates", "/replies"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: String,
    pub form: Vec<(String, String)>,
    pub session: Option<UserId>,
    /// Flash carried over from the previous response.
    pub flash: Option<Flash>,
}

impl Request {
    pub fn get(target: &str) -> Self {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        Self {
            method: "GET".to_string(),
            path: path.to_string(),
            query: query.to_string(),
            form: Vec::new(),
            session: None,
            flash: None,
        }
    }

    /// A form submission; `body` is `application/x-www-form-urlencoded`.
    pub fn post(path: &str, body: &str) -> Self {
        Self {
            method: "POST".to_string(),
            form: parse_form(body),
            ..Self::get(path)
        }
    }

    pub fn with_session(mut self, session: Option<UserId>) -> Self {
        self.session = session;
        self
    }

    pub fn with_flash(mut self, flash: Option<Flash>) -> Self {
        self.flash = flash;
        self
    }

    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub location: Option<String>,
    pub body: String,
    pub view: Option<PageView>,
    /// Flash to show on the next page.
    pub flash: Option<Flash>,
}

impl Response {
    pub fn page(view: PageView) -> Self {
        Self {
            status: 200,
            content_type: "text/html; charset=utf-8",
            location: None,
            body: render_html(&view),
            view: Some(view),
            flash: None,
        }
    }

    pub fn atom(body: String) -> Self {
        Self {
            status: 200,
            content_type: "application/atom+xml",
            location: None,
            body,
            view: None,
            flash: None,
        }
    }

    pub fn see_other(location: &str, flash: Option<Flash>) -> Self {
        Self {
            status: 303,
            content_type: "text/plain; charset=utf-8",
            location: Some(location.to_string()),
            body: String::new(),
            view: None,
            flash,
        }
    }

    pub fn not_found(what: &str) -> Self {
        Self {
            status: 404,
            content_type: "text/plain; charset=utf-8",
            location: None,
            body: format!("{what} not found"),
            view: None,
            flash: None,
        }
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status) && self.location.is_some()
    }
}

pub struct App<'a> {
    store: &'a FeedStore,
    config: &'a AppConfig,
}

impl<'a> App<'a> {
    pub fn new(store: &'a FeedStore, config: &'a AppConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &FeedStore {
        self.store
    }

    pub fn base_url(&self) -> &str {
        &self.config.site.base_url
    }

    /// Outbound calls made while handling `request` (the hub ping) go
    /// through `http`.
    pub fn handle(&self, request: &Request, http: &dyn HttpTransport) -> Result<Response, ChirpError> {
        append_run_log(
            "debug",
            "app.request.received",
            json!({
                "method": request.method,
                "path": request.path,
                "query": request.query,
                "signed_in": request.session.is_some(),
            }),
        );
        let response = match (request.method.as_str(), request.path.as_str()) {
            ("GET", "/") => self.home(request)?,
            ("GET", "/updates") => self.world(request)?,
            ("GET", "/replies") => self.replies(request)?,
            ("POST", "/updates") => self.publish(request, http)?,
            ("GET", path) => {
                if let Some(raw) = path
                    .strip_prefix("/feeds/")
                    .and_then(|rest| rest.strip_suffix(".atom"))
                {
                    match raw.parse::<i64>() {
                        Ok(id) => self.feed_atom(FeedId(id))?,
                        Err(_) => Response::not_found("feed"),
                    }
                } else if let Some(raw) = path.strip_prefix("/updates/") {
                    match raw.parse::<i64>() {
                        Ok(id) => self.update_detail(request, UpdateId(id))?,
                        Err(_) => Response::not_found("update"),
                    }
                } else {
                    Response::not_found("page")
                }
            }
            _ => Response::not_found("route"),
        };
        append_run_log(
            "debug",
            "app.request.completed",
            json!({
                "method": request.method,
                "path": request.path,
                "status": response.status,
                "location": response.location,
            }),
        );
        Ok(response)
    }

    fn current_user(&self, request: &Request) -> Result<Option<User>, ChirpError> {
        match request.session {
            Some(user_id) => self.store.get_user(user_id),
            None => Ok(None),
        }
    }

    fn share_form(&self, user: &User, return_to: &str) -> Result<ShareForm, ChirpError> {
        let mut post_to = self
            .store
            .authorizations_for(user.user_id)?
            .into_iter()
            .map(|authorization| authorization.provider)
            .filter(|provider| provider.supports_cross_post())
            .collect::<Vec<_>>();
        post_to.sort();
        post_to.dedup();
        Ok(ShareForm {
            action: "/updates".to_string(),
            return_to: return_to.to_string(),
            post_to,
        })
    }

    fn listing(
        &self,
        request: &Request,
        user: Option<&User>,
        title: &str,
        scope: UpdateScope,
    ) -> Result<Response, ChirpError> {
        let cursor = Cursor::from_query(&request.query)?;
        let page = self
            .store
            .list_feed(&scope, cursor, &self.config.pagination)?;
        let mut view = PageView::new(title, request.path.clone()).with_page(&page);
        view.flash = request.flash.clone();
        if let Some(user) = user {
            view.share_form = Some(self.share_form(user, &request.path)?);
        }
        Ok(Response::page(view))
    }

    fn world(&self, request: &Request) -> Result<Response, ChirpError> {
        let user = self.current_user(request)?;
        self.listing(request, user.as_ref(), "World", UpdateScope::World)
    }

    fn home(&self, request: &Request) -> Result<Response, ChirpError> {
        let Some(user) = self.current_user(request)? else {
            return Ok(Response::see_other("/updates", request.flash.clone()));
        };
        let scope = UpdateScope::Feed(user.feed_id);
        self.listing(request, Some(&user), "Home", scope)
    }

    fn replies(&self, request: &Request) -> Result<Response, ChirpError> {
        let Some(user) = self.current_user(request)? else {
            return Ok(Response::see_other("/updates", request.flash.clone()));
        };
        let scope = UpdateScope::Mentions(user.username.clone());
        self.listing(request, Some(&user), "Replies", scope)
    }

    fn update_detail(&self, request: &Request, update_id: UpdateId) -> Result<Response, ChirpError> {
        let Some(update) = self.store.get_update(update_id)? else {
            return Ok(Response::not_found("update"));
        };
        let mut detail = UpdateView::from(&update);
        if let Some(referral_id) = update.referral_id {
            // A dangling referral is shown as a plain update.
            detail.referral = self
                .store
                .get_update(referral_id)?
                .map(|referral| Box::new(UpdateView::from(&referral)));
        }
        let mut view = PageView::new("Update", request.path.clone());
        view.flash = request.flash.clone();
        view.updates.push(detail);
        Ok(Response::page(view))
    }

    fn feed_atom(&self, feed_id: FeedId) -> Result<Response, ChirpError> {
        let Some(feed) = self.store.get_feed(feed_id)? else {
            return Ok(Response::not_found("feed"));
        };
        let page = self
            .store
            .list_feed(&UpdateScope::Feed(feed_id), None, &self.config.pagination)?;
        Ok(Response::atom(render_atom(
            &feed,
            &page.items,
            &self.config.site.base_url,
        )))
    }

    fn publish(&self, request: &Request, http: &dyn HttpTransport) -> Result<Response, ChirpError> {
        let Some(user) = self.current_user(request)? else {
            return Ok(Response::see_other("/updates", None));
        };
        let return_to = request
            .form_value("return_to")
            .filter(|route| RETURN_ROUTES.contains(route))
            .unwrap_or("/");

        let text = request.form_value(TEXT_FIELD).unwrap_or_default().trim();
        let length = text.chars().count();
        if length < self.config.updates.min_length.max(1) {
            append_run_log(
                "info",
                "app.update.rejected",
                json!({ "user_id": user.user_id.0, "reason": "too_short", "length": length }),
            );
            return Ok(Response::see_other(return_to, Some(Flash::error(STATUS_TOO_SHORT))));
        }
        if length > self.config.updates.max_length {
            append_run_log(
                "info",
                "app.update.rejected",
                json!({ "user_id": user.user_id.0, "reason": "too_long", "length": length }),
            );
            return Ok(Response::see_other(return_to, Some(Flash::error(STATUS_TOO_LONG))));
        }

        let update = self.store.insert_update(NewUpdate {
            feed_id: user.feed_id,
            author: user.username.clone(),
            text: text.to_string(),
            referral_id: None,
            created_at: None,
        })?;
        append_run_log(
            "info",
            "app.update.published",
            json!({
                "user_id": user.user_id.0,
                "update_id": update.update_id.0,
                "feed_id": update.feed_id.0,
                "return_to": return_to,
            }),
        );
        self.ping_hub(user.feed_id, http);
        Ok(Response::see_other(return_to, Some(Flash::notice(UPDATE_CREATED))))
    }

    /// Tell the hub the feed changed. Failures are logged; the post stands.
    fn ping_hub(&self, feed_id: FeedId, http: &dyn HttpTransport) {
        let topic = self.topic_url(feed_id);
        match self.notify_hub(feed_id, http) {
            Ok(response) if response.is_success() => append_run_log(
                "debug",
                "app.hub.pinged",
                json!({ "topic": topic, "status": response.status }),
            ),
            Ok(response) => append_run_log(
                "warn",
                "app.hub.ping_rejected",
                json!({ "topic": topic, "status": response.status }),
            ),
            Err(error) => append_run_log(
                "warn",
                "app.hub.ping_failed",
                json!({ "topic": topic, "error": error.to_string() }),
            ),
        }
    }

    /// Atom URL the hub is told about for `feed_id`.
    pub fn topic_url(&self, feed_id: FeedId) -> String {
        format!("{}/feeds/{feed_id}.atom", self.config.site.base_url)
    }

    /// Send the PubSubHubbub publish notification for `feed_id`.
    pub fn notify_hub(
        &self,
        feed_id: FeedId,
        http: &dyn HttpTransport,
    ) -> Result<HttpResponse, ChirpError> {
        let topic = self.topic_url(feed_id);
        let body = encode_form(&[("hub.mode", "publish"), ("hub.url", topic.as_str())]);
        http.send(HttpRequest::post_form(self.config.hub.url.clone(), body))
    }
}

pub fn encode_form(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Decodes an `application/x-www-form-urlencoded` body.
pub fn parse_form(body: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{encode_form, parse_form, App, Request, STATUS_TOO_LONG, STATUS_TOO_SHORT, UPDATE_CREATED};
    use crate::config::AppConfig;
    use crate::errors::ChirpError;
    use crate::feed_store::FeedStore;
    use crate::fixtures::{Factory, UpdateFixture, UserFixture};
    use crate::runtime::{FakeHttpTransport, HttpResponse};
    use crate::types::{Provider, UpdateScope};
    use crate::views::FlashKind;

    fn hub_ok(fake: &FakeHttpTransport) {
        fake.push_response(Ok(HttpResponse {
            status: 204,
            headers: Vec::new(),
            body: String::new(),
        }));
    }

    fn post(text: &str, return_to: &str) -> Request {
        Request::post(
            "/updates",
            &encode_form(&[("text", text), ("return_to", return_to)]),
        )
    }

    #[test]
    fn publishing_inserts_pings_hub_and_redirects_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FeedStore::open(dir.path().join("chirp.sqlite")).expect("store");
        let config = AppConfig::default();
        let app = App::new(&store, &config);
        let user = Factory::new(&store).user(UserFixture::default()).expect("user");
        let hub = FakeHttpTransport::default();
        hub_ok(&hub);

        let response = app
            .handle(&post("  Testing, testing  ", "/replies").with_session(Some(user.user_id)), &hub)
            .expect("handle");
        assert_eq!(response.status, 303);
        assert_eq!(response.location.as_deref(), Some("/replies"));
        assert_eq!(response.flash.as_ref().map(|f| f.message.as_str()), Some(UPDATE_CREATED));

        let sent = hub.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].uri, "http://pubsubhubbub.appspot.com/publish");
        assert_eq!(
            sent[0].body,
            format!(
                "hub.mode=publish&hub.url=http%3A%2F%2Flocalhost%3A9292%2Ffeeds%2F{}.atom",
                user.feed_id
            )
        );
        let page = store
            .list_feed(&UpdateScope::Feed(user.feed_id), None, &config.pagination)
            .expect("list");
        assert_eq!(page.items[0].text, "Testing, testing");
    }

    #[test]
    fn length_limits_flash_errors_without_pinging() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FeedStore::open(dir.path().join("chirp.sqlite")).expect("store");
        let config = AppConfig::default();
        let app = App::new(&store, &config);
        let user = Factory::new(&store).user(UserFixture::default()).expect("user");
        let hub = FakeHttpTransport::default();

        let short = app
            .handle(&post("   ", "/updates").with_session(Some(user.user_id)), &hub)
            .expect("short");
        let flash = short.flash.expect("flash");
        assert_eq!(flash.kind, FlashKind::Error);
        assert_eq!(flash.message, STATUS_TOO_SHORT);

        let long = app
            .handle(&post(&"x".repeat(141), "/evil").with_session(Some(user.user_id)), &hub)
            .expect("long");
        assert_eq!(long.location.as_deref(), Some("/"));
        assert_eq!(long.flash.expect("flash").message, STATUS_TOO_LONG);
        assert_eq!(hub.call_count(), 0);
        assert_eq!(store.count_updates(&UpdateScope::World).expect("count"), 0);
    }

    #[test]
    fn failed_hub_ping_does_not_fail_the_post() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FeedStore::open(dir.path().join("chirp.sqlite")).expect("store");
        let config = AppConfig::default();
        let app = App::new(&store, &config);
        let user = Factory::new(&store).user(UserFixture::default()).expect("user");
        let hub = FakeHttpTransport::default();
        hub.push_response(Err(ChirpError::Http("connection refused".to_string())));

        let response = app
            .handle(&post("Q", "/").with_session(Some(user.user_id)), &hub)
            .expect("handle");
        assert_eq!(response.location.as_deref(), Some("/"));
        assert_eq!(store.count_updates(&UpdateScope::World).expect("count"), 1);
    }

    #[test]
    fn signed_out_home_and_replies_redirect_to_world() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FeedStore::open(dir.path().join("chirp.sqlite")).expect("store");
        let config = AppConfig::default();
        let app = App::new(&store, &config);
        let hub = FakeHttpTransport::default();

        for path in ["/", "/replies"] {
            let response = app.handle(&Request::get(path), &hub).expect("handle");
            assert_eq!(response.location.as_deref(), Some("/updates"));
        }
        let world = app.handle(&Request::get("/updates"), &hub).expect("world");
        assert_eq!(world.status, 200);
        assert!(world.view.expect("view").share_form.is_none());
    }

    #[test]
    fn share_form_offers_post_to_for_social_providers_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FeedStore::open(dir.path().join("chirp.sqlite")).expect("store");
        let config = AppConfig::default();
        let app = App::new(&store, &config);
        let factory = Factory::new(&store);
        let hub = FakeHttpTransport::default();

        let twitter = factory.user_with_provider(Provider::Twitter).expect("twitter");
        let email = factory.user_with_provider(Provider::Email).expect("email");

        let page = app
            .handle(&Request::get("/updates").with_session(Some(twitter.user_id)), &hub)
            .expect("twitter page");
        assert!(page.body.contains("Post to Twitter"));
        let page = app
            .handle(&Request::get("/updates").with_session(Some(email.user_id)), &hub)
            .expect("email page");
        assert!(!page.body.contains("Post to"));
    }

    #[test]
    fn unknown_ids_and_routes_are_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FeedStore::open(dir.path().join("chirp.sqlite")).expect("store");
        let config = AppConfig::default();
        let app = App::new(&store, &config);
        let hub = FakeHttpTransport::default();
        Factory::new(&store).update(UpdateFixture::default()).expect("update");

        for path in ["/updates/999", "/updates/abc", "/feeds/999.atom", "/nowhere"] {
            let response = app.handle(&Request::get(path), &hub).expect("handle");
            assert_eq!(response.status, 404, "{path}");
        }
    }

    #[test]
    fn invalid_cursors_surface_as_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FeedStore::open(dir.path().join("chirp.sqlite")).expect("store");
        let config = AppConfig::default();
        let app = App::new(&store, &config);
        let hub = FakeHttpTransport::default();

        let err = app
            .handle(&Request::get("/updates?page=2"), &hub)
            .expect_err("beyond last page");
        assert!(matches!(err, ChirpError::InvalidCursor { page: 2, last_page: 1 }));
        let err = app
            .handle(&Request::get("/updates?page=next"), &hub)
            .expect_err("malformed");
        assert!(matches!(err, ChirpError::MalformedCursor(_)));
    }

    #[test]
    fn percent_encoded_page_numbers_are_decoded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FeedStore::open(dir.path().join("chirp.sqlite")).expect("store");
        let config = AppConfig::default();
        let app = App::new(&store, &config);
        Factory::new(&store)
            .updates(30, UpdateFixture::default())
            .expect("updates");
        let hub = FakeHttpTransport::default();

        let response = app
            .handle(&Request::get("/updates?page=%32"), &hub)
            .expect("second page");
        let view = response.view.expect("view");
        assert_eq!(view.updates.len(), 10);
        assert_eq!(view.updates[0].text, "This is update #10");
    }

    #[test]
    fn posted_form_bodies_are_decoded_before_publishing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FeedStore::open(dir.path().join("chirp.sqlite")).expect("store");
        let config = AppConfig::default();
        let app = App::new(&store, &config);
        let user = Factory::new(&store).user(UserFixture::default()).expect("user");
        let hub = FakeHttpTransport::default();
        hub_ok(&hub);

        let request = Request::post("/updates", "text=fish+%26+chips&return_to=%2Freplies")
            .with_session(Some(user.user_id));
        let response = app.handle(&request, &hub).expect("handle");
        assert_eq!(response.location.as_deref(), Some("/replies"));
        let page = store
            .list_feed(&UpdateScope::Feed(user.feed_id), None, &config.pagination)
            .expect("list");
        assert_eq!(page.items[0].text, "fish & chips");
    }

    #[test]
    fn form_encoding_round_trips_reserved_characters() {
        let body = encode_form(&[("text", "fish & chips = 5€"), ("return_to", "/")]);
        assert_eq!(
            parse_form(&body),
            vec![
                ("text".to_string(), "fish & chips = 5€".to_string()),
                ("return_to".to_string(), "/".to_string()),
            ]
        );
        assert_eq!(parse_form("text=a+b"), vec![("text".to_string(), "a b".to_string())]);
    }
}
