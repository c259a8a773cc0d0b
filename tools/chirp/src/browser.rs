//! A scripted browser over [`App`]: keeps a session, follows redirects,
//! carries flashes to the next page and fills in the share form.

use crate::app::{encode_form, App, Request, Response};
use crate::errors::ChirpError;
use crate::runtime::{HttpRequest, HttpResponse, HttpTransport};
use crate::types::{User, UserId};
use crate::views::{PageView, SHARE_BUTTON_ID, SHARE_BUTTON_LABEL, TEXT_FIELD, TEXT_FIELD_ID};

const MAX_REDIRECTS: usize = 5;

/// Transport for plain navigation. Page loads never call out, so anything
/// reaching it is a bug in the page being loaded.
struct NoNetwork;

impl HttpTransport for NoNetwork {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, ChirpError> {
        Err(ChirpError::Http(format!(
            "unexpected outbound {} {} during navigation",
            request.method, request.uri
        )))
    }
}

pub struct Browser<'a> {
    app: App<'a>,
    session: Option<UserId>,
    current_path: String,
    last: Option<Response>,
    fields: Vec<(String, String)>,
}

impl<'a> Browser<'a> {
    pub fn new(app: App<'a>) -> Self {
        Self {
            app,
            session: None,
            current_path: String::new(),
            last: None,
            fields: Vec::new(),
        }
    }

    /// Authentication is out of scope; signing in just binds the session.
    pub fn log_in(&mut self, user: &User) {
        self.session = Some(user.user_id);
    }

    pub fn log_out(&mut self) {
        self.session = None;
    }

    pub fn visit(&mut self, target: &str) -> Result<&Response, ChirpError> {
        let request = Request::get(target).with_session(self.session);
        self.dispatch(request, &NoNetwork)
    }

    /// Fill a share-form field by name (`text`) or element id
    /// (`update-textarea`).
    pub fn fill_in(&mut self, field: &str, value: &str) -> Result<(), ChirpError> {
        self.share_form_present()?;
        if field != TEXT_FIELD && field != TEXT_FIELD_ID {
            return Err(ChirpError::NotFound(format!(
                "field `{field}` on {}",
                self.current_path
            )));
        }
        self.fields.retain(|(name, _)| name != TEXT_FIELD);
        self.fields.push((TEXT_FIELD.to_string(), value.to_string()));
        Ok(())
    }

    /// Submit the share form by button label (`Share`) or id
    /// (`update-button`). Outbound calls the post makes go through `http`.
    pub fn click_button(
        &mut self,
        label: &str,
        http: &dyn HttpTransport,
    ) -> Result<&Response, ChirpError> {
        let form = self.share_form_present()?;
        if label != SHARE_BUTTON_LABEL && label != SHARE_BUTTON_ID {
            return Err(ChirpError::NotFound(format!(
                "button `{label}` on {}",
                self.current_path
            )));
        }
        let action = form.action.clone();
        let return_to = form.return_to.clone();
        let mut fields = std::mem::take(&mut self.fields);
        fields.push(("return_to".to_string(), return_to));
        let pairs = fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect::<Vec<_>>();
        let request = Request::post(&action, &encode_form(&pairs)).with_session(self.session);
        self.dispatch(request, http)
    }

    /// Follow a pagination link by element id or visible label.
    pub fn click_link(&mut self, id_or_label: &str) -> Result<&Response, ChirpError> {
        let href = self
            .page()
            .and_then(|view| view.link(id_or_label))
            .map(|link| link.href.clone())
            .ok_or_else(|| {
                ChirpError::NotFound(format!("link `{id_or_label}` on {}", self.current_path))
            })?;
        self.visit(&href)
    }

    pub fn page(&self) -> Option<&PageView> {
        self.last.as_ref().and_then(|response| response.view.as_ref())
    }

    pub fn response(&self) -> Option<&Response> {
        self.last.as_ref()
    }

    pub fn body(&self) -> &str {
        self.last
            .as_ref()
            .map(|response| response.body.as_str())
            .unwrap_or_default()
    }

    /// Path and query of the page currently shown.
    pub fn current_path(&self) -> &str {
        &self.current_path
    }

    pub fn current_url(&self) -> String {
        format!("{}{}", self.app.base_url(), self.current_path)
    }

    fn share_form_present(&self) -> Result<&crate::views::ShareForm, ChirpError> {
        self.page()
            .and_then(|view| view.share_form.as_ref())
            .ok_or_else(|| ChirpError::NotFound(format!("share form on {}", self.current_path)))
    }

    fn dispatch(
        &mut self,
        request: Request,
        http: &dyn HttpTransport,
    ) -> Result<&Response, ChirpError> {
        let mut request = request;
        let mut hops = 0;
        loop {
            let response = self.app.handle(&request, http)?;
            if !response.is_redirect() {
                self.current_path = if request.query.is_empty() {
                    request.path
                } else {
                    format!("{}?{}", request.path, request.query)
                };
                self.fields.clear();
                return Ok(self.last.insert(response));
            }
            hops += 1;
            if hops > MAX_REDIRECTS {
                return Err(ChirpError::Http(format!(
                    "more than {MAX_REDIRECTS} redirects from {}",
                    request.path
                )));
            }
            let location = response.location.unwrap_or_default();
            request = Request::get(&location)
                .with_session(self.session)
                .with_flash(response.flash);
        }
    }
}
