//! Streaming scan of login-page markup for the anti-forgery token and
//! the assertion form. Only `<form>` and `<input>` attributes matter;
//! everything else in the page is skipped without building a DOM.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// A parsed `<form>`: submit target, method and all `<input>` name/value
/// pairs seen in the page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginForm {
    pub action: String,
    pub method: String,
    pub fields: Vec<(String, String)>,
}

impl LoginForm {
    pub fn is_empty(&self) -> bool {
        self.action.is_empty() && self.fields.is_empty()
    }
}

/// Value of the `csrfmiddlewaretoken` input, if the page carries one.
pub fn extract_csrf_token(body: &str) -> Option<String> {
    let mut token = None;
    scan(body, |name, element| {
        if name == b"input" && attr(element, b"name").as_deref() == Some("csrfmiddlewaretoken") {
            token = attr(element, b"value");
            return false;
        }
        true
    });
    token
}

/// First `<form>` target/method plus every named `<input>` in the page.
pub fn extract_login_form(body: &str) -> LoginForm {
    let mut form = LoginForm::default();
    scan(body, |name, element| {
        match name {
            b"form" if form.action.is_empty() => {
                form.action = attr(element, b"action").unwrap_or_default();
                form.method = attr(element, b"method").unwrap_or_default();
            }
            b"input" => {
                if let Some(name) = attr(element, b"name") {
                    form.fields
                        .push((name, attr(element, b"value").unwrap_or_default()));
                }
            }
            _ => {}
        }
        true
    });
    form
}

/// Walks start/empty elements, feeding each to `visit` until it returns
/// false. Markup in the wild is not well-formed XML, so parse errors end
/// the scan instead of failing it.
fn scan(body: &str, mut visit: impl FnMut(&[u8], &BytesStart<'_>) -> bool) {
    let mut reader = Reader::from_str(body);
    reader.config_mut().check_end_names = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) | Ok(Event::Empty(element)) => {
                let name = element.name().as_ref().to_ascii_lowercase();
                if !visit(&name, &element) {
                    return;
                }
            }
            Ok(Event::Eof) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

fn attr(element: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    element.attributes().flatten().find_map(|a| {
        (a.key.as_ref() == key).then(|| String::from_utf8_lossy(&a.value).into_owned())
    })
}
