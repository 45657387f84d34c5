//! HTML page shells
//!
//! Bare documents for each console route. They exist so the gate has real
//! pages to protect and so `from` round-trips through the login form; the
//! member screens themselves are driven through the JSON endpoints.
//! Every value taken from the request is HTML-escaped.

use axum::extract::{Path, Query};
use axum::response::{Html, Redirect};
use serde::Deserialize;

use crate::gate::{DEFAULT_LANDING, safe_redirect};

#[derive(Debug, Deserialize)]
pub struct LoginParams {
    pub from: Option<String>,
}

fn document(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!doctype html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{title} | Member Console</title>\n</head>\n<body>\n{body}\n</body>\n</html>\n",
        title = html_escape::encode_text(title),
    ))
}

pub async fn root() -> Redirect {
    Redirect::temporary(DEFAULT_LANDING)
}

/// Login form. The hidden `from` field holds the already-sanitized
/// destination, never the raw query value.
pub async fn login_page(Query(params): Query<LoginParams>) -> Html<String> {
    let target = safe_redirect(params.from.as_deref());
    let target = html_escape::encode_double_quoted_attribute(&target);
    document(
        "Sign in",
        &format!(
            r#"<main>
<h1>Member Console</h1>
<form id="login" method="post" action="/api/auth/login">
<label>Username <input name="username" autocomplete="username" required></label>
<label>Password <input name="password" type="password" autocomplete="current-password" required></label>
<input type="hidden" name="from" value="{target}">
<button type="submit">Sign in</button>
<p id="error" role="alert" hidden></p>
</form>
<script>
document.getElementById("login").addEventListener("submit", async (event) => {{
  event.preventDefault();
  const form = event.target;
  const res = await fetch("/api/auth/login", {{
    method: "POST",
    headers: {{ "Content-Type": "application/json" }},
    body: JSON.stringify({{ username: form.username.value, password: form.password.value }}),
  }});
  if (res.ok) {{ window.location.assign(form.from.value); return; }}
  const body = await res.json().catch(() => ({{}}));
  const error = document.getElementById("error");
  error.textContent = body.message || "Login failed.";
  error.hidden = false;
}});
</script>
</main>"#
        ),
    )
}

pub async fn member_list_page() -> Html<String> {
    document(
        "Members",
        r#"<main data-page="member-list">
<h1>Members</h1>
<a href="/members/new">New member</a>
<a href="/api/members/export" download>Export to Excel</a>
</main>"#,
    )
}

pub async fn new_member_page() -> Html<String> {
    document(
        "New member",
        r#"<main data-page="member-new"><h1>New member</h1></main>"#,
    )
}

pub async fn member_detail_page(Path(id): Path<String>) -> Html<String> {
    let text = html_escape::encode_text(&id);
    let attr = html_escape::encode_double_quoted_attribute(&id);
    let qr_href = format!("/api/members/{}/qr", encode_segment(&id));
    let qr_href = html_escape::encode_double_quoted_attribute(&qr_href);
    document(
        "Member",
        &format!(
            r#"<main data-page="member-detail" data-member-id="{attr}">
<h1>Member {text}</h1>
<img src="{qr_href}" width="160" height="160" alt="QR code">
<a href="{qr_href}" download>Download QR</a>
</main>"#
        ),
    )
}

pub async fn edit_member_page(Path(id): Path<String>) -> Html<String> {
    let text = html_escape::encode_text(&id);
    let attr = html_escape::encode_double_quoted_attribute(&id);
    document(
        "Edit member",
        &format!(
            r#"<main data-page="member-edit" data-member-id="{attr}"><h1>Edit member {text}</h1></main>"#
        ),
    )
}

/// Percent-encode one path segment.
fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
