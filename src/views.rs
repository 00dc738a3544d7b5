// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Server-rendered HTML pages for the browser side of authentication.

use crate::models::User;
use crate::time_utils::format_unix_secs;
use axum::response::Html;

/// Escape text for use in HTML content and double-quoted attributes.
pub fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<style>
body {{ font-family: system-ui, sans-serif; max-width: 28rem; margin: 3rem auto; padding: 0 1rem; }}
label {{ display: block; margin-top: 1rem; }}
input {{ width: 100%; padding: .4rem; box-sizing: border-box; }}
button {{ margin-top: 1.2rem; padding: .5rem 1rem; }}
.error {{ color: #b00020; }}
.notice {{ color: #1b5e20; }}
code {{ font-size: 1.2rem; letter-spacing: .1rem; }}
</style>
</head>
<body>
<h1>{title}</h1>
{body}
</body>
</html>"#,
        title = html_escape(title),
    ))
}

fn error_line(error: Option<&str>) -> String {
    error
        .map(|e| format!(r#"<p class="error" role="alert">{}</p>"#, html_escape(e)))
        .unwrap_or_default()
}

fn csrf_field(csrf_token: &str) -> String {
    format!(
        r#"<input type="hidden" name="csrf_token" value="{}">"#,
        html_escape(csrf_token)
    )
}

pub fn login_page(
    csrf_token: &str,
    email: &str,
    next: Option<&str>,
    error: Option<&str>,
) -> Html<String> {
    let next_field = next
        .map(|n| format!(r#"<input type="hidden" name="next" value="{}">"#, html_escape(n)))
        .unwrap_or_default();
    let register_link = match next {
        Some(n) => format!("/auth/register?next={}", urlencoding::encode(n)),
        None => "/auth/register".to_string(),
    };

    page(
        "Log in",
        &format!(
            r#"{error}
<form method="post" action="/auth/login">
{csrf}{next_field}
<label>Email <input type="email" name="email" value="{email}" required autofocus></label>
<label>Password <input type="password" name="password" required></label>
<button type="submit">Log in</button>
</form>
<p>No account? <a href="{register_link}">Register</a></p>"#,
            error = error_line(error),
            csrf = csrf_field(csrf_token),
            email = html_escape(email),
            register_link = html_escape(&register_link),
        ),
    )
}

pub fn register_page(
    csrf_token: &str,
    email: &str,
    username: &str,
    next: Option<&str>,
    error: Option<&str>,
) -> Html<String> {
    let next_field = next
        .map(|n| format!(r#"<input type="hidden" name="next" value="{}">"#, html_escape(n)))
        .unwrap_or_default();

    page(
        "Register",
        &format!(
            r#"{error}
<form method="post" action="/auth/register">
{csrf}{next_field}
<label>Email <input type="email" name="email" value="{email}" required autofocus></label>
<label>Username <input type="text" name="username" value="{username}" required
  minlength="3" maxlength="20" pattern="[A-Za-z0-9_\-]+"></label>
<label>Password <input type="password" name="password" required minlength="8" maxlength="128"></label>
<button type="submit">Create account</button>
</form>
<p>Already registered? <a href="/auth/login">Log in</a></p>"#,
            error = error_line(error),
            csrf = csrf_field(csrf_token),
            email = html_escape(email),
            username = html_escape(username),
        ),
    )
}

pub fn device_confirm_page(
    csrf_token: &str,
    user: &User,
    code: &str,
    error: Option<&str>,
) -> Html<String> {
    let who = user.username.as_deref().unwrap_or(&user.email);
    page(
        "Link a device",
        &format!(
            r#"{error}
<p>Logged in as <strong>{who}</strong>. Enter the code shown by your device.
Only continue if you started this from a device you control.</p>
<form method="post" action="/auth/device/confirm">
{csrf}
<label>Code <input type="text" name="user_code" value="{code}" autocomplete="off"
  autocapitalize="characters" spellcheck="false" placeholder="XXXX-XXXX" autofocus></label>
<button type="submit">Link device</button>
</form>"#,
            error = error_line(error),
            who = html_escape(who),
            csrf = csrf_field(csrf_token),
            code = html_escape(code),
        ),
    )
}

pub fn device_success_page() -> Html<String> {
    page(
        "Device linked",
        "<p>Your device is now linked. You can close this window and return to it.</p>",
    )
}

pub fn settings_page(
    csrf_token: &str,
    user: &User,
    token_max_age_secs: i64,
    now: i64,
    notice: Option<&str>,
) -> Html<String> {
    let notice = notice
        .map(|n| format!(r#"<p class="notice">{}</p>"#, html_escape(n)))
        .unwrap_or_default();

    let token_section = match (&user.api_token, user.api_token_issued_at) {
        (Some(token), Some(issued_at)) => {
            let state = if user.api_token_is_fresh(now, token_max_age_secs) {
                format!(
                    "expires {}",
                    html_escape(&format_unix_secs(issued_at + token_max_age_secs))
                )
            } else {
                "<strong>expired</strong>, regenerate it to keep syncing".to_string()
            };
            format!(
                r#"<p>API token: <code>{token}</code></p>
<p>Issued {issued}, {state}.</p>"#,
                token = html_escape(token),
                issued = html_escape(&format_unix_secs(issued_at)),
            )
        }
        _ => "<p>You have no API token yet.</p>".to_string(),
    };

    page(
        "Settings",
        &format!(
            r#"{notice}
<p>Logged in as <strong>{who}</strong> ({email}).</p>
{token_section}
<form method="post" action="/settings/token">
{csrf}
<button type="submit">Regenerate API token</button>
</form>
<p>Regenerating immediately invalidates the old token on every linked device.</p>
<form method="post" action="/auth/logout">
<button type="submit">Log out</button>
</form>"#,
            who = html_escape(user.username.as_deref().unwrap_or("")),
            email = html_escape(&user.email),
            csrf = csrf_field(csrf_token),
        ),
    )
}
