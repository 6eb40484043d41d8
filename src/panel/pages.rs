//! Built-in HTML pages

use std::time::Duration;

pub const BAD_CREDENTIALS_MESSAGE: &str = "Wrong username or password.";

pub const RATE_LIMITED_MESSAGE: &str = "Too many failed attempts. Try again in a minute.";

const STYLE: &str = "body{font-family:Arial;text-align:center;margin-top:50px;background:#f5f5f5}\
.login-container{background:#fff;padding:40px;border-radius:10px;box-shadow:0 2px 10px rgba(0,0,0,.1);max-width:300px;margin:0 auto}\
.info{color:#666;font-size:14px;margin-bottom:20px;padding:10px;background:#f8f9fa;border-radius:5px}\
.error{color:red;margin:20px 0}\
input,button{width:100%;padding:12px;margin:10px 0;border:1px solid #ddd;border-radius:5px;box-sizing:border-box}\
button{background:#007bff;color:#fff;border:none;cursor:pointer;font-size:16px}\
button:hover{background:#0056b3}";

/// Human-readable idle timeout, e.g. `30 minutes`
pub fn describe_timeout(timeout: Duration) -> String {
    let secs = timeout.as_secs();
    let (n, unit) = if secs >= 3600 && secs % 3600 == 0 {
        (secs / 3600, "hour")
    } else if secs >= 60 && secs % 60 == 0 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };
    if n == 1 {
        format!("1 {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

/// Login form, optionally with an error banner instead of the session hint
pub fn login_page(error: Option<&str>, session_timeout: Duration) -> String {
    let notice = match error {
        Some(message) => format!(r#"<div class="error">{message}</div>"#),
        None => format!(
            r#"<div class="info">Sessions expire after {} of inactivity. <b>Closing the browser signs you out.</b></div>"#,
            describe_timeout(session_timeout)
        ),
    };
    let title = if error.is_some() {
        "Login failed"
    } else {
        "Control Panel - Login"
    };

    format!(
        r#"<!DOCTYPE html><html><head><meta charset="utf-8"><title>{title}</title>
<style>{STYLE}</style></head>
<body><div class="login-container"><h2>Control Panel</h2>{notice}
<form method="post" action="/login"><input name="username" placeholder="Username" autocomplete="username" required><input type="password" name="password" placeholder="Password" autocomplete="current-password" required><button type="submit">Log in</button></form></div></body></html>"#
    )
}

/// Served at `/` when the static root has no `index.html`
pub const FALLBACK_INDEX: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Control Panel</title>
    <style>
        body { font-family: Arial, sans-serif; background: #f5f5f5; margin: 0; padding: 2rem; }
        .panel { background: #fff; max-width: 480px; margin: 0 auto; padding: 2rem; border-radius: 10px; }
        h1 { margin-top: 0; }
        .row { display: flex; justify-content: space-between; align-items: center; margin: 0.75rem 0; }
        button { padding: 0.4rem 0.9rem; margin-left: 0.25rem; cursor: pointer; }
        pre { background: #f8f9fa; padding: 1rem; white-space: pre-wrap; min-height: 3rem; }
    </style>
</head>
<body>
    <div class="panel">
        <h1>Control Panel</h1>
        <div id="actions"></div>
        <pre id="output"></pre>
        <button onclick="fetch('/logout',{method:'POST',headers:{'Accept':'application/json'}}).then(r=>r.json()).then(d=>location.href=d.redirect)">Log out</button>
    </div>
    <script>
        const apis = ['nas_limit', 'network_limit', 'clash_limit', 'ban_xiaomi', 'website_limit'];
        const out = document.getElementById('output');
        const actions = document.getElementById('actions');
        for (const api of apis) {
            const row = document.createElement('div');
            row.className = 'row';
            row.innerHTML = `<span>${api}</span><span></span>`;
            for (const action of ['enable', 'disable']) {
                const b = document.createElement('button');
                b.textContent = action;
                b.onclick = async () => {
                    out.textContent = 'Running...';
                    const r = await fetch(`/api/${api}?action=${action}`);
                    out.textContent = `[${r.status}]\n` + await r.text();
                };
                row.lastChild.appendChild(b);
            }
            actions.appendChild(row);
        }
    </script>
</body>
</html>"#;
