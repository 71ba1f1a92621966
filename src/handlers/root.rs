//! Root endpoint handler for the landing page.

use axum::{
    extract::State,
    response::{Html, IntoResponse},
};
use std::fmt::Write as FmtWrite;
use tracing::{debug, instrument};

use crate::handlers::health::FOOTER_TEXT;
use crate::state::SharedState;

/// Handler for the root `/` endpoint.
#[instrument(skip(state))]
pub async fn root_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing / request");

    let version = env!("CARGO_PKG_VERSION");

    let uptime_secs = state.start_time.elapsed().as_secs();
    let hours = uptime_secs / 3600;
    let minutes = (uptime_secs % 3600) / 60;
    let seconds = uptime_secs % 60;
    let uptime_str = format!("{}h {}m {}s", hours, minutes, seconds);

    let mut endpoints = String::new();
    writeln!(
        endpoints,
        r#"        <li><a href="/metrics">/metrics</a> - Prometheus metrics</li>"#
    )
    .ok();
    if state.config.health_enabled() {
        writeln!(
            endpoints,
            r#"        <li><a href="/health">/health</a> - collector health</li>"#
        )
        .ok();
    }

    let mut collectors = String::new();
    for spec in state.config.collector_specs() {
        let status = match state.health.collector_by_id(&spec.id) {
            Some(stats) => match stats.last_ok() {
                Some(true) => "ok",
                Some(false) => "failing",
                None => "pending",
            },
            None => "not running",
        };
        writeln!(
            collectors,
            "        <li><code>{}</code> - {}</li>",
            escape_html(&spec.id),
            status
        )
        .ok();
    }

    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>dssg-monitor</title>
    <style>
        body {{ font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; margin: 20px; background: #f5f5f5; }}
        .container {{ max-width: 800px; margin: 0 auto; background: white; padding: 30px; border-radius: 8px; }}
        h1 {{ color: #333; border-bottom: 3px solid #007bff; padding-bottom: 10px; }}
        footer {{ color: #888; font-size: 0.85em; margin-top: 30px; }}
    </style>
</head>
<body>
<div class="container">
    <h1>dssg-monitor</h1>
    <p>Version {version} | Uptime {uptime_str} | Ticks {ticks}</p>
    <h2>Endpoints</h2>
    <ul>
{endpoints}    </ul>
    <h2>Collectors</h2>
    <ul>
{collectors}    </ul>
    <footer>{FOOTER_TEXT}</footer>
</div>
</body>
</html>
"#,
        ticks = state.health.tick_count(),
    );

    Html(html)
}

/// Escapes text for use inside HTML element content.
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("system_usage"), "system_usage");
        assert_eq!(
            escape_html("<script>alert('x')</script>&\""),
            "&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;&amp;&quot;"
        );
    }
}
