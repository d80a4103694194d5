//! NATS subject hierarchy.
//!
//! All bridge subjects are prefixed with `hostbridge.` and scoped by the
//! host application id, so several hosts can share one NATS cluster.

/// Root prefix for all bridge NATS subjects.
pub const PREFIX: &str = "hostbridge";

/// Build the subject the engine publishes requests on. Engine → Host.
///
/// `hostbridge.<app_id>.request`
#[must_use]
pub fn request(app_id: &str) -> String {
    format!("{PREFIX}.{}.request", sanitize(app_id))
}

/// Build the subject the host publishes responses and events on.
/// Host → Engine.
///
/// `hostbridge.<app_id>.inbound`
#[must_use]
pub fn inbound(app_id: &str) -> String {
    format!("{PREFIX}.{}.inbound", sanitize(app_id))
}

/// NATS tokens may not contain separators or wildcards.
fn sanitize(app_id: &str) -> String {
    let token: String = app_id
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' | ' ' => '_',
            other => other.to_ascii_lowercase(),
        })
        .collect();
    if token.is_empty() {
        "default".to_string()
    } else {
        token
    }
}
