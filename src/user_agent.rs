//! User-Agent string shared by probe and transfer requests.

/// Project URL advertised in the User-Agent.
const PROJECT_UA_URL: &str = "https://github.com/fierce/fetchjob";

/// Default User-Agent for every request the core issues.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("fetchjob/{version} (+{PROJECT_UA_URL})")
}
