use std::fmt;
use std::sync::OnceLock;

use anyhow::{Result, bail};
use regex::Regex;
use tracing::debug;

/// Sent on every object-model request so forms-based authentication stays
/// out of the way.
pub const FORMS_AUTH_HEADER: &str = "X-FORMS_BASED_AUTH_ACCEPTED";
pub const FORMS_AUTH_VALUE: &str = "f";

static ONLINE_RE: OnceLock<Regex> = OnceLock::new();

fn online_re() -> &'static Regex {
    ONLINE_RE.get_or_init(|| Regex::new(r"(?i)https://[-a-z0-9]+\.sharepoint\.com").unwrap())
}

/// Whether `url` mentions a SharePoint Online tenant address anywhere.
pub fn is_sharepoint_online(url: &str) -> bool {
    online_re().is_match(url)
}

/// Rewrite an `https://` prefix to `http://`. On-premises endpoints are
/// addressed over plain HTTP.
pub fn downgrade_to_http(url: &str) -> String {
    match url.get(..8) {
        Some(scheme) if scheme.eq_ignore_ascii_case("https://") => format!("http://{}", &url[8..]),
        _ => url.to_string(),
    }
}

#[derive(Clone)]
pub struct NetworkCredential {
    pub domain: String,
    pub username: String,
    pub password: String,
}

impl NetworkCredential {
    /// `DOMAIN\user`, unless the username already carries a domain.
    pub fn qualified_username(&self) -> String {
        if self.domain.is_empty() || self.username.contains('\\') {
            self.username.clone()
        } else {
            format!("{}\\{}", self.domain, self.username)
        }
    }
}

impl fmt::Debug for NetworkCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkCredential")
            .field("domain", &self.domain)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct ClaimsCredential {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ClaimsCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimsCredential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Credential used for every object-model session of a run.
#[derive(Debug, Clone)]
pub enum Credentials {
    Network(NetworkCredential),
    Claims(ClaimsCredential),
}

impl Credentials {
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Claims(_) => "claims",
        }
    }

    pub fn password(&self) -> &str {
        match self {
            Self::Network(credential) => &credential.password,
            Self::Claims(credential) => &credential.password,
        }
    }
}

/// Pick claims credentials for SharePoint Online and network credentials for
/// everything else. A missing password is asked for through `prompt`, which
/// receives the username.
pub fn select_credentials<P>(
    server_url: &str,
    domain: &str,
    username: &str,
    password: Option<String>,
    prompt: P,
) -> Result<Credentials>
where
    P: FnOnce(&str) -> Result<String>,
{
    if username.trim().is_empty() {
        bail!("a username is required to authenticate against {server_url}");
    }
    let password = match password {
        Some(password) => password,
        None => prompt(username)?,
    };

    let credentials = if is_sharepoint_online(server_url) {
        Credentials::Claims(ClaimsCredential {
            username: username.to_string(),
            password,
        })
    } else {
        Credentials::Network(NetworkCredential {
            domain: domain.to_string(),
            username: username.to_string(),
            password,
        })
    };
    debug!(scheme = credentials.scheme(), server_url, "selected credentials");
    Ok(credentials)
}
