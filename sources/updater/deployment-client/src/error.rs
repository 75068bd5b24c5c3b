use snafu::Snafu;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("failed to parse URL '{}': {}", url, source))]
    UrlParse { url: String, source: url::ParseError },

    #[snafu(display(
        "conflicting proxy configuration: '{}' set alongside '{}'",
        a,
        b
    ))]
    ConflictingProxyConfig { a: String, b: String },

    #[snafu(display("failed to build HTTP client: {}", source))]
    BuildClient { source: reqwest::Error },

    #[snafu(display("request to '{}' failed: {}", url, source))]
    Request { url: String, source: reqwest::Error },

    #[snafu(display("deployment was aborted by the server (HTTP 409)"))]
    DeploymentAborted,

    #[snafu(display("server returned unexpected status {} for '{}'", status, url))]
    UnexpectedStatus { url: String, status: u16 },

    #[snafu(display("received two consecutive 401s from the server; giving up re-authenticating"))]
    ReauthFailed,

    #[snafu(display("exceeded maximum retry count at the maximum backoff interval"))]
    MaxRetriesExceeded,

    #[snafu(display("failed to serialize request body: {}", source))]
    Serialize { source: serde_json::Error },
}
