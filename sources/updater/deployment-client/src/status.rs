use crate::error::{self, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

/// Collaborator that can mint (or refresh) the bearer token used to authenticate requests to the
/// deployments service. A single reauth is attempted on the first 401; two in a row aborts.
pub trait Authenticator {
    fn token(&self) -> Result<String>;
    fn reauthenticate(&self) -> Result<String>;
}

#[derive(Debug, Serialize)]
pub struct StatusReport<'a> {
    pub status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub substate: Option<&'a str>,
}

/// Reports `report` to `/v1/deployments/device/deployments/<deployment_id>/status`, retrying
/// exactly once across a 401 with a freshly reauthenticated token.
pub fn report_status(
    client: &Client,
    base_url: &str,
    deployment_id: &str,
    report: &StatusReport<'_>,
    auth: &dyn Authenticator,
) -> Result<()> {
    let url = format!(
        "{base_url}/v1/deployments/device/deployments/{deployment_id}/status"
    );
    put_with_reauth(client, &url, report, auth)
}

/// Uploads deployment log text to `/v1/deployments/device/deployments/<deployment_id>/log`.
pub fn upload_log(
    client: &Client,
    base_url: &str,
    deployment_id: &str,
    log_text: &str,
    auth: &dyn Authenticator,
) -> Result<()> {
    let url = format!("{base_url}/v1/deployments/device/deployments/{deployment_id}/log");
    let body = serde_json::json!({ "messages": [{ "level": 3, "message": log_text }] });
    put_with_reauth(client, &url, &body, auth)
}

/// A deployment offered by the server in response to a next-deployment poll. Whether the update
/// will need a reboot or supports rollback is a property of the payload's module, not something
/// the server knows in advance, so those are determined during fetch rather than carried here.
/// `control_maps` carries any control maps the server is pushing into effect alongside this
/// deployment; empty on a server that has none live.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentCheckResponse {
    pub deployment_id: String,
    pub artifact_name: String,
    #[serde(default)]
    pub artifact_group: Option<String>,
    pub artifact_url: String,
    #[serde(default)]
    pub control_maps: Vec<control_map::ControlMap>,
}

/// Polls `/v1/deployments/device/deployments/next?device_type=<device_type>` for a pending
/// deployment. A 204 means nothing is pending; a 200 carries the next deployment to fetch.
pub fn check_for_update(
    client: &Client,
    base_url: &str,
    device_type: &str,
    auth: &dyn Authenticator,
) -> Result<Option<DeploymentCheckResponse>> {
    let url = format!("{base_url}/v1/deployments/device/deployments/next?device_type={device_type}");
    get_with_reauth(client, &url, auth)
}

fn get_with_reauth(
    client: &Client,
    url: &str,
    auth: &dyn Authenticator,
) -> Result<Option<DeploymentCheckResponse>> {
    let token = auth.token()?;
    match get(client, url, &token) {
        Err(error::Error::UnexpectedStatus { status: 401, .. }) => {
            let fresh = auth.reauthenticate()?;
            match get(client, url, &fresh) {
                Err(error::Error::UnexpectedStatus { status: 401, .. }) => {
                    error::ReauthFailedSnafu.fail()
                }
                other => other,
            }
        }
        other => other,
    }
}

fn get(client: &Client, url: &str, token: &str) -> Result<Option<DeploymentCheckResponse>> {
    let response = client
        .get(url)
        .bearer_auth(token)
        .send()
        .context(error::RequestSnafu {
            url: url.to_string(),
        })?;

    match response.status().as_u16() {
        204 => Ok(None),
        200 => {
            let parsed = response
                .json::<DeploymentCheckResponse>()
                .context(error::RequestSnafu {
                    url: url.to_string(),
                })?;
            Ok(Some(parsed))
        }
        409 => error::DeploymentAbortedSnafu.fail(),
        status => error::UnexpectedStatusSnafu {
            url: url.to_string(),
            status,
        }
        .fail(),
    }
}

fn put_with_reauth<T: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    body: &T,
    auth: &dyn Authenticator,
) -> Result<()> {
    let token = auth.token()?;
    match put(client, url, body, &token) {
        Err(error::Error::UnexpectedStatus { status: 401, .. }) => {
            let fresh = auth.reauthenticate()?;
            match put(client, url, body, &fresh) {
                Err(error::Error::UnexpectedStatus { status: 401, .. }) => {
                    error::ReauthFailedSnafu.fail()
                }
                other => other,
            }
        }
        other => other,
    }
}

fn put<T: Serialize + ?Sized>(client: &Client, url: &str, body: &T, token: &str) -> Result<()> {
    let response = client
        .put(url)
        .bearer_auth(token)
        .json(body)
        .send()
        .context(error::RequestSnafu {
            url: url.to_string(),
        })?;

    match response.status().as_u16() {
        204 => Ok(()),
        409 => error::DeploymentAbortedSnafu.fail(),
        status => error::UnexpectedStatusSnafu {
            url: url.to_string(),
            status,
        }
        .fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedAuth {
        reauth_calls: AtomicU32,
    }

    impl Authenticator for FixedAuth {
        fn token(&self) -> Result<String> {
            Ok("initial-token".to_string())
        }
        fn reauthenticate(&self) -> Result<String> {
            self.reauth_calls.fetch_add(1, Ordering::SeqCst);
            Ok("fresh-token".to_string())
        }
    }

    #[test]
    fn success_response_is_ok() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("PUT", "/v1/deployments/device/deployments/dep-1/status"))
                .respond_with(status_code(204)),
        );
        let client = Client::new();
        let auth = FixedAuth {
            reauth_calls: AtomicU32::new(0),
        };
        let result = report_status(
            &client,
            &server.url("").to_string().trim_end_matches('/'),
            "dep-1",
            &StatusReport {
                status: "success",
                substate: None,
            },
            &auth,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn conflict_is_deployment_aborted() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("PUT", "/v1/deployments/device/deployments/dep-1/status"))
                .respond_with(status_code(409)),
        );
        let client = Client::new();
        let auth = FixedAuth {
            reauth_calls: AtomicU32::new(0),
        };
        let result = report_status(
            &client,
            &server.url("").to_string().trim_end_matches('/'),
            "dep-1",
            &StatusReport {
                status: "failure",
                substate: None,
            },
            &auth,
        );
        assert!(matches!(result, Err(error::Error::DeploymentAborted)));
    }

    #[test]
    fn single_401_triggers_one_reauth_and_succeeds() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("PUT", "/v1/deployments/device/deployments/dep-1/status"))
                .times(1)
                .respond_with(status_code(401)),
        );
        server.expect(
            Expectation::matching(request::method_path("PUT", "/v1/deployments/device/deployments/dep-1/status"))
                .times(1)
                .respond_with(status_code(204)),
        );
        let client = Client::new();
        let auth = FixedAuth {
            reauth_calls: AtomicU32::new(0),
        };
        let result = report_status(
            &client,
            &server.url("").to_string().trim_end_matches('/'),
            "dep-1",
            &StatusReport {
                status: "success",
                substate: None,
            },
            &auth,
        );
        assert!(result.is_ok());
        assert_eq!(auth.reauth_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn two_consecutive_401s_abort() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("PUT", "/v1/deployments/device/deployments/dep-1/status"))
                .times(2)
                .respond_with(status_code(401)),
        );
        let client = Client::new();
        let auth = FixedAuth {
            reauth_calls: AtomicU32::new(0),
        };
        let result = report_status(
            &client,
            &server.url("").to_string().trim_end_matches('/'),
            "dep-1",
            &StatusReport {
                status: "success",
                substate: None,
            },
            &auth,
        );
        assert!(matches!(result, Err(error::Error::ReauthFailed)));
    }
}
