//! HTTP transport for the router RPC endpoint (`POST http://<router>/ws`).

use super::{RouterApi, RouterSession, RpcResult};
use crate::config::RouterConfig;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::{Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Content type the router insists on.
pub const CONTENT_TYPE_SAH: &str = "application/x-sah-ws-4-call+json";

const APPLICATION_NAME: &str = "so_sdkut";
const CONTEXT_SERVICE: &str = "sah.Device.Information";

/// The three `Authorization` header forms the router understands.
enum Auth<'a> {
    Login,
    Use(&'a RouterSession),
    Logout(&'a RouterSession),
}

impl Auth<'_> {
    fn header(&self) -> String {
        match self {
            Auth::Login => "X-Sah-Login".to_string(),
            Auth::Use(session) => format!("X-Sah {}", session.token()),
            Auth::Logout(session) => format!("X-Sah-Logout {}", session.token()),
        }
    }

    fn session(&self) -> Option<&RouterSession> {
        match self {
            Auth::Login => None,
            Auth::Use(session) | Auth::Logout(session) => Some(session),
        }
    }
}

pub struct HttpRouterClient {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpRouterClient {
    /// `address` is the router host (optionally `host:port`).
    pub fn new(address: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::rpc("http", "client", e.to_string()))?;
        Ok(Self {
            http,
            endpoint: format!("http://{address}/ws"),
            timeout,
        })
    }

    pub fn from_config(config: &RouterConfig) -> Result<Self> {
        Self::new(&config.address, config.timeout())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(
        &self,
        auth: Option<Auth<'_>>,
        service: &str,
        method: &str,
        parameters: Value,
    ) -> Result<Response> {
        let body = json!({
            "service": service,
            "method": method,
            "parameters": parameters,
        });

        let mut request = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, CONTENT_TYPE_SAH)
            .body(body.to_string());
        if let Some(auth) = &auth {
            request = request.header(AUTHORIZATION, auth.header());
            if let Some(cookies) = auth.session().and_then(RouterSession::cookie_header) {
                request = request.header(COOKIE, cookies);
            }
        }

        debug!("Router call {}.{}", service, method);
        request.send().await.map_err(|e| self.map_send_error(service, method, e))
    }

    async fn decode(&self, service: &str, method: &str, response: Response) -> Result<RpcResult> {
        response
            .json::<RpcResult>()
            .await
            .map_err(|e| self.map_send_error(service, method, e))
    }

    fn map_send_error(&self, service: &str, method: &str, e: reqwest::Error) -> AgentError {
        if e.is_timeout() {
            AgentError::Timeout {
                operation: format!("router call {service}.{method}"),
                timeout: self.timeout,
            }
        } else {
            AgentError::rpc(service, method, e.to_string())
        }
    }
}

/// `name=value` pairs from every `Set-Cookie` header.
fn collect_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .map(|pair| pair.trim().to_string())
        .filter(|pair| !pair.is_empty())
        .collect()
}

fn ensure_auth_ok(method: &'static str, status: StatusCode) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(AgentError::Auth {
            method,
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl RouterApi for HttpRouterClient {
    async fn create_session(&self, password: &str, username: &str) -> Result<RouterSession> {
        let parameters = json!({
            "applicationName": APPLICATION_NAME,
            "username": username,
            "password": password,
        });
        let response = self
            .post(Some(Auth::Login), CONTEXT_SERVICE, "createContext", parameters)
            .await?;
        ensure_auth_ok("createContext", response.status())?;

        let cookies = collect_cookies(&response);
        let result = self.decode(CONTEXT_SERVICE, "createContext", response).await?;
        let token = result
            .data
            .get("contextID")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::rpc(CONTEXT_SERVICE, "createContext", "missing data.contextID"))?;

        debug!("Router session created ({} cookies)", cookies.len());
        Ok(RouterSession::new(token, cookies))
    }

    async fn invalidate_session(&self, session: RouterSession) -> Result<bool> {
        let parameters = json!({ "applicationName": APPLICATION_NAME });
        let response = self
            .post(
                Some(Auth::Logout(&session)),
                CONTEXT_SERVICE,
                "releaseContext",
                parameters,
            )
            .await?;
        ensure_auth_ok("releaseContext", response.status())?;

        let result = self.decode(CONTEXT_SERVICE, "releaseContext", response).await?;
        let clean = result.status.as_i64() == Some(0);
        if !clean {
            warn!("Router released session with status {}", result.status);
        }
        Ok(clean)
    }

    async fn call(
        &self,
        session: Option<&RouterSession>,
        service: &str,
        method: &str,
        parameters: Value,
    ) -> Result<RpcResult> {
        let response = self
            .post(session.map(Auth::Use), service, method, parameters)
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::rpc(service, method, format!("HTTP {status}")));
        }
        self.decode(service, method, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::State;
    use axum::http::{HeaderMap, Response as HttpResponse};
    use axum::routing::post;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Seen {
        calls: Vec<(String, Option<String>, Option<String>, Option<String>)>,
    }

    #[derive(Clone, Default)]
    struct MockRouter {
        seen: Arc<Mutex<Seen>>,
        reject_login: bool,
        stall_wan: bool,
    }

    async fn handle(State(mock): State<MockRouter>, headers: HeaderMap, body: String) -> HttpResponse<Body> {
        let request: Value = serde_json::from_str(&body).unwrap();
        let method = request["method"].as_str().unwrap().to_string();
        let header = |name: &str| headers.get(name).map(|v| v.to_str().unwrap().to_string());
        mock.seen.lock().unwrap().calls.push((
            method.clone(),
            header("authorization"),
            header("cookie"),
            header("content-type"),
        ));

        let ok = |body: Value| {
            HttpResponse::builder()
                .status(200)
                .body(Body::from(body.to_string()))
                .unwrap()
        };

        match method.as_str() {
            "createContext" if mock.reject_login => HttpResponse::builder()
                .status(401)
                .body(Body::from("{}"))
                .unwrap(),
            "createContext" => HttpResponse::builder()
                .status(200)
                .header("set-cookie", "sessid=abc123; Path=/; HttpOnly")
                .header("set-cookie", "lang=en")
                .body(Body::from(
                    json!({"status": 0, "data": {"contextID": "ctx-42"}}).to_string(),
                ))
                .unwrap(),
            "releaseContext" => ok(json!({"status": 0})),
            "getWANStatus" => {
                if mock.stall_wan {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                ok(json!({"status": true, "data": {"IPAddress": "90.1.2.3"}}))
            }
            "getPortForwarding" => ok(json!({"status": {
                "webui_ssh-raspi": {
                    "ExternalPort": "2222",
                    "InternalPort": "22",
                    "DestinationIPAddress": "192.168.1.20",
                    "Enable": true
                }
            }})),
            "deletePortForwarding" => ok(json!({"status": false})),
            _ => ok(json!({"status": null})),
        }
    }

    async fn spawn(mock: MockRouter) -> String {
        let app = axum::Router::new()
            .route("/ws", post(handle))
            .with_state(mock);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr.to_string()
    }

    #[tokio::test]
    async fn session_lifecycle_replays_token_and_cookies() {
        let mock = MockRouter::default();
        let address = spawn(mock.clone()).await;
        let client = HttpRouterClient::new(&address, Duration::from_secs(2)).unwrap();

        let session = client.create_session("pw", "admin").await.unwrap();
        assert_eq!(session.token(), "ctx-42");
        assert_eq!(session.cookies(), ["sessid=abc123", "lang=en"]);

        let rules = client.port_forwardings(&session).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert!(rules[0].matches(2222, "192.168.1.20", 22));

        assert!(client.invalidate_session(session).await.unwrap());

        let seen = mock.seen.lock().unwrap();
        let (method, auth, cookie, content_type) = &seen.calls[0];
        assert_eq!(method, "createContext");
        assert_eq!(auth.as_deref(), Some("X-Sah-Login"));
        assert!(cookie.is_none());
        assert_eq!(content_type.as_deref(), Some(CONTENT_TYPE_SAH));

        let (_, auth, cookie, _) = &seen.calls[1];
        assert_eq!(auth.as_deref(), Some("X-Sah ctx-42"));
        assert_eq!(cookie.as_deref(), Some("sessid=abc123; lang=en"));

        let (method, auth, cookie, _) = &seen.calls[2];
        assert_eq!(method, "releaseContext");
        assert_eq!(auth.as_deref(), Some("X-Sah-Logout ctx-42"));
        assert_eq!(cookie.as_deref(), Some("sessid=abc123; lang=en"));
    }

    #[tokio::test]
    async fn wan_ip_is_unauthenticated() {
        let mock = MockRouter::default();
        let address = spawn(mock.clone()).await;
        let client = HttpRouterClient::new(&address, Duration::from_secs(2)).unwrap();

        assert_eq!(client.wan_ip().await.unwrap(), "90.1.2.3");
        let seen = mock.seen.lock().unwrap();
        assert!(seen.calls[0].1.is_none());
    }

    #[tokio::test]
    async fn rejected_login_is_auth_error() {
        let mock = MockRouter {
            reject_login: true,
            ..Default::default()
        };
        let address = spawn(mock).await;
        let client = HttpRouterClient::new(&address, Duration::from_secs(2)).unwrap();

        let err = client.create_session("wrong", "admin").await.unwrap_err();
        assert!(matches!(err, AgentError::Auth { status: 401, .. }));
    }

    #[tokio::test]
    async fn falsy_remove_status_is_rpc_error() {
        let address = spawn(MockRouter::default()).await;
        let client = HttpRouterClient::new(&address, Duration::from_secs(2)).unwrap();

        let session = client.create_session("pw", "admin").await.unwrap();
        let err = client
            .remove_port_forwarding(&session, "webui_ssh-raspi", "192.168.1.20")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Rpc { .. }));
        client.invalidate_session(session).await.unwrap();
    }

    #[tokio::test]
    async fn stalled_router_call_times_out() {
        let mock = MockRouter {
            stall_wan: true,
            ..Default::default()
        };
        let address = spawn(mock).await;
        let client = HttpRouterClient::new(&address, Duration::from_millis(200)).unwrap();

        let err = client.wan_ip().await.unwrap_err();
        assert!(matches!(err, AgentError::Timeout { .. }), "got {err:?}");
    }
}
