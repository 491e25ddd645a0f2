//! In-memory router used by the unit tests.
//!
//! Answers with the same envelopes the real router does, tracks which
//! contexts are open, and can be told to fail a given method or to stall
//! every call until released.

use super::{ForwardingRule, RouterApi, RouterSession, RpcResult};
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use tokio::sync::watch;

#[derive(Default)]
struct FakeState {
    rules: BTreeMap<String, ForwardingRule>,
    open: HashSet<String>,
    next_context: u32,
    created: usize,
    invalidated: usize,
    calls: Vec<String>,
    fail_method: Option<String>,
}

pub struct FakeRouter {
    wan_ip: String,
    state: Mutex<FakeState>,
    /// `false` while stalled.
    gate: watch::Sender<bool>,
}

impl FakeRouter {
    pub fn new(wan_ip: &str) -> Self {
        Self {
            wan_ip: wan_ip.to_string(),
            state: Mutex::new(FakeState::default()),
            gate: watch::Sender::new(true),
        }
    }

    /// Every later call blocks until [`FakeRouter::release`].
    pub fn stall(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    async fn pass_gate(&self) {
        let mut open = self.gate.subscribe();
        let _ = open.wait_for(|open| *open).await;
    }

    pub fn with_rule(self, rule: ForwardingRule) -> Self {
        self.state.lock().unwrap().rules.insert(rule.id.clone(), rule);
        self
    }

    /// Every later call to `method` fails with an RPC error.
    pub fn fail_on(&self, method: &str) {
        self.state.lock().unwrap().fail_method = Some(method.to_string());
    }

    pub fn rules(&self) -> Vec<ForwardingRule> {
        self.state.lock().unwrap().rules.values().cloned().collect()
    }

    pub fn sessions_created(&self) -> usize {
        self.state.lock().unwrap().created
    }

    pub fn sessions_invalidated(&self) -> usize {
        self.state.lock().unwrap().invalidated
    }

    pub fn open_sessions(&self) -> usize {
        self.state.lock().unwrap().open.len()
    }

    /// Methods called through [`RouterApi::call`], in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, method: &str) -> usize {
        self.calls().iter().filter(|m| *m == method).count()
    }
}

fn listing(rules: &BTreeMap<String, ForwardingRule>) -> Value {
    let mut map = Map::new();
    for (id, rule) in rules {
        map.insert(
            id.clone(),
            json!({
                "Id": id,
                "ExternalPort": rule.external_port,
                "InternalPort": rule.internal_port,
                "DestinationIPAddress": rule.destination_ip,
                "Protocol": rule.protocol,
                "Enable": rule.enabled,
                "Persistent": rule.persistent,
                "Description": rule.description,
            }),
        );
    }
    Value::Object(map)
}

fn str_param(parameters: &Value, key: &str) -> String {
    parameters[key].as_str().unwrap_or_default().to_string()
}

#[async_trait]
impl RouterApi for FakeRouter {
    async fn create_session(&self, _password: &str, _username: &str) -> Result<RouterSession> {
        self.pass_gate().await;
        let mut state = self.state.lock().unwrap();
        state.next_context += 1;
        state.created += 1;
        let token = format!("ctx-{}", state.next_context);
        state.open.insert(token.clone());
        Ok(RouterSession::new(token, vec!["sessid=fake".to_string()]))
    }

    async fn invalidate_session(&self, session: RouterSession) -> Result<bool> {
        self.pass_gate().await;
        let mut state = self.state.lock().unwrap();
        state.invalidated += 1;
        Ok(state.open.remove(session.token()))
    }

    async fn call(
        &self,
        session: Option<&RouterSession>,
        service: &str,
        method: &str,
        parameters: Value,
    ) -> Result<RpcResult> {
        self.pass_gate().await;
        let mut state = self.state.lock().unwrap();
        state.calls.push(method.to_string());

        if state.fail_method.as_deref() == Some(method) {
            return Err(AgentError::rpc(service, method, "injected failure"));
        }
        if let Some(session) = session {
            if !state.open.contains(session.token()) {
                return Err(AgentError::rpc(service, method, "unknown context"));
            }
        }

        let (status, data) = match method {
            "getWANStatus" => (json!(true), json!({ "IPAddress": self.wan_ip })),
            "getPortForwarding" => (listing(&state.rules), Value::Null),
            "setPortForwarding" => {
                let id = str_param(&parameters, "id");
                let rule = ForwardingRule {
                    id: id.clone(),
                    external_port: str_param(&parameters, "externalPort"),
                    internal_port: str_param(&parameters, "internalPort"),
                    destination_ip: str_param(&parameters, "destinationIPAddress"),
                    protocol: str_param(&parameters, "protocol"),
                    enabled: parameters["enable"].as_bool().unwrap_or(false),
                    persistent: parameters["persistent"].as_bool().unwrap_or(false),
                    description: str_param(&parameters, "description"),
                };
                state.rules.insert(id.clone(), rule);
                (json!(id), Value::Null)
            }
            "deletePortForwarding" => {
                let id = str_param(&parameters, "id");
                (json!(state.rules.remove(&id).is_some()), Value::Null)
            }
            _ => (Value::Null, Value::Null),
        };

        Ok(RpcResult { status, data })
    }
}
