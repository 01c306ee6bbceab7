#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use iccid_lookup::{
    BatchEngine, EngineConfig, HostAdapter, IdentifierNormalizer, LookupError, PollerConfig,
    ResultPoller,
};

/// One recorded call against the fake portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    Reset,
    SelectMode(String),
    SetValue(String),
    Submit,
    Probe,
}

#[derive(Default)]
struct HostState {
    /// Probe texts per submitted value; the last entry repeats.
    responses: HashMap<String, Vec<String>>,
    error_texts: HashMap<String, String>,
    missing_submit_for: HashSet<String>,
    failing_resets: HashSet<usize>,
    mode_options: Vec<String>,
    pending_value: Option<String>,
    active_query: Option<(String, usize)>,
    resets: usize,
    calls: Vec<HostCall>,
}

/// In-memory stand-in for the portal, fed with scripted probe sequences.
pub struct ScriptedHost {
    state: Mutex<HostState>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HostState {
                mode_options: vec!["MSISDN".into(), "ICCID Number".into(), "IMSI".into()],
                ..Default::default()
            }),
        }
    }

    /// Probe texts shown after searching for `full_id`, one per read.
    pub fn respond<I, S>(self, full_id: &str, probes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state
            .lock()
            .unwrap()
            .responses
            .insert(full_id.to_string(), probes.into_iter().map(Into::into).collect());
        self
    }

    pub fn error_text(self, full_id: &str, text: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .error_texts
            .insert(full_id.to_string(), text.to_string());
        self
    }

    /// The submit button is missing while `full_id` is in the search field.
    pub fn missing_submit_for(self, full_id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .missing_submit_for
            .insert(full_id.to_string());
        self
    }

    /// The home control is missing on the n-th reset (1-based).
    pub fn fail_reset_call(self, n: usize) -> Self {
        self.state.lock().unwrap().failing_resets.insert(n);
        self
    }

    pub fn mode_options(self, options: &[&str]) -> Self {
        self.state.lock().unwrap().mode_options = options.iter().map(|o| o.to_string()).collect();
        self
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn probe_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| **c == HostCall::Probe)
            .count()
    }
}

#[async_trait::async_trait]
impl HostAdapter for ScriptedHost {
    async fn reset_to_home(&self) -> Result<(), LookupError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(HostCall::Reset);
        state.resets += 1;
        if state.failing_resets.contains(&state.resets) {
            return Err(LookupError::ControlNotFound("img.logoImg".into()));
        }
        state.pending_value = None;
        state.active_query = None;
        Ok(())
    }

    async fn select_search_mode(&self, mode: &str) -> Result<(), LookupError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(HostCall::SelectMode(mode.to_string()));
        let wanted = mode.to_uppercase();
        if state
            .mode_options
            .iter()
            .any(|o| o.to_uppercase().contains(&wanted))
        {
            Ok(())
        } else {
            Err(LookupError::OptionNotFound(mode.to_string()))
        }
    }

    async fn set_search_value(&self, value: &str) -> Result<(), LookupError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(HostCall::SetValue(value.to_string()));
        state.pending_value = Some(value.to_string());
        Ok(())
    }

    async fn submit_search(&self) -> Result<(), LookupError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(HostCall::Submit);
        let value = state.pending_value.clone().unwrap_or_default();
        if state.missing_submit_for.contains(&value) {
            return Err(LookupError::ControlNotFound("button labelled \"search\"".into()));
        }
        state.active_query = Some((value, 0));
        Ok(())
    }

    async fn read_result_probe(&self) -> String {
        let mut state = self.state.lock().unwrap();
        state.calls.push(HostCall::Probe);
        let Some((value, cursor)) = state.active_query.clone() else {
            return String::new();
        };
        let text = state
            .responses
            .get(&value)
            .and_then(|probes| probes.get(cursor).or_else(|| probes.last()))
            .cloned()
            .unwrap_or_default();
        state.active_query = Some((value, cursor + 1));
        text
    }

    async fn read_error_probe(&self) -> String {
        let state = self.state.lock().unwrap();
        state
            .active_query
            .as_ref()
            .and_then(|(value, _)| state.error_texts.get(value).cloned())
            .unwrap_or_default()
    }
}

pub fn engine_for(host: Arc<ScriptedHost>) -> BatchEngine {
    BatchEngine::new(
        host,
        IdentifierNormalizer::default(),
        ResultPoller::new(&PollerConfig::default()).unwrap(),
        EngineConfig::default(),
    )
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Connect a fake browser extension to the bridge at `addr`.
///
/// Every eval request is answered by `handler`, which receives the script
/// source and returns either the script's result or a page error.
pub async fn spawn_fake_extension<F>(
    addr: std::net::SocketAddr,
    mut handler: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnMut(&str) -> Result<String, String> + Send + 'static,
{
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::{connect_async, tungstenite::Message};

    let (ws, _) = connect_async(format!("ws://{addr}"))
        .await
        .expect("ws connect");
    let (mut writer, mut reader) = ws.split();
    writer
        .send(Message::Text(r#"{"type":"hello","from":"test"}"#.into()))
        .await
        .expect("send hello");

    tokio::spawn(async move {
        while let Some(Ok(msg)) = reader.next().await {
            let Ok(txt) = msg.into_text() else {
                continue;
            };
            let Ok(req) = serde_json::from_str::<serde_json::Value>(&txt) else {
                continue;
            };
            let id = req["id"].as_str().unwrap_or_default().to_string();
            let code = req["code"].as_str().unwrap_or_default();
            let reply = match handler(code) {
                Ok(result) => serde_json::json!({"id": id, "ok": true, "result": result}),
                Err(error) => serde_json::json!({"id": id, "ok": false, "error": error}),
            };
            if writer.send(Message::Text(reply.to_string())).await.is_err() {
                break;
            }
        }
    })
}
