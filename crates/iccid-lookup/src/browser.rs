//! [`HostAdapter`] for the portal page, driven through the extension bridge.
//!
//! Every operation is a small self-contained script evaluated in the portal
//! tab. Scripts answer with a JSON object: `{"ok":true}` (plus `"text"` for
//! probes) or `{"ok":false,"code":...,"target":...}` when the page does not
//! have the expected structure.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::adapter::{HostAdapter, HostOperation};
use crate::errors::LookupError;
use crate::extension_bridge::ExtensionBridge;

/// CSS selectors and labels locating the portal's controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSelectors {
    /// Return-to-start navigation control.
    pub home: String,
    /// `<select>` holding the search modes.
    pub mode_selector: String,
    pub search_input: String,
    /// Elements scanned for the submit control.
    pub submit_candidates: String,
    /// Case-insensitive text the submit control's label must contain.
    pub submit_label: String,
    pub result_region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_region: Option<String>,
}

impl Default for HostSelectors {
    fn default() -> Self {
        Self {
            home: "img.logoImg".to_string(),
            mode_selector: "select#idtype".to_string(),
            search_input: "input#number".to_string(),
            submit_candidates: "button".to_string(),
            submit_label: "search".to_string(),
            result_region: "h6.red".to_string(),
            error_region: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScriptReply {
    ok: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

pub struct BrowserHostAdapter {
    bridge: Arc<ExtensionBridge>,
    selectors: HostSelectors,
    eval_timeout: Duration,
}

impl BrowserHostAdapter {
    pub fn new(bridge: Arc<ExtensionBridge>, selectors: HostSelectors, eval_timeout: Duration) -> Self {
        Self {
            bridge,
            selectors,
            eval_timeout,
        }
    }

    async fn run_script(&self, op: &str, code: String) -> Result<ScriptReply, LookupError> {
        let raw = self
            .bridge
            .eval_in_active_tab(&code, self.eval_timeout)
            .await?
            .ok_or_else(|| {
                LookupError::BridgeUnavailable(format!(
                    "no answer from the portal tab for {op} within {:?}",
                    self.eval_timeout
                ))
            })?;

        if let Some(err) = raw.trim_start().strip_prefix("ERROR:") {
            return Err(LookupError::Script(format!("{op}: {}", err.trim())));
        }
        serde_json::from_str::<ScriptReply>(&raw)
            .map_err(|e| LookupError::Script(format!("{op}: unexpected reply {raw:?}: {e}")))
    }

    async fn run_action(&self, op: HostOperation, code: String) -> Result<(), LookupError> {
        let reply = self.run_script(&op.to_string(), code).await?;
        if reply.ok {
            return Ok(());
        }
        let target = reply.target.unwrap_or_default();
        match reply.code.as_deref() {
            Some("option_not_found") => Err(LookupError::OptionNotFound(target)),
            Some("control_not_found") => Err(LookupError::ControlNotFound(target)),
            other => Err(LookupError::Script(format!(
                "{op}: page reported failure {other:?} for {target:?}"
            ))),
        }
    }

    async fn probe(&self, selector: &str) -> String {
        match self.run_script("probe", scripts::read_text(selector)).await {
            Ok(reply) => reply.text.unwrap_or_default(),
            Err(e) => {
                // A failed read is an empty observation; the poller decides what it means.
                debug!(%selector, error = %e, "Probe failed, treating as empty");
                String::new()
            }
        }
    }
}

#[async_trait::async_trait]
impl HostAdapter for BrowserHostAdapter {
    #[instrument(level = "debug", skip(self))]
    async fn reset_to_home(&self) -> Result<(), LookupError> {
        self.run_action(
            HostOperation::ResetToHome,
            scripts::click(&self.selectors.home),
        )
        .await
    }

    #[instrument(level = "debug", skip(self))]
    async fn select_search_mode(&self, mode: &str) -> Result<(), LookupError> {
        self.run_action(
            HostOperation::SelectSearchMode,
            scripts::select_option(&self.selectors.mode_selector, mode),
        )
        .await
    }

    #[instrument(level = "debug", skip(self))]
    async fn set_search_value(&self, value: &str) -> Result<(), LookupError> {
        self.run_action(
            HostOperation::SetSearchValue,
            scripts::set_value(&self.selectors.search_input, value),
        )
        .await
    }

    #[instrument(level = "debug", skip(self))]
    async fn submit_search(&self) -> Result<(), LookupError> {
        let result = self
            .run_action(
                HostOperation::SubmitSearch,
                scripts::click_labelled(
                    &self.selectors.submit_candidates,
                    &self.selectors.submit_label,
                ),
            )
            .await;
        if let Err(e) = &result {
            warn!(error = %e, "Submit control unavailable");
        }
        result
    }

    async fn read_result_probe(&self) -> String {
        self.probe(&self.selectors.result_region).await
    }

    async fn read_error_probe(&self) -> String {
        match &self.selectors.error_region {
            Some(selector) => self.probe(selector).await,
            None => String::new(),
        }
    }
}

/// Script builders. Every caller-supplied string is embedded as a JSON string
/// literal, which is also a valid JavaScript string literal.
pub(crate) mod scripts {
    fn lit(value: &str) -> String {
        serde_json::Value::String(value.to_string()).to_string()
    }

    fn tagged(op: &str, body: String) -> String {
        format!("/* iccid-lookup:{op} */ (() => {{ {body} }})()")
    }

    fn missing(code: &str, target: &str) -> String {
        format!("return JSON.stringify({{ ok: false, code: \"{code}\", target: {target} }});")
    }

    pub fn click(selector: &str) -> String {
        let sel = lit(selector);
        tagged(
            "click",
            format!(
                "const el = document.querySelector({sel}); \
                 if (!el) {{ {missing} }} \
                 el.click(); \
                 return JSON.stringify({{ ok: true }});",
                missing = missing("control_not_found", &sel)
            ),
        )
    }

    pub fn select_option(selector: &str, label: &str) -> String {
        let sel = lit(selector);
        let want = lit(label);
        tagged(
            "select_option",
            format!(
                "const el = document.querySelector({sel}); \
                 if (!el) {{ {missing_control} }} \
                 const want = {want}.toUpperCase(); \
                 const opt = [...el.options].find(o => (o.text || '').toUpperCase().includes(want)); \
                 if (!opt) {{ {missing_option} }} \
                 el.value = opt.value; \
                 el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
                 return JSON.stringify({{ ok: true }});",
                missing_control = missing("control_not_found", &sel),
                missing_option = missing("option_not_found", &want),
            ),
        )
    }

    pub fn set_value(selector: &str, value: &str) -> String {
        let sel = lit(selector);
        let val = lit(value);
        tagged(
            "set_value",
            format!(
                "const el = document.querySelector({sel}); \
                 if (!el) {{ {missing} }} \
                 el.value = {val}; \
                 el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                 return JSON.stringify({{ ok: true }});",
                missing = missing("control_not_found", &sel)
            ),
        )
    }

    pub fn click_labelled(candidates: &str, label: &str) -> String {
        let sel = lit(candidates);
        let want = lit(label);
        let target = lit(&format!("{candidates} labelled {label:?}"));
        tagged(
            "click_labelled",
            format!(
                "const want = {want}.toUpperCase(); \
                 const el = [...document.querySelectorAll({sel})].find(b => (b.innerText || b.value || '').toUpperCase().includes(want)); \
                 if (!el) {{ {missing} }} \
                 el.click(); \
                 return JSON.stringify({{ ok: true }});",
                missing = missing("control_not_found", &target)
            ),
        )
    }

    pub fn read_text(selector: &str) -> String {
        let sel = lit(selector);
        tagged(
            "read_text",
            format!(
                "const el = document.querySelector({sel}); \
                 return JSON.stringify({{ ok: true, text: el ? (el.innerText || '') : '' }});"
            ),
        )
    }
}
