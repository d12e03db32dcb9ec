//! [`RenderHost`] backed by a W3C WebDriver server (e.g. `chromedriver`).

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use miette::{miette, Context, IntoDiagnostic, Result};
use reqwest::{Client, Method};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::WebDriverConfig;
use crate::host::{HostAction, HostCall, HostError, RenderHost};

/// Key under which WebDriver returns element references.
const ELEMENT_REFERENCE_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Space taken by toolbars and borders, as `[width, height]`.
const WINDOW_CHROME_SCRIPT: &str =
    "return [window.outerWidth - window.innerWidth, window.outerHeight - window.innerHeight];";

pub struct WebDriverHost {
    client: Client,
    endpoint: String,
    session_id: Mutex<Option<String>>,
}

impl WebDriverHost {
    /// Starts a new browser session on the configured WebDriver server.
    pub async fn launch(config: &WebDriverConfig) -> Result<Self> {
        info!(
            endpoint = %config.endpoint,
            headless = config.headless,
            "Launching browser session."
        );

        let client = Client::builder()
            .build()
            .into_diagnostic()
            .wrap_err_with(|| miette!("Could not build WebDriver HTTP client."))?;

        let host = Self {
            client,
            endpoint: config.endpoint.as_str().trim_end_matches('/').to_string(),
            session_id: Mutex::new(None),
        };

        let response = host
            .send(Method::POST, "session".to_string(), Some(session_capabilities(config)))
            .await
            .into_diagnostic()
            .wrap_err_with(|| miette!("Could not create WebDriver session."))?;

        let session_id = parse_session_id(&response).into_diagnostic()?;
        debug!(session_id = %session_id, "WebDriver session created.");

        let _ = host.session_id.lock().await.insert(session_id);

        Ok(host)
    }

    async fn send(&self, method: Method, path: String, body: Option<Value>) -> Result<Value, HostError> {
        let url = format!("{}/{}", self.endpoint, path);

        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        let body: Value = response.json().await?;

        extract_response_value(status.is_success(), body)
    }

    async fn session_command(
        &self,
        method: Method,
        command: &str,
        body: Option<Value>,
    ) -> Result<Value, HostError> {
        let session_id = self
            .session_id
            .lock()
            .await
            .clone()
            .ok_or(HostError::MissingSession)?;

        self.send(method, format!("session/{session_id}/{command}"), body)
            .await
    }

    async fn resize_window(&self, width: u32, height: u32) -> Result<(), HostError> {
        self.session_command(
            Method::POST,
            "window/rect",
            Some(json!({ "width": width, "height": height })),
        )
        .await?;
        Ok(())
    }

    async fn execute(&self, script: &str, arguments: Vec<Value>) -> Result<Value, HostError> {
        self.session_command(
            Method::POST,
            "execute/sync",
            Some(json!({ "script": script, "args": arguments })),
        )
        .await
    }
}

#[async_trait]
impl RenderHost for WebDriverHost {
    async fn navigate(&self, url: &str) -> Result<(), HostError> {
        self.session_command(Method::POST, "url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    /// WebDriver sizes the outer window, so the browser chrome is measured and added
    /// on top to get a `width` x `height` page viewport.
    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), HostError> {
        self.resize_window(width, height).await?;

        let chrome = parse_window_chrome(&self.execute(WINDOW_CHROME_SCRIPT, Vec::new()).await?)?;
        if chrome != (0, 0) {
            let (window_width, window_height) = window_size_for_viewport(width, height, chrome);
            debug!(window_width, window_height, "Resizing window to fit the viewport.");
            self.resize_window(window_width, window_height).await?;
        }

        Ok(())
    }

    async fn dispatch(&self, action: HostAction) -> Result<(), HostError> {
        let payload = serde_json::to_value(&action)
            .map_err(|error| HostError::Decode(format!("could not serialize action: {error}")))?;

        self.execute("window.store.dispatch(arguments[0]);", vec![payload])
            .await?;
        Ok(())
    }

    async fn evaluate(&self, call: HostCall) -> Result<Value, HostError> {
        let (script, arguments) = script_for(&call);
        self.execute(script, arguments).await
    }

    async fn screenshot(&self, selector: &str) -> Result<Vec<u8>, HostError> {
        let element = self
            .session_command(
                Method::POST,
                "element",
                Some(json!({ "using": "css selector", "value": selector })),
            )
            .await?;
        let element_id = parse_element_id(&element)?;

        let encoded = self
            .session_command(
                Method::GET,
                &format!("element/{element_id}/screenshot"),
                None,
            )
            .await?;

        let encoded = encoded
            .as_str()
            .ok_or_else(|| HostError::Decode("screenshot is not a string".to_string()))?;

        BASE64
            .decode(encoded)
            .map_err(|error| HostError::Decode(format!("screenshot is not base64: {error}")))
    }

    async fn close(&self) -> Result<(), HostError> {
        let session_id = self.session_id.lock().await.take();

        if let Some(session_id) = session_id {
            info!("Closing browser session.");
            self.send(Method::DELETE, format!("session/{session_id}"), None)
                .await?;
        }

        Ok(())
    }
}


fn session_capabilities(config: &WebDriverConfig) -> Value {
    let mut arguments = vec!["--hide-scrollbars".to_string()];

    if config.headless {
        arguments.push("--headless=new".to_string());
    }

    if let Some(user_data_directory) = &config.user_data_directory {
        arguments.push(format!(
            "--user-data-dir={}",
            user_data_directory.display()
        ));
    }

    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "goog:chromeOptions": { "args": arguments }
            }
        }
    })
}

fn script_for(call: &HostCall) -> (&'static str, Vec<Value>) {
    match call {
        HostCall::DismissOnboarding => (
            "localStorage.setItem('builder-tutorial', '1');\
             localStorage.setItem('builder-shortcut-popup', '1');\
             localStorage.setItem('builder-localstorage-toast', '1');\
             return true;",
            Vec::new(),
        ),
        HostCall::SceneEntityCount { scene_id } => (
            "const scene = window.store.getState().scene.present.data[arguments[0]];\
             return scene ? Object.keys(scene.entities).length : 0;",
            vec![json!(scene_id)],
        ),
        HostCall::ElementPresent { selector } => (
            "return document.querySelector(arguments[0]) !== null;",
            vec![json!(selector)],
        ),
        HostCall::SceneMetrics { scene_id } => (
            "const scene = window.store.getState().scene.present.data[arguments[0]];\
             return scene && scene.metrics ? scene.metrics : null;",
            vec![json!(scene_id)],
        ),
        HostCall::AssetsLoading => (
            "return !!window.editor.getLoadingEntity();",
            Vec::new(),
        ),
        HostCall::SetCameraZoomDelta { zoom } => (
            "window.editor.setCameraZoomDelta(arguments[0]); return true;",
            vec![json!(zoom)],
        ),
        HostCall::SetCameraRotation { angle } => (
            "window.editor.setCameraRotation(arguments[0]); return true;",
            vec![json!(angle)],
        ),
    }
}

/// Unwraps the `value` member of a WebDriver response, turning error payloads into `HostError`s.
fn extract_response_value(is_success: bool, mut body: Value) -> Result<Value, HostError> {
    let value = body
        .get_mut("value")
        .map(Value::take)
        .ok_or_else(|| HostError::Decode(format!("response without a value: {body}")))?;

    let error = value.get("error").and_then(Value::as_str);

    match (is_success, error) {
        (true, None) => Ok(value),
        (_, Some(error)) => Err(HostError::Protocol {
            error: error.to_string(),
            message: value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        (false, None) => Err(HostError::Decode(format!(
            "unsuccessful response without an error code: {value}"
        ))),
    }
}

fn parse_window_chrome(value: &Value) -> Result<(u32, u32), HostError> {
    let dimension = |index: usize| {
        value
            .get(index)
            .and_then(Value::as_f64)
            .map(|pixels| pixels.max(0.0).round() as u32)
    };

    match (dimension(0), dimension(1)) {
        (Some(width), Some(height)) => Ok((width, height)),
        _ => Err(HostError::Decode(format!("unexpected window chrome measurement: {value}"))),
    }
}

/// Outer window size whose inner viewport is `width` x `height`.
fn window_size_for_viewport(width: u32, height: u32, chrome: (u32, u32)) -> (u32, u32) {
    (width.saturating_add(chrome.0), height.saturating_add(chrome.1))
}

fn parse_session_id(value: &Value) -> Result<String, HostError> {
    value
        .get("sessionId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| HostError::Decode(format!("no sessionId in {value}")))
}

fn parse_element_id(value: &Value) -> Result<String, HostError> {
    value
        .get(ELEMENT_REFERENCE_KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| HostError::Decode(format!("no element reference in {value}")))
}
