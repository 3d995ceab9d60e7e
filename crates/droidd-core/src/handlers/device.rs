//! `device.*` handlers: info, screenshot, shell, input key, wake,
//! reboot, rotation, clipboard

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use droidd_proto::{error, AgentError};
use regex::Regex;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::router::{CommandHandler, RequestContext};

use super::{bool_param, f64_param, i32_param, require_str, u64_param, HandlerDeps};

struct DeviceHandler {
    deps: Arc<HandlerDeps>,
    method: &'static str,
    /// Local mirror for clipboard writes; shell builds cannot set the
    /// system clipboard, the accessibility provider syncs it when present
    clipboard_mirror: Arc<RwLock<Option<String>>>,
}

pub async fn register(deps: &Arc<HandlerDeps>) {
    let clipboard_mirror = Arc::new(RwLock::new(None));
    for method in [
        "device.info",
        "device.screenshot",
        "device.shell",
        "device.inputKey",
        "device.wake",
        "device.reboot",
        "device.rotation",
        "device.clipboard",
    ] {
        deps.router
            .register(Arc::new(DeviceHandler {
                deps: deps.clone(),
                method,
                clipboard_mirror: clipboard_mirror.clone(),
            }))
            .await;
    }
}

#[async_trait::async_trait]
impl CommandHandler for DeviceHandler {
    fn method(&self) -> &str {
        self.method
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        match self.method {
            "device.shell" if params.get("command").and_then(|v| v.as_str()).is_none() => {
                Err("missing 'command' parameter".to_string())
            }
            "device.inputKey" if params.get("keyCode").and_then(|v| v.as_u64()).is_none() => {
                Err("missing 'keyCode' parameter".to_string())
            }
            _ => Ok(()),
        }
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        match self.method {
            "device.info" => self.info().await,
            "device.screenshot" => self.screenshot(params).await,
            "device.shell" => self.shell(params).await,
            "device.inputKey" => self.input_key(params).await,
            "device.wake" => self.wake().await,
            "device.reboot" => self.reboot(params).await,
            "device.rotation" => self.rotation(params).await,
            "device.clipboard" => self.clipboard(params).await,
            _ => Err(AgentError::not_implemented(self.method)),
        }
    }
}

impl DeviceHandler {
    async fn info(&self) -> Result<Value, AgentError> {
        let shell = &self.deps.shell;
        let model = shell.getprop("ro.product.model").await;
        let brand = shell.getprop("ro.product.brand").await;
        let sdk: u32 = shell
            .getprop("ro.build.version.sdk")
            .await
            .parse()
            .unwrap_or(0);
        let (width, height) = self.deps.screen_size().await;
        let density = match shell.run("wm density", false).await {
            Ok(result) if result.ok() => parse_wm_density(&result.stdout).unwrap_or(0),
            _ => 0,
        };
        let caps = self.deps.resolver.capabilities().await;

        Ok(json!({
            "model": model,
            "brand": brand,
            "sdk": sdk,
            "screenWidth": width,
            "screenHeight": height,
            "density": density,
            "privileged": caps.privileged_shell,
            "accessibility": caps.accessibility,
        }))
    }

    async fn screenshot(&self, params: Value) -> Result<Value, AgentError> {
        let capture = self
            .deps
            .resolver
            .resolve_capture()
            .await
            .ok_or_else(|| {
                AgentError::new(
                    error::PRIVILEGE_REQUIRED,
                    "No screen capture strategy available",
                )
            })?;
        let png = capture.capture().await?;

        let format = super::str_param(&params, "format").unwrap_or_else(|| "png".to_string());
        let quality = u64_param(&params, "quality", 90).clamp(1, 100) as u8;
        let scale = f64_param(&params, "scale").unwrap_or(1.0);

        let (data, width, height, format) = encode_image(&png, &format, quality, scale)?;
        debug!(len = data.len(), %format, "Screenshot encoded");
        Ok(json!({
            "data": base64::engine::general_purpose::STANDARD.encode(&data),
            "format": format,
            "width": width,
            "height": height,
        }))
    }

    async fn shell(&self, params: Value) -> Result<Value, AgentError> {
        let command = require_str(&params, "command")?;
        let as_privileged =
            bool_param(&params, "asRoot", false) || bool_param(&params, "asPrivileged", false);
        if as_privileged && !self.deps.shell.privileged_available() {
            return Err(AgentError::new(
                error::PRIVILEGE_REQUIRED,
                "Privileged shell is not available",
            ));
        }
        let timeout = Duration::from_millis(u64_param(&params, "timeoutMs", 30_000));

        let result = self
            .deps
            .shell
            .run_with_timeout(&command, as_privileged, timeout)
            .await
            .map_err(|e| AgentError::new(error::TRANSPORT_TIMEOUT, e.to_string()))?;

        serde_json::to_value(&result).map_err(|e| AgentError::internal(e.to_string()))
    }

    async fn input_key(&self, params: Value) -> Result<Value, AgentError> {
        let key_code = u64_param(&params, "keyCode", 0) as u32;
        let input = self.deps.resolver.resolve_input().await.ok_or_else(|| {
            AgentError::new(error::PRIVILEGE_REQUIRED, "No input strategy available")
        })?;
        input.key_event(key_code).await?;
        Ok(json!({ "success": true }))
    }

    async fn wake(&self) -> Result<Value, AgentError> {
        let was_asleep = match self.deps.shell.run("dumpsys power", false).await {
            Ok(result) if result.ok() => !is_awake(&result.stdout),
            _ => false,
        };
        if was_asleep {
            let input = self.deps.resolver.resolve_input().await.ok_or_else(|| {
                AgentError::new(error::SCREEN_OFF, "Screen off and no input strategy to wake it")
            })?;
            // KEYCODE_WAKEUP
            input.key_event(224).await?;
        }
        Ok(json!({ "wasAsleep": was_asleep, "success": true }))
    }

    async fn reboot(&self, params: Value) -> Result<Value, AgentError> {
        let mode = super::str_param(&params, "mode").unwrap_or_else(|| "normal".to_string());
        let command = match mode.as_str() {
            "normal" => "reboot".to_string(),
            "recovery" | "bootloader" => format!("reboot {}", mode),
            other => {
                return Err(AgentError::invalid_params(format!(
                    "invalid reboot mode: {}",
                    other
                )))
            }
        };
        if !self.deps.shell.privileged_available() {
            return Err(AgentError::new(
                error::PRIVILEGE_REQUIRED,
                "Reboot requires the privileged shell",
            ));
        }
        self.deps
            .shell
            .run(&command, true)
            .await
            .map_err(|e| AgentError::internal(e.to_string()))?;
        Ok(json!({ "success": true, "mode": mode }))
    }

    async fn rotation(&self, params: Value) -> Result<Value, AgentError> {
        if let Some(rotation) = i32_param(&params, "rotation") {
            if !(0..=3).contains(&rotation) {
                return Err(AgentError::invalid_params("rotation must be 0..3"));
            }
            let commands = [
                "settings put system accelerometer_rotation 0".to_string(),
                format!("settings put system user_rotation {}", rotation),
            ];
            for command in commands {
                let result = self
                    .deps
                    .shell
                    .run(&command, false)
                    .await
                    .map_err(|e| AgentError::internal(e.to_string()))?;
                if !result.ok() {
                    return Err(AgentError::new(
                        error::PERMISSION_DENIED,
                        format!("rotation change rejected: {}", result.stderr.trim()),
                    ));
                }
            }
            return Ok(json!({ "rotation": rotation }));
        }

        let result = self
            .deps
            .shell
            .run("settings get system user_rotation", false)
            .await
            .map_err(|e| AgentError::internal(e.to_string()))?;
        let rotation: i32 = result.stdout.trim().parse().unwrap_or(0);
        Ok(json!({ "rotation": rotation }))
    }

    async fn clipboard(&self, params: Value) -> Result<Value, AgentError> {
        if let Some(text) = super::str_param(&params, "text") {
            *self.clipboard_mirror.write().await = Some(text);
            return Ok(json!({ "success": true }));
        }

        if let Ok(result) = self.deps.shell.run("dumpsys clipboard", false).await {
            if result.ok() {
                if let Some(text) = parse_clipboard_dump(&result.stdout) {
                    return Ok(json!({ "text": text }));
                }
            }
        }
        let mirrored = self.clipboard_mirror.read().await.clone().unwrap_or_default();
        Ok(json!({ "text": mirrored }))
    }
}

/// Re-encode a captured PNG: optional downscale, PNG or JPEG output.
/// Unit scale with PNG output passes the original bytes through.
fn encode_image(
    png: &[u8],
    format: &str,
    quality: u8,
    scale: f64,
) -> Result<(Vec<u8>, u32, u32, String), AgentError> {
    let needs_rescale = scale > 0.0 && scale < 1.0;
    if format == "png" && !needs_rescale {
        let (width, height) = png_dimensions(png)
            .ok_or_else(|| AgentError::internal("capture did not produce a PNG"))?;
        return Ok((png.to_vec(), width, height, "png".to_string()));
    }

    let img = image::load_from_memory(png)
        .map_err(|e| AgentError::internal(format!("decode capture failed: {}", e)))?;
    let img = if needs_rescale {
        let width = (img.width() as f64 * scale).max(1.0) as u32;
        let height = (img.height() as f64 * scale).max(1.0) as u32;
        img.resize_exact(width, height, image::imageops::FilterType::Triangle)
    } else {
        img
    };

    let mut out = Cursor::new(Vec::new());
    let format_name = match format {
        "jpeg" | "jpg" => {
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
            img.to_rgb8()
                .write_with_encoder(encoder)
                .map_err(|e| AgentError::internal(format!("jpeg encode failed: {}", e)))?;
            "jpeg"
        }
        _ => {
            img.write_to(&mut out, image::ImageFormat::Png)
                .map_err(|e| AgentError::internal(format!("png encode failed: {}", e)))?;
            "png"
        }
    };
    Ok((out.into_inner(), img.width(), img.height(), format_name.to_string()))
}

/// Width/height from the IHDR chunk of a PNG
fn png_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    const SIGNATURE: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
    if data.len() < 24 || &data[..8] != SIGNATURE {
        return None;
    }
    let width = u32::from_be_bytes(data[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(data[20..24].try_into().ok()?);
    Some((width, height))
}

fn is_awake(power_dump: &str) -> bool {
    power_dump.contains("mWakefulness=Awake")
        || power_dump.contains("Display Power: state=ON")
}

/// Pull the primary clip text out of `dumpsys clipboard`
fn parse_clipboard_dump(text: &str) -> Option<String> {
    let re = Regex::new(r#"text="((?s).*?)"[}\)]"#).ok()?;
    re.captures(text).map(|c| c[1].to_string())
}

/// Parse `wm density`; prefers the override line when present
fn parse_wm_density(text: &str) -> Option<u32> {
    let re = Regex::new(r"(Override|Physical) density:\s*(\d+)").ok()?;
    let mut physical = None;
    for cap in re.captures_iter(text) {
        let value: u32 = cap[2].parse().ok()?;
        if &cap[1] == "Override" {
            return Some(value);
        }
        physical = Some(value);
    }
    physical
}
