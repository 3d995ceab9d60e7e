//! Operation strategies
//!
//! Each operation family (input, screen capture, UI hierarchy) is backed
//! by registered strategies; the resolver picks the best one for the
//! current capabilities. Strategies are registered values behind trait
//! objects, not subclasses.
//!
//! The shell-backed implementations here cover the privileged path.
//! Accessibility-backed providers live outside the core and register
//! through the same traits.

use std::sync::Arc;

use bytes::Bytes;
use droidd_proto::{error, AgentError};
use tracing::debug;

use crate::selector::{Rect, UiElement};
use crate::shell::ShellExecutor;

/// Point on screen, used by gesture paths
pub type Point = (i32, i32);

/// Input injection strategy
#[async_trait::async_trait]
pub trait InputStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn requires_privilege(&self) -> bool;

    async fn tap(&self, x: i32, y: i32) -> Result<(), AgentError>;
    async fn swipe(
        &self,
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        duration_ms: u64,
    ) -> Result<(), AgentError>;
    async fn long_press(&self, x: i32, y: i32, duration_ms: u64) -> Result<(), AgentError>;
    async fn key_event(&self, key_code: u32) -> Result<(), AgentError>;
    async fn input_text(&self, text: &str) -> Result<(), AgentError>;
    /// Drive an arbitrary path. The shell backend approximates it as
    /// per-segment swipes.
    async fn gesture(&self, points: &[Point], duration_ms: u64) -> Result<(), AgentError>;
}

/// Screen capture strategy; produces PNG bytes
#[async_trait::async_trait]
pub trait CaptureStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn requires_privilege(&self) -> bool;

    async fn capture(&self) -> Result<Bytes, AgentError>;
}

/// UI hierarchy snapshot strategy
#[async_trait::async_trait]
pub trait HierarchyStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn requires_privilege(&self) -> bool;

    async fn dump(&self) -> Result<Vec<UiElement>, AgentError>;
}

fn gesture_err(result: &crate::shell::ShellResult, what: &str) -> AgentError {
    AgentError::new(
        error::GESTURE_FAILED,
        format!("{} failed: {}", what, result.stderr.trim()),
    )
}

// ===== Shell input =====

/// Input via the `input` shell tool. Needs the privileged shell to inject
/// into arbitrary windows.
pub struct ShellInputStrategy {
    shell: Arc<ShellExecutor>,
}

impl ShellInputStrategy {
    pub fn new(shell: Arc<ShellExecutor>) -> Self {
        ShellInputStrategy { shell }
    }

    async fn input(&self, args: &str, what: &str) -> Result<(), AgentError> {
        let result = self
            .shell
            .run(&format!("input {}", args), true)
            .await
            .map_err(|e| AgentError::new(error::GESTURE_FAILED, e.to_string()))?;
        if !result.ok() {
            return Err(gesture_err(&result, what));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl InputStrategy for ShellInputStrategy {
    fn name(&self) -> &str {
        "shell"
    }

    fn requires_privilege(&self) -> bool {
        true
    }

    async fn tap(&self, x: i32, y: i32) -> Result<(), AgentError> {
        self.input(&format!("tap {} {}", x, y), "tap").await
    }

    async fn swipe(
        &self,
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        duration_ms: u64,
    ) -> Result<(), AgentError> {
        self.input(
            &format!("swipe {} {} {} {} {}", x1, y1, x2, y2, duration_ms),
            "swipe",
        )
        .await
    }

    async fn long_press(&self, x: i32, y: i32, duration_ms: u64) -> Result<(), AgentError> {
        // A zero-distance swipe holds the press for the duration
        self.swipe(x, y, x, y, duration_ms).await
    }

    async fn key_event(&self, key_code: u32) -> Result<(), AgentError> {
        self.input(&format!("keyevent {}", key_code), "keyevent")
            .await
    }

    async fn input_text(&self, text: &str) -> Result<(), AgentError> {
        // `input text` treats %s as space and chokes on quotes
        let escaped = text.replace(' ', "%s").replace('\'', "\\'");
        self.input(&format!("text '{}'", escaped), "text").await
    }

    async fn gesture(&self, points: &[Point], duration_ms: u64) -> Result<(), AgentError> {
        if points.len() < 2 {
            return Err(AgentError::new(
                error::GESTURE_FAILED,
                "gesture needs at least 2 points",
            ));
        }
        let segments = (points.len() - 1) as u64;
        let per_segment = (duration_ms / segments).max(1);
        for pair in points.windows(2) {
            self.swipe(pair[0].0, pair[0].1, pair[1].0, pair[1].1, per_segment)
                .await?;
        }
        Ok(())
    }
}

// ===== Shell capture =====

/// Screen capture via `screencap -p`; silent, no user prompt
pub struct ShellCaptureStrategy {
    shell: Arc<ShellExecutor>,
}

impl ShellCaptureStrategy {
    pub fn new(shell: Arc<ShellExecutor>) -> Self {
        ShellCaptureStrategy { shell }
    }
}

#[async_trait::async_trait]
impl CaptureStrategy for ShellCaptureStrategy {
    fn name(&self) -> &str {
        "shell"
    }

    fn requires_privilege(&self) -> bool {
        true
    }

    async fn capture(&self) -> Result<Bytes, AgentError> {
        let tmp = "/data/local/tmp/droidd-screen.png";
        let result = self
            .shell
            .run(&format!("screencap -p {}", tmp), true)
            .await
            .map_err(|e| AgentError::new(error::INTERNAL_ERROR, e.to_string()))?;
        if !result.ok() {
            return Err(AgentError::new(
                error::INTERNAL_ERROR,
                format!("screencap failed: {}", result.stderr.trim()),
            ));
        }
        let bytes = tokio::fs::read(tmp)
            .await
            .map_err(|e| AgentError::new(error::FILE_NOT_FOUND, e.to_string()))?;
        let _ = tokio::fs::remove_file(tmp).await;
        debug!(size = bytes.len(), "Screen captured");
        Ok(Bytes::from(bytes))
    }
}

// ===== Shell hierarchy =====

/// Hierarchy snapshot via `uiautomator dump`
pub struct ShellHierarchyStrategy {
    shell: Arc<ShellExecutor>,
}

impl ShellHierarchyStrategy {
    pub fn new(shell: Arc<ShellExecutor>) -> Self {
        ShellHierarchyStrategy { shell }
    }
}

#[async_trait::async_trait]
impl HierarchyStrategy for ShellHierarchyStrategy {
    fn name(&self) -> &str {
        "shell"
    }

    fn requires_privilege(&self) -> bool {
        false
    }

    async fn dump(&self) -> Result<Vec<UiElement>, AgentError> {
        let tmp = "/data/local/tmp/droidd-hierarchy.xml";
        let result = self
            .shell
            .run(&format!("uiautomator dump {}", tmp), false)
            .await
            .map_err(|e| AgentError::new(error::HIERARCHY_UNAVAILABLE, e.to_string()))?;
        if !result.ok() {
            return Err(AgentError::new(
                error::HIERARCHY_UNAVAILABLE,
                format!("uiautomator dump failed: {}", result.stderr.trim()),
            ));
        }
        let xml = tokio::fs::read_to_string(tmp)
            .await
            .map_err(|e| AgentError::new(error::HIERARCHY_UNAVAILABLE, e.to_string()))?;
        let _ = tokio::fs::remove_file(tmp).await;
        Ok(parse_uiautomator_dump(&xml))
    }
}

// ===== uiautomator XML parsing =====

/// Parse a uiautomator dump into the element tree. Nodes arrive as
/// nested `<node .../>` elements; attributes are flat name="value" pairs.
pub fn parse_uiautomator_dump(xml: &str) -> Vec<UiElement> {
    let attr_re = regex::Regex::new(r#"([\w-]+)="([^"]*)""#).expect("static regex");
    let bounds_re = regex::Regex::new(r"\[(-?\d+),(-?\d+)\]\[(-?\d+),(-?\d+)\]").expect("static regex");

    let mut roots: Vec<UiElement> = Vec::new();
    let mut stack: Vec<UiElement> = Vec::new();
    let mut counter = 0usize;

    let mut rest = xml;
    while let Some(start) = rest.find("<node") {
        // Close any elements ended before this node opens
        let before = &rest[..start];
        let mut closes = before.matches("</node>").count();
        while closes > 0 {
            pop_node(&mut stack, &mut roots);
            closes -= 1;
        }

        let after = &rest[start..];
        let end = match after.find('>') {
            Some(e) => e,
            None => break,
        };
        let tag = &after[..=end];
        let self_closing = tag.trim_end_matches('>').ends_with('/');

        let mut element = UiElement {
            id: counter.to_string(),
            is_enabled: true,
            is_visible: true,
            ..Default::default()
        };
        counter += 1;

        for cap in attr_re.captures_iter(tag) {
            let value = cap[2].to_string();
            match &cap[1] {
                "class" => element.class_name = value,
                "resource-id" if !value.is_empty() => element.resource_id = Some(value),
                "text" if !value.is_empty() => element.text = Some(value),
                "content-desc" if !value.is_empty() => element.content_description = Some(value),
                "package" if !value.is_empty() => element.package_name = Some(value),
                "clickable" => element.is_clickable = value == "true",
                "enabled" => element.is_enabled = value == "true",
                "scrollable" => element.is_scrollable = value == "true",
                "focusable" => element.is_focusable = value == "true",
                "checked" => element.is_checked = value == "true",
                "selected" => element.is_selected = value == "true",
                "bounds" => {
                    if let Some(b) = bounds_re.captures(&value) {
                        element.bounds = Rect {
                            left: b[1].parse().unwrap_or(0),
                            top: b[2].parse().unwrap_or(0),
                            right: b[3].parse().unwrap_or(0),
                            bottom: b[4].parse().unwrap_or(0),
                        };
                    }
                }
                _ => {}
            }
        }

        if self_closing {
            attach_node(element, &mut stack, &mut roots);
        } else {
            stack.push(element);
        }

        rest = &after[end + 1..];
    }

    // Drain remaining closers
    let mut closes = rest.matches("</node>").count();
    while closes > 0 {
        pop_node(&mut stack, &mut roots);
        closes -= 1;
    }
    while !stack.is_empty() {
        pop_node(&mut stack, &mut roots);
    }

    roots
}

fn pop_node(stack: &mut Vec<UiElement>, roots: &mut Vec<UiElement>) {
    if let Some(done) = stack.pop() {
        attach_node(done, stack, roots);
    }
}

fn attach_node(element: UiElement, stack: &mut [UiElement], roots: &mut Vec<UiElement>) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => roots.push(element),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_DUMP: &str = r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>
<hierarchy rotation="0">
  <node index="0" text="" resource-id="" class="android.widget.FrameLayout" package="com.example.app" content-desc="" checkable="false" checked="false" clickable="false" enabled="true" focusable="false" scrollable="false" selected="false" bounds="[0,0][1080,2400]">
    <node index="0" text="Login" resource-id="com.example.app:id/btn_login" class="android.widget.Button" package="com.example.app" content-desc="Login button" checkable="false" checked="false" clickable="true" enabled="true" focusable="true" scrollable="false" selected="false" bounds="[100,200][300,260]" />
    <node index="1" text="Welcome" resource-id="" class="android.widget.TextView" package="com.example.app" content-desc="" checkable="false" checked="false" clickable="false" enabled="true" focusable="false" scrollable="false" selected="false" bounds="[0,300][1080,360]" />
  </node>
</hierarchy>"#;

    #[test]
    fn test_parse_nested_dump() {
        let roots = parse_uiautomator_dump(SAMPLE_DUMP);
        assert_eq!(roots.len(), 1);
        let root = &roots[0];
        assert_eq!(root.class_name, "android.widget.FrameLayout");
        assert_eq!(root.children.len(), 2);

        let btn = &root.children[0];
        assert_eq!(btn.text.as_deref(), Some("Login"));
        assert_eq!(
            btn.resource_id.as_deref(),
            Some("com.example.app:id/btn_login")
        );
        assert!(btn.is_clickable);
        assert_eq!(btn.bounds.center_x(), 200);
        assert_eq!(btn.content_description.as_deref(), Some("Login button"));
    }

    #[test]
    fn test_parse_empty_dump() {
        assert!(parse_uiautomator_dump("").is_empty());
        assert!(parse_uiautomator_dump("<hierarchy rotation=\"0\"></hierarchy>").is_empty());
    }

    #[test]
    fn test_parse_empty_attrs_become_none() {
        let roots = parse_uiautomator_dump(SAMPLE_DUMP);
        let text_view = &roots[0].children[1];
        assert!(text_view.resource_id.is_none());
        assert!(text_view.content_description.is_none());
        assert_eq!(text_view.text.as_deref(), Some("Welcome"));
    }

    #[test]
    fn test_parse_deep_nesting() {
        let xml = r#"
<hierarchy>
<node class="a" bounds="[0,0][10,10]">
  <node class="b" bounds="[0,0][5,5]">
    <node class="c" bounds="[0,0][2,2]" />
  </node>
  <node class="d" bounds="[5,5][10,10]" />
</node>
</hierarchy>"#;
        let roots = parse_uiautomator_dump(xml);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].class_name, "a");
        assert_eq!(roots[0].children.len(), 2);
        assert_eq!(roots[0].children[0].class_name, "b");
        assert_eq!(roots[0].children[0].children[0].class_name, "c");
        assert_eq!(roots[0].children[1].class_name, "d");
    }
}
