//! `ui.*` handlers: find, dump, click family, text entry, gestures,
//! wait-for polling, toast

use std::sync::Arc;
use std::time::{Duration, Instant};

use droidd_proto::{error, AgentError};
use serde_json::{json, Value};

use crate::router::{CommandHandler, RequestContext};
use crate::selector::{find_all, find_first, Selector, UiElement};
use crate::strategy::{HierarchyStrategy, InputStrategy};

use super::{bool_param, f64_param, i32_param, str_param, u64_param, HandlerDeps};

/// Gap between the two taps of a double click
const DOUBLE_CLICK_GAP: Duration = Duration::from_millis(100);
/// Default wait-for poll cadence
const DEFAULT_POLL_MS: u64 = 500;
/// Default wait-for overall timeout
const DEFAULT_WAIT_TIMEOUT_MS: u64 = 10_000;
/// Default scroll distance in pixels
const DEFAULT_SCROLL_DISTANCE: i32 = 600;
/// Default pinch span in pixels
const DEFAULT_PINCH_DISTANCE: i32 = 300;

struct UiHandler {
    deps: Arc<HandlerDeps>,
    method: &'static str,
}

pub async fn register(deps: &Arc<HandlerDeps>) {
    for method in [
        "ui.find",
        "ui.dump",
        "ui.click",
        "ui.longClick",
        "ui.doubleClick",
        "ui.type",
        "ui.swipe",
        "ui.scroll",
        "ui.waitFor",
        "ui.toast",
        "ui.gesture",
        "ui.pinch",
    ] {
        deps.router
            .register(Arc::new(UiHandler {
                deps: deps.clone(),
                method,
            }))
            .await;
    }
}

#[async_trait::async_trait]
impl CommandHandler for UiHandler {
    fn method(&self) -> &str {
        self.method
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        match self.method {
            "ui.type" if params.get("text").and_then(|v| v.as_str()).is_none() => {
                Err("missing 'text' parameter".to_string())
            }
            "ui.waitFor" if params.get("selector").is_none() => {
                Err("missing 'selector' parameter".to_string())
            }
            "ui.gesture" => match params.get("points").and_then(|v| v.as_array()) {
                Some(points) if points.len() >= 2 => Ok(()),
                _ => Err("'points' must be an array of at least 2 points".to_string()),
            },
            _ => Ok(()),
        }
    }

    async fn handle(&self, params: Value, ctx: RequestContext) -> Result<Value, AgentError> {
        match self.method {
            "ui.find" => self.find(params).await,
            "ui.dump" => self.dump().await,
            "ui.click" => self.click(params).await,
            "ui.longClick" => self.long_click(params).await,
            "ui.doubleClick" => self.double_click(params).await,
            "ui.type" => self.type_text(params).await,
            "ui.swipe" => self.swipe(params).await,
            "ui.scroll" => self.scroll(params).await,
            "ui.waitFor" => self.wait_for(params, ctx).await,
            "ui.toast" => self.toast().await,
            "ui.gesture" => self.gesture(params).await,
            "ui.pinch" => self.pinch(params).await,
            _ => Err(AgentError::not_implemented(self.method)),
        }
    }
}

impl UiHandler {
    async fn hierarchy(&self) -> Result<Arc<dyn HierarchyStrategy>, AgentError> {
        self.deps.resolver.resolve_hierarchy().await.ok_or_else(|| {
            AgentError::new(
                error::HIERARCHY_UNAVAILABLE,
                "No hierarchy strategy available",
            )
        })
    }

    async fn input(&self) -> Result<Arc<dyn InputStrategy>, AgentError> {
        self.deps.resolver.resolve_input().await.ok_or_else(|| {
            AgentError::new(error::PRIVILEGE_REQUIRED, "No input strategy available")
        })
    }

    fn selector_of(params: &Value) -> Result<Option<Selector>, AgentError> {
        match params.get("selector") {
            Some(raw) => {
                let selector: Selector = serde_json::from_value(raw.clone())
                    .map_err(|e| AgentError::invalid_params(format!("bad selector: {}", e)))?;
                Ok(Some(selector))
            }
            None => Ok(None),
        }
    }

    /// Resolve the target point: explicit x/y, else first selector
    /// match's centre
    async fn target_point(&self, params: &Value) -> Result<(i32, i32), AgentError> {
        if let (Some(x), Some(y)) = (i32_param(params, "x"), i32_param(params, "y")) {
            return Ok((x, y));
        }
        let selector = Self::selector_of(params)?.ok_or_else(|| {
            AgentError::invalid_params("either x/y or a selector is required")
        })?;
        let roots = self.hierarchy().await?.dump().await?;
        let element = find_first(&roots, &selector).ok_or_else(|| {
            AgentError::new(error::ELEMENT_NOT_FOUND, "Element not found")
        })?;
        Ok((element.bounds.center_x(), element.bounds.center_y()))
    }

    async fn find(&self, params: Value) -> Result<Value, AgentError> {
        let selector = Self::selector_of(&params)?.unwrap_or_default();
        let roots = self.hierarchy().await?.dump().await?;
        let elements = find_all(&roots, &selector);
        let count = elements.len();
        Ok(json!({
            "elements": elements,
            "count": count,
        }))
    }

    async fn dump(&self) -> Result<Value, AgentError> {
        let roots = self.hierarchy().await?.dump().await?;
        Ok(json!({ "elements": roots }))
    }

    async fn click(&self, params: Value) -> Result<Value, AgentError> {
        // A selector miss is reported in-result, not as a wire error
        let (x, y) = match self.target_point(&params).await {
            Ok(point) => point,
            Err(e) if e.code == error::ELEMENT_NOT_FOUND => {
                return Ok(json!({ "success": false, "error": "Element not found" }));
            }
            Err(e) => return Err(e),
        };
        self.input().await?.tap(x, y).await?;
        Ok(json!({ "success": true, "x": x, "y": y }))
    }

    async fn long_click(&self, params: Value) -> Result<Value, AgentError> {
        let (x, y) = self.target_point(&params).await?;
        let duration = u64_param(&params, "durationMs", 500);
        self.input().await?.long_press(x, y, duration).await?;
        Ok(json!({ "success": true, "x": x, "y": y }))
    }

    async fn double_click(&self, params: Value) -> Result<Value, AgentError> {
        let (x, y) = self.target_point(&params).await?;
        let input = self.input().await?;
        input.tap(x, y).await?;
        tokio::time::sleep(DOUBLE_CLICK_GAP).await;
        input.tap(x, y).await?;
        Ok(json!({ "success": true, "x": x, "y": y }))
    }

    async fn type_text(&self, params: Value) -> Result<Value, AgentError> {
        let text = str_param(&params, "text")
            .ok_or_else(|| AgentError::invalid_params("missing 'text' parameter"))?;
        let input = self.input().await?;

        let has_selector = params.get("selector").is_some();
        if has_selector {
            let (x, y) = self.target_point(&params).await?;
            input.tap(x, y).await?;
            if bool_param(&params, "clearFirst", true) {
                // KEYCODE_MOVE_END, then a bounded burst of KEYCODE_DEL
                input.key_event(123).await?;
                for _ in 0..30 {
                    input.key_event(67).await?;
                }
            }
        }
        input.input_text(&text).await?;
        Ok(json!({ "success": true }))
    }

    async fn swipe(&self, params: Value) -> Result<Value, AgentError> {
        let x1 = i32_param(&params, "x1").unwrap_or(0);
        let y1 = i32_param(&params, "y1").unwrap_or(0);
        let x2 = i32_param(&params, "x2").unwrap_or(0);
        let y2 = i32_param(&params, "y2").unwrap_or(0);
        let duration = u64_param(&params, "durationMs", 300);
        self.input().await?.swipe(x1, y1, x2, y2, duration).await?;
        Ok(json!({ "success": true }))
    }

    async fn scroll(&self, params: Value) -> Result<Value, AgentError> {
        let direction =
            str_param(&params, "direction").unwrap_or_else(|| "down".to_string());
        let (screen_w, screen_h) = self.deps.screen_size().await;
        let centre = params.get("centre").or_else(|| params.get("center"));
        let cx = centre
            .and_then(|c| c.get("x"))
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
            .unwrap_or(screen_w / 2);
        let cy = centre
            .and_then(|c| c.get("y"))
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
            .unwrap_or(screen_h / 2);

        let distance = match f64_param(&params, "amount") {
            Some(amount) => {
                let span = match direction.as_str() {
                    "left" | "right" => screen_w,
                    _ => screen_h,
                };
                (span as f64 * amount.clamp(0.0, 1.0)) as i32
            }
            None => i32_param(&params, "distance").unwrap_or(DEFAULT_SCROLL_DISTANCE),
        };

        let (dx, dy) = match direction.as_str() {
            "up" => (0, -distance),
            "down" => (0, distance),
            "left" => (-distance, 0),
            "right" => (distance, 0),
            other => {
                return Err(AgentError::invalid_params(format!(
                    "invalid direction: {}",
                    other
                )))
            }
        };
        let duration = u64_param(&params, "durationMs", 300);
        self.input()
            .await?
            .swipe(cx, cy, cx + dx, cy + dy, duration)
            .await?;
        Ok(json!({ "success": true, "direction": direction }))
    }

    async fn wait_for(&self, params: Value, ctx: RequestContext) -> Result<Value, AgentError> {
        let selector = Self::selector_of(&params)?
            .ok_or_else(|| AgentError::invalid_params("missing 'selector' parameter"))?;
        let condition =
            str_param(&params, "condition").unwrap_or_else(|| "exists".to_string());
        let wants_gone = match condition.as_str() {
            "exists" => false,
            "gone" => true,
            other => {
                return Err(AgentError::invalid_params(format!(
                    "invalid condition: {}",
                    other
                )))
            }
        };

        let timeout_ms = params
            .get("timeoutMs")
            .or_else(|| params.get("timeout"))
            .and_then(|v| v.as_u64())
            .or_else(|| ctx.timeout_ms())
            .unwrap_or(DEFAULT_WAIT_TIMEOUT_MS);
        let poll_ms = params
            .get("pollMs")
            .or_else(|| params.get("pollInterval"))
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_POLL_MS)
            .max(1);

        let hierarchy = self.hierarchy().await?;
        let started = Instant::now();
        let deadline = started + Duration::from_millis(timeout_ms);

        loop {
            let roots = hierarchy.dump().await?;
            let matched = find_first(&roots, &selector);
            let satisfied = wants_gone == matched.is_none();

            if satisfied {
                return Ok(wait_result(true, matched, false, started));
            }
            if Instant::now() >= deadline {
                // found reports whether the condition was met
                return Ok(wait_result(false, matched, true, started));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(remaining.min(Duration::from_millis(poll_ms))).await;
        }
    }

    async fn toast(&self) -> Result<Value, AgentError> {
        match self.deps.toast.last().await {
            Some((text, timestamp)) => Ok(json!({ "text": text, "timestamp": timestamp })),
            None => Ok(json!({ "text": Value::Null, "timestamp": Value::Null })),
        }
    }

    async fn gesture(&self, params: Value) -> Result<Value, AgentError> {
        let raw = params
            .get("points")
            .and_then(|v| v.as_array())
            .ok_or_else(|| AgentError::invalid_params("missing 'points' parameter"))?;
        let mut points = Vec::with_capacity(raw.len());
        for p in raw {
            let x = p.get("x").and_then(|v| v.as_i64());
            let y = p.get("y").and_then(|v| v.as_i64());
            match (x, y) {
                (Some(x), Some(y)) => points.push((x as i32, y as i32)),
                _ => return Err(AgentError::invalid_params("points must carry x and y")),
            }
        }
        let duration = u64_param(&params, "durationMs", 500);
        self.input().await?.gesture(&points, duration).await?;
        Ok(json!({ "success": true }))
    }

    async fn pinch(&self, params: Value) -> Result<Value, AgentError> {
        let direction = str_param(&params, "direction").unwrap_or_else(|| "out".to_string());
        if direction != "in" && direction != "out" {
            return Err(AgentError::invalid_params(format!(
                "invalid pinch direction: {}",
                direction
            )));
        }
        let (screen_w, screen_h) = self.deps.screen_size().await;
        let centre = params.get("centre").or_else(|| params.get("center"));
        let cx = centre
            .and_then(|c| c.get("x"))
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
            .unwrap_or(screen_w / 2);
        let cy = centre
            .and_then(|c| c.get("y"))
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
            .unwrap_or(screen_h / 2);
        let distance = i32_param(&params, "distance").unwrap_or(DEFAULT_PINCH_DISTANCE);
        let duration = u64_param(&params, "durationMs", 400);

        let near = 40;
        let input = self.input().await?;
        // Two swipes radiating from (out) or converging to (in) the centre
        let (left, right) = if direction == "out" {
            (
                ((cx - near, cy), (cx - distance, cy)),
                ((cx + near, cy), (cx + distance, cy)),
            )
        } else {
            (
                ((cx - distance, cy), (cx - near, cy)),
                ((cx + distance, cy), (cx + near, cy)),
            )
        };
        let (a, b) = tokio::join!(
            input.swipe(left.0 .0, left.0 .1, left.1 .0, left.1 .1, duration),
            input.swipe(right.0 .0, right.0 .1, right.1 .0, right.1 .1, duration),
        );
        a?;
        b?;
        Ok(json!({ "success": true, "direction": direction }))
    }
}

fn wait_result(
    satisfied: bool,
    matched: Option<UiElement>,
    timed_out: bool,
    started: Instant,
) -> Value {
    let mut out = json!({
        "found": satisfied,
        "timed_out": timed_out,
        "elapsed": started.elapsed().as_millis() as u64,
    });
    if let Some(element) = matched {
        out["element"] = serde_json::to_value(element).unwrap_or(Value::Null);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Capabilities, CapabilityResolver};
    use crate::config::AgentConfig;
    use crate::perf::PerfEngine;
    use crate::router::CommandRouter;
    use crate::selector::Rect;
    use crate::shell::ShellExecutor;
    use crate::strategy::Point;
    use droidd_proto::Envelope;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::{broadcast, RwLock};

    /// Records taps/swipes instead of driving a device
    #[derive(Default)]
    struct RecordingInput {
        taps: StdMutex<Vec<(i32, i32)>>,
        swipes: StdMutex<Vec<(i32, i32, i32, i32)>>,
        texts: StdMutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl InputStrategy for RecordingInput {
        fn name(&self) -> &str {
            "recording"
        }
        fn requires_privilege(&self) -> bool {
            false
        }
        async fn tap(&self, x: i32, y: i32) -> Result<(), AgentError> {
            self.taps.lock().unwrap().push((x, y));
            Ok(())
        }
        async fn swipe(
            &self,
            x1: i32,
            y1: i32,
            x2: i32,
            y2: i32,
            _d: u64,
        ) -> Result<(), AgentError> {
            self.swipes.lock().unwrap().push((x1, y1, x2, y2));
            Ok(())
        }
        async fn long_press(&self, x: i32, y: i32, _d: u64) -> Result<(), AgentError> {
            self.taps.lock().unwrap().push((x, y));
            Ok(())
        }
        async fn key_event(&self, _k: u32) -> Result<(), AgentError> {
            Ok(())
        }
        async fn input_text(&self, t: &str) -> Result<(), AgentError> {
            self.texts.lock().unwrap().push(t.to_string());
            Ok(())
        }
        async fn gesture(&self, points: &[Point], _d: u64) -> Result<(), AgentError> {
            let mut swipes = self.swipes.lock().unwrap();
            for pair in points.windows(2) {
                swipes.push((pair[0].0, pair[0].1, pair[1].0, pair[1].1));
            }
            Ok(())
        }
    }

    /// Serves a fixed tree; flips to empty after `flip_after` dumps
    struct FixedHierarchy {
        roots: Vec<UiElement>,
        dumps: StdMutex<usize>,
        empty_after: Option<usize>,
    }

    #[async_trait::async_trait]
    impl HierarchyStrategy for FixedHierarchy {
        fn name(&self) -> &str {
            "fixed"
        }
        fn requires_privilege(&self) -> bool {
            false
        }
        async fn dump(&self) -> Result<Vec<UiElement>, AgentError> {
            let mut dumps = self.dumps.lock().unwrap();
            *dumps += 1;
            if let Some(n) = self.empty_after {
                if *dumps > n {
                    return Ok(Vec::new());
                }
            }
            Ok(self.roots.clone())
        }
    }

    fn button_tree() -> Vec<UiElement> {
        vec![UiElement {
            id: "0".into(),
            class_name: "android.widget.Button".into(),
            bounds: Rect {
                left: 100,
                top: 200,
                right: 300,
                bottom: 260,
            },
            resource_id: Some("btn_x".into()),
            text: Some("Go".into()),
            is_clickable: true,
            is_enabled: true,
            is_visible: true,
            ..Default::default()
        }]
    }

    struct Fixture {
        deps: Arc<HandlerDeps>,
        input: Arc<RecordingInput>,
    }

    async fn fixture(roots: Vec<UiElement>, empty_after: Option<usize>) -> Fixture {
        let shell = Arc::new(ShellExecutor::new(false));
        let resolver = Arc::new(CapabilityResolver::new(Capabilities {
            privileged_shell: false,
            accessibility: false,
            platform_api_level: 34,
        }));
        let input = Arc::new(RecordingInput::default());
        resolver.register_input(input.clone()).await;
        resolver
            .register_hierarchy(Arc::new(FixedHierarchy {
                roots,
                dumps: StdMutex::new(0),
                empty_after,
            }))
            .await;

        let (shutdown_tx, _) = broadcast::channel(1);
        let deps = HandlerDeps::new(
            resolver,
            shell.clone(),
            PerfEngine::new(shell),
            Arc::new(CommandRouter::new()),
            Arc::new(RwLock::new(AgentConfig::default())),
            Arc::new(crate::event_bus::EventBus::new()),
            shutdown_tx,
        );
        register(&deps).await;
        Fixture { deps, input }
    }

    async fn call(f: &Fixture, method: &str, params: Value) -> Envelope {
        let req = Envelope::request(method, Some(params));
        f.deps.router.dispatch(&req).await
    }

    #[tokio::test]
    async fn test_find_by_selector() {
        let f = fixture(button_tree(), None).await;
        let resp = call(&f, "ui.find", json!({"selector": {"resourceId": "btn_x"}})).await;
        let result = resp.result.unwrap();
        assert_eq!(result["count"], 1);
        assert_eq!(result["elements"][0]["text"], "Go");
    }

    #[tokio::test]
    async fn test_find_empty_selector_returns_all() {
        let f = fixture(button_tree(), None).await;
        let resp = call(&f, "ui.find", json!({"selector": {}})).await;
        assert_eq!(resp.result.unwrap()["count"], 1);
    }

    #[tokio::test]
    async fn test_click_by_coordinates() {
        let f = fixture(button_tree(), None).await;
        let resp = call(&f, "ui.click", json!({"x": 50, "y": 60})).await;
        let result = resp.result.unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["x"], 50);
        assert_eq!(f.input.taps.lock().unwrap()[0], (50, 60));
    }

    #[tokio::test]
    async fn test_click_by_selector_hits_centre() {
        let f = fixture(button_tree(), None).await;
        let resp = call(&f, "ui.click", json!({"selector": {"resourceId": "btn_x"}})).await;
        let result = resp.result.unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["x"], 200);
        assert_eq!(result["y"], 230);
        assert_eq!(f.input.taps.lock().unwrap()[0], (200, 230));
    }

    #[tokio::test]
    async fn test_click_miss_is_in_result_failure() {
        let f = fixture(Vec::new(), None).await;
        let resp = call(&f, "ui.click", json!({"selector": {"resourceId": "btn_x"}})).await;
        // Success-shaped response with an in-result failure indicator
        assert!(resp.error.is_none());
        let result = resp.result.unwrap();
        assert_eq!(result["success"], false);
        assert_eq!(result["error"], "Element not found");
    }

    #[tokio::test]
    async fn test_double_click_taps_twice() {
        let f = fixture(button_tree(), None).await;
        let resp = call(&f, "ui.doubleClick", json!({"x": 10, "y": 20})).await;
        assert_eq!(resp.result.unwrap()["success"], true);
        assert_eq!(f.input.taps.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_type_text() {
        let f = fixture(button_tree(), None).await;
        let resp = call(&f, "ui.type", json!({"text": "hello"})).await;
        assert_eq!(resp.result.unwrap()["success"], true);
        assert_eq!(f.input.texts.lock().unwrap()[0], "hello");
    }

    #[tokio::test]
    async fn test_scroll_down_offsets_endpoint() {
        let f = fixture(button_tree(), None).await;
        let resp = call(
            &f,
            "ui.scroll",
            json!({"direction": "down", "distance": 400, "centre": {"x": 500, "y": 1000}}),
        )
        .await;
        assert_eq!(resp.result.unwrap()["success"], true);
        let swipes = f.input.swipes.lock().unwrap();
        assert_eq!(swipes[0], (500, 1000, 500, 1400));
    }

    #[tokio::test]
    async fn test_scroll_rejects_bad_direction() {
        let f = fixture(button_tree(), None).await;
        let resp = call(&f, "ui.scroll", json!({"direction": "diagonal"})).await;
        assert!(resp.error.is_some());
    }

    #[tokio::test]
    async fn test_wait_for_exists_immediate() {
        let f = fixture(button_tree(), None).await;
        let resp = call(
            &f,
            "ui.waitFor",
            json!({"selector": {"resourceId": "btn_x"}, "condition": "exists"}),
        )
        .await;
        let result = resp.result.unwrap();
        assert_eq!(result["found"], true);
        assert_eq!(result["timed_out"], false);
        assert_eq!(result["element"]["resourceId"], "btn_x");
    }

    #[tokio::test]
    async fn test_wait_for_zero_timeout_unsatisfied() {
        let f = fixture(Vec::new(), None).await;
        let resp = call(
            &f,
            "ui.waitFor",
            json!({"selector": {"resourceId": "btn_x"}, "condition": "exists", "timeoutMs": 0}),
        )
        .await;
        let result = resp.result.unwrap();
        assert_eq!(result["found"], false);
        assert_eq!(result["timed_out"], true);
    }

    #[tokio::test]
    async fn test_wait_for_gone_after_polls() {
        let f = fixture(button_tree(), Some(2)).await;
        let resp = call(
            &f,
            "ui.waitFor",
            json!({
                "selector": {"resourceId": "btn_x"},
                "condition": "gone",
                "timeoutMs": 3000,
                "pollMs": 10,
            }),
        )
        .await;
        let result = resp.result.unwrap();
        assert_eq!(result["found"], true);
        assert_eq!(result["timed_out"], false);
    }

    #[tokio::test]
    async fn test_wait_for_gone_timeout() {
        let f = fixture(button_tree(), None).await;
        let resp = call(
            &f,
            "ui.waitFor",
            json!({
                "selector": {"resourceId": "btn_x"},
                "condition": "gone",
                "timeoutMs": 30,
                "pollMs": 10,
            }),
        )
        .await;
        let result = resp.result.unwrap();
        assert_eq!(result["found"], false);
        assert_eq!(result["timed_out"], true);
        // The still-present element rides along for diagnostics
        assert_eq!(result["element"]["resourceId"], "btn_x");
    }

    #[tokio::test]
    async fn test_gesture_path() {
        let f = fixture(button_tree(), None).await;
        let resp = call(
            &f,
            "ui.gesture",
            json!({"points": [{"x": 0, "y": 0}, {"x": 10, "y": 10}, {"x": 20, "y": 0}]}),
        )
        .await;
        assert_eq!(resp.result.unwrap()["success"], true);
        assert_eq!(f.input.swipes.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_gesture_needs_two_points() {
        let f = fixture(button_tree(), None).await;
        let resp = call(&f, "ui.gesture", json!({"points": [{"x": 0, "y": 0}]})).await;
        assert!(resp.error.is_some());
    }

    #[tokio::test]
    async fn test_pinch_out_two_swipes() {
        let f = fixture(button_tree(), None).await;
        let resp = call(
            &f,
            "ui.pinch",
            json!({"direction": "out", "centre": {"x": 500, "y": 500}, "distance": 200}),
        )
        .await;
        let result = resp.result.unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["direction"], "out");
        let swipes = f.input.swipes.lock().unwrap();
        assert_eq!(swipes.len(), 2);
        // Radiating away from the centre on both sides
        assert!(swipes.iter().any(|s| s.2 == 300));
        assert!(swipes.iter().any(|s| s.2 == 700));
    }

    #[tokio::test]
    async fn test_toast_empty_then_recorded() {
        let f = fixture(button_tree(), None).await;
        let resp = call(&f, "ui.toast", json!({})).await;
        assert!(resp.result.unwrap()["text"].is_null());

        f.deps.toast.record("Saved").await;
        let resp = call(&f, "ui.toast", json!({})).await;
        assert_eq!(resp.result.unwrap()["text"], "Saved");
    }
}
