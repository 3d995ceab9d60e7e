//! UI element model and selector matching.
//!
//! Selector fields are AND-combined; unspecified fields are wildcards.
//! Matching walks the hierarchy in pre-order, ties broken by first
//! encounter.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Element bounding rectangle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn center_x(&self) -> i32 {
        (self.left + self.right) / 2
    }

    pub fn center_y(&self) -> i32 {
        (self.top + self.bottom) / 2
    }
}

/// A node of the UI hierarchy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiElement {
    pub id: String,
    pub class_name: String,
    pub bounds: Rect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(default)]
    pub is_clickable: bool,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default)]
    pub is_scrollable: bool,
    #[serde(default)]
    pub is_focusable: bool,
    #[serde(default)]
    pub is_checked: bool,
    #[serde(default)]
    pub is_selected: bool,
    #[serde(default = "default_true")]
    pub is_visible: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<UiElement>,
}

fn default_true() -> bool {
    true
}

/// Element selector. All set fields must match; text and description
/// support exact / contains / regex variants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_matches: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clickable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrollable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focusable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
    /// At least one direct child must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child: Option<Box<Selector>>,
    /// The element's parent must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<Selector>>,
}

impl Selector {
    /// True when no field constrains the match (matches every element)
    pub fn is_empty(&self) -> bool {
        self.resource_id.is_none()
            && self.text.is_none()
            && self.text_contains.is_none()
            && self.text_matches.is_none()
            && self.class_name.is_none()
            && self.description.is_none()
            && self.description_contains.is_none()
            && self.package_name.is_none()
            && self.enabled.is_none()
            && self.clickable.is_none()
            && self.scrollable.is_none()
            && self.focusable.is_none()
            && self.checked.is_none()
            && self.selected.is_none()
            && self.child.is_none()
            && self.parent.is_none()
    }

    /// Match one element, given its parent (for `parent` constraints).
    /// An invalid `textMatches` regex matches nothing.
    pub fn matches(&self, element: &UiElement, parent: Option<&UiElement>) -> bool {
        if let Some(rid) = &self.resource_id {
            if element.resource_id.as_deref() != Some(rid.as_str()) {
                return false;
            }
        }
        if let Some(text) = &self.text {
            if element.text.as_deref() != Some(text.as_str()) {
                return false;
            }
        }
        if let Some(fragment) = &self.text_contains {
            match &element.text {
                Some(t) if t.contains(fragment.as_str()) => {}
                _ => return false,
            }
        }
        if let Some(pattern) = &self.text_matches {
            let matched = Regex::new(pattern)
                .ok()
                .and_then(|re| element.text.as_deref().map(|t| re.is_match(t)))
                .unwrap_or(false);
            if !matched {
                return false;
            }
        }
        if let Some(class) = &self.class_name {
            if element.class_name != *class {
                return false;
            }
        }
        if let Some(desc) = &self.description {
            if element.content_description.as_deref() != Some(desc.as_str()) {
                return false;
            }
        }
        if let Some(fragment) = &self.description_contains {
            match &element.content_description {
                Some(d) if d.contains(fragment.as_str()) => {}
                _ => return false,
            }
        }
        if let Some(pkg) = &self.package_name {
            if element.package_name.as_deref() != Some(pkg.as_str()) {
                return false;
            }
        }
        if let Some(v) = self.enabled {
            if element.is_enabled != v {
                return false;
            }
        }
        if let Some(v) = self.clickable {
            if element.is_clickable != v {
                return false;
            }
        }
        if let Some(v) = self.scrollable {
            if element.is_scrollable != v {
                return false;
            }
        }
        if let Some(v) = self.focusable {
            if element.is_focusable != v {
                return false;
            }
        }
        if let Some(v) = self.checked {
            if element.is_checked != v {
                return false;
            }
        }
        if let Some(v) = self.selected {
            if element.is_selected != v {
                return false;
            }
        }
        if let Some(child_sel) = &self.child {
            let any = element
                .children
                .iter()
                .any(|c| child_sel.matches(c, Some(element)));
            if !any {
                return false;
            }
        }
        if let Some(parent_sel) = &self.parent {
            match parent {
                Some(p) => {
                    if !parent_sel.matches(p, None) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }
}

/// Collect all matches across the roots in pre-order
pub fn find_all(roots: &[UiElement], selector: &Selector) -> Vec<UiElement> {
    let mut out = Vec::new();
    for root in roots {
        walk(root, None, selector, &mut out);
    }
    out
}

/// First match in pre-order, if any
pub fn find_first(roots: &[UiElement], selector: &Selector) -> Option<UiElement> {
    find_all(roots, selector).into_iter().next()
}

/// Count every node in the forest
pub fn tree_size(roots: &[UiElement]) -> usize {
    roots.iter().map(count_nodes).sum()
}

fn count_nodes(element: &UiElement) -> usize {
    1 + element.children.iter().map(count_nodes).sum::<usize>()
}

fn walk<'a>(
    element: &'a UiElement,
    parent: Option<&'a UiElement>,
    selector: &Selector,
    out: &mut Vec<UiElement>,
) {
    if selector.matches(element, parent) {
        out.push(element.clone());
    }
    for child in &element.children {
        walk(child, Some(element), selector, out);
    }
}
